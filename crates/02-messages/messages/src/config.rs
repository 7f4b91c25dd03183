//! Configuration tree read once at startup by every process.
//!
//! Every section and field has a default, so an absent file or a sparse file
//! both yield a runnable system; the file only overrides what it names.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}'")]
    Io {
        /// Path as supplied by the caller.
        path: String,
        /// OS-level cause.
        #[source]
        source: std::io::Error,
    },
    /// The file content is not valid TOML for the config tree.
    #[error("failed to parse config file '{path}'")]
    Parse {
        /// Path as supplied by the caller.
        path: String,
        /// Parser cause.
        #[source]
        source: toml::de::Error,
    },
}

/// Complete system configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub controller: ControllerConfig,
    pub analyzer: AnalyzerConfig,
    pub system: SystemConfig,
    pub launcher: LauncherConfig,
    pub channels: ChannelNames,
}

impl Config {
    /// Loads the configuration, falling back to defaults when `path` is
    /// `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Camera geometry. Position and rotation describe the mounting pose the
/// simulator adapter applies.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fov: f32,
    /// Mount position `(x, y, z)` in vehicle coordinates, meters.
    pub position: [f32; 3],
    /// Mount rotation `(pitch, yaw, roll)` in degrees.
    pub rotation: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            fov: 90.0,
            position: [1.5, 0.0, 2.4],
            rotation: [-15.0, 0.0, 0.0],
        }
    }
}

/// Region-of-interest trapezoid as fractions of the frame.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoiRatios {
    pub bottom_left: f32,
    pub top_left: f32,
    pub top_right: f32,
    pub bottom_right: f32,
    /// Fraction of the height where the trapezoid's top edge sits.
    pub top: f32,
}

impl Default for RoiRatios {
    fn default() -> Self {
        Self {
            bottom_left: 0.05,
            top_left: 0.35,
            top_right: 0.65,
            bottom_right: 0.95,
            top: 0.5,
        }
    }
}

/// Computer-vision detector tuning. All of these are updatable at runtime
/// through the parameter topic, within the documented bounds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub canny_low: i32,
    pub canny_high: i32,
    pub hough_rho: f32,
    pub hough_theta_deg: f32,
    pub hough_threshold: u32,
    pub hough_min_line_len: u32,
    pub hough_max_line_gap: u32,
    pub smoothing_factor: f32,
    pub roi: RoiRatios,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            canny_low: 50,
            canny_high: 150,
            hough_rho: 2.0,
            hough_theta_deg: 1.0,
            hough_threshold: 50,
            hough_min_line_len: 40,
            hough_max_line_gap: 100,
            smoothing_factor: 0.7,
            roi: RoiRatios::default(),
        }
    }
}

/// Steering law selection.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMethod {
    #[default]
    Pd,
    Pid,
}

/// Adaptive throttle policy: `base` up to `steer_threshold`, linear down to
/// `min` at `steer_max`, flat beyond.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottlePolicy {
    pub base: f32,
    pub min: f32,
    pub steer_threshold: f32,
    pub steer_max: f32,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            base: 0.3,
            min: 0.1,
            steer_threshold: 0.15,
            steer_max: 0.7,
        }
    }
}

/// Steering controller gains and throttle policy.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub method: ControllerMethod,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub throttle: ThrottlePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            method: ControllerMethod::Pd,
            kp: 0.5,
            ki: 0.01,
            kd: 0.1,
            throttle: ThrottlePolicy::default(),
        }
    }
}

/// Lane analyzer thresholds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub drift_threshold: f32,
    pub departure_threshold: f32,
    pub lane_width_meters: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.15,
            departure_threshold: 0.35,
            lane_width_meters: 3.7,
        }
    }
}

/// Cross-process system knobs.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SystemConfig {
    pub synchronous_mode: bool,
    pub fixed_delta_seconds: f64,
    /// Frames for which the vehicle process ignores incoming controls and
    /// applies `(0, base_throttle, 0)`.
    pub warmup_frames: u64,
    pub base_throttle: f32,
    /// How long the vehicle loop waits for a control before falling back.
    pub detector_timeout_ms: u64,
    /// Vehicle state broadcast interval; default keeps it at 2 Hz.
    pub state_publish_interval_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            synchronous_mode: true,
            fixed_delta_seconds: 0.05,
            warmup_frames: 50,
            base_throttle: 0.3,
            detector_timeout_ms: 1000,
            state_publish_interval_ms: 500,
        }
    }
}

impl SystemConfig {
    /// Control wait budget as a `Duration`.
    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    /// State broadcast interval as a `Duration`.
    pub fn state_publish_interval(&self) -> Duration {
        Duration::from_millis(self.state_publish_interval_ms)
    }
}

/// Launcher and channel-attachment timing.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    pub retry_count: u32,
    pub retry_delay_s: f64,
    pub decision_init_timeout_s: f64,
    pub detection_init_timeout_s: f64,
    pub process_stop_timeout_s: f64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            retry_count: 20,
            retry_delay_s: 0.5,
            decision_init_timeout_s: 3.0,
            detection_init_timeout_s: 4.0,
            process_stop_timeout_s: 5.0,
        }
    }
}

impl LauncherConfig {
    /// Delay between shared-memory attach attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_s)
    }

    /// Grace period for decision-server startup.
    pub fn decision_init_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.decision_init_timeout_s)
    }

    /// Grace period for detection-server startup.
    pub fn detection_init_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.detection_init_timeout_s)
    }

    /// SIGTERM-to-SIGKILL grace period for child shutdown.
    pub fn process_stop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.process_stop_timeout_s)
    }
}

/// Names of the three shared-memory segments.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelNames {
    pub image: String,
    pub detection: String,
    pub control: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            image: "camera_feed".to_string(),
            detection: "detection_results".to_string(),
            control: "control_commands".to_string(),
        }
    }
}
