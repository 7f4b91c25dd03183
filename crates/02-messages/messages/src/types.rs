//! Core data model exchanged between the pipeline processes.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors raised while decoding fixed-layout payloads or wire messages.
#[derive(Debug, Error)]
pub enum MessageError {
    /// A payload buffer had the wrong length for its message kind.
    #[error("payload of {len} bytes, expected {expected}")]
    PayloadLen {
        /// Bytes supplied.
        len: usize,
        /// Bytes the layout requires.
        expected: usize,
    },

    /// A control payload carried an unknown mode discriminant.
    #[error("unknown control mode byte {0}")]
    BadMode(u8),

    /// An image header disagreed with the configured frame shape.
    #[error("image of {height}x{width}x{channels}, expected {exp_height}x{exp_width}x3")]
    BadImageShape {
        /// Height found in the header.
        height: u32,
        /// Width found in the header.
        width: u32,
        /// Channel count found in the header.
        channels: u32,
        /// Configured height.
        exp_height: u32,
        /// Configured width.
        exp_width: u32,
    },
}

/// Why a runtime parameter update was rejected.
///
/// Rejections are logged and the current value stays in effect; they never
/// interrupt a server loop.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    /// The parameter name is not in the updatable set for this server.
    #[error("unknown parameter '{name}'")]
    Unknown {
        /// Name as received on the wire.
        name: String,
    },
    /// The value is outside the documented bounds for this parameter.
    #[error("value {value} out of range [{min}, {max}] for '{name}'")]
    OutOfRange {
        /// Parameter name.
        name: String,
        /// Rejected value.
        value: f64,
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (inclusive).
        max: f64,
    },
    /// The parameter exists but does not apply to the active configuration,
    /// e.g. `ki` on a PD controller.
    #[error("parameter '{name}' does not apply: {reason}")]
    NotApplicable {
        /// Parameter name.
        name: String,
        /// Short human-readable explanation.
        reason: &'static str,
    },
}

/// Wall-clock seconds since the Unix epoch as `f64`.
///
/// Timestamps cross process boundaries, so they use the wall clock; local
/// intervals (timeouts, stats windows) use `Instant` instead.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One detected lane boundary in image pixel coordinates.
///
/// `(x1, y1)` is the bottom endpoint and `(x2, y2)` the top endpoint of the
/// vertical band the detector projects onto.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Lane {
    /// Linear interpolation of the segment's x coordinate at row `y`.
    /// Extrapolates beyond the endpoints; degenerate segments return `x1`.
    pub fn x_at(&self, y: f32) -> f32 {
        if self.y2 == self.y1 {
            return self.x1 as f32;
        }
        let t = (y - self.y1 as f32) / (self.y2 as f32 - self.y1 as f32);
        self.x1 as f32 + t * (self.x2 as f32 - self.x1 as f32)
    }

    /// Segment slope `dy/dx`, `None` for vertical segments.
    pub fn slope(&self) -> Option<f32> {
        let dx = self.x2 - self.x1;
        if dx == 0 {
            None
        } else {
            Some((self.y2 - self.y1) as f32 / dx as f32)
        }
    }

    /// Euclidean length in pixels.
    pub fn length(&self) -> f32 {
        let dx = (self.x2 - self.x1) as f32;
        let dy = (self.y2 - self.y1) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One detection result as published on the detection channel.
///
/// A lane is either fully present or entirely absent; `frame_id` and
/// `timestamp` are carried through from the image that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DetectionFrame {
    pub left_lane: Option<Lane>,
    pub right_lane: Option<Lane>,
    pub processing_time_ms: f32,
    pub frame_id: u64,
    pub timestamp: f64,
}

impl DetectionFrame {
    /// True when both lane boundaries were found.
    pub fn has_both_lanes(&self) -> bool {
        self.left_lane.is_some() && self.right_lane.is_some()
    }
}

/// Control authority the decision server is operating under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ControlMode {
    Manual,
    Autopilot,
    LaneKeeping,
    EmergencyStop,
}

impl ControlMode {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            ControlMode::Manual => 0,
            ControlMode::Autopilot => 1,
            ControlMode::LaneKeeping => 2,
            ControlMode::EmergencyStop => 3,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Result<Self, MessageError> {
        match b {
            0 => Ok(ControlMode::Manual),
            1 => Ok(ControlMode::Autopilot),
            2 => Ok(ControlMode::LaneKeeping),
            3 => Ok(ControlMode::EmergencyStop),
            other => Err(MessageError::BadMode(other)),
        }
    }
}

/// One control command as published on the control channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlFrame {
    /// Steering in `[-1, 1]`, negative is left.
    pub steering: f32,
    /// Throttle in `[0, 1]`.
    pub throttle: f32,
    /// Brake in `[0, 1]`.
    pub brake: f32,
    pub mode: ControlMode,
    /// Whether the detection this command derives from tracked the left
    /// lane boundary.
    pub left_lane_detected: bool,
    /// Same for the right lane boundary.
    pub right_lane_detected: bool,
    /// Normalized lateral offset in `[-1, 1]` when both lanes were visible.
    pub lateral_offset: Option<f32>,
    /// Heading angle in degrees when at least one lane was visible.
    pub heading_angle: Option<f32>,
    pub frame_id: u64,
    pub timestamp: f64,
    pub processing_time_ms: f32,
}

impl ControlFrame {
    /// Clamps every actuation value into its valid range.
    ///
    /// Always applied before publication so no out-of-range command ever
    /// reaches the vehicle.
    pub fn clamped(mut self) -> Self {
        self.steering = self.steering.clamp(-1.0, 1.0);
        self.throttle = self.throttle.clamp(0.0, 1.0);
        self.brake = self.brake.clamp(0.0, 1.0);
        self.lateral_offset = self.lateral_offset.map(|v| v.clamp(-1.0, 1.0));
        self
    }
}

/// Position of the vehicle relative to the lane, thresholded on
/// `|offset| / lane_width`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DepartureStatus {
    NoLanes,
    Centered,
    LeftDrift,
    RightDrift,
    LeftDeparture,
    RightDeparture,
}

/// Owned RGB frame of fixed shape `(height, width, 3)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuf {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ImageBuf {
    /// Allocates an all-black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    /// Wraps an existing RGB buffer; `data.len()` must equal `w * h * 3`.
    pub fn from_vec(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MessageError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(MessageError::PayloadLen {
                len: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB bytes, row-major, 3 bytes per pixel.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw RGB bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// RGB triple at `(x, y)`; caller keeps coordinates in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Writes the RGB triple at `(x, y)`, ignoring out-of-bounds coordinates.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data[idx..idx + 3].copy_from_slice(&rgb);
    }
}

/// Target server of a parameter update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamCategory {
    Detection,
    Decision,
}

impl ParamCategory {
    /// Topic string the broker republishes this category under.
    pub fn topic(self) -> &'static str {
        match self {
            ParamCategory::Detection => "detection",
            ParamCategory::Decision => "decision",
        }
    }
}

/// Parameter update sent from a viewer through the broker to one server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub category: ParamCategory,
    pub parameter: String,
    pub value: f64,
    pub timestamp: f64,
}

/// Action a viewer can request from the vehicle process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Pause,
    Resume,
    Respawn,
    Quit,
}

/// Action request routed through the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: ActionKind,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    pub timestamp: f64,
}

/// Vehicle state broadcast from the vehicle process to viewers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub timestamp: f64,
    pub frame_id: u64,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    /// Forward speed in m/s.
    pub velocity: f64,
    pub steering: f32,
    pub throttle: f32,
    pub brake: f32,
    pub left_lane_detected: bool,
    pub right_lane_detected: bool,
    pub paused: bool,
}
