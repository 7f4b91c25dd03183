//! Decision controller: detection in, clamped control command out.

use crate::analyzer::{LaneAnalyzer, LaneMetrics};
use crate::steering::{PdController, PidController, SteeringLaw};
use messages::{
    CameraConfig, ControlFrame, ControlMode, ControllerConfig, ControllerMethod, DetectionFrame,
    ParamError, ThrottlePolicy,
};

/// Brake applied when no steering can be computed.
const NO_LANE_BRAKE: f32 = 0.3;

/// Turns lane detections into `(steering, throttle, brake)` commands.
///
/// Holds the only mutable control state in the pipeline: the steering law's
/// integrator and the runtime-tunable gains and throttle policy.
pub struct DecisionController {
    analyzer: LaneAnalyzer,
    law: SteeringLaw,
    throttle: ThrottlePolicy,
    mode: ControlMode,
}

impl DecisionController {
    /// Builds the controller for the configured camera shape and steering
    /// method.
    pub fn new(
        camera: &CameraConfig,
        controller: &ControllerConfig,
        analyzer: &messages::AnalyzerConfig,
    ) -> Self {
        let law = match controller.method {
            ControllerMethod::Pd => {
                SteeringLaw::Pd(PdController::new(controller.kp, controller.kd))
            }
            ControllerMethod::Pid => SteeringLaw::Pid(PidController::new(
                controller.kp,
                controller.ki,
                controller.kd,
            )),
        };
        Self {
            analyzer: LaneAnalyzer::new(camera.width, camera.height, analyzer),
            law,
            throttle: controller.throttle,
            mode: ControlMode::LaneKeeping,
        }
    }

    /// Computes the control command for one detection.
    ///
    /// When steering cannot be determined the no-lane fallback
    /// `(0, 0, 0.3)` is emitted. `frame_id` and `timestamp` are carried
    /// through from the detection; `processing_time_ms` is filled in by the
    /// server loop that measures it.
    pub fn process(&mut self, detection: &DetectionFrame) -> ControlFrame {
        let metrics = self.metrics(detection);
        if !metrics.has_both_lanes {
            self.law.on_lanes_lost();
        }

        let (steering, throttle, brake) = match self.law.compute(&metrics) {
            Some(steering) => (steering, self.adaptive_throttle(steering), 0.0),
            None => (0.0, 0.0, NO_LANE_BRAKE),
        };

        ControlFrame {
            steering,
            throttle,
            brake,
            mode: self.mode,
            left_lane_detected: metrics.has_left_lane,
            right_lane_detected: metrics.has_right_lane,
            lateral_offset: metrics.lateral_offset_normalized,
            heading_angle: metrics.heading_angle_deg,
            frame_id: detection.frame_id,
            timestamp: detection.timestamp,
            processing_time_ms: 0.0,
        }
        .clamped()
    }

    /// Metrics for the detection's lanes, exposed for stats and tests.
    pub fn metrics(&self, detection: &DetectionFrame) -> LaneMetrics {
        self.analyzer
            .metrics(detection.left_lane.as_ref(), detection.right_lane.as_ref())
    }

    /// Piecewise-linear throttle: `base` while steering is small, ramping
    /// down to `min` between `steer_threshold` and `steer_max`, flat after.
    pub fn adaptive_throttle(&self, steering: f32) -> f32 {
        let policy = &self.throttle;
        let abs = steering.abs();
        if abs <= policy.steer_threshold {
            return policy.base;
        }
        let range = (policy.steer_max - policy.steer_threshold).max(1e-6);
        let t = ((abs - policy.steer_threshold) / range).clamp(0.0, 1.0);
        let throttle = policy.base - (policy.base - policy.min) * t;
        throttle.clamp(policy.min.min(policy.base), policy.base)
    }

    /// Applies one runtime parameter update within the documented bounds.
    /// `ki` is rejected on a PD controller.
    pub fn update_parameter(&mut self, name: &str, value: f64) -> Result<(), ParamError> {
        let check = |min: f64, max: f64| -> Result<f32, ParamError> {
            if value < min || value > max {
                Err(ParamError::OutOfRange {
                    name: name.to_string(),
                    value,
                    min,
                    max,
                })
            } else {
                Ok(value as f32)
            }
        };

        match name {
            "kp" => {
                let v = check(0.0, 2.0)?;
                match &mut self.law {
                    SteeringLaw::Pd(pd) => pd.kp = v,
                    SteeringLaw::Pid(pid) => pid.kp = v,
                }
            }
            "ki" => {
                let v = check(0.0, 0.5)?;
                match &mut self.law {
                    SteeringLaw::Pid(pid) => pid.ki = v,
                    SteeringLaw::Pd(_) => {
                        return Err(ParamError::NotApplicable {
                            name: name.to_string(),
                            reason: "controller method is pd",
                        })
                    }
                }
            }
            "kd" => {
                let v = check(0.0, 1.0)?;
                match &mut self.law {
                    SteeringLaw::Pd(pd) => pd.kd = v,
                    SteeringLaw::Pid(pid) => pid.kd = v,
                }
            }
            "throttle_base" => self.throttle.base = check(0.0, 1.0)?,
            "throttle_min" => self.throttle.min = check(0.0, 1.0)?,
            "steer_threshold" => self.throttle.steer_threshold = check(0.0, 1.0)?,
            "steer_max" => self.throttle.steer_max = check(0.0, 1.0)?,
            _ => {
                return Err(ParamError::Unknown {
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// `(kp, ki, kd)` currently in effect; `ki` is `None` for PD.
    pub fn gains(&self) -> (f32, Option<f32>, f32) {
        match &self.law {
            SteeringLaw::Pd(pd) => (pd.kp, None, pd.kd),
            SteeringLaw::Pid(pid) => (pid.kp, Some(pid.ki), pid.kd),
        }
    }

    /// Switches the reported control mode.
    pub fn set_mode(&mut self, mode: ControlMode) {
        self.mode = mode;
    }
}
