//! PD and PID steering laws.
//!
//! Both map lane metrics to a steering value in `[-1, 1]` and return `None`
//! when both lanes are not visible, which the controller translates into the
//! no-lane brake fallback.

use crate::analyzer::LaneMetrics;
use std::time::Instant;

/// Heading saturates at this many degrees when normalized for the D term.
const MAX_HEADING_DEG: f32 = 30.0;

/// A single integration step never exceeds this, so a long frame gap (e.g.
/// a paused simulation) cannot wind the integrator in one call.
const MAX_DT_SECS: f32 = 0.5;

fn heading_norm(metrics: &LaneMetrics) -> f32 {
    metrics
        .heading_angle_deg
        .map(|deg| (deg / MAX_HEADING_DEG).clamp(-1.0, 1.0))
        .unwrap_or(0.0)
}

/// Proportional-derivative steering:
/// `steering = -(kp * offset_norm + kd * heading_norm)`.
#[derive(Clone, Copy, Debug)]
pub struct PdController {
    pub kp: f32,
    pub kd: f32,
}

impl PdController {
    pub fn new(kp: f32, kd: f32) -> Self {
        Self { kp, kd }
    }

    /// Steering in `[-1, 1]`, or `None` without both lanes.
    pub fn compute_steering(&self, metrics: &LaneMetrics) -> Option<f32> {
        let offset = metrics.lateral_offset_normalized?;
        if !metrics.has_both_lanes {
            return None;
        }
        let steering = -(self.kp * offset + self.kd * heading_norm(metrics));
        Some(steering.clamp(-1.0, 1.0))
    }
}

/// PID variant: the PD law plus `ki * integral(offset dt)` with wall-clock
/// `dt`. No anti-windup beyond the dt clamp; the integrator is reset
/// whenever both lanes disappear.
#[derive(Debug)]
pub struct PidController {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    integral: f32,
    last_update: Option<Instant>,
}

impl PidController {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            last_update: None,
        }
    }

    /// Steering in `[-1, 1]`, or `None` without both lanes.
    pub fn compute_steering(&mut self, metrics: &LaneMetrics) -> Option<f32> {
        let offset = metrics.lateral_offset_normalized?;
        if !metrics.has_both_lanes {
            return None;
        }

        let now = Instant::now();
        let dt = self
            .last_update
            .map(|prev| (now - prev).as_secs_f32().min(MAX_DT_SECS))
            .unwrap_or(0.0);
        self.last_update = Some(now);
        self.integral += offset * dt;

        let steering =
            -(self.kp * offset + self.ki * self.integral + self.kd * heading_norm(metrics));
        Some(steering.clamp(-1.0, 1.0))
    }

    /// Clears accumulated error and the dt reference.
    pub fn reset_integral(&mut self) {
        self.integral = 0.0;
        self.last_update = None;
    }

    /// Accumulated integral term, for tests and stats.
    pub fn integral(&self) -> f32 {
        self.integral
    }
}

/// The steering law chosen at construction time.
#[derive(Debug)]
pub enum SteeringLaw {
    Pd(PdController),
    Pid(PidController),
}

impl SteeringLaw {
    /// Computes steering for the current metrics; `None` means "no lane
    /// confidence" and triggers the brake fallback upstream.
    pub fn compute(&mut self, metrics: &LaneMetrics) -> Option<f32> {
        match self {
            SteeringLaw::Pd(pd) => pd.compute_steering(metrics),
            SteeringLaw::Pid(pid) => pid.compute_steering(metrics),
        }
    }

    /// Notifies the law that lane tracking was lost this frame.
    pub fn on_lanes_lost(&mut self) {
        if let SteeringLaw::Pid(pid) = self {
            pid.reset_integral();
        }
    }
}
