//! Lane analysis and steering control.
//!
//! [`LaneAnalyzer`] turns lane segments into geometric metrics,
//! [`SteeringLaw`] (PD or PID) turns metrics into a steering value, and
//! [`DecisionController`] wraps both with the adaptive throttle policy and
//! the no-lane brake fallback to produce complete control commands.

mod analyzer;
mod controller;
mod steering;

pub use analyzer::{LaneAnalyzer, LaneMetrics};
pub use controller::DecisionController;
pub use steering::{PdController, PidController, SteeringLaw};
