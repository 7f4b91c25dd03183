//! Lane geometry analysis: converts up to two lane segments into the
//! metrics the steering controller consumes.

use messages::{AnalyzerConfig, DepartureStatus, Lane};

/// All metrics derivable from the current pair of lane segments. Any metric
/// whose inputs are missing is `None`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneMetrics {
    /// Assumed vehicle center column (camera centered on the vehicle).
    pub vehicle_center_x: f32,
    /// Lane center at the bottom image row.
    pub lane_center_x: Option<f32>,
    /// Lane width at the bottom image row.
    pub lane_width_pixels: Option<f32>,
    /// `vehicle_center_x - lane_center_x`; positive means the vehicle sits
    /// right of center.
    pub lateral_offset_pixels: Option<f32>,
    /// Offset scaled by the physical lane width.
    pub lateral_offset_meters: Option<f32>,
    /// Offset as a fraction of the lane width, clamped to `[-1, 1]`.
    pub lateral_offset_normalized: Option<f32>,
    /// Yaw error estimate in degrees, positive pointing right.
    pub heading_angle_deg: Option<f32>,
    pub departure_status: DepartureStatus,
    pub has_left_lane: bool,
    pub has_right_lane: bool,
    pub has_both_lanes: bool,
}

/// Computes lane metrics for a fixed camera geometry.
pub struct LaneAnalyzer {
    image_height: u32,
    vehicle_center_x: f32,
    drift_threshold: f32,
    departure_threshold: f32,
    lane_width_meters: f32,
}

impl LaneAnalyzer {
    /// Creates an analyzer for the given frame shape and thresholds.
    pub fn new(image_width: u32, image_height: u32, config: &AnalyzerConfig) -> Self {
        Self {
            image_height,
            vehicle_center_x: image_width as f32 / 2.0,
            drift_threshold: config.drift_threshold,
            departure_threshold: config.departure_threshold,
            lane_width_meters: config.lane_width_meters,
        }
    }

    /// Derives every metric for the given lanes.
    pub fn metrics(&self, left: Option<&Lane>, right: Option<&Lane>) -> LaneMetrics {
        let bottom_row = (self.image_height - 1) as f32;

        let (lane_center_x, lane_width_pixels) = match (left, right) {
            (Some(l), Some(r)) => {
                let lx = l.x_at(bottom_row);
                let rx = r.x_at(bottom_row);
                (Some((lx + rx) / 2.0), Some((rx - lx).abs()))
            }
            _ => (None, None),
        };

        let lateral_offset_pixels = lane_center_x.map(|c| self.vehicle_center_x - c);

        let lateral_offset_normalized = match (lateral_offset_pixels, lane_width_pixels) {
            (Some(offset), Some(width)) if width > 0.0 => {
                Some((offset / width).clamp(-1.0, 1.0))
            }
            _ => None,
        };

        let lateral_offset_meters = match (lateral_offset_pixels, lane_width_pixels) {
            (Some(offset), Some(width)) if width > 0.0 => {
                Some(offset * self.lane_width_meters / width)
            }
            _ => None,
        };

        LaneMetrics {
            vehicle_center_x: self.vehicle_center_x,
            lane_center_x,
            lane_width_pixels,
            lateral_offset_pixels,
            lateral_offset_meters,
            lateral_offset_normalized,
            heading_angle_deg: heading_angle(left, right),
            departure_status: self.departure_status(lateral_offset_pixels, lane_width_pixels),
            has_left_lane: left.is_some(),
            has_right_lane: right.is_some(),
            has_both_lanes: left.is_some() && right.is_some(),
        }
    }

    fn departure_status(
        &self,
        offset_pixels: Option<f32>,
        lane_width: Option<f32>,
    ) -> DepartureStatus {
        let (Some(offset), Some(width)) = (offset_pixels, lane_width) else {
            return DepartureStatus::NoLanes;
        };
        if width <= 0.0 {
            return DepartureStatus::NoLanes;
        }

        let fraction = offset.abs() / width;
        if fraction >= self.departure_threshold {
            if offset > 0.0 {
                DepartureStatus::RightDeparture
            } else {
                DepartureStatus::LeftDeparture
            }
        } else if fraction >= self.drift_threshold {
            if offset > 0.0 {
                DepartureStatus::RightDrift
            } else {
                DepartureStatus::LeftDrift
            }
        } else {
            DepartureStatus::Centered
        }
    }
}

/// Yaw error in degrees, measured per lane as the angle between the lane's
/// bottom-to-top direction and image vertical, averaged over present lanes.
/// The perspective tilts of a straight road's two boundaries cancel, so a
/// centered vehicle reads ~0 and the sign tracks actual yaw.
fn heading_angle(left: Option<&Lane>, right: Option<&Lane>) -> Option<f32> {
    let lane_angle = |lane: &Lane| -> f32 {
        let dx = (lane.x2 - lane.x1) as f32;
        let dy = (lane.y1 - lane.y2) as f32; // up the image, positive
        if dy == 0.0 {
            0.0
        } else {
            dx.atan2(dy).to_degrees()
        }
    };

    match (left, right) {
        (Some(l), Some(r)) => Some((lane_angle(l) + lane_angle(r)) / 2.0),
        (Some(l), None) => Some(lane_angle(l)),
        (None, Some(r)) => Some(lane_angle(r)),
        (None, None) => None,
    }
}
