//! Computer-vision lane detector.
//!
//! A stateful function from RGB frames to up to two lane boundaries:
//! grayscale → blur → Canny edges → trapezoidal ROI → probabilistic Hough →
//! slope-split into left/right buckets → degree-1 fit → projection onto the
//! ROI's vertical band, followed by temporal smoothing against the previous
//! frame. Parameters can be retuned between frames through
//! [`CvLaneDetector::update_parameter`]; detection itself never fails, it
//! reports absent lanes instead.

pub mod hough;
pub mod image;
pub mod overlay;
pub mod roi;

use hough::{HoughParams, LineSeg};
use messages::{DetectorConfig, ImageBuf, Lane, ParamError};
use smallvec::SmallVec;
use std::time::Instant;

/// Minimum absolute slope for a segment to count as a lane boundary;
/// anything flatter is road clutter or horizon.
const MIN_LANE_SLOPE: f32 = 0.5;

type Bucket = SmallVec<[LineSeg; 16]>;

/// Output of one detection pass.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub left_lane: Option<Lane>,
    pub right_lane: Option<Lane>,
    pub processing_time_ms: f32,
    /// Present only when the overlay was requested at construction.
    pub debug_image: Option<ImageBuf>,
}

/// Canny + Hough lane detector with temporal smoothing.
pub struct CvLaneDetector {
    params: DetectorConfig,
    prev_left: Option<Lane>,
    prev_right: Option<Lane>,
    frame_count: u64,
    emit_debug: bool,
}

impl CvLaneDetector {
    /// Creates a detector with the given tuning; no overlay by default.
    pub fn new(params: DetectorConfig) -> Self {
        Self {
            params,
            prev_left: None,
            prev_right: None,
            frame_count: 0,
            emit_debug: false,
        }
    }

    /// Enables or disables the debug overlay on results.
    pub fn with_debug_overlay(mut self, enabled: bool) -> Self {
        self.emit_debug = enabled;
        self
    }

    /// Runs the full geometry pipeline on one frame.
    pub fn detect(&mut self, frame: &ImageBuf) -> DetectionResult {
        let started = Instant::now();
        let width = frame.width();
        let height = frame.height();

        let gray = image::grayscale(frame);
        let blurred = image::gaussian_blur5(&gray);
        let mut edges = image::canny(&blurred, self.params.canny_low, self.params.canny_high);
        roi::apply_trapezoid(&mut edges, &self.params.roi);

        let segments = hough::hough_segments(&edges, &self.hough_params());
        let (left_bucket, right_bucket) = separate_lanes(&segments, width);

        let y_top = (height as f32 * self.params.roi.top) as i32;
        let y_bottom = height as i32;
        let raw_left = fit_lane(&left_bucket, y_top, y_bottom);
        let raw_right = fit_lane(&right_bucket, y_top, y_bottom);

        self.frame_count += 1;
        let alpha = self.smoothing_alpha();
        let left_lane = smooth(raw_left, self.prev_left, alpha);
        let right_lane = smooth(raw_right, self.prev_right, alpha);
        self.prev_left = left_lane;
        self.prev_right = right_lane;

        let debug_image = if self.emit_debug {
            let corners = roi::trapezoid_corners(width, height, &self.params.roi);
            Some(overlay::paint(
                frame,
                left_lane.as_ref(),
                right_lane.as_ref(),
                &corners,
            ))
        } else {
            None
        };

        DetectionResult {
            left_lane,
            right_lane,
            processing_time_ms: started.elapsed().as_secs_f32() * 1000.0,
            debug_image,
        }
    }

    /// Clears smoothing history, e.g. after a respawn.
    pub fn reset_smoothing(&mut self) {
        self.prev_left = None;
        self.prev_right = None;
        self.frame_count = 0;
    }

    /// Applies one runtime parameter update, rejecting unknown names and
    /// out-of-range values.
    pub fn update_parameter(&mut self, name: &str, value: f64) -> Result<(), ParamError> {
        let check = |min: f64, max: f64| -> Result<(), ParamError> {
            if value < min || value > max {
                Err(ParamError::OutOfRange {
                    name: name.to_string(),
                    value,
                    min,
                    max,
                })
            } else {
                Ok(())
            }
        };

        match name {
            "canny_low" => {
                check(1.0, 255.0)?;
                self.params.canny_low = value as i32;
            }
            "canny_high" => {
                check(1.0, 255.0)?;
                self.params.canny_high = value as i32;
            }
            "hough_threshold" => {
                check(1.0, 200.0)?;
                self.params.hough_threshold = value as u32;
            }
            "hough_min_line_len" => {
                check(1.0, 200.0)?;
                self.params.hough_min_line_len = value as u32;
            }
            "hough_max_line_gap" => {
                check(1.0, 300.0)?;
                self.params.hough_max_line_gap = value as u32;
            }
            "smoothing_factor" => {
                check(0.0, 1.0)?;
                self.params.smoothing_factor = value as f32;
            }
            _ => {
                return Err(ParamError::Unknown {
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Current tuning, mostly for stats output.
    pub fn params(&self) -> &DetectorConfig {
        &self.params
    }

    /// Frames processed since construction or the last smoothing reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn hough_params(&self) -> HoughParams {
        HoughParams {
            rho: self.params.hough_rho,
            theta_rad: self.params.hough_theta_deg.to_radians(),
            threshold: self.params.hough_threshold,
            min_line_len: self.params.hough_min_line_len,
            max_line_gap: self.params.hough_max_line_gap,
        }
    }

    /// Smoothing weight of the *current* frame. The first frames after a
    /// reset react quickly so a bad spawn view cannot contaminate the state
    /// for seconds.
    fn smoothing_alpha(&self) -> f32 {
        if self.frame_count <= 20 {
            0.95
        } else if self.frame_count <= 50 {
            0.80
        } else {
            self.params.smoothing_factor
        }
    }
}

/// Splits raw segments into left/right lane candidates by slope sign and
/// image half. Near-horizontal and vertical segments are discarded.
fn separate_lanes(segments: &[LineSeg], width: u32) -> (Bucket, Bucket) {
    let mut left = Bucket::new();
    let mut right = Bucket::new();
    let mid = width as f32 / 2.0;

    for seg in segments {
        let dx = seg.x2 - seg.x1;
        if dx == 0 {
            continue;
        }
        let slope = (seg.y2 - seg.y1) as f32 / dx as f32;
        if slope.abs() < MIN_LANE_SLOPE {
            continue;
        }
        if slope < 0.0 && (seg.x1 as f32) < mid {
            left.push(*seg);
        } else if slope > 0.0 && (seg.x1 as f32) > mid {
            right.push(*seg);
        }
    }

    (left, right)
}

/// Least-squares fit `x = a·y + b` over all segment endpoints, projected to
/// the ROI band. Bottom endpoint first, per the lane invariant.
fn fit_lane(bucket: &Bucket, y_top: i32, y_bottom: i32) -> Option<Lane> {
    if bucket.is_empty() {
        return None;
    }

    let mut n = 0.0f64;
    let mut sum_x = 0.0f64;
    let mut sum_y = 0.0f64;
    let mut sum_yy = 0.0f64;
    let mut sum_xy = 0.0f64;
    for seg in bucket {
        for (x, y) in [(seg.x1, seg.y1), (seg.x2, seg.y2)] {
            let (x, y) = (x as f64, y as f64);
            n += 1.0;
            sum_x += x;
            sum_y += y;
            sum_yy += y * y;
            sum_xy += x * y;
        }
    }

    let denom = n * sum_yy - sum_y * sum_y;
    if denom.abs() < 1e-9 {
        return None;
    }
    let a = (n * sum_xy - sum_x * sum_y) / denom;
    let b = (sum_x - a * sum_y) / n;

    let confidence = (bucket.len() as f32 / 4.0).min(1.0);
    Some(Lane {
        x1: (a * y_bottom as f64 + b).round() as i32,
        y1: y_bottom,
        x2: (a * y_top as f64 + b).round() as i32,
        y2: y_top,
        confidence,
    })
}

/// Exponential smoothing of one lane against the previous frame. A missing
/// current lane carries the previous one; a missing history passes the
/// current lane through.
fn smooth(current: Option<Lane>, previous: Option<Lane>, alpha: f32) -> Option<Lane> {
    match (current, previous) {
        (Some(cur), Some(prev)) => {
            let mix = |c: i32, p: i32| (alpha * c as f32 + (1.0 - alpha) * p as f32) as i32;
            Some(Lane {
                x1: mix(cur.x1, prev.x1),
                y1: mix(cur.y1, prev.y1),
                x2: mix(cur.x2, prev.x2),
                y2: mix(cur.y2, prev.y2),
                confidence: cur.confidence,
            })
        }
        (Some(cur), None) => Some(cur),
        (None, prev) => prev,
    }
}
