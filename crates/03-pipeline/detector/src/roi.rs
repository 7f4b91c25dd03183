//! Trapezoidal region-of-interest mask.

use crate::image::GrayImage;
use messages::RoiRatios;

/// Zeroes every pixel outside the trapezoid described by `roi`.
///
/// The trapezoid spans the full bottom edge fractions and narrows linearly
/// to the top edge at `roi.top * height`.
pub fn apply_trapezoid(edges: &mut GrayImage, roi: &RoiRatios) {
    let w = edges.width() as f32;
    let h = edges.height() as f32;
    let top_y = (roi.top * h).round().max(0.0);
    let bottom_y = h - 1.0;

    for y in 0..edges.height() {
        let yf = y as f32;
        if yf < top_y {
            for x in 0..edges.width() {
                edges.set(x, y, 0);
            }
            continue;
        }
        let t = if bottom_y > top_y {
            (yf - top_y) / (bottom_y - top_y)
        } else {
            1.0
        };
        let left = (roi.top_left + t * (roi.bottom_left - roi.top_left)) * w;
        let right = (roi.top_right + t * (roi.bottom_right - roi.top_right)) * w;
        for x in 0..edges.width() {
            let xf = x as f32;
            if xf < left || xf > right {
                edges.set(x, y, 0);
            }
        }
    }
}

/// Corner points of the trapezoid in pixel coordinates, bottom-left first,
/// counter-clockwise. Used by the debug overlay.
pub fn trapezoid_corners(width: u32, height: u32, roi: &RoiRatios) -> [(i32, i32); 4] {
    let w = width as f32;
    let h = height as f32;
    let top_y = (roi.top * h) as i32;
    let bottom_y = height as i32 - 1;
    [
        ((roi.bottom_left * w) as i32, bottom_y),
        ((roi.bottom_right * w) as i32, bottom_y),
        ((roi.top_right * w) as i32, top_y),
        ((roi.top_left * w) as i32, top_y),
    ]
}
