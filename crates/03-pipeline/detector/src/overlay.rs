//! Debug overlay painting: detected lanes and the ROI outline drawn into a
//! copy of the camera frame. Kept off the hot path unless explicitly enabled.

use messages::{ImageBuf, Lane};

const LEFT_COLOR: [u8; 3] = [255, 0, 0];
const RIGHT_COLOR: [u8; 3] = [0, 0, 255];
const ROI_COLOR: [u8; 3] = [0, 255, 0];

/// Draws a line with the given square brush thickness.
pub fn draw_line(img: &mut ImageBuf, x1: i32, y1: i32, x2: i32, y2: i32, rgb: [u8; 3], thickness: i32) {
    let steps = (x2 - x1).abs().max((y2 - y1).abs()).max(1);
    let half = thickness / 2;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let cx = (x1 as f32 + t * (x2 - x1) as f32).round() as i32;
        let cy = (y1 as f32 + t * (y2 - y1) as f32).round() as i32;
        for dy in -half..=half {
            for dx in -half..=half {
                let px = cx + dx;
                let py = cy + dy;
                if px >= 0 && py >= 0 {
                    img.put_pixel(px as u32, py as u32, rgb);
                }
            }
        }
    }
}

/// Paints lanes and the ROI trapezoid into a copy of `frame`.
pub fn paint(
    frame: &ImageBuf,
    left: Option<&Lane>,
    right: Option<&Lane>,
    roi_corners: &[(i32, i32); 4],
) -> ImageBuf {
    let mut out = frame.clone();

    for i in 0..4 {
        let (x1, y1) = roi_corners[i];
        let (x2, y2) = roi_corners[(i + 1) % 4];
        draw_line(&mut out, x1, y1, x2, y2, ROI_COLOR, 2);
    }

    if let Some(lane) = left {
        draw_line(&mut out, lane.x1, lane.y1, lane.x2, lane.y2, LEFT_COLOR, 5);
    }
    if let Some(lane) = right {
        draw_line(&mut out, lane.x1, lane.y1, lane.x2, lane.y2, RIGHT_COLOR, 5);
    }

    out
}
