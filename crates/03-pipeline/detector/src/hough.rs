//! Progressive probabilistic Hough transform over a binary edge map.
//!
//! Random edge points vote into a (theta, rho) accumulator; once a cell
//! crosses the vote threshold the supporting line is traced pixel-by-pixel
//! in both directions with a bounded gap tolerance, consumed from the edge
//! mask, and reported as a segment when long enough.

use crate::image::GrayImage;

/// One raw line segment in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineSeg {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Hough transform tuning.
#[derive(Clone, Copy, Debug)]
pub struct HoughParams {
    /// Distance resolution of the accumulator in pixels.
    pub rho: f32,
    /// Angle resolution of the accumulator in radians.
    pub theta_rad: f32,
    /// Minimum accumulator votes to accept a line.
    pub threshold: u32,
    /// Minimum segment length in pixels.
    pub min_line_len: u32,
    /// Maximum gap in pixels bridged while tracing a line.
    pub max_line_gap: u32,
}

const SHIFT: i64 = 16;
const MAX_SEGMENTS: usize = 100;

// Deterministic xorshift64* so detection results are reproducible.
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

/// Extracts line segments from a binary edge map.
pub fn hough_segments(edges: &GrayImage, params: &HoughParams) -> Vec<LineSeg> {
    let w = edges.width() as i32;
    let h = edges.height() as i32;
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let numangle = (std::f32::consts::PI / params.theta_rad).round().max(1.0) as usize;
    let numrho = ((((w + h) * 2 + 1) as f32) / params.rho).round().max(1.0) as usize;
    let half_rho = ((numrho - 1) / 2) as i32;

    let trig: Vec<(f32, f32)> = (0..numangle)
        .map(|n| {
            let angle = n as f32 * params.theta_rad;
            (angle.cos() / params.rho, angle.sin() / params.rho)
        })
        .collect();

    let mut mask = vec![false; (w * h) as usize];
    let mut points: Vec<(i32, i32)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if edges.get(x as u32, y as u32) != 0 {
                mask[(y * w + x) as usize] = true;
                points.push((x, y));
            }
        }
    }

    let mut accum = vec![0i32; numangle * numrho];
    let mut rng = XorShift::new(0x9E37_79B9_7F4A_7C15);
    let mut segments = Vec::new();

    while !points.is_empty() && segments.len() < MAX_SEGMENTS {
        let idx = (rng.next() % points.len() as u64) as usize;
        let (x0, y0) = points.swap_remove(idx);
        if !mask[(y0 * w + x0) as usize] {
            continue; // consumed by an earlier line walk
        }

        let mut best_val = params.threshold as i32 - 1;
        let mut best_n: Option<usize> = None;
        for (n, (c, s)) in trig.iter().enumerate() {
            let r = ((x0 as f32 * c + y0 as f32 * s).round() as i32 + half_rho)
                .clamp(0, numrho as i32 - 1) as usize;
            let cell = &mut accum[n * numrho + r];
            *cell += 1;
            if *cell > best_val {
                best_val = *cell;
                best_n = Some(n);
            }
        }
        let Some(best_n) = best_n else { continue };

        // Direction along the accepted line (perpendicular to the normal).
        let (c, s) = trig[best_n];
        let a = -s;
        let b = c;

        let (xflag, dx0, dy0, fx0, fy0) = if a.abs() > b.abs() {
            (
                true,
                if a > 0.0 { 1i64 } else { -1 },
                ((b * (1i64 << SHIFT) as f32) / a.abs()).round() as i64,
                x0 as i64,
                ((y0 as i64) << SHIFT) + (1 << (SHIFT - 1)),
            )
        } else {
            (
                false,
                ((a * (1i64 << SHIFT) as f32) / b.abs()).round() as i64,
                if b > 0.0 { 1i64 } else { -1 },
                ((x0 as i64) << SHIFT) + (1 << (SHIFT - 1)),
                y0 as i64,
            )
        };

        let pixel_at = |x: i64, y: i64| -> (i32, i32) {
            if xflag {
                (x as i32, (y >> SHIFT) as i32)
            } else {
                ((x >> SHIFT) as i32, y as i32)
            }
        };

        // Trace both directions to find the segment extent.
        let mut line_end = [(x0, y0); 2];
        for (k, end) in line_end.iter_mut().enumerate() {
            let (dx, dy) = if k == 0 { (dx0, dy0) } else { (-dx0, -dy0) };
            let (mut x, mut y) = (fx0, fy0);
            let mut gap = 0u32;
            loop {
                let (px, py) = pixel_at(x, y);
                if px < 0 || px >= w || py < 0 || py >= h {
                    break;
                }
                if mask[(py * w + px) as usize] {
                    gap = 0;
                    *end = (px, py);
                } else {
                    gap += 1;
                    if gap > params.max_line_gap {
                        break;
                    }
                }
                x += dx;
                y += dy;
            }
        }

        let good_line = (line_end[1].0 - line_end[0].0).unsigned_abs() >= params.min_line_len
            || (line_end[1].1 - line_end[0].1).unsigned_abs() >= params.min_line_len;

        // Consume the traced pixels; a confirmed line also takes its votes
        // back out of the accumulator.
        for (k, end) in line_end.iter().enumerate() {
            let (dx, dy) = if k == 0 { (dx0, dy0) } else { (-dx0, -dy0) };
            let (mut x, mut y) = (fx0, fy0);
            loop {
                let (px, py) = pixel_at(x, y);
                if px < 0 || px >= w || py < 0 || py >= h {
                    break;
                }
                let midx = (py * w + px) as usize;
                if mask[midx] {
                    if good_line {
                        for (n, (c, s)) in trig.iter().enumerate() {
                            let r = ((px as f32 * c + py as f32 * s).round() as i32 + half_rho)
                                .clamp(0, numrho as i32 - 1)
                                as usize;
                            accum[n * numrho + r] -= 1;
                        }
                    }
                    mask[midx] = false;
                }
                if (px, py) == *end {
                    break;
                }
                x += dx;
                y += dy;
            }
        }

        if good_line {
            segments.push(LineSeg {
                x1: line_end[0].0,
                y1: line_end[0].1,
                x2: line_end[1].0,
                y2: line_end[1].1,
            });
        }
    }

    segments
}
