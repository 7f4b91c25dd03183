//! Grayscale image operations feeding the lane detector: conversion,
//! Gaussian blur, and Canny edge extraction.

use messages::ImageBuf;

/// Single-channel 8-bit image.
#[derive(Clone, Debug)]
pub struct GrayImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayImage {
    /// Allocates an all-zero image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, v: u8) {
        self.data[y as usize * self.width as usize + x as usize] = v;
    }
}

/// ITU-R 601 luma with integer coefficients.
pub fn grayscale(image: &ImageBuf) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    let rgb = image.data();
    for (dst, px) in out.data_mut().iter_mut().zip(rgb.chunks_exact(3)) {
        let luma = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
        *dst = (luma >> 8) as u8;
    }
    out
}

/// Separable 5x5 Gaussian blur with kernel `[1, 4, 6, 4, 1] / 16`.
pub fn gaussian_blur5(src: &GrayImage) -> GrayImage {
    const K: [u32; 5] = [1, 4, 6, 4, 1];
    let (w, h) = (src.width() as i64, src.height() as i64);
    let clamp_x = |x: i64| x.clamp(0, w - 1) as u32;
    let clamp_y = |y: i64| y.clamp(0, h - 1) as u32;

    let mut horizontal = GrayImage::new(src.width(), src.height());
    for y in 0..src.height() {
        for x in 0..w {
            let mut acc = 0u32;
            for (i, k) in K.iter().enumerate() {
                acc += k * src.get(clamp_x(x + i as i64 - 2), y) as u32;
            }
            horizontal.set(x as u32, y, (acc / 16) as u8);
        }
    }

    let mut out = GrayImage::new(src.width(), src.height());
    for y in 0..h {
        for x in 0..src.width() {
            let mut acc = 0u32;
            for (i, k) in K.iter().enumerate() {
                acc += k * horizontal.get(x, clamp_y(y + i as i64 - 2)) as u32;
            }
            out.set(x, y as u32, (acc / 16) as u8);
        }
    }
    out
}

const EDGE: u8 = 255;
const WEAK: u8 = 128;

/// Canny edge detector: Sobel gradients, non-maximum suppression along the
/// quantized gradient direction, double threshold, and hysteresis growth
/// from strong edges through weak ones.
pub fn canny(src: &GrayImage, low: i32, high: i32) -> GrayImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let mut out = GrayImage::new(src.width(), src.height());
    if w < 3 || h < 3 {
        return out;
    }

    let mut gx = vec![0i32; w * h];
    let mut gy = vec![0i32; w * h];
    let mut mag = vec![0i32; w * h];
    let data = src.data();

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let idx = y * w + x;
            let p = |dx: isize, dy: isize| {
                data[(y as isize + dy) as usize * w + (x as isize + dx) as usize] as i32
            };
            let sx = -p(-1, -1) - 2 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2 * p(1, 0) + p(1, 1);
            let sy = -p(-1, -1) - 2 * p(0, -1) - p(1, -1) + p(-1, 1) + 2 * p(0, 1) + p(1, 1);
            gx[idx] = sx;
            gy[idx] = sy;
            mag[idx] = sx.abs() + sy.abs();
        }
    }

    // Non-maximum suppression into strong/weak classes.
    let edges = out.data_mut();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let idx = y * w + x;
            let m = mag[idx];
            if m < low {
                continue;
            }

            let (dx, dy) = sector(gx[idx], gy[idx]);
            let ahead = mag[(y as isize + dy) as usize * w + (x as isize + dx) as usize];
            let behind = mag[(y as isize - dy) as usize * w + (x as isize - dx) as usize];
            if m < ahead || m < behind {
                continue;
            }

            edges[idx] = if m >= high { EDGE } else { WEAK };
        }
    }

    // Hysteresis: keep weak pixels only when connected to a strong one.
    let mut stack: Vec<usize> = edges
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == EDGE)
        .map(|(i, _)| i)
        .collect();
    while let Some(idx) = stack.pop() {
        let x = idx % w;
        let y = idx / w;
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let nidx = ny * w + nx;
                if edges[nidx] == WEAK {
                    edges[nidx] = EDGE;
                    stack.push(nidx);
                }
            }
        }
    }
    for v in edges.iter_mut() {
        if *v == WEAK {
            *v = 0;
        }
    }

    out
}

/// Quantizes a gradient direction into one of four sectors and returns the
/// pixel step along it.
fn sector(gx: i32, gy: i32) -> (isize, isize) {
    // tan(22.5 deg) ~ 0.4142; compare |gy| against |gx| with integer math.
    let ax = gx.abs() as i64;
    let ay = gy.abs() as i64;
    if ay * 1000 <= ax * 414 {
        (1, 0) // horizontal gradient
    } else if ax * 1000 <= ay * 414 {
        (0, 1) // vertical gradient
    } else if (gx > 0) == (gy > 0) {
        (1, 1)
    } else {
        (1, -1)
    }
}
