//! Shared helpers for the integration suite.

use messages::{Config, ImageBuf};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use transport::SharedSegment;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A config with unique shared-memory names and a small frame so tests can
/// run in parallel without colliding or crawling.
pub fn test_config(tag: &str) -> Config {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = format!("{tag}_{}_{n}", process::id());

    let mut config = Config::default();
    config.camera.width = 320;
    config.camera.height = 240;
    config.channels.image = format!("it_img_{suffix}");
    config.channels.detection = format!("it_det_{suffix}");
    config.channels.control = format!("it_ctl_{suffix}");
    config.launcher.retry_count = 50;
    config.launcher.retry_delay_s = 0.02;
    config.system.fixed_delta_seconds = 0.005;
    config
}

/// Removes the config's shared-memory names, ignoring missing ones.
pub fn cleanup(config: &Config) {
    for name in [
        &config.channels.image,
        &config.channels.detection,
        &config.channels.control,
    ] {
        let _ = SharedSegment::force_unlink(name);
    }
}

/// Drop guard around [`cleanup`].
pub struct ShmCleanup(pub Config);

impl Drop for ShmCleanup {
    fn drop(&mut self) {
        cleanup(&self.0);
    }
}

/// Renders a road-like frame with two bright lane stripes whose bottom
/// endpoints sit at `left_x`/`right_x`, converging toward the center.
pub fn road_frame(config: &Config, left_x: i32, right_x: i32) -> ImageBuf {
    let w = config.camera.width;
    let h = config.camera.height;
    let mut img = ImageBuf::new(w, h);
    for y in 0..h {
        for x in 0..w {
            img.put_pixel(x, y, [45, 45, 48]);
        }
    }
    let top = (h / 2) as i32;
    let bottom = h as i32 - 1;
    let center = w as i32 / 2;
    detector::overlay::draw_line(
        &mut img,
        left_x,
        bottom,
        center - (center - left_x) / 5,
        top,
        [235, 235, 235],
        5,
    );
    detector::overlay::draw_line(
        &mut img,
        right_x,
        bottom,
        center + (right_x - center) / 5,
        top,
        [235, 235, 235],
        5,
    );
    img
}

/// Polls `f` until it returns `Some` or the deadline passes.
pub fn wait_for<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = f() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

static PORT_BASE: AtomicU32 = AtomicU32::new(0);

/// Six consecutive loopback ports per call, spaced so parallel tests never
/// overlap.
pub fn unique_port_base() -> u16 {
    let n = PORT_BASE.fetch_add(1, Ordering::Relaxed);
    (21000 + n * 10) as u16
}
