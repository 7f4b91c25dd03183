//! Detection server: camera frames in, lane detections out.
//!
//! Owns (creates) both the detection segment and the image segment, in that
//! order, so the decision server can attach downstream before the camera
//! process starts writing upstream.

use anyhow::Context;
use broker::ParameterClient;
use detector::CvLaneDetector;
use messages::{
    Config, DetectionFrame, DetectionWriter, ImageBuf, ImageReader, ParamCategory,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const IMAGE_READ_TIMEOUT: Duration = Duration::from_millis(100);
const STATS_INTERVAL: Duration = Duration::from_secs(3);

/// The detection pipeline stage as a runnable server.
pub struct DetectionServer {
    detector: CvLaneDetector,
    detection_out: DetectionWriter,
    image_in: ImageReader,
    params: Option<ParameterClient>,
    frame: ImageBuf,
    print_stats: bool,
}

impl DetectionServer {
    /// Sets up channels and the parameter subscription.
    ///
    /// Channel creation order matters: detection output first so the
    /// decision server's attach-retry window starts paying off immediately.
    pub fn new(config: &Config, parameter_url: Option<&str>) -> anyhow::Result<Self> {
        let detection_out = DetectionWriter::create(&config.channels.detection)
            .with_context(|| format!("creating detection channel '{}'", config.channels.detection))?;
        log::info!("created shared memory '{}'", config.channels.detection);

        let image_in = ImageReader::create(
            &config.channels.image,
            config.camera.width,
            config.camera.height,
        )
        .with_context(|| format!("creating image channel '{}'", config.channels.image))?;
        log::info!(
            "created shared memory '{}' ({}x{})",
            config.channels.image,
            config.camera.width,
            config.camera.height
        );

        let params = match parameter_url {
            Some(url) => {
                let client = ParameterClient::connect(ParamCategory::Detection, url)
                    .with_context(|| format!("connecting parameter subscriber to {url}"))?;
                log::info!("parameter updates enabled via {url}");
                Some(client)
            }
            None => None,
        };

        Ok(Self {
            detector: CvLaneDetector::new(config.detector.clone()),
            detection_out,
            image_in,
            params,
            frame: ImageBuf::new(config.camera.width, config.camera.height),
            print_stats: true,
        })
    }

    /// Enables or disables the periodic stderr stats line.
    pub fn set_print_stats(&mut self, enabled: bool) {
        self.print_stats = enabled;
    }

    /// Main loop: read image (bounded wait), detect, publish, poll
    /// parameters. Returns when `shutdown` is raised.
    pub fn run(&mut self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        log::info!("detection server running");
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;

        while !shutdown.load(Ordering::Relaxed) {
            let meta = self.image_in.read_blocking(&mut self.frame, IMAGE_READ_TIMEOUT)?;

            if let Some(meta) = meta {
                let result = self.detector.detect(&self.frame);
                let detection = DetectionFrame {
                    left_lane: result.left_lane,
                    right_lane: result.right_lane,
                    processing_time_ms: result.processing_time_ms,
                    frame_id: meta.frame_id,
                    timestamp: meta.timestamp,
                };
                self.detection_out.write(&detection)?;
                window_frames += 1;

                if window_start.elapsed() >= STATS_INTERVAL {
                    if self.print_stats {
                        let fps = window_frames as f64 / window_start.elapsed().as_secs_f64();
                        eprint!(
                            "\r{fps:.1} FPS | frame {} | {:.2}ms | lanes L={} R={}",
                            meta.frame_id,
                            detection.processing_time_ms,
                            detection.left_lane.is_some(),
                            detection.right_lane.is_some(),
                        );
                    }
                    window_start = Instant::now();
                    window_frames = 0;
                }
            }

            self.poll_parameters();
        }

        log::info!("detection server stopping");
        Ok(())
    }

    fn poll_parameters(&mut self) {
        let Some(client) = &self.params else { return };
        let detector = &mut self.detector;
        client.poll_all(|update| match detector.update_parameter(&update.parameter, update.value)
        {
            Ok(()) => log::info!("parameter applied: {} = {}", update.parameter, update.value),
            Err(e) => log::warn!("parameter rejected: {e}"),
        });
    }

    /// Closes and unlinks both owned segments.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.image_in.unlink() {
            log::warn!("image channel unlink failed: {e}");
        }
        if let Err(e) = self.detection_out.unlink() {
            log::warn!("detection channel unlink failed: {e}");
        }
        log::info!("detection server stopped");
    }
}
