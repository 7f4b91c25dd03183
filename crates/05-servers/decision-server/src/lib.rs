//! Decision server: lane detections in, control commands out.
//!
//! Attaches to the detection segment (created by the detection server) and
//! creates the control segment for the vehicle process.

use anyhow::Context;
use broker::ParameterClient;
use decision::DecisionController;
use messages::{Config, ControlWriter, DetectionReader, ParamCategory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const IDLE_SLEEP: Duration = Duration::from_micros(100);
const STATS_INTERVAL: Duration = Duration::from_secs(3);

/// The decision pipeline stage as a runnable server.
pub struct DecisionServer {
    controller: DecisionController,
    detection_in: DetectionReader,
    control_out: ControlWriter,
    params: Option<ParameterClient>,
    print_stats: bool,
}

impl DecisionServer {
    /// Attaches upstream, creates the control channel, and connects the
    /// parameter subscription.
    pub fn new(config: &Config, parameter_url: Option<&str>) -> anyhow::Result<Self> {
        let detection_in = DetectionReader::attach(
            &config.channels.detection,
            config.launcher.retry_count,
            config.launcher.retry_delay(),
        )
        .with_context(|| {
            format!("attaching to detection channel '{}'", config.channels.detection)
        })?;
        log::info!("attached to shared memory '{}'", config.channels.detection);

        let control_out = ControlWriter::create(&config.channels.control)
            .with_context(|| format!("creating control channel '{}'", config.channels.control))?;
        log::info!("created shared memory '{}'", config.channels.control);

        let params = match parameter_url {
            Some(url) => {
                let client = ParameterClient::connect(ParamCategory::Decision, url)
                    .with_context(|| format!("connecting parameter subscriber to {url}"))?;
                log::info!("parameter updates enabled via {url}");
                Some(client)
            }
            None => None,
        };

        let controller =
            DecisionController::new(&config.camera, &config.controller, &config.analyzer);
        let (kp, ki, kd) = controller.gains();
        log::info!(
            "controller ready: kp={kp} ki={} kd={kd}",
            ki.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
        );

        Ok(Self {
            controller,
            detection_in,
            control_out,
            params,
            print_stats: true,
        })
    }

    /// Enables or disables the periodic stderr stats line.
    pub fn set_print_stats(&mut self, enabled: bool) {
        self.print_stats = enabled;
    }

    /// Main loop: non-blocking detection read, control compute and publish,
    /// parameter poll. Returns when `shutdown` is raised.
    pub fn run(&mut self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        log::info!("decision server running");
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;

        while !shutdown.load(Ordering::Relaxed) {
            let Some(detection) = self.detection_in.read_latest()? else {
                self.poll_parameters();
                thread::sleep(IDLE_SLEEP);
                continue;
            };

            let started = Instant::now();
            let mut control = self.controller.process(&detection);
            control.processing_time_ms = started.elapsed().as_secs_f32() * 1000.0;
            self.control_out.write(&control)?;
            window_frames += 1;

            if window_start.elapsed() >= STATS_INTERVAL {
                if self.print_stats {
                    let fps = window_frames as f64 / window_start.elapsed().as_secs_f64();
                    eprint!(
                        "\r{fps:.1} FPS | frame {} | {:.2}ms | steering {:+.3} | throttle {:.3}",
                        control.frame_id,
                        control.processing_time_ms,
                        control.steering,
                        control.throttle,
                    );
                }
                window_start = Instant::now();
                window_frames = 0;
            }

            self.poll_parameters();
        }

        log::info!("decision server stopping");
        Ok(())
    }

    fn poll_parameters(&mut self) {
        let Some(client) = &self.params else { return };
        let controller = &mut self.controller;
        client.poll_all(
            |update| match controller.update_parameter(&update.parameter, update.value) {
                Ok(()) => log::info!("parameter applied: {} = {}", update.parameter, update.value),
                Err(e) => log::warn!("parameter rejected: {e}"),
            },
        );
    }

    /// Closes the attachment and unlinks the owned control segment.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.control_out.unlink() {
            log::warn!("control channel unlink failed: {e}");
        }
        log::info!("decision server stopped");
    }
}
