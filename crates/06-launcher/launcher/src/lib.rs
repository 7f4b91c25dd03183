//! Pipeline orchestrator.
//!
//! Spawns the decision and detection servers in dependency order, merges
//! their output into one tagged log stream, optionally hosts the ZMQ broker
//! with shared-memory broadcast taps, and tears everything down in reverse
//! order on shutdown.

mod logmux;
mod process;

pub use logmux::LogMux;
pub use process::{LogLine, ManagedProcess};

use broker::{Broker, Endpoints, FrameEncoder, RawEncoder};
use messages::{Config, DetectionReader, ImageBuf, ImageReader};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use transport::SharedSegment;

const MAIN_LOOP_SLEEP: Duration = Duration::from_millis(10);

/// What to launch and how.
pub struct LauncherOptions {
    /// Configuration forwarded to the children.
    pub config: Config,
    /// Path of the config file to pass through, if any.
    pub config_path: Option<PathBuf>,
    /// Path to the decision-server executable.
    pub decision_bin: PathBuf,
    /// Path to the detection-server executable.
    pub detection_bin: PathBuf,
    /// Host the broker and broadcast frames/detections to viewers.
    pub broadcast: bool,
    /// Endpoints for the hosted broker.
    pub endpoints: Endpoints,
    /// Pass `--no-stats` to the children.
    pub no_stats: bool,
}

impl LauncherOptions {
    /// Default binaries: siblings of the launcher executable, as laid out
    /// by a cargo build.
    pub fn sibling_binaries(config: Config, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let dir = std::env::current_exe()?
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        Ok(Self {
            config,
            config_path,
            decision_bin: dir.join("decision-server"),
            detection_bin: dir.join("detection-server"),
            broadcast: false,
            endpoints: Endpoints::default(),
            no_stats: false,
        })
    }
}

/// Broadcast taps: lazily attached shared-memory readers feeding the
/// broker's viewer egress.
struct BroadcastTaps {
    image: Option<ImageReader>,
    detection: Option<DetectionReader>,
    frame: ImageBuf,
    encoder: Box<dyn FrameEncoder>,
}

/// Orchestrates the pipeline processes and the broker.
pub struct Launcher {
    options: LauncherOptions,
    mux: LogMux,
}

impl Launcher {
    pub fn new(options: LauncherOptions) -> Self {
        Self {
            options,
            mux: LogMux::new(),
        }
    }

    /// Runs the full lifecycle; returns the process exit code.
    pub fn run(&mut self, shutdown: &AtomicBool) -> i32 {
        self.pre_clean_shared_memory();

        // Decision first: its attach-retry loop waits for the detection
        // server to create the detection segment.
        let mut decision = match self.spawn_decision() {
            Ok(child) => child,
            Err(e) => {
                log::error!("failed to start decision server: {e:#}");
                return 1;
            }
        };
        log::info!("decision server started (pid {})", decision.pid());

        if !self.watch_init(&mut decision, self.options.config.launcher.decision_init_timeout()) {
            log::error!("decision server died during startup");
            self.stop_child(&mut decision);
            return 1;
        }

        let mut detection = match self.spawn_detection() {
            Ok(child) => child,
            Err(e) => {
                log::error!("failed to start detection server: {e:#}");
                self.stop_child(&mut decision);
                return 1;
            }
        };
        log::info!("detection server started (pid {})", detection.pid());

        if !self.watch_init(&mut detection, self.options.config.launcher.detection_init_timeout()) {
            log::error!("detection server died during startup");
            self.stop_child(&mut detection);
            self.stop_child(&mut decision);
            return 1;
        }

        let mut broker = if self.options.broadcast {
            match Broker::bind(&self.options.endpoints) {
                Ok(broker) => Some(broker),
                Err(e) => {
                    log::error!("broker setup failed: {e:#}");
                    self.stop_child(&mut detection);
                    self.stop_child(&mut decision);
                    return 1;
                }
            }
        } else {
            None
        };

        let mut taps = BroadcastTaps {
            image: None,
            detection: None,
            frame: ImageBuf::new(
                self.options.config.camera.width,
                self.options.config.camera.height,
            ),
            encoder: Box::new(RawEncoder),
        };

        log::info!("pipeline running; start the vehicle bridge to begin processing");

        let mut code = 0;
        while !shutdown.load(Ordering::Relaxed) {
            if let Some(broker) = broker.as_mut() {
                broker.poll();
                self.broadcast(broker, &mut taps);
            }

            let mux = &mut self.mux;
            decision.drain_logs(|tag, line| mux.emit(tag, line));
            detection.drain_logs(|tag, line| mux.emit(tag, line));

            match (decision.try_wait(), detection.try_wait()) {
                (Ok(Some(status)), _) => {
                    self.mux.flush();
                    log::error!("decision server exited unexpectedly: {status}");
                    code = 1;
                    break;
                }
                (_, Ok(Some(status))) => {
                    self.mux.flush();
                    log::error!("detection server exited unexpectedly: {status}");
                    code = 1;
                    break;
                }
                (Err(e), _) | (_, Err(e)) => {
                    log::error!("child poll failed: {e}");
                    code = 1;
                    break;
                }
                _ => {}
            }

            thread::sleep(MAIN_LOOP_SLEEP);
        }

        // Reverse-order teardown: broker, taps, decision, detection.
        drop(broker);
        taps.image = None;
        taps.detection = None;
        self.stop_child(&mut decision);
        self.stop_child(&mut detection);
        decision.finish();
        detection.finish();
        self.mux.flush();
        log::info!("launcher shutdown complete");
        code
    }

    /// Clears shared-memory names left over from an unclean shutdown so the
    /// creators start from a blank slate.
    fn pre_clean_shared_memory(&self) {
        let names = &self.options.config.channels;
        for name in [&names.image, &names.detection, &names.control] {
            match SharedSegment::force_unlink(name) {
                Ok(true) => log::warn!("removed stale shared memory '{name}'"),
                Ok(false) => {}
                Err(e) => log::warn!("pre-clean of '{name}' failed: {e}"),
            }
        }
    }

    fn spawn_decision(&self) -> std::io::Result<ManagedProcess> {
        let config = &self.options.config;
        let mut cmd = Command::new(&self.options.decision_bin);
        cmd.arg("--detection-shm-name")
            .arg(&config.channels.detection)
            .arg("--control-shm-name")
            .arg(&config.channels.control)
            .arg("--retry-count")
            .arg(config.launcher.retry_count.to_string())
            .arg("--retry-delay")
            .arg(config.launcher.retry_delay_s.to_string());
        self.common_args(&mut cmd);
        ManagedProcess::spawn("DECISION", cmd)
    }

    fn spawn_detection(&self) -> std::io::Result<ManagedProcess> {
        let config = &self.options.config;
        let mut cmd = Command::new(&self.options.detection_bin);
        cmd.arg("--image-shm-name")
            .arg(&config.channels.image)
            .arg("--detection-shm-name")
            .arg(&config.channels.detection);
        self.common_args(&mut cmd);
        ManagedProcess::spawn("DETECTION", cmd)
    }

    fn common_args(&self, cmd: &mut Command) {
        if let Some(path) = &self.options.config_path {
            cmd.arg("--config").arg(path);
        }
        if self.options.no_stats {
            cmd.arg("--no-stats");
        }
        if !self.options.broadcast {
            cmd.arg("--no-params");
        }
    }

    /// Tails the child's output for the init window; false when it died.
    fn watch_init(&mut self, child: &mut ManagedProcess, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let mux = &mut self.mux;
            child.drain_logs(|tag, line| mux.emit(tag, line));
            match child.try_wait() {
                Ok(Some(_)) | Err(_) => {
                    let mux = &mut self.mux;
                    child.drain_logs(|tag, line| mux.emit(tag, line));
                    self.mux.flush();
                    return false;
                }
                Ok(None) => {}
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    fn stop_child(&mut self, child: &mut ManagedProcess) {
        let grace = self.options.config.launcher.process_stop_timeout();
        match child.stop(grace) {
            Ok(status) => log::info!("{} stopped: {status}", child.name()),
            Err(e) => log::warn!("{} stop failed: {e}", child.name()),
        }
        let mux = &mut self.mux;
        child.drain_logs(|tag, line| mux.emit(tag, line));
    }

    /// Reads the newest frame and detection from shared memory and fans
    /// them out to viewers. Attachments are lazy because the segments only
    /// exist once the servers finished their setup.
    fn broadcast(&mut self, broker: &mut Broker, taps: &mut BroadcastTaps) {
        let config = &self.options.config;

        if taps.image.is_none() {
            if let Ok(reader) = ImageReader::attach(
                &config.channels.image,
                config.camera.width,
                config.camera.height,
                0,
                Duration::ZERO,
            ) {
                log::info!("broadcast tap attached to '{}'", config.channels.image);
                taps.image = Some(reader);
            }
        }
        if taps.detection.is_none() {
            if let Ok(reader) =
                DetectionReader::attach(&config.channels.detection, 0, Duration::ZERO)
            {
                log::info!("broadcast tap attached to '{}'", config.channels.detection);
                taps.detection = Some(reader);
            }
        }

        if let Some(reader) = taps.image.as_mut() {
            match reader.read_latest(&mut taps.frame) {
                Ok(Some(meta)) => {
                    if let Err(e) =
                        broker.broadcast_frame(&taps.frame, meta.frame_id, taps.encoder.as_mut())
                    {
                        log::warn!("frame broadcast failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("image tap read failed: {e}"),
            }
        }

        if let Some(reader) = taps.detection.as_mut() {
            match reader.read_latest() {
                Ok(Some(detection)) => {
                    if let Err(e) = broker.broadcast_detection(&detection) {
                        log::warn!("detection broadcast failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("detection tap read failed: {e}"),
            }
        }
    }
}
