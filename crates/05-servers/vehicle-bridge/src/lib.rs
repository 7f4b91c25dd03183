//! Camera/vehicle process: the adapter between an external simulator or
//! vehicle and the shared-memory pipeline.
//!
//! The simulator itself is an external collaborator reached through the
//! narrow [`VehicleAdapter`] trait; a deterministic built-in implementation
//! lives in [`sim`] so the pipeline runs end-to-end out of the box.

pub mod sim;

use anyhow::Context;
use broker::{ActionSubscriber, VehicleStatusPublisher};
use messages::{
    now_secs, ActionKind, Config, ControlFrame, ControlMode, ControlReader, ImageBuf, ImageMeta,
    ImageWriter, VehicleState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CONTROL_POLL_SLEEP: Duration = Duration::from_micros(100);
const PAUSE_SLEEP: Duration = Duration::from_millis(100);

/// Kinematic state reported by the vehicle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VehiclePose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, 0 along the road.
    pub yaw: f64,
    /// Forward speed in m/s.
    pub velocity: f64,
}

/// Narrow seam around the simulator/vehicle stack.
pub trait VehicleAdapter {
    /// Advances the world by `dt` seconds (synchronous mode).
    fn tick(&mut self, dt: f64);
    /// Renders the current camera view into `frame`; `false` when no frame
    /// is available yet.
    fn capture_frame(&mut self, frame: &mut ImageBuf) -> bool;
    /// Applies an actuation command. Values arrive already clamped.
    fn apply_control(&mut self, steering: f32, throttle: f32, brake: f32);
    /// Current kinematic state.
    fn pose(&self) -> VehiclePose;
    /// Teleports back to the spawn point and zeroes velocity.
    fn respawn(&mut self);
}

/// ZMQ connections of the bridge; `None` runs the loop standalone.
pub struct BridgeEndpoints {
    /// Broker vehicle-status ingress (connect side).
    pub status_url: Option<String>,
    /// Broker action egress (connect side).
    pub action_url: Option<String>,
}

impl BridgeEndpoints {
    /// Default broker endpoints on localhost.
    pub fn broker_defaults() -> Self {
        Self {
            status_url: Some("tcp://localhost:5562".to_string()),
            action_url: Some("tcp://localhost:5561".to_string()),
        }
    }

    /// No control-plane connections at all.
    pub fn disconnected() -> Self {
        Self {
            status_url: None,
            action_url: None,
        }
    }
}

/// Counters the bridge reports through logs and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeStats {
    pub frames: u64,
    pub control_timeouts: u64,
    pub states_published: u64,
}

/// The camera/vehicle loop.
pub struct VehicleBridge<A: VehicleAdapter> {
    adapter: A,
    image_out: ImageWriter,
    control_in: ControlReader,
    status: Option<VehicleStatusPublisher>,
    actions: Option<ActionSubscriber>,
    paused: Arc<AtomicBool>,
    respawn_requested: Arc<AtomicBool>,
    quit_requested: Arc<AtomicBool>,
    frame: ImageBuf,
    sync_mode: bool,
    fixed_delta: Duration,
    warmup_frames: u64,
    base_throttle: f32,
    control_timeout: Duration,
    state_interval: Duration,
    frame_count: u64,
    stats: BridgeStats,
    last_control: Option<ControlFrame>,
}

impl<A: VehicleAdapter> VehicleBridge<A> {
    /// Attaches to the image and control segments (both owned by the
    /// servers) and connects the control-plane sockets.
    pub fn new(adapter: A, config: &Config, endpoints: BridgeEndpoints) -> anyhow::Result<Self> {
        let retry_count = config.launcher.retry_count;
        let retry_delay = config.launcher.retry_delay();

        let image_out = ImageWriter::attach(
            &config.channels.image,
            config.camera.width,
            config.camera.height,
            retry_count,
            retry_delay,
        )
        .with_context(|| format!("attaching to image channel '{}'", config.channels.image))?;
        log::info!("attached to shared memory '{}'", config.channels.image);

        let control_in = ControlReader::attach(&config.channels.control, retry_count, retry_delay)
            .with_context(|| {
                format!("attaching to control channel '{}'", config.channels.control)
            })?;
        log::info!("attached to shared memory '{}'", config.channels.control);

        let status = match &endpoints.status_url {
            Some(url) => {
                let publisher = VehicleStatusPublisher::connect(url)
                    .with_context(|| format!("connecting status publisher to {url}"))?;
                log::info!("vehicle status publisher connected to {url}");
                Some(publisher)
            }
            None => None,
        };

        let paused = Arc::new(AtomicBool::new(false));
        let respawn_requested = Arc::new(AtomicBool::new(false));
        let quit_requested = Arc::new(AtomicBool::new(false));

        let actions = match &endpoints.action_url {
            Some(url) => {
                let mut subscriber = ActionSubscriber::connect(url)
                    .with_context(|| format!("connecting action subscriber to {url}"))?;
                let pause_flag = Arc::clone(&paused);
                subscriber.register(ActionKind::Pause, move |_| {
                    pause_flag.store(true, Ordering::Relaxed);
                });
                let resume_flag = Arc::clone(&paused);
                subscriber.register(ActionKind::Resume, move |_| {
                    resume_flag.store(false, Ordering::Relaxed);
                });
                let respawn_flag = Arc::clone(&respawn_requested);
                subscriber.register(ActionKind::Respawn, move |_| {
                    respawn_flag.store(true, Ordering::Relaxed);
                });
                let quit_flag = Arc::clone(&quit_requested);
                subscriber.register(ActionKind::Quit, move |_| {
                    quit_flag.store(true, Ordering::Relaxed);
                });
                log::info!("action subscriber connected to {url}");
                Some(subscriber)
            }
            None => None,
        };

        Ok(Self {
            adapter,
            image_out,
            control_in,
            status,
            actions,
            paused,
            respawn_requested,
            quit_requested,
            frame: ImageBuf::new(config.camera.width, config.camera.height),
            sync_mode: config.system.synchronous_mode,
            fixed_delta: Duration::from_secs_f64(config.system.fixed_delta_seconds),
            warmup_frames: config.system.warmup_frames,
            base_throttle: config.system.base_throttle,
            control_timeout: config.system.detector_timeout(),
            state_interval: config.system.state_publish_interval(),
            frame_count: 0,
            stats: BridgeStats::default(),
            last_control: None,
        })
    }

    /// Outer loop at the world tick rate. Returns when `shutdown` is raised
    /// or a `quit` action arrives.
    pub fn run(&mut self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        log::info!(
            "vehicle bridge running: warmup {} frames at throttle {}",
            self.warmup_frames,
            self.base_throttle
        );
        let mut last_state_publish = Instant::now() - self.state_interval;

        while !shutdown.load(Ordering::Relaxed) {
            let iteration_start = Instant::now();

            if let Some(actions) = &mut self.actions {
                actions.poll();
            }
            if self.quit_requested.load(Ordering::Relaxed) {
                log::info!("quit action received");
                break;
            }
            if self.respawn_requested.swap(false, Ordering::Relaxed) {
                log::info!("respawning vehicle");
                self.adapter.respawn();
                self.last_control = None;
            }

            // State goes out even while paused so viewers see the flag.
            if last_state_publish.elapsed() >= self.state_interval {
                self.publish_state();
                last_state_publish = Instant::now();
            }

            if self.paused.load(Ordering::Relaxed) {
                thread::sleep(PAUSE_SLEEP);
                continue;
            }

            if self.sync_mode {
                self.adapter.tick(self.fixed_delta.as_secs_f64());
            }

            if !self.adapter.capture_frame(&mut self.frame) {
                thread::sleep(CONTROL_POLL_SLEEP);
                continue;
            }

            let frame_id = self.frame_count;
            self.image_out.write(
                &self.frame,
                ImageMeta {
                    frame_id,
                    timestamp: now_secs(),
                },
            )?;

            let control = self.acquire_control()?;
            self.adapter
                .apply_control(control.steering, control.throttle, control.brake);

            self.frame_count += 1;
            self.stats.frames += 1;

            // Pace the loop to the fixed delta in wall time.
            let elapsed = iteration_start.elapsed();
            if elapsed < self.fixed_delta {
                thread::sleep(self.fixed_delta - elapsed);
            }
        }

        log::info!(
            "vehicle bridge stopping after {} frames ({} control timeouts)",
            self.stats.frames,
            self.stats.control_timeouts
        );
        Ok(())
    }

    /// The control to apply this frame.
    ///
    /// During warmup the fallback `(0, base_throttle, 0)` is applied no
    /// matter what arrives (the channel is still drained so latest-wins
    /// state stays fresh). After warmup, waits up to the configured timeout
    /// for a new command and falls back the same way on silence.
    fn acquire_control(&mut self) -> anyhow::Result<ControlFrame> {
        if self.frame_count < self.warmup_frames {
            if let Some(control) = self.control_in.read_latest()? {
                self.last_control = Some(control);
            }
            return Ok(self.fallback_control());
        }

        let deadline = Instant::now() + self.control_timeout;
        loop {
            if let Some(control) = self.control_in.read_latest()? {
                self.last_control = Some(control);
                return Ok(control.clamped());
            }
            if Instant::now() >= deadline {
                self.stats.control_timeouts += 1;
                log::debug!("control timeout, applying base throttle fallback");
                return Ok(self.fallback_control());
            }
            thread::sleep(CONTROL_POLL_SLEEP);
        }
    }

    fn fallback_control(&self) -> ControlFrame {
        ControlFrame {
            steering: 0.0,
            throttle: self.base_throttle,
            brake: 0.0,
            mode: ControlMode::LaneKeeping,
            left_lane_detected: false,
            right_lane_detected: false,
            lateral_offset: None,
            heading_angle: None,
            frame_id: self.frame_count,
            timestamp: now_secs(),
            processing_time_ms: 0.0,
        }
    }

    fn publish_state(&mut self) {
        let Some(publisher) = &self.status else { return };
        let pose = self.adapter.pose();
        let control = self.last_control;
        let state = VehicleState {
            timestamp: now_secs(),
            frame_id: self.frame_count,
            x: pose.x,
            y: pose.y,
            yaw: pose.yaw,
            velocity: pose.velocity,
            steering: control.map(|c| c.steering).unwrap_or(0.0),
            throttle: control.map(|c| c.throttle).unwrap_or(0.0),
            brake: control.map(|c| c.brake).unwrap_or(0.0),
            left_lane_detected: control.map(|c| c.left_lane_detected).unwrap_or(false),
            right_lane_detected: control.map(|c| c.right_lane_detected).unwrap_or(false),
            paused: self.paused.load(Ordering::Relaxed),
        };
        match publisher.send(&state) {
            Ok(()) => self.stats.states_published += 1,
            Err(e) => log::warn!("state publish failed: {e}"),
        }
    }

    /// Loop counters so far.
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// The wrapped adapter, for inspection in tests.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Pause flag handle; also settable through the `pause` action.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }
}
