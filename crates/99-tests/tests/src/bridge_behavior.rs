//! Vehicle bridge behavior: warmup fallback, control timeout fallback, the
//! pause flag, and the state broadcast.

use crate::common::{test_config, unique_port_base, wait_for, ShmCleanup};
use messages::{
    Config, ControlFrame, ControlMode, ControlWriter, ImageBuf, ImageReader, VehicleState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use vehicle_bridge::{BridgeEndpoints, VehicleAdapter, VehicleBridge, VehiclePose};

/// Adapter double that records every applied control.
#[derive(Clone, Default)]
struct RecordingAdapter {
    applied: Arc<Mutex<Vec<(f32, f32, f32)>>>,
}

impl VehicleAdapter for RecordingAdapter {
    fn tick(&mut self, _dt: f64) {}

    fn capture_frame(&mut self, frame: &mut ImageBuf) -> bool {
        frame.data_mut().fill(10);
        true
    }

    fn apply_control(&mut self, steering: f32, throttle: f32, brake: f32) {
        self.applied.lock().unwrap().push((steering, throttle, brake));
    }

    fn pose(&self) -> VehiclePose {
        VehiclePose::default()
    }

    fn respawn(&mut self) {}
}

struct Channels {
    // The image segment is created by the detection-server side; tests hold
    // the creator end open so the bridge can attach.
    _image: ImageReader,
    control: ControlWriter,
}

fn make_channels(config: &Config) -> Channels {
    Channels {
        _image: ImageReader::create(
            &config.channels.image,
            config.camera.width,
            config.camera.height,
        )
        .expect("create image channel"),
        control: ControlWriter::create(&config.channels.control).expect("create control channel"),
    }
}

fn control(steering: f32, throttle: f32, frame_id: u64) -> ControlFrame {
    ControlFrame {
        steering,
        throttle,
        brake: 0.0,
        mode: ControlMode::LaneKeeping,
        left_lane_detected: true,
        right_lane_detected: true,
        lateral_offset: Some(0.1),
        heading_angle: Some(2.0),
        frame_id,
        timestamp: frame_id as f64,
        processing_time_ms: 0.5,
    }
}

/// The first `warmup_frames` always apply `(0, base_throttle, 0)` even
/// though fresh controls are available the whole time.
#[test]
fn warmup_ignores_incoming_controls() {
    let mut config = test_config("warmup");
    config.system.warmup_frames = 4;
    config.system.detector_timeout_ms = 100;
    let _cleanup = ShmCleanup(config.clone());

    let mut channels = make_channels(&config);
    let adapter = RecordingAdapter::default();
    let applied = Arc::clone(&adapter.applied);

    let mut bridge =
        VehicleBridge::new(adapter, &config, BridgeEndpoints::disconnected()).expect("bridge");
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || bridge.run(&flag).expect("bridge loop"));

    // Pump distinctive controls the whole time.
    let mut frame_id = 0;
    let done = wait_for(Duration::from_secs(10), || {
        frame_id += 1;
        channels
            .control
            .write(&control(0.9, 0.8, frame_id))
            .expect("write control");
        (applied.lock().unwrap().len() >= 10).then_some(())
    });
    shutdown.store(true, Ordering::Relaxed);
    handle.join().expect("bridge thread");
    done.expect("bridge never applied 10 controls");

    let applied = applied.lock().unwrap();
    let base = config.system.base_throttle;
    for (i, cmd) in applied.iter().take(4).enumerate() {
        assert_eq!(
            *cmd,
            (0.0, base, 0.0),
            "warmup frame {i} must use the fallback"
        );
    }
    assert!(
        applied.iter().skip(4).any(|cmd| *cmd == (0.9, 0.8, 0.0)),
        "post-warmup frames must apply real controls: {applied:?}"
    );
}

/// With no decision server publishing, every post-warmup frame falls back
/// to `(0, base_throttle, 0)` after the control timeout.
#[test]
fn control_silence_falls_back_to_base_throttle() {
    let mut config = test_config("timeout");
    config.system.warmup_frames = 1;
    config.system.detector_timeout_ms = 20;
    let _cleanup = ShmCleanup(config.clone());

    let _channels = make_channels(&config);
    let adapter = RecordingAdapter::default();
    let applied = Arc::clone(&adapter.applied);

    let mut bridge =
        VehicleBridge::new(adapter, &config, BridgeEndpoints::disconnected()).expect("bridge");
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || bridge.run(&flag).expect("bridge loop"));

    wait_for(Duration::from_secs(10), || {
        (applied.lock().unwrap().len() >= 6).then_some(())
    })
    .expect("bridge made no progress under control silence");
    shutdown.store(true, Ordering::Relaxed);
    handle.join().expect("bridge thread");

    let base = config.system.base_throttle;
    for cmd in applied.lock().unwrap().iter() {
        assert_eq!(*cmd, (0.0, base, 0.0), "silence must yield the fallback");
    }
}

/// The state broadcast carries the per-side lane flags of the control the
/// bridge last applied, not just an all-or-nothing guess.
#[test]
fn vehicle_state_reports_per_side_lane_flags() {
    let mut config = test_config("state");
    config.system.warmup_frames = 0;
    config.system.detector_timeout_ms = 50;
    config.system.state_publish_interval_ms = 50;
    let _cleanup = ShmCleanup(config.clone());

    // Play the broker's vehicle-status ingress: SUB bind, bridge connects.
    let status_url = format!("tcp://127.0.0.1:{}", unique_port_base());
    let context = zmq::Context::new();
    let status_sub = context.socket(zmq::SUB).expect("status sub");
    status_sub.bind(&status_url).expect("status bind");
    status_sub.set_subscribe(b"vehicle_status").expect("subscribe");
    status_sub.set_rcvtimeo(50).expect("rcvtimeo");

    let mut channels = make_channels(&config);
    let adapter = RecordingAdapter::default();
    let mut bridge = VehicleBridge::new(
        adapter,
        &config,
        BridgeEndpoints {
            status_url: Some(status_url),
            action_url: None,
        },
    )
    .expect("bridge");
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || bridge.run(&flag).expect("bridge loop"));

    // Feed controls that track only the left lane.
    let mut frame_id = 0;
    let state = wait_for(Duration::from_secs(10), || {
        frame_id += 1;
        let mut cmd = control(0.1, 0.3, frame_id);
        cmd.right_lane_detected = false;
        cmd.lateral_offset = None;
        channels.control.write(&cmd).expect("write control");

        match status_sub.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) if parts.len() == 2 => {
                let state: VehicleState =
                    serde_json::from_slice(&parts[1]).expect("decode state");
                state.left_lane_detected.then_some(state)
            }
            _ => None,
        }
    });
    shutdown.store(true, Ordering::Relaxed);
    handle.join().expect("bridge thread");

    let state = state.expect("no state with lane flags observed");
    assert!(state.left_lane_detected);
    assert!(
        !state.right_lane_detected,
        "single-lane tracking must not be reported as both lanes"
    );
    assert!(!state.paused);
}

/// While paused the bridge stops producing frames; resume restarts them.
#[test]
fn pause_flag_freezes_the_loop() {
    let mut config = test_config("pause");
    config.system.warmup_frames = 0;
    config.system.detector_timeout_ms = 5;
    let _cleanup = ShmCleanup(config.clone());

    let channels = make_channels(&config);
    let mut image_tap = ImageReader::attach(
        &config.channels.image,
        config.camera.width,
        config.camera.height,
        50,
        Duration::from_millis(20),
    )
    .expect("attach image tap");
    drop(channels.control); // not needed; silence just falls back
    let _image_keepalive = channels._image;

    let adapter = RecordingAdapter::default();
    let mut bridge =
        VehicleBridge::new(adapter, &config, BridgeEndpoints::disconnected()).expect("bridge");
    let paused = bridge.pause_flag();
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || bridge.run(&flag).expect("bridge loop"));

    let mut frame = ImageBuf::new(config.camera.width, config.camera.height);
    wait_for(Duration::from_secs(5), || {
        image_tap.read_latest(&mut frame).expect("tap read")
    })
    .expect("no frames while running");

    paused.store(true, Ordering::Relaxed);
    // Allow in-flight iterations to finish, then expect silence.
    thread::sleep(Duration::from_millis(200));
    let _ = image_tap.read_latest(&mut frame).expect("tap read");
    let during_pause = wait_for(Duration::from_millis(300), || {
        image_tap.read_latest(&mut frame).expect("tap read")
    });
    assert!(during_pause.is_none(), "paused bridge must not emit frames");

    paused.store(false, Ordering::Relaxed);
    wait_for(Duration::from_secs(5), || {
        image_tap.read_latest(&mut frame).expect("tap read")
    })
    .expect("resume must restart the frame stream");

    shutdown.store(true, Ordering::Relaxed);
    handle.join().expect("bridge thread");
}
