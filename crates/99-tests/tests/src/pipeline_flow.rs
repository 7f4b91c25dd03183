//! End-to-end pipeline tests over real shared memory: both servers run as
//! in-process threads while the test plays the camera/vehicle role.

use crate::common::{road_frame, test_config, wait_for, ShmCleanup};
use decision_server::DecisionServer;
use detection_server::DetectionServer;
use messages::{
    now_secs, Config, ControlReader, DetectionWriter, ImageMeta, ImageWriter, Lane,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn start_detection(config: &Config, shutdown: &Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let mut server = DetectionServer::new(config, None).expect("detection server setup");
    server.set_print_stats(false);
    let flag = Arc::clone(shutdown);
    thread::spawn(move || {
        server.run(&flag).expect("detection loop");
        server.shutdown();
    })
}

fn start_decision(config: &Config, shutdown: &Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let mut server = DecisionServer::new(config, None).expect("decision server setup");
    server.set_print_stats(false);
    let flag = Arc::clone(shutdown);
    thread::spawn(move || {
        server.run(&flag).expect("decision loop");
        server.shutdown();
    })
}

/// Frames written by the camera side come back as controls carrying the
/// same frame id and timestamp they were written with.
#[test]
fn image_to_control_carries_frame_identity() {
    let config = test_config("flow");
    let _cleanup = ShmCleanup(config.clone());
    let shutdown = Arc::new(AtomicBool::new(false));

    // Creator-first order: detection server owns image + detection shm.
    let detection = start_detection(&config, &shutdown);
    let decision = start_decision(&config, &shutdown);

    let mut image_out = ImageWriter::attach(
        &config.channels.image,
        config.camera.width,
        config.camera.height,
        100,
        Duration::from_millis(20),
    )
    .expect("attach image writer");
    let mut control_in = ControlReader::attach(
        &config.channels.control,
        100,
        Duration::from_millis(20),
    )
    .expect("attach control reader");

    let frame = road_frame(&config, 40, 280);
    let mut seen = Vec::new();
    for frame_id in 1..=40u64 {
        let timestamp = frame_id as f64 * 0.125;
        image_out
            .write(&frame, ImageMeta { frame_id, timestamp })
            .expect("write image");

        if let Some(control) = wait_for(Duration::from_millis(500), || {
            control_in.read_latest().expect("read control")
        }) {
            assert_eq!(
                control.timestamp,
                control.frame_id as f64 * 0.125,
                "timestamp must ride along with its frame id"
            );
            assert!((-1.0..=1.0).contains(&control.steering));
            assert!((0.0..=1.0).contains(&control.throttle));
            assert!((0.0..=1.0).contains(&control.brake));
            seen.push(control.frame_id);
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    detection.join().expect("detection thread");
    decision.join().expect("decision thread");

    assert!(!seen.is_empty(), "no controls observed");
    for pair in seen.windows(2) {
        assert!(pair[1] >= pair[0], "frame ids regressed: {pair:?}");
    }
    assert!(
        seen.iter().all(|id| (1..=40).contains(id)),
        "control frame ids must come from written frames"
    );
}

/// Centered lanes produce a near-zero steering command through the whole
/// pipeline; lanes far to one side produce a corrective sign.
#[test]
fn steering_sign_tracks_lane_position() {
    let config = test_config("sign");
    let _cleanup = ShmCleanup(config.clone());
    let shutdown = Arc::new(AtomicBool::new(false));

    let detection = start_detection(&config, &shutdown);
    let decision = start_decision(&config, &shutdown);

    let mut image_out = ImageWriter::attach(
        &config.channels.image,
        config.camera.width,
        config.camera.height,
        100,
        Duration::from_millis(20),
    )
    .expect("attach image writer");
    let mut control_in = ControlReader::attach(
        &config.channels.control,
        100,
        Duration::from_millis(20),
    )
    .expect("attach control reader");

    // Lanes shifted right in the image: vehicle sits left of center, so the
    // controller must steer right (positive).
    let shifted = road_frame(&config, 80, 320);
    let mut last_steering = None;
    for frame_id in 1..=30u64 {
        image_out
            .write(
                &shifted,
                ImageMeta {
                    frame_id,
                    timestamp: now_secs(),
                },
            )
            .expect("write image");
        if let Some(control) = wait_for(Duration::from_millis(500), || {
            control_in.read_latest().expect("read control")
        }) {
            if control.brake == 0.0 {
                last_steering = Some(control.steering);
            }
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    detection.join().expect("detection thread");
    decision.join().expect("decision thread");

    let steering = last_steering.expect("no steering command observed");
    assert!(steering > 0.0, "expected right steer, got {steering}");
}

/// Restarting the decision server re-establishes the control stream with
/// fresh monotonically increasing frame ids.
#[test]
fn decision_server_restart_recovers() {
    let config = test_config("restart");
    let _cleanup = ShmCleanup(config.clone());

    // Stand-in detection producer owning the detection segment.
    let mut detection_out =
        DetectionWriter::create(&config.channels.detection).expect("create detection channel");
    let lane = |x1: i32, x2: i32| Lane {
        x1,
        y1: 240,
        x2,
        y2: 120,
        confidence: 1.0,
    };
    let publish = |out: &mut DetectionWriter, frame_id: u64| {
        out.write(&messages::DetectionFrame {
            left_lane: Some(lane(40, 136)),
            right_lane: Some(lane(280, 184)),
            processing_time_ms: 1.0,
            frame_id,
            timestamp: frame_id as f64,
        })
        .expect("write detection");
    };

    // First server incarnation.
    let shutdown_a = Arc::new(AtomicBool::new(false));
    let first = start_decision(&config, &shutdown_a);
    {
        let mut control_in =
            ControlReader::attach(&config.channels.control, 100, Duration::from_millis(20))
                .expect("attach control reader");
        let mut got = None;
        for frame_id in 1..=20 {
            publish(&mut detection_out, frame_id);
            if let Some(control) = wait_for(Duration::from_millis(300), || {
                control_in.read_latest().expect("read control")
            }) {
                got = Some(control.frame_id);
            }
        }
        assert!(got.is_some(), "first incarnation produced no controls");
    }
    shutdown_a.store(true, Ordering::Relaxed);
    first.join().expect("first decision thread");

    // Second incarnation creates a fresh control segment; a fresh reader
    // attachment sees new monotonically increasing ids within a second.
    let shutdown_b = Arc::new(AtomicBool::new(false));
    let second = start_decision(&config, &shutdown_b);
    let mut control_in =
        ControlReader::attach(&config.channels.control, 100, Duration::from_millis(20))
            .expect("re-attach control reader");

    let mut ids = Vec::new();
    for frame_id in 100..=140 {
        publish(&mut detection_out, frame_id);
        if let Some(control) = wait_for(Duration::from_millis(300), || {
            control_in.read_latest().expect("read control")
        }) {
            ids.push(control.frame_id);
        }
        if ids.len() >= 5 {
            break;
        }
    }

    shutdown_b.store(true, Ordering::Relaxed);
    second.join().expect("second decision thread");

    assert!(ids.len() >= 2, "restart produced too few controls: {ids:?}");
    for pair in ids.windows(2) {
        assert!(pair[1] > pair[0], "ids must increase after restart: {ids:?}");
    }
}
