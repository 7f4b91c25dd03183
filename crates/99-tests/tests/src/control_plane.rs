//! Control-plane tests over loopback ZMQ: parameter routing, action
//! forwarding, vehicle-status relay, and flood behavior.

use crate::common::{test_config, unique_port_base, wait_for, ShmCleanup};
use broker::{
    connect_addr, ActionSubscriber, Broker, Endpoints, ParameterClient, VehicleStatusPublisher,
};
use decision_server::DecisionServer;
use messages::{
    now_secs, ActionKind, ControlReader, DetectionFrame, DetectionWriter, Lane, ParamCategory,
    VehicleState,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// PUB socket playing the viewer role against a broker ingress. Keeps its
/// context alive alongside the socket.
struct ViewerPub {
    _context: zmq::Context,
    socket: zmq::Socket,
}

impl ViewerPub {
    fn connect(url: &str) -> Self {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::PUB).expect("viewer socket");
        socket.set_linger(0).expect("linger");
        socket.connect(&connect_addr(url)).expect("viewer connect");
        Self {
            _context: context,
            socket,
        }
    }

    fn send(&self, topic: &[u8], payload: &[u8]) {
        self.socket
            .send_multipart([topic, payload], 0)
            .expect("viewer send");
    }
}

/// SUB socket playing the viewer role against the broker's viewer egress.
struct ViewerSub {
    _context: zmq::Context,
    socket: zmq::Socket,
}

impl ViewerSub {
    fn connect(url: &str, topic: &[u8]) -> Self {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::SUB).expect("viewer sub socket");
        socket.connect(&connect_addr(url)).expect("viewer sub connect");
        socket.set_subscribe(topic).expect("subscribe");
        socket.set_rcvtimeo(50).expect("rcvtimeo");
        Self {
            _context: context,
            socket,
        }
    }

    fn try_recv(&self) -> Option<Vec<Vec<u8>>> {
        self.socket.recv_multipart(zmq::DONTWAIT).ok()
    }
}

fn parameter_json(category: &str, parameter: &str, value: f64) -> Vec<u8> {
    format!(
        r#"{{"category":"{category}","parameter":"{parameter}","value":{value},"timestamp":{}}}"#,
        now_secs()
    )
    .into_bytes()
}

/// A parameter published at the viewer ingress reaches a category-filtered
/// client through the broker; the other category stays invisible.
#[test]
fn parameter_reaches_filtered_client() {
    let endpoints = Endpoints::loopback(unique_port_base());
    let mut broker = Broker::bind(&endpoints).expect("broker bind");

    let client = ParameterClient::connect(
        ParamCategory::Detection,
        &connect_addr(&endpoints.parameter_egress),
    )
    .expect("client connect");
    let viewer = ViewerPub::connect(&endpoints.parameter_ingress);

    // Slow joiner: keep resending until the subscription is live.
    let update = wait_for(Duration::from_secs(5), || {
        viewer.send(b"parameter", &parameter_json("detection", "canny_low", 70.0));
        broker.poll();
        client.poll()
    })
    .expect("update never arrived");

    assert_eq!(update.category, ParamCategory::Detection);
    assert_eq!(update.parameter, "canny_low");
    assert_eq!(update.value, 70.0);
    assert!(broker.stats().parameters_forwarded >= 1);

    // A decision-category update must not reach this client.
    let foreign = wait_for(Duration::from_millis(500), || {
        viewer.send(b"parameter", &parameter_json("decision", "kp", 0.7));
        broker.poll();
        client.poll()
    });
    assert!(foreign.is_none(), "category filter must hold");
}

/// Malformed parameter payloads are dropped without killing the broker.
#[test]
fn malformed_parameters_are_dropped() {
    let endpoints = Endpoints::loopback(unique_port_base());
    let mut broker = Broker::bind(&endpoints).expect("broker bind");
    let viewer = ViewerPub::connect(&endpoints.parameter_ingress);

    wait_for(Duration::from_secs(5), || {
        viewer.send(b"parameter", b"{not json");
        broker.poll();
        (broker.stats().dropped > 0).then_some(())
    })
    .expect("broker never observed the malformed message");

    // Still functional afterwards.
    let client = ParameterClient::connect(
        ParamCategory::Decision,
        &connect_addr(&endpoints.parameter_egress),
    )
    .expect("client connect");
    let update = wait_for(Duration::from_secs(5), || {
        viewer.send(b"parameter", &parameter_json("decision", "kp", 0.9));
        broker.poll();
        client.poll()
    });
    assert!(update.is_some(), "broker must survive malformed input");
}

/// A live decision server applies a kp update end-to-end: the steering
/// magnitude roughly doubles within a few control periods, and an
/// out-of-range update leaves steering untouched.
#[test]
fn decision_server_applies_and_rejects_updates() {
    let config = test_config("params");
    let _cleanup = ShmCleanup(config.clone());
    let endpoints = Endpoints::loopback(unique_port_base());
    let mut broker = Broker::bind(&endpoints).expect("broker bind");

    let mut detection_out =
        DetectionWriter::create(&config.channels.detection).expect("create detection channel");

    let mut server =
        DecisionServer::new(&config, Some(&connect_addr(&endpoints.parameter_egress)))
            .expect("decision server setup");
    server.set_print_stats(false);
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || {
        server.run(&flag).expect("decision loop");
        server.shutdown();
    });

    let mut control_in =
        ControlReader::attach(&config.channels.control, 100, Duration::from_millis(20))
            .expect("attach control reader");

    // Off-center lanes at 320x240: offset -24 px over a 240 px lane.
    let shifted = DetectionFrame {
        left_lane: Some(Lane {
            x1: 64,
            y1: 240,
            x2: 148,
            y2: 120,
            confidence: 1.0,
        }),
        right_lane: Some(Lane {
            x1: 304,
            y1: 240,
            x2: 220,
            y2: 120,
            confidence: 1.0,
        }),
        processing_time_ms: 1.0,
        frame_id: 0,
        timestamp: 0.0,
    };

    let mut frame_id = 0u64;
    let mut steering_for =
        |detection_out: &mut DetectionWriter, control_in: &mut ControlReader| -> Option<f32> {
            frame_id += 1;
            detection_out
                .write(&DetectionFrame {
                    frame_id,
                    timestamp: frame_id as f64,
                    ..shifted
                })
                .expect("write detection");
            wait_for(Duration::from_millis(500), || {
                control_in.read_latest().expect("read control")
            })
            .map(|c| c.steering)
        };

    let baseline =
        steering_for(&mut detection_out, &mut control_in).expect("baseline control");
    assert!(baseline > 0.0, "expected right steer, got {baseline}");

    // Send (decision, kp, 1.0) until the steering doubles.
    let viewer = ViewerPub::connect(&endpoints.parameter_ingress);
    let doubled = wait_for(Duration::from_secs(5), || {
        viewer.send(b"parameter", &parameter_json("decision", "kp", 1.0));
        broker.poll();
        let steering = steering_for(&mut detection_out, &mut control_in)?;
        ((steering / baseline - 2.0).abs() < 0.2).then_some(steering)
    })
    .expect("kp update never took effect");
    assert!(doubled > baseline);

    // Out-of-range kp must be rejected with no control discontinuity.
    for _ in 0..5 {
        viewer.send(b"parameter", &parameter_json("decision", "kp", 99.0));
        broker.poll();
        thread::sleep(Duration::from_millis(20));
    }
    let after =
        steering_for(&mut detection_out, &mut control_in).expect("control after rejection");
    assert!(
        (after - doubled).abs() < 1e-3,
        "rejected update changed steering: {doubled} -> {after}"
    );

    shutdown.store(true, Ordering::Relaxed);
    handle.join().expect("decision thread");
}

/// Flooding the parameter ingress never deadlocks the broker; at least one
/// update gets through and the loop completes promptly.
#[test]
fn parameter_flood_keeps_broker_responsive() {
    let endpoints = Endpoints::loopback(unique_port_base());
    let mut broker = Broker::bind(&endpoints).expect("broker bind");
    let client = ParameterClient::connect(
        ParamCategory::Decision,
        &connect_addr(&endpoints.parameter_egress),
    )
    .expect("client connect");
    let viewer = ViewerPub::connect(&endpoints.parameter_ingress);

    // Wait for the slow-joiner handshake first.
    wait_for(Duration::from_secs(5), || {
        viewer.send(b"parameter", &parameter_json("decision", "kp", 0.1));
        broker.poll();
        client.poll()
    })
    .expect("subscription never became live");

    const FLOOD: u32 = 10_000;
    let mut last_applied = None;
    let started = Instant::now();
    for i in 0..FLOOD {
        let value = f64::from(i % 2000) / 1000.0;
        viewer.send(b"parameter", &parameter_json("decision", "kp", value));
        if i % 64 == 0 {
            broker.poll();
            client.poll_all(|update| last_applied = Some(update.value));
        }
    }
    // Drain whatever survived the high-water marks.
    let drain_deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < drain_deadline {
        let routed = broker.poll();
        let applied = client.poll_all(|update| last_applied = Some(update.value));
        if routed == 0 && applied == 0 {
            break;
        }
    }

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "flood handling took too long"
    );
    assert!(last_applied.is_some(), "no update survived the flood");
}

/// Actions are forwarded to the vehicle-side subscriber and to locally
/// registered broker callbacks; vehicle status is re-broadcast to viewers
/// under the `state` topic.
#[test]
fn actions_and_status_are_relayed() {
    let endpoints = Endpoints::loopback(unique_port_base());
    let mut broker = Broker::bind(&endpoints).expect("broker bind");

    let local_hits = Arc::new(AtomicU32::new(0));
    let hits = Arc::clone(&local_hits);
    broker.register_action(ActionKind::Pause, move |_| {
        hits.fetch_add(1, Ordering::Relaxed);
    });

    let mut subscriber =
        ActionSubscriber::connect(&connect_addr(&endpoints.action_egress)).expect("subscriber");
    let paused = Arc::new(AtomicBool::new(false));
    let pause_flag = Arc::clone(&paused);
    subscriber.register(ActionKind::Pause, move |_| {
        pause_flag.store(true, Ordering::Relaxed);
    });

    let viewer = ViewerPub::connect(&endpoints.action_ingress);
    let action_json = format!(r#"{{"action":"pause","timestamp":{}}}"#, now_secs());

    wait_for(Duration::from_secs(5), || {
        viewer.send(b"action", action_json.as_bytes());
        broker.poll();
        subscriber.poll();
        paused.load(Ordering::Relaxed).then_some(())
    })
    .expect("pause action never arrived at the vehicle side");
    assert!(
        local_hits.load(Ordering::Relaxed) >= 1,
        "local callback must fire"
    );

    // Vehicle status relay to viewers.
    let state_sub = ViewerSub::connect(&endpoints.viewer_egress, b"state");
    let publisher =
        VehicleStatusPublisher::connect(&connect_addr(&endpoints.vehicle_status_ingress))
            .expect("status publisher");

    let state = VehicleState {
        timestamp: 1.0,
        frame_id: 7,
        x: 10.0,
        y: -0.2,
        yaw: 0.01,
        velocity: 8.0,
        steering: -0.05,
        throttle: 0.3,
        brake: 0.0,
        left_lane_detected: true,
        right_lane_detected: true,
        paused: false,
    };

    let received: VehicleState = wait_for(Duration::from_secs(5), || {
        publisher.send(&state).expect("status send");
        broker.poll();
        match state_sub.try_recv() {
            Some(parts) if parts.len() == 2 => serde_json::from_slice(&parts[1]).ok(),
            _ => None,
        }
    })
    .expect("state never reached the viewer side");

    assert_eq!(received.frame_id, 7);
    assert_eq!(received.velocity, 8.0);
    assert!(broker.stats().status_forwarded >= 1);
}
