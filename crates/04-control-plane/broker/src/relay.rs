//! The central broker: ingress draining, forwarding, and viewer fan-out.

use crate::{zmq_err, BrokerError, Endpoints};
use messages::{now_secs, ActionKind, ActionRequest, DetectionFrame, ImageBuf, ParameterUpdate};
use std::collections::HashMap;

/// Receive timeout on every ingress socket so a blocking caller still
/// observes signals promptly.
const RCVTIMEO_MS: i32 = 100;

/// Send high-water mark on the viewer publisher: slow viewers drop frames
/// instead of buffering them.
const VIEWER_SNDHWM: i32 = 10;

type ActionCallback = Box<dyn FnMut(&ActionRequest)>;

/// Counters over everything the broker has routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub parameters_forwarded: u64,
    pub actions_forwarded: u64,
    pub status_forwarded: u64,
    /// Messages dropped for framing or JSON errors.
    pub dropped: u64,
}

/// Adapter seam for viewer frame encoding; the codec itself is an external
/// collaborator.
pub trait FrameEncoder {
    /// Returns the wire format tag and the encoded bytes for one frame.
    fn encode(&mut self, image: &ImageBuf) -> (&'static str, Vec<u8>);
}

/// Pass-through encoder: raw RGB bytes tagged `"raw"`.
#[derive(Debug, Default)]
pub struct RawEncoder;

impl FrameEncoder for RawEncoder {
    fn encode(&mut self, image: &ImageBuf) -> (&'static str, Vec<u8>) {
        ("raw", image.data().to_vec())
    }
}

/// Central ZMQ relay between viewers and the pipeline processes.
///
/// Owns its context and all six sockets; they are never shared across
/// processes. `poll` is non-blocking and meant to be called every iteration
/// of the hosting loop.
pub struct Broker {
    context: zmq::Context,
    param_sub: zmq::Socket,
    param_pub: zmq::Socket,
    action_sub: zmq::Socket,
    action_pub: zmq::Socket,
    status_sub: zmq::Socket,
    viewer_pub: zmq::Socket,
    callbacks: HashMap<ActionKind, ActionCallback>,
    stats: BrokerStats,
}

impl Broker {
    /// Binds all six sockets. A port already in use is a fatal setup error.
    pub fn bind(endpoints: &Endpoints) -> Result<Self, BrokerError> {
        let context = zmq::Context::new();

        let param_sub = context.socket(zmq::SUB).map_err(zmq_err("socket"))?;
        param_sub
            .bind(&endpoints.parameter_ingress)
            .map_err(zmq_err("parameter ingress bind"))?;
        param_sub
            .set_subscribe(b"parameter")
            .map_err(zmq_err("parameter subscribe"))?;
        param_sub
            .set_rcvtimeo(RCVTIMEO_MS)
            .map_err(zmq_err("parameter rcvtimeo"))?;

        let param_pub = context.socket(zmq::PUB).map_err(zmq_err("socket"))?;
        param_pub
            .bind(&endpoints.parameter_egress)
            .map_err(zmq_err("parameter egress bind"))?;

        let action_sub = context.socket(zmq::SUB).map_err(zmq_err("socket"))?;
        action_sub
            .bind(&endpoints.action_ingress)
            .map_err(zmq_err("action ingress bind"))?;
        action_sub
            .set_subscribe(b"action")
            .map_err(zmq_err("action subscribe"))?;
        action_sub
            .set_rcvtimeo(RCVTIMEO_MS)
            .map_err(zmq_err("action rcvtimeo"))?;

        let action_pub = context.socket(zmq::PUB).map_err(zmq_err("socket"))?;
        action_pub
            .bind(&endpoints.action_egress)
            .map_err(zmq_err("action egress bind"))?;

        let status_sub = context.socket(zmq::SUB).map_err(zmq_err("socket"))?;
        status_sub
            .bind(&endpoints.vehicle_status_ingress)
            .map_err(zmq_err("vehicle status bind"))?;
        status_sub
            .set_subscribe(b"vehicle_status")
            .map_err(zmq_err("vehicle status subscribe"))?;
        status_sub
            .set_rcvtimeo(RCVTIMEO_MS)
            .map_err(zmq_err("vehicle status rcvtimeo"))?;

        let viewer_pub = context.socket(zmq::PUB).map_err(zmq_err("socket"))?;
        viewer_pub
            .set_sndhwm(VIEWER_SNDHWM)
            .map_err(zmq_err("viewer sndhwm"))?;
        viewer_pub
            .bind(&endpoints.viewer_egress)
            .map_err(zmq_err("viewer egress bind"))?;

        log::info!(
            "broker bound: params {} -> {}, actions {} -> {}, status {}, viewers {}",
            endpoints.parameter_ingress,
            endpoints.parameter_egress,
            endpoints.action_ingress,
            endpoints.action_egress,
            endpoints.vehicle_status_ingress,
            endpoints.viewer_egress,
        );

        Ok(Self {
            context,
            param_sub,
            param_pub,
            action_sub,
            action_pub,
            status_sub,
            viewer_pub,
            callbacks: HashMap::new(),
            stats: BrokerStats::default(),
        })
    }

    /// Registers a local handler invoked when the named action passes
    /// through, in addition to forwarding it to the vehicle process.
    pub fn register_action(
        &mut self,
        action: ActionKind,
        callback: impl FnMut(&ActionRequest) + 'static,
    ) {
        self.callbacks.insert(action, Box::new(callback));
    }

    /// Drains every ingress socket without blocking and forwards each
    /// message to its egress. Returns the number of messages routed.
    pub fn poll(&mut self) -> usize {
        let mut routed = 0;
        routed += self.poll_parameters();
        routed += self.poll_actions();
        routed += self.poll_status();
        routed
    }

    fn poll_parameters(&mut self) -> usize {
        let mut routed = 0;
        loop {
            let parts = match self.param_sub.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => parts,
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    log::error!("parameter ingress recv failed: {e}");
                    break;
                }
            };
            if parts.len() < 2 {
                log::warn!("parameter message with {} frames dropped", parts.len());
                self.stats.dropped += 1;
                continue;
            }
            let update: ParameterUpdate = match serde_json::from_slice(&parts[1]) {
                Ok(update) => update,
                Err(e) => {
                    log::warn!("undecodable parameter update dropped: {e}");
                    self.stats.dropped += 1;
                    continue;
                }
            };
            let forward = [update.category.topic().as_bytes(), parts[1].as_slice()];
            if let Err(e) = self.param_pub.send_multipart(forward, 0) {
                log::error!("parameter forward failed: {e}");
                self.stats.dropped += 1;
                continue;
            }
            log::debug!(
                "parameter forwarded: {}.{} = {}",
                update.category.topic(),
                update.parameter,
                update.value
            );
            self.stats.parameters_forwarded += 1;
            routed += 1;
        }
        routed
    }

    fn poll_actions(&mut self) -> usize {
        let mut routed = 0;
        loop {
            let parts = match self.action_sub.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => parts,
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    log::error!("action ingress recv failed: {e}");
                    break;
                }
            };
            if parts.len() < 2 {
                log::warn!("action message with {} frames dropped", parts.len());
                self.stats.dropped += 1;
                continue;
            }
            let request: ActionRequest = match serde_json::from_slice(&parts[1]) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("undecodable action request dropped: {e}");
                    self.stats.dropped += 1;
                    continue;
                }
            };
            let forward: [&[u8]; 2] = [b"action", parts[1].as_slice()];
            if let Err(e) = self.action_pub.send_multipart(forward, 0) {
                log::error!("action forward failed: {e}");
            }
            if let Some(callback) = self.callbacks.get_mut(&request.action) {
                callback(&request);
            }
            self.stats.actions_forwarded += 1;
            routed += 1;
        }
        routed
    }

    fn poll_status(&mut self) -> usize {
        let mut routed = 0;
        loop {
            let parts = match self.status_sub.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => parts,
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    log::error!("vehicle status recv failed: {e}");
                    break;
                }
            };
            if parts.len() < 2 {
                log::warn!("vehicle status with {} frames dropped", parts.len());
                self.stats.dropped += 1;
                continue;
            }
            if serde_json::from_slice::<serde_json::Value>(&parts[1]).is_err() {
                log::warn!("undecodable vehicle status dropped");
                self.stats.dropped += 1;
                continue;
            }
            let forward: [&[u8]; 2] = [b"state", parts[1].as_slice()];
            if let Err(e) = self.viewer_pub.send_multipart(forward, 0) {
                log::error!("state broadcast failed: {e}");
                continue;
            }
            self.stats.status_forwarded += 1;
            routed += 1;
        }
        routed
    }

    /// Publishes one camera frame to viewers:
    /// `[b"frame", metadata json, encoded bytes]`.
    pub fn broadcast_frame(
        &self,
        image: &ImageBuf,
        frame_id: u64,
        encoder: &mut dyn FrameEncoder,
    ) -> Result<(), BrokerError> {
        let (format, bytes) = encoder.encode(image);
        let meta = serde_json::json!({
            "timestamp": now_secs(),
            "frame_id": frame_id,
            "width": image.width(),
            "height": image.height(),
            "format": format,
            "size": bytes.len(),
        });
        let meta_json = meta.to_string();
        let parts: [&[u8]; 3] = [b"frame", meta_json.as_bytes(), &bytes];
        self.viewer_pub
            .send_multipart(parts, 0)
            .map_err(zmq_err("frame broadcast"))
    }

    /// Publishes one detection to viewers: `[b"detection", json]`.
    pub fn broadcast_detection(&self, detection: &DetectionFrame) -> Result<(), BrokerError> {
        let json = serde_json::to_vec(detection).expect("detection frames always serialize");
        let parts: [&[u8]; 2] = [b"detection", &json];
        self.viewer_pub
            .send_multipart(parts, 0)
            .map_err(zmq_err("detection broadcast"))
    }

    /// Routing counters so far.
    pub fn stats(&self) -> BrokerStats {
        self.stats
    }

    /// The broker-owned ZMQ context, for callers embedding extra sockets in
    /// the same process.
    pub fn context(&self) -> &zmq::Context {
        &self.context
    }
}
