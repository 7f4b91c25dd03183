//! Client-side control-plane pieces used inside the pipeline processes.

use crate::{zmq_err, BrokerError};
use messages::{ActionKind, ActionRequest, ParamCategory, ParameterUpdate, VehicleState};
use std::collections::HashMap;

const RCVTIMEO_MS: i32 = 100;

/// Subscriber a server embeds to receive its category's parameter updates.
pub struct ParameterClient {
    _context: zmq::Context,
    socket: zmq::Socket,
    category: ParamCategory,
}

impl ParameterClient {
    /// Connects to the broker's parameter egress, filtered to `category`.
    pub fn connect(category: ParamCategory, url: &str) -> Result<Self, BrokerError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::SUB).map_err(zmq_err("socket"))?;
        socket.connect(url).map_err(zmq_err("parameter connect"))?;
        socket
            .set_subscribe(category.topic().as_bytes())
            .map_err(zmq_err("parameter subscribe"))?;
        socket
            .set_rcvtimeo(RCVTIMEO_MS)
            .map_err(zmq_err("parameter rcvtimeo"))?;
        Ok(Self {
            _context: context,
            socket,
            category,
        })
    }

    /// Non-blocking: returns the next pending update, if any. Undecodable
    /// messages are logged and skipped.
    pub fn poll(&self) -> Option<ParameterUpdate> {
        loop {
            let parts = match self.socket.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => parts,
                Err(zmq::Error::EAGAIN) => return None,
                Err(e) => {
                    log::error!("parameter recv failed: {e}");
                    return None;
                }
            };
            if parts.len() < 2 {
                log::warn!("parameter message with {} frames skipped", parts.len());
                continue;
            }
            match serde_json::from_slice::<ParameterUpdate>(&parts[1]) {
                Ok(update) if update.category == self.category => return Some(update),
                Ok(update) => {
                    // Topic filtering should prevent this; drop quietly.
                    log::debug!(
                        "update for {:?} arrived on {:?} subscription",
                        update.category,
                        self.category
                    );
                }
                Err(e) => log::warn!("undecodable parameter update skipped: {e}"),
            }
        }
    }

    /// Drains all pending updates into `apply`. Returns how many were seen.
    pub fn poll_all(&self, mut apply: impl FnMut(ParameterUpdate)) -> usize {
        let mut count = 0;
        while let Some(update) = self.poll() {
            apply(update);
            count += 1;
        }
        count
    }
}

/// Publisher the vehicle process uses to report its state to the broker.
pub struct VehicleStatusPublisher {
    _context: zmq::Context,
    socket: zmq::Socket,
}

impl VehicleStatusPublisher {
    /// Connects to the broker's vehicle-status ingress.
    pub fn connect(url: &str) -> Result<Self, BrokerError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::PUB).map_err(zmq_err("socket"))?;
        socket.set_linger(0).map_err(zmq_err("status linger"))?;
        socket.connect(url).map_err(zmq_err("status connect"))?;
        Ok(Self {
            _context: context,
            socket,
        })
    }

    /// Publishes one state sample under the `vehicle_status` topic.
    pub fn send(&self, state: &VehicleState) -> Result<(), BrokerError> {
        let json = serde_json::to_vec(state).expect("vehicle state always serializes");
        let parts: [&[u8]; 2] = [b"vehicle_status", &json];
        self.socket
            .send_multipart(parts, 0)
            .map_err(zmq_err("status send"))
    }
}

type ActionHandler = Box<dyn FnMut(&ActionRequest) + Send>;

/// Subscriber the vehicle process uses to receive forwarded actions.
pub struct ActionSubscriber {
    _context: zmq::Context,
    socket: zmq::Socket,
    handlers: HashMap<ActionKind, ActionHandler>,
}

impl ActionSubscriber {
    /// Connects to the broker's action egress.
    pub fn connect(url: &str) -> Result<Self, BrokerError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::SUB).map_err(zmq_err("socket"))?;
        socket.connect(url).map_err(zmq_err("action connect"))?;
        socket
            .set_subscribe(b"action")
            .map_err(zmq_err("action subscribe"))?;
        socket
            .set_rcvtimeo(RCVTIMEO_MS)
            .map_err(zmq_err("action rcvtimeo"))?;
        Ok(Self {
            _context: context,
            socket,
            handlers: HashMap::new(),
        })
    }

    /// Binds a handler for one action kind; actions with no handler are
    /// logged and ignored.
    pub fn register(&mut self, action: ActionKind, handler: impl FnMut(&ActionRequest) + Send + 'static) {
        self.handlers.insert(action, Box::new(handler));
    }

    /// Drains pending action requests, dispatching each to its handler.
    /// Returns the number of requests handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let parts = match self.socket.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => parts,
                Err(zmq::Error::EAGAIN) => return handled,
                Err(e) => {
                    log::error!("action recv failed: {e}");
                    return handled;
                }
            };
            if parts.len() < 2 {
                log::warn!("action message with {} frames skipped", parts.len());
                continue;
            }
            let request: ActionRequest = match serde_json::from_slice(&parts[1]) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("undecodable action request skipped: {e}");
                    continue;
                }
            };
            match self.handlers.get_mut(&request.action) {
                Some(handler) => {
                    handler(&request);
                    handled += 1;
                }
                None => log::info!("action {:?} has no handler, ignored", request.action),
            }
        }
    }
}
