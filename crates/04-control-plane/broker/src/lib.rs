//! ZMQ control plane: the central broker plus the client-side pieces used
//! by the pipeline processes.
//!
//! The broker binds every socket; servers and viewers only ever connect.
//! Delivery is best-effort pub/sub with a small send high-water mark, so a
//! slow viewer loses old messages instead of stalling the pipeline.

mod clients;
mod endpoints;
mod relay;

pub use clients::{ActionSubscriber, ParameterClient, VehicleStatusPublisher};
pub use endpoints::{connect_addr, Endpoints};
pub use relay::{Broker, BrokerStats, FrameEncoder, RawEncoder};

use thiserror::Error;

/// Errors from control-plane setup and sends.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A socket operation failed (bind conflicts, context teardown).
    #[error("zmq {context} failed")]
    Zmq {
        /// What was being attempted.
        context: &'static str,
        /// Underlying zmq cause.
        #[source]
        source: zmq::Error,
    },
}

pub(crate) fn zmq_err(context: &'static str) -> impl FnOnce(zmq::Error) -> BrokerError {
    move |source| BrokerError::Zmq { context, source }
}
