//! Message types and typed channels shared by every pipeline process.
//!
//! This is the leaf crate of the workspace: all servers, the broker, and the
//! launcher compile against the shapes defined here. It covers
//! * the lane/detection/control data model and its fixed little-endian
//!   shared-memory payload layouts,
//! * typed writer/reader pairs over the raw [`transport`] slot channels with
//!   the creator/attacher roles of each segment baked in,
//! * the JSON control-plane messages (parameter updates, action requests,
//!   vehicle state), and
//! * the configuration tree read once at startup by each process.

mod channels;
mod codec;
mod config;
mod types;

pub use channels::{
    ChannelError, ControlReader, ControlWriter, DetectionReader, DetectionWriter, ImageMeta,
    ImageReader, ImageWriter,
};
pub use codec::{
    decode_control, decode_detection, encode_control, encode_detection, image_payload_len,
    CONTROL_PAYLOAD_LEN, DETECTION_PAYLOAD_LEN,
};
pub use config::{
    AnalyzerConfig, CameraConfig, ChannelNames, Config, ConfigError, ControllerConfig,
    ControllerMethod, DetectorConfig, LauncherConfig, RoiRatios, SystemConfig, ThrottlePolicy,
};
pub use types::{
    now_secs, ActionKind, ActionRequest, ControlFrame, ControlMode, DepartureStatus,
    DetectionFrame, ImageBuf, Lane, MessageError, ParamCategory, ParamError, ParameterUpdate,
    VehicleState,
};
