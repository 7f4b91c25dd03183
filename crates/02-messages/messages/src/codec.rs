//! Fixed little-endian payload layouts for the shared-memory channels.
//!
//! The payload carries only per-message fields; `frame_id`, `timestamp`, and
//! the kind metadata (image shape, processing time) live in the slot header.

use crate::types::{ControlFrame, ControlMode, Lane, MessageError};
use transport::KIND_META_LEN;

/// Detection payload: two optional lane records of
/// `has u8, x1 y1 x2 y2 i32, confidence f32` each.
pub const DETECTION_PAYLOAD_LEN: usize = 2 * (1 + 4 * 4 + 4);

/// Control payload: `steering f32, throttle f32, brake f32, mode u8,
/// left_lane u8, right_lane u8, has_offset u8, offset f32, has_heading u8,
/// heading f32`.
pub const CONTROL_PAYLOAD_LEN: usize = 3 * 4 + 1 + 2 + (1 + 4) + (1 + 4);

/// Payload size of an RGB image of the given shape.
pub fn image_payload_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

fn put_lane(buf: &mut [u8], lane: Option<&Lane>) {
    match lane {
        Some(lane) => {
            buf[0] = 1;
            buf[1..5].copy_from_slice(&lane.x1.to_le_bytes());
            buf[5..9].copy_from_slice(&lane.y1.to_le_bytes());
            buf[9..13].copy_from_slice(&lane.x2.to_le_bytes());
            buf[13..17].copy_from_slice(&lane.y2.to_le_bytes());
            buf[17..21].copy_from_slice(&lane.confidence.to_le_bytes());
        }
        None => buf[..21].fill(0),
    }
}

fn get_lane(buf: &[u8]) -> Option<Lane> {
    if buf[0] == 0 {
        return None;
    }
    Some(Lane {
        x1: i32::from_le_bytes(buf[1..5].try_into().unwrap()),
        y1: i32::from_le_bytes(buf[5..9].try_into().unwrap()),
        x2: i32::from_le_bytes(buf[9..13].try_into().unwrap()),
        y2: i32::from_le_bytes(buf[13..17].try_into().unwrap()),
        confidence: f32::from_le_bytes(buf[17..21].try_into().unwrap()),
    })
}

/// Encodes the two optional lanes into a detection payload.
pub fn encode_detection(left: Option<&Lane>, right: Option<&Lane>) -> [u8; DETECTION_PAYLOAD_LEN] {
    let mut buf = [0u8; DETECTION_PAYLOAD_LEN];
    put_lane(&mut buf[..21], left);
    put_lane(&mut buf[21..], right);
    buf
}

/// Decodes a detection payload into its optional lanes.
pub fn decode_detection(buf: &[u8]) -> Result<(Option<Lane>, Option<Lane>), MessageError> {
    if buf.len() != DETECTION_PAYLOAD_LEN {
        return Err(MessageError::PayloadLen {
            len: buf.len(),
            expected: DETECTION_PAYLOAD_LEN,
        });
    }
    Ok((get_lane(&buf[..21]), get_lane(&buf[21..])))
}

/// Encodes the actuation fields of a control frame.
pub fn encode_control(frame: &ControlFrame) -> [u8; CONTROL_PAYLOAD_LEN] {
    let mut buf = [0u8; CONTROL_PAYLOAD_LEN];
    buf[0..4].copy_from_slice(&frame.steering.to_le_bytes());
    buf[4..8].copy_from_slice(&frame.throttle.to_le_bytes());
    buf[8..12].copy_from_slice(&frame.brake.to_le_bytes());
    buf[12] = frame.mode.to_byte();
    buf[13] = frame.left_lane_detected as u8;
    buf[14] = frame.right_lane_detected as u8;
    if let Some(offset) = frame.lateral_offset {
        buf[15] = 1;
        buf[16..20].copy_from_slice(&offset.to_le_bytes());
    }
    if let Some(heading) = frame.heading_angle {
        buf[20] = 1;
        buf[21..25].copy_from_slice(&heading.to_le_bytes());
    }
    buf
}

/// Decodes a control payload. Header-resident fields (`frame_id`,
/// `timestamp`, `processing_time_ms`) are filled in by the channel layer.
pub fn decode_control(buf: &[u8]) -> Result<ControlFrame, MessageError> {
    if buf.len() != CONTROL_PAYLOAD_LEN {
        return Err(MessageError::PayloadLen {
            len: buf.len(),
            expected: CONTROL_PAYLOAD_LEN,
        });
    }
    let lateral_offset = if buf[15] != 0 {
        Some(f32::from_le_bytes(buf[16..20].try_into().unwrap()))
    } else {
        None
    };
    let heading_angle = if buf[20] != 0 {
        Some(f32::from_le_bytes(buf[21..25].try_into().unwrap()))
    } else {
        None
    };
    Ok(ControlFrame {
        steering: f32::from_le_bytes(buf[0..4].try_into().unwrap()),
        throttle: f32::from_le_bytes(buf[4..8].try_into().unwrap()),
        brake: f32::from_le_bytes(buf[8..12].try_into().unwrap()),
        mode: ControlMode::from_byte(buf[12])?,
        left_lane_detected: buf[13] != 0,
        right_lane_detected: buf[14] != 0,
        lateral_offset,
        heading_angle,
        frame_id: 0,
        timestamp: 0.0,
        processing_time_ms: 0.0,
    })
}

/// Kind metadata for image slots: `height u32, width u32, channels u32`.
pub(crate) fn image_meta(width: u32, height: u32) -> [u8; KIND_META_LEN] {
    let mut meta = [0u8; KIND_META_LEN];
    meta[0..4].copy_from_slice(&height.to_le_bytes());
    meta[4..8].copy_from_slice(&width.to_le_bytes());
    meta[8..12].copy_from_slice(&3u32.to_le_bytes());
    meta
}

pub(crate) fn parse_image_meta(meta: &[u8; KIND_META_LEN]) -> (u32, u32, u32) {
    (
        u32::from_le_bytes(meta[0..4].try_into().unwrap()),
        u32::from_le_bytes(meta[4..8].try_into().unwrap()),
        u32::from_le_bytes(meta[8..12].try_into().unwrap()),
    )
}

/// Kind metadata for detection/control slots: `processing_time_ms f32`.
pub(crate) fn timing_meta(processing_time_ms: f32) -> [u8; KIND_META_LEN] {
    let mut meta = [0u8; KIND_META_LEN];
    meta[0..4].copy_from_slice(&processing_time_ms.to_le_bytes());
    meta
}

pub(crate) fn parse_timing_meta(meta: &[u8; KIND_META_LEN]) -> f32 {
    f32::from_le_bytes(meta[0..4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ControlFrame, ControlMode, Lane};

    #[test]
    fn detection_payload_is_42_bytes() {
        assert_eq!(DETECTION_PAYLOAD_LEN, 42);
    }

    #[test]
    fn detection_codec_preserves_partial_lanes() {
        let left = Lane {
            x1: 100,
            y1: 600,
            x2: 350,
            y2: 300,
            confidence: 0.9,
        };
        let buf = encode_detection(Some(&left), None);
        let (l, r) = decode_detection(&buf).unwrap();
        assert_eq!(l, Some(left));
        assert_eq!(r, None);
    }

    #[test]
    fn control_codec_round_trip() {
        let frame = ControlFrame {
            steering: -0.25,
            throttle: 0.4,
            brake: 0.0,
            mode: ControlMode::LaneKeeping,
            left_lane_detected: true,
            right_lane_detected: false,
            lateral_offset: Some(0.1),
            heading_angle: None,
            frame_id: 99,
            timestamp: 5.0,
            processing_time_ms: 0.2,
        };
        let decoded = decode_control(&encode_control(&frame)).unwrap();
        assert_eq!(decoded.steering, frame.steering);
        assert_eq!(decoded.mode, ControlMode::LaneKeeping);
        assert!(decoded.left_lane_detected);
        assert!(!decoded.right_lane_detected);
        assert_eq!(decoded.lateral_offset, Some(0.1));
        assert_eq!(decoded.heading_angle, None);
    }

    #[test]
    fn control_decode_rejects_bad_mode() {
        let frame = ControlFrame {
            steering: 0.0,
            throttle: 0.0,
            brake: 0.0,
            mode: ControlMode::Manual,
            left_lane_detected: false,
            right_lane_detected: false,
            lateral_offset: None,
            heading_angle: None,
            frame_id: 0,
            timestamp: 0.0,
            processing_time_ms: 0.0,
        };
        let mut buf = encode_control(&frame);
        buf[12] = 9;
        assert!(decode_control(&buf).is_err());
    }
}
