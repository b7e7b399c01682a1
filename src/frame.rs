// 32-byte sentinel-delimited frame codec for the lamp microcontroller link.
//
// Frame format (both directions):
//   [0x73 's'][type][payload 29 bytes][0x65 'e']
//
// Payloads use little-endian IEEE-754 f32 for numeric fields and one byte
// per boolean flag; unused payload bytes are zero. Encoding never fails for
// in-range inputs and decoding is total — noise on the wire produces an
// error value, never a panic.

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Fixed wire frame length.
pub const FRAME_LEN: usize = 32;
/// Start sentinel, ASCII 's'.
pub const FRAME_START: u8 = 0x73;
/// End sentinel, ASCII 'e'.
pub const FRAME_END: u8 = 0x65;

/// Host→device tracking frame (found flag + yaw/pitch).
pub const TYPE_TRACKING: u8 = 0xA0;
/// Host→device detection coordinates frame.
pub const TYPE_DETECTION: u8 = 0xA2;
/// Host→device control command frame (six boolean flags).
pub const TYPE_CONTROL: u8 = 0xA3;
/// Device→host acknowledgment mirroring the control flags.
pub const TYPE_CONTROL_ACK: u8 = 0xB3;
/// Device→host telemetry frame (yaw/pitch).
pub const TYPE_TELEMETRY: u8 = 0xB0;

/// Scratch buffer bound for the stream extractor. If no start sentinel shows
/// up within this many bytes the buffer is cleared wholesale.
const MAX_SCRAP: usize = 1024;

use crate::error::DecodeError;

// ============================================================================
// Payload types
// ============================================================================

/// Tracking payload: whether a target is in view plus yaw/pitch in radians.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tracking {
    pub found: bool,
    pub yaw: f32,
    pub pitch: f32,
}

/// Detection coordinates payload (normalised bounding box + confidence).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub found: bool,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

/// The six independent control flags, in wire order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub light_on: bool,
    pub light_off: bool,
    pub brightness_up: bool,
    pub brightness_down: bool,
    pub posture_reminder: bool,
    pub eye_rest_reminder: bool,
}

impl ControlFlags {
    fn to_bytes(self) -> [u8; 6] {
        [
            self.light_on as u8,
            self.light_off as u8,
            self.brightness_up as u8,
            self.brightness_down as u8,
            self.posture_reminder as u8,
            self.eye_rest_reminder as u8,
        ]
    }

    fn from_bytes(b: &[u8]) -> Self {
        ControlFlags {
            light_on: b[0] != 0,
            light_off: b[1] != 0,
            brightness_up: b[2] != 0,
            brightness_down: b[3] != 0,
            posture_reminder: b[4] != 0,
            eye_rest_reminder: b[5] != 0,
        }
    }
}

/// Unsolicited telemetry payload, angles in radians.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub yaw: f32,
    pub pitch: f32,
}

impl Telemetry {
    /// Yaw converted for display, matching how the web layer presents angles.
    pub fn yaw_degrees(&self) -> f32 {
        self.yaw.to_degrees()
    }

    pub fn pitch_degrees(&self) -> f32 {
        self.pitch.to_degrees()
    }
}

/// A decoded frame. Immutable value object; carries no back-references.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Tracking(Tracking),
    Detection(Detection),
    Control(ControlFlags),
    ControlAck(ControlFlags),
    Telemetry(Telemetry),
}

impl Frame {
    /// Wire type discriminator for this frame.
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Tracking(_) => TYPE_TRACKING,
            Frame::Detection(_) => TYPE_DETECTION,
            Frame::Control(_) => TYPE_CONTROL,
            Frame::ControlAck(_) => TYPE_CONTROL_ACK,
            Frame::Telemetry(_) => TYPE_TELEMETRY,
        }
    }

    /// Encode to the 32-byte wire format.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        match *self {
            Frame::Tracking(t) => encode_tracking(t.found, t.yaw, t.pitch),
            Frame::Detection(d) => encode_detection(&d),
            Frame::Control(f) => encode_control(&f),
            Frame::ControlAck(f) => encode_control_ack(&f),
            Frame::Telemetry(t) => encode_telemetry(t.yaw, t.pitch),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn new_frame(frame_type: u8) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[0] = FRAME_START;
    buf[1] = frame_type;
    buf[FRAME_LEN - 1] = FRAME_END;
    buf
}

fn put_f32(buf: &mut [u8; FRAME_LEN], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_f32(buf: &[u8], offset: usize) -> f32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[offset..offset + 4]);
    f32::from_le_bytes(b)
}

/// Encode a tracking frame. Angles are taken as given (radians); out-of-range
/// values are not clamped at this layer.
pub fn encode_tracking(found: bool, yaw: f32, pitch: f32) -> [u8; FRAME_LEN] {
    let mut buf = new_frame(TYPE_TRACKING);
    buf[2] = found as u8;
    put_f32(&mut buf, 3, yaw);
    put_f32(&mut buf, 7, pitch);
    buf
}

/// Encode a detection coordinates frame.
pub fn encode_detection(d: &Detection) -> [u8; FRAME_LEN] {
    let mut buf = new_frame(TYPE_DETECTION);
    buf[2] = d.found as u8;
    put_f32(&mut buf, 3, d.x);
    put_f32(&mut buf, 7, d.y);
    put_f32(&mut buf, 11, d.w);
    put_f32(&mut buf, 15, d.h);
    put_f32(&mut buf, 19, d.confidence);
    buf
}

/// Encode a control command frame.
pub fn encode_control(flags: &ControlFlags) -> [u8; FRAME_LEN] {
    let mut buf = new_frame(TYPE_CONTROL);
    buf[2..8].copy_from_slice(&flags.to_bytes());
    buf
}

/// Encode a control acknowledgment. The device side of the exchange; used
/// here by tests that script device behaviour.
pub fn encode_control_ack(flags: &ControlFlags) -> [u8; FRAME_LEN] {
    let mut buf = new_frame(TYPE_CONTROL_ACK);
    buf[2..8].copy_from_slice(&flags.to_bytes());
    buf
}

/// Encode a telemetry frame (device side; used by tests).
pub fn encode_telemetry(yaw: f32, pitch: f32) -> [u8; FRAME_LEN] {
    let mut buf = new_frame(TYPE_TELEMETRY);
    put_f32(&mut buf, 2, yaw);
    put_f32(&mut buf, 6, pitch);
    buf
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a single wire frame.
///
/// Rejects the buffer whole on any length or sentinel violation — a frame is
/// never partially interpreted.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.len() != FRAME_LEN {
        return Err(DecodeError::MalformedFrame("length is not 32 bytes"));
    }
    if bytes[0] != FRAME_START {
        return Err(DecodeError::MalformedFrame("start sentinel mismatch"));
    }
    if bytes[FRAME_LEN - 1] != FRAME_END {
        return Err(DecodeError::MalformedFrame("end sentinel mismatch"));
    }

    match bytes[1] {
        TYPE_TRACKING => Ok(Frame::Tracking(Tracking {
            found: bytes[2] != 0,
            yaw: get_f32(bytes, 3),
            pitch: get_f32(bytes, 7),
        })),
        TYPE_DETECTION => Ok(Frame::Detection(Detection {
            found: bytes[2] != 0,
            x: get_f32(bytes, 3),
            y: get_f32(bytes, 7),
            w: get_f32(bytes, 11),
            h: get_f32(bytes, 15),
            confidence: get_f32(bytes, 19),
        })),
        TYPE_CONTROL => Ok(Frame::Control(ControlFlags::from_bytes(&bytes[2..8]))),
        TYPE_CONTROL_ACK => Ok(Frame::ControlAck(ControlFlags::from_bytes(&bytes[2..8]))),
        TYPE_TELEMETRY => Ok(Frame::Telemetry(Telemetry {
            yaw: get_f32(bytes, 2),
            pitch: get_f32(bytes, 6),
        })),
        other => Err(DecodeError::UnknownType(other)),
    }
}

// ============================================================================
// Stream extraction
// ============================================================================

/// Drain complete frames from an accumulation buffer.
///
/// Resynchronization policy: scan byte-at-a-time for the start sentinel and
/// require the end sentinel 31 bytes later before accepting a frame. A byte
/// that looks like a start sentinel but is not followed by a valid frame is
/// discarded singly and the scan continues, so alignment recovers from
/// partial frames and line noise. Unknown-type frames that are otherwise
/// well delimited are consumed whole.
///
/// Returns the decoded frames plus the number of bytes discarded as noise.
/// Incomplete trailing data stays in the buffer for the next read; the
/// buffer is cleared wholesale if it grows past a bound without a sentinel.
pub fn extract_frames(buffer: &mut Vec<u8>) -> (Vec<Frame>, usize) {
    let mut out = Vec::new();
    let mut dropped = 0usize;

    loop {
        // Find the start sentinel
        let pos = match buffer.iter().position(|b| *b == FRAME_START) {
            Some(i) => i,
            None => {
                dropped += buffer.len();
                buffer.clear();
                break;
            }
        };

        // Discard noise before the sentinel
        if pos > 0 {
            dropped += pos;
            buffer.drain(0..pos);
        }

        if buffer.len() < FRAME_LEN {
            // Keep the buffer bounded if a frame never completes
            if buffer.len() > MAX_SCRAP {
                dropped += buffer.len();
                buffer.clear();
            }
            break;
        }

        if buffer[FRAME_LEN - 1] != FRAME_END {
            // False start sentinel — drop one byte and rescan
            dropped += 1;
            buffer.drain(0..1);
            continue;
        }

        match decode(&buffer[..FRAME_LEN]) {
            Ok(frame) => out.push(frame),
            // Well-delimited but unregistered type: consume and count it
            Err(_) => dropped += FRAME_LEN,
        }
        buffer.drain(0..FRAME_LEN);
    }

    (out, dropped)
}

// ============================================================================
// Tests
// ============================================================================
