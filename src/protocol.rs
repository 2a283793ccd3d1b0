//! Binary frame codec for the realtime wire protocol.
//!
//! Every WebSocket frame starts with a varuint message-type tag; the rest is
//! the type-specific payload:
//!
//! ```text
//! ┌─────────────┬──────────────────────────────────────────────┐
//! │ varuint tag │ payload                                      │
//! ├─────────────┼──────────────────────────────────────────────┤
//! │ 0 SYNC      │ sync-protocol message (step1 / step2 / update)│
//! │ 1 AWARENESS │ varuint-length-prefixed awareness update      │
//! │ ≥2 APP      │ varuint-length-prefixed opaque bytes          │
//! └─────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! The sync and awareness payload encodings are defined by the CRDT library
//! (lib0 v1); this module only owns the outer tag dispatch. Tags ≥2 form an
//! application channel used server→client for out-of-band notifications;
//! inbound frames on that channel carry no meaning here.

use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;
use yrs::sync::{AwarenessUpdate, SyncMessage};
use yrs::updates::decoder::{Decode, DecoderV1};
use yrs::updates::encoder::{Encode, Encoder, EncoderV1};

/// Wire tag for CRDT sync-protocol frames.
pub const TAG_SYNC: u64 = 0;
/// Wire tag for awareness frames.
pub const TAG_AWARENESS: u64 = 1;
/// First tag of the application notification range.
pub const TAG_APP_MIN: u64 = 2;

/// A decoded inbound frame.
#[derive(Debug)]
pub enum WireMessage {
    /// CRDT sync-protocol message.
    Sync(SyncMessage),
    /// Presence update for one or more client IDs.
    Awareness(AwarenessUpdate),
    /// Application notification channel (tags ≥2).
    App { tag: u64, payload: Vec<u8> },
}

/// Codec and CRDT payload errors. All of them are fatal for the connection
/// that produced the frame; the session itself survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Malformed varuint, truncated payload, or undecodable inner payload.
    Malformed(String),
    /// The CRDT library rejected a payload it was asked to apply.
    Crdt(String),
    /// Inbound application frame while strict mode is enabled.
    UnexpectedApp(u64),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::Crdt(e) => write!(f, "crdt payload rejected: {e}"),
            Self::UnexpectedApp(tag) => write!(f, "unexpected app frame (tag {tag})"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<yrs::encoding::read::Error> for ProtocolError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

/// Decode one inbound frame.
pub fn decode(frame: &[u8]) -> Result<WireMessage, ProtocolError> {
    if frame.is_empty() {
        return Err(ProtocolError::Malformed("empty frame".to_string()));
    }
    let mut decoder = DecoderV1::new(Cursor::new(frame));
    let tag: u64 = decoder.read_var()?;
    match tag {
        TAG_SYNC => Ok(WireMessage::Sync(SyncMessage::decode(&mut decoder)?)),
        TAG_AWARENESS => {
            let payload = decoder.read_buf()?;
            Ok(WireMessage::Awareness(AwarenessUpdate::decode_v1(payload)?))
        }
        tag => {
            let payload = decoder.read_buf()?.to_vec();
            Ok(WireMessage::App { tag, payload })
        }
    }
}

/// Encode a sync-protocol message into a ready-to-send frame.
pub fn encode_sync(msg: &SyncMessage) -> Vec<u8> {
    let mut encoder = EncoderV1::new();
    encoder.write_var(TAG_SYNC);
    msg.encode(&mut encoder);
    encoder.to_vec()
}

/// Encode an awareness update into a ready-to-send frame.
pub fn encode_awareness(update: &AwarenessUpdate) -> Vec<u8> {
    let mut encoder = EncoderV1::new();
    encoder.write_var(TAG_AWARENESS);
    encoder.write_buf(update.encode_v1());
    encoder.to_vec()
}

/// Encode an application notification frame. `tag` must be ≥2.
pub fn encode_app(tag: u64, payload: &[u8]) -> Vec<u8> {
    debug_assert!(tag >= TAG_APP_MIN);
    let mut encoder = EncoderV1::new();
    encoder.write_var(tag);
    encoder.write_buf(payload);
    encoder.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::StateVector;

    #[test]
    fn test_sync_step1_roundtrip() {
        let frame = encode_sync(&SyncMessage::SyncStep1(StateVector::default()));
        match decode(&frame).unwrap() {
            WireMessage::Sync(SyncMessage::SyncStep1(sv)) => {
                assert_eq!(sv.encode_v1(), StateVector::default().encode_v1());
            }
            other => panic!("expected sync step1, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_update_roundtrip() {
        let payload = vec![7u8; 24];
        let frame = encode_sync(&SyncMessage::Update(payload.clone()));
        match decode(&frame).unwrap() {
            WireMessage::Sync(SyncMessage::Update(bytes)) => assert_eq!(bytes, payload),
            other => panic!("expected sync update, got {other:?}"),
        }
    }

    #[test]
    fn test_app_frame_roundtrip() {
        let frame = encode_app(2, b"permissions-changed");
        match decode(&frame).unwrap() {
            WireMessage::App { tag, payload } => {
                assert_eq!(tag, 2);
                assert_eq!(payload, b"permissions-changed");
            }
            other => panic!("expected app frame, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(matches!(decode(&[]), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_truncated_awareness_rejected() {
        // Tag 1 followed by a length prefix that promises more bytes than
        // the frame holds.
        let frame = vec![TAG_AWARENESS as u8, 0x20, 0x01];
        assert!(matches!(decode(&frame), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_garbage_sync_payload_rejected() {
        let frame = vec![TAG_SYNC as u8, 0xFF, 0xFF, 0xFF];
        assert!(decode(&frame).is_err());
    }
}
