//! Length-prefixed blob envelope for persisted events and snapshots
//!
//! Persistence stores opaque blobs tagged with the encoding that produced
//! them, so a namespace can be migrated to a new payload encoding without
//! rewriting history. The envelope itself is a protobuf message framed with
//! a length prefix; the payload inside is encoded per the tag.

use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::HistoryEvent;

/// Payload encoding tag, configurable per namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingType {
    Json,
    Proto3,
}

impl EncodingType {
    fn as_i32(self) -> i32 {
        match self {
            Self::Json => 0,
            Self::Proto3 => 1,
        }
    }

    fn from_i32(value: i32) -> Result<Self, EncodingError> {
        match value {
            0 => Ok(Self::Json),
            1 => Ok(Self::Proto3),
            other => Err(EncodingError::UnknownEncoding(other)),
        }
    }
}

impl std::fmt::Display for EncodingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Proto3 => write!(f, "proto3"),
        }
    }
}

/// Tagged blob as written to storage
#[derive(Clone, PartialEq, Message)]
pub struct DataBlob {
    #[prost(int32, tag = "1")]
    pub encoding: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Errors from blob encode/decode
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unknown encoding tag: {0}")]
    UnknownEncoding(i32),

    #[error("encoding {0} is not enabled for this namespace")]
    UnsupportedEncoding(EncodingType),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("envelope decode error: {0}")]
    Envelope(#[from] prost::DecodeError),
}

/// Encode an event batch into a length-prefixed tagged blob
pub fn encode_events(
    encoding: EncodingType,
    events: &[HistoryEvent],
) -> Result<Vec<u8>, EncodingError> {
    let data = match encoding {
        EncodingType::Json => serde_json::to_vec(events)?,
        // proto3 payloads need the schema registry, which ships separately
        EncodingType::Proto3 => return Err(EncodingError::UnsupportedEncoding(encoding)),
    };
    let blob = DataBlob {
        encoding: encoding.as_i32(),
        data,
    };
    Ok(blob.encode_length_delimited_to_vec())
}

/// Decode a length-prefixed tagged blob back into an event batch
pub fn decode_events(bytes: &[u8]) -> Result<Vec<HistoryEvent>, EncodingError> {
    let blob = DataBlob::decode_length_delimited(bytes)?;
    match EncodingType::from_i32(blob.encoding)? {
        EncodingType::Json => Ok(serde_json::from_slice(&blob.data)?),
        EncodingType::Proto3 => Err(EncodingError::UnsupportedEncoding(EncodingType::Proto3)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventAttributes, TimerFiredAttributes};

    fn timer_fired(event_id: i64) -> HistoryEvent {
        HistoryEvent {
            event_id,
            version: 1,
            timestamp: 100,
            task_id: 0,
            attributes: EventAttributes::TimerFired(TimerFiredAttributes {
                timer_id: "t".to_string(),
                started_event_id: 1,
            }),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let events = vec![timer_fired(1), timer_fired(2)];
        let bytes = encode_events(EncodingType::Json, &events).unwrap();
        let decoded = decode_events(&bytes).unwrap();
        assert_eq!(events, decoded);
    }

    #[test]
    fn test_proto3_not_enabled() {
        let err = encode_events(EncodingType::Proto3, &[timer_fired(1)]).unwrap_err();
        assert!(matches!(err, EncodingError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let blob = DataBlob {
            encoding: 99,
            data: vec![],
        };
        let bytes = blob.encode_length_delimited_to_vec();
        let err = decode_events(&bytes).unwrap_err();
        assert!(matches!(err, EncodingError::UnknownEncoding(99)));
    }
}
