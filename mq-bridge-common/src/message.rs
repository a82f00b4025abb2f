//! The bridge wire envelope.
//!
//! A [`BridgeMessage`] is what travels on the bus side when a connector does
//! not exclude headers. On the wire it is a JSON object:
//!
//! ```text
//! {"v":1,"header":{"priority":9,"reply_to_q":"Q2",...},"body":"aGVsbG8="}
//! ```
//!
//! Byte fields (the body and the identifier fields of the header) are base64
//! text. Unknown top-level fields are rejected so that arbitrary JSON published
//! by a bus client is not mistaken for an envelope.

use crate::encoding;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version tag written into every encoded envelope
pub const WIRE_VERSION: u8 = 1;

/// Errors produced while encoding or decoding a [`BridgeMessage`]
#[derive(Debug, Error)]
pub enum MessageError {
    /// The envelope could not be serialized
    #[error("failed to encode bridge message: {0}")]
    Encode(String),

    /// The input is not a valid envelope
    #[error("failed to decode bridge message: {0}")]
    Decode(String),

    /// The envelope was written by an incompatible bridge version
    #[error("unsupported bridge message version {0}")]
    UnsupportedVersion(u8),
}

/// Middleware metadata carried across the bus.
///
/// Only fields that describe the message itself are present. Fields the queue
/// manager assigns on every put (version, message type, expiry, persistence,
/// backout count, put date and time) are never part of the header.
///
/// Fields missing from a decoded header take the values of a freshly
/// initialized MQ message descriptor, not zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeHeader {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reply_to_q: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reply_to_q_mgr: String,
    /// Streaming channel replies should be published to
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reply_to_channel: String,

    pub report: i32,
    pub feedback: i32,
    pub encoding: i32,
    pub coded_char_set_id: i32,
    pub format: String,
    pub priority: i32,

    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "encoding::serialize",
        deserialize_with = "encoding::deserialize"
    )]
    pub msg_id: Vec<u8>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "encoding::serialize",
        deserialize_with = "encoding::deserialize"
    )]
    pub correl_id: Vec<u8>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "encoding::serialize",
        deserialize_with = "encoding::deserialize"
    )]
    pub group_id: Vec<u8>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "encoding::serialize",
        deserialize_with = "encoding::deserialize"
    )]
    pub accounting_token: Vec<u8>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_identifier: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub appl_identity_data: String,
    pub put_appl_type: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub put_appl_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub appl_origin_data: String,

    pub msg_seq_number: i32,
    pub offset: i32,
    pub msg_flags: i32,
    pub original_length: i32,
}

impl Default for BridgeHeader {
    fn default() -> Self {
        Self {
            reply_to_q: String::new(),
            reply_to_q_mgr: String::new(),
            reply_to_channel: String::new(),
            report: 0,
            feedback: 0,
            // native encoding
            encoding: 546,
            // queue manager's character set
            coded_char_set_id: 0,
            // blank format name
            format: "        ".to_string(),
            // queue default priority
            priority: -1,
            msg_id: Vec::new(),
            correl_id: Vec::new(),
            group_id: Vec::new(),
            accounting_token: Vec::new(),
            user_identifier: String::new(),
            appl_identity_data: String::new(),
            put_appl_type: 0,
            put_appl_name: String::new(),
            appl_origin_data: String::new(),
            msg_seq_number: 1,
            offset: 0,
            msg_flags: 0,
            // undefined original length
            original_length: -1,
        }
    }
}

/// A message body plus optional header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMessage {
    /// Translated metadata, absent when the sender had nothing to carry
    pub header: Option<BridgeHeader>,
    /// The opaque payload, relayed byte for byte
    pub body: Bytes,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    v: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header: Option<BridgeHeader>,
    #[serde(
        serialize_with = "encoding::serialize",
        deserialize_with = "encoding::deserialize_bytes"
    )]
    body: Bytes,
}

impl BridgeMessage {
    /// Create a message with an empty header
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            header: Some(BridgeHeader::default()),
            body: body.into(),
        }
    }

    /// Create a message that carries no header at all
    pub fn without_header(body: impl Into<Bytes>) -> Self {
        Self {
            header: None,
            body: body.into(),
        }
    }

    /// Replace the header
    pub fn with_header(mut self, header: BridgeHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Mutable access to the header, creating an empty one if needed
    pub fn header_mut(&mut self) -> &mut BridgeHeader {
        self.header.get_or_insert_with(BridgeHeader::default)
    }

    /// Encode the envelope for the wire
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let envelope = Envelope {
            v: WIRE_VERSION,
            header: self.header.clone(),
            body: self.body.clone(),
        };
        serde_json::to_vec(&envelope).map_err(|e| MessageError::Encode(e.to_string()))
    }

    /// Decode an envelope read from the wire
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(|e| MessageError::Decode(e.to_string()))?;

        if envelope.v != WIRE_VERSION {
            return Err(MessageError::UnsupportedVersion(envelope.v));
        }

        Ok(Self {
            header: envelope.header,
            body: envelope.body,
        })
    }

    /// Get the payload size in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_with_header() {
        let mut msg = BridgeMessage::new(&b"hello world"[..]);
        let header = msg.header_mut();
        header.priority = 9;
        header.reply_to_q = "Q2".to_string();
        header.correl_id = vec![7u8; 24];

        let encoded = msg.encode().unwrap();
        assert_ne!(encoded, b"hello world");

        let decoded = BridgeMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.header.unwrap().correl_id, vec![7u8; 24]);
    }

    #[test]
    fn test_body_is_base64_on_the_wire() {
        let msg = BridgeMessage::without_header(vec![0u8, 159, 146, 150]);
        let encoded = msg.encode().unwrap();

        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["body"], "AJ+Slg==");
        assert!(json.get("header").is_none());
    }

    #[test]
    fn test_decode_rejects_raw_bytes() {
        assert!(matches!(
            BridgeMessage::decode(b"hello world"),
            Err(MessageError::Decode(_))
        ));
        assert!(BridgeMessage::decode(b"").is_err());
        assert!(BridgeMessage::decode(b"{}").is_err());
        assert!(BridgeMessage::decode(br#"{"name":"not an envelope"}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let result = BridgeMessage::decode(br#"{"v":1,"body":"***"}"#);
        assert!(matches!(result, Err(MessageError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_other_versions() {
        let result = BridgeMessage::decode(br#"{"v":7,"body":""}"#);
        assert!(matches!(result, Err(MessageError::UnsupportedVersion(7))));
    }

    #[test]
    fn test_header_fields_default_when_missing() {
        let decoded =
            BridgeMessage::decode(br#"{"v":1,"header":{"priority":4},"body":"aGk="}"#).unwrap();
        let header = decoded.header.unwrap();

        assert_eq!(decoded.body.as_ref(), b"hi");
        assert_eq!(header.priority, 4);
        assert!(header.msg_id.is_empty());
        assert!(header.reply_to_channel.is_empty());
        assert_eq!(header.encoding, 546);
        assert_eq!(header.format, "        ");
        assert_eq!(header.msg_seq_number, 1);
        assert_eq!(header.original_length, -1);
    }
}
