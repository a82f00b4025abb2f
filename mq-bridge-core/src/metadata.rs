//! The middleware-side per-message descriptor.
//!
//! [`MessageDescriptor`] mirrors the fields of an MQ message descriptor. Its
//! `Default` is what a fresh outbound message looks like before the queue
//! manager fills in the fields it owns.

use serde::{Deserialize, Serialize};

/// Width of message, correlation and group identifiers
pub const ID_LENGTH: usize = 24;

/// Width of the accounting token
pub const ACCOUNTING_TOKEN_LENGTH: usize = 32;

/// Descriptor version written by a fresh message
pub const MD_VERSION_1: i32 = 1;
/// Message type: no reply expected
pub const MT_DATAGRAM: i32 = 8;
/// Unlimited lifetime
pub const EI_UNLIMITED: i32 = -1;
/// Native machine encoding
pub const ENC_NATIVE: i32 = 546;
/// Use the queue manager's coded character set
pub const CCSI_Q_MGR: i32 = 0;
/// No format name
pub const FMT_NONE: &str = "        ";
/// Take priority from the queue definition
pub const PRI_PRIORITY_AS_Q_DEF: i32 = -1;
/// Take persistence from the queue definition
pub const PER_PERSISTENCE_AS_Q_DEF: i32 = 2;
/// Original length unknown
pub const OL_UNDEFINED: i32 = -1;

/// MQ message descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub version: i32,
    pub report: i32,
    pub msg_type: i32,
    pub expiry: i32,
    pub feedback: i32,
    pub encoding: i32,
    pub coded_char_set_id: i32,
    pub format: String,
    pub priority: i32,
    pub persistence: i32,
    pub msg_id: Vec<u8>,
    pub correl_id: Vec<u8>,
    pub backout_count: i32,
    pub reply_to_q: String,
    pub reply_to_q_mgr: String,
    pub user_identifier: String,
    pub accounting_token: Vec<u8>,
    pub appl_identity_data: String,
    pub put_appl_type: i32,
    pub put_appl_name: String,
    pub put_date: String,
    pub put_time: String,
    pub appl_origin_data: String,
    pub group_id: Vec<u8>,
    pub msg_seq_number: i32,
    pub offset: i32,
    pub msg_flags: i32,
    pub original_length: i32,
}

impl Default for MessageDescriptor {
    fn default() -> Self {
        Self {
            version: MD_VERSION_1,
            report: 0,
            msg_type: MT_DATAGRAM,
            expiry: EI_UNLIMITED,
            feedback: 0,
            encoding: ENC_NATIVE,
            coded_char_set_id: CCSI_Q_MGR,
            format: FMT_NONE.to_string(),
            priority: PRI_PRIORITY_AS_Q_DEF,
            persistence: PER_PERSISTENCE_AS_Q_DEF,
            msg_id: vec![0; ID_LENGTH],
            correl_id: vec![0; ID_LENGTH],
            backout_count: 0,
            reply_to_q: String::new(),
            reply_to_q_mgr: String::new(),
            user_identifier: String::new(),
            accounting_token: vec![0; ACCOUNTING_TOKEN_LENGTH],
            appl_identity_data: String::new(),
            put_appl_type: 0,
            put_appl_name: String::new(),
            put_date: String::new(),
            put_time: String::new(),
            appl_origin_data: String::new(),
            group_id: vec![0; ID_LENGTH],
            msg_seq_number: 1,
            offset: 0,
            msg_flags: 0,
            original_length: OL_UNDEFINED,
        }
    }
}

impl MessageDescriptor {
    /// Whether the message identifier is still all zeroes (unassigned)
    pub fn has_empty_msg_id(&self) -> bool {
        self.msg_id.iter().all(|b| *b == 0)
    }

    /// Whether the message asks for a reply
    pub fn has_reply_to(&self) -> bool {
        !self.reply_to_q.trim().is_empty()
    }
}

/// Copy `src` into a fresh buffer of exactly `width` bytes.
///
/// Shorter input is zero padded and longer input truncated. The result never
/// shares storage with the caller's buffer.
pub fn fixed_width(src: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    let len = src.len().min(width);
    out[..len].copy_from_slice(&src[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fresh_message() {
        let md = MessageDescriptor::default();
        assert_eq!(md.version, 1);
        assert_eq!(md.expiry, -1);
        assert_eq!(md.original_length, -1);
        assert_eq!(md.msg_id.len(), ID_LENGTH);
        assert_eq!(md.accounting_token.len(), ACCOUNTING_TOKEN_LENGTH);
        assert!(md.has_empty_msg_id());
        assert!(!md.has_reply_to());
        assert!(md.put_date.is_empty());
    }

    #[test]
    fn test_fixed_width() {
        assert_eq!(fixed_width(b"abc", 5), b"abc\0\0".to_vec());
        assert_eq!(fixed_width(b"abcdef", 4), b"abcd".to_vec());
        assert_eq!(fixed_width(b"", 2), vec![0, 0]);
    }
}
