//! Message translation between the MQ side and the bus side.
//!
//! Going to the bus, a [`MessageDescriptor`] is reduced to a [`BridgeHeader`]
//! and packed with the body into a [`BridgeMessage`] envelope. Coming back, the
//! header is laid over a fresh descriptor. The translation is deliberately
//! asymmetric: fields the queue manager assigns on every put (version, message
//! type, expiry, persistence, backout count, put date and time) never travel,
//! so a message re-entering MQ looks freshly authored.
//!
//! With `exclude_headers` set there is no envelope at all and the body is
//! relayed as is.

use crate::metadata::MessageDescriptor;
use crate::ConnectorResult;
use bytes::Bytes;
use mq_bridge_common::{BridgeHeader, BridgeMessage};

/// A bus payload translated for the MQ side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqMessage {
    /// The body, byte for byte
    pub body: Bytes,
    /// Fresh descriptor with the round-tripped fields applied
    pub descriptor: MessageDescriptor,
    /// Streaming channel the sender wants replies on, if it named one
    pub reply_to_channel: Option<String>,
}

/// Translate an MQ message into bus wire bytes
pub fn to_bus_format(
    descriptor: &MessageDescriptor,
    body: &[u8],
    exclude_headers: bool,
) -> ConnectorResult<Bytes> {
    to_bus_format_with_reply(descriptor, body, exclude_headers, None)
}

/// Translate an MQ message into bus wire bytes, naming a reply channel
///
/// The reply channel is only carried in the envelope header, so it is dropped
/// when headers are excluded.
pub fn to_bus_format_with_reply(
    descriptor: &MessageDescriptor,
    body: &[u8],
    exclude_headers: bool,
    reply_to_channel: Option<&str>,
) -> ConnectorResult<Bytes> {
    if exclude_headers {
        return Ok(Bytes::copy_from_slice(body));
    }

    let mut header = header_from_descriptor(descriptor);
    if let Some(channel) = reply_to_channel {
        header.reply_to_channel = channel.to_string();
    }

    let message = BridgeMessage::new(Bytes::copy_from_slice(body)).with_header(header);
    Ok(Bytes::from(message.encode()?))
}

/// Translate bus wire bytes into a body and descriptor for the MQ side
pub fn from_bus_format(data: &[u8], exclude_headers: bool) -> ConnectorResult<MqMessage> {
    if exclude_headers {
        return Ok(MqMessage {
            body: Bytes::copy_from_slice(data),
            descriptor: MessageDescriptor::default(),
            reply_to_channel: None,
        });
    }

    let message = BridgeMessage::decode(data)?;
    let mut descriptor = MessageDescriptor::default();
    let mut reply_to_channel = None;

    if let Some(header) = &message.header {
        apply_header(header, &mut descriptor);
        if !header.reply_to_channel.is_empty() {
            reply_to_channel = Some(header.reply_to_channel.clone());
        }
    }

    Ok(MqMessage {
        body: message.body,
        descriptor,
        reply_to_channel,
    })
}

/// Extract the round-tripped subset of a descriptor
pub fn header_from_descriptor(md: &MessageDescriptor) -> BridgeHeader {
    BridgeHeader {
        reply_to_q: md.reply_to_q.clone(),
        reply_to_q_mgr: md.reply_to_q_mgr.clone(),
        reply_to_channel: String::new(),

        report: md.report,
        feedback: md.feedback,
        encoding: md.encoding,
        coded_char_set_id: md.coded_char_set_id,
        format: md.format.clone(),
        priority: md.priority,

        msg_id: md.msg_id.clone(),
        correl_id: md.correl_id.clone(),
        group_id: md.group_id.clone(),
        accounting_token: md.accounting_token.clone(),

        user_identifier: md.user_identifier.clone(),
        appl_identity_data: md.appl_identity_data.clone(),
        put_appl_type: md.put_appl_type,
        put_appl_name: md.put_appl_name.clone(),
        appl_origin_data: md.appl_origin_data.clone(),

        msg_seq_number: md.msg_seq_number,
        offset: md.offset,
        msg_flags: md.msg_flags,
        original_length: md.original_length,
    }
}

/// Lay a header over a descriptor, touching only the round-tripped fields
pub fn apply_header(header: &BridgeHeader, md: &mut MessageDescriptor) {
    md.reply_to_q = header.reply_to_q.clone();
    md.reply_to_q_mgr = header.reply_to_q_mgr.clone();

    md.report = header.report;
    md.feedback = header.feedback;
    md.encoding = header.encoding;
    md.coded_char_set_id = header.coded_char_set_id;
    md.format = header.format.clone();
    md.priority = header.priority;

    // absent identifiers keep the fresh all-zero value
    if !header.msg_id.is_empty() {
        md.msg_id = header.msg_id.clone();
    }
    if !header.correl_id.is_empty() {
        md.correl_id = header.correl_id.clone();
    }
    if !header.group_id.is_empty() {
        md.group_id = header.group_id.clone();
    }
    if !header.accounting_token.is_empty() {
        md.accounting_token = header.accounting_token.clone();
    }

    md.user_identifier = header.user_identifier.clone();
    md.appl_identity_data = header.appl_identity_data.clone();
    md.put_appl_type = header.put_appl_type;
    md.put_appl_name = header.put_appl_name.clone();
    md.appl_origin_data = header.appl_origin_data.clone();

    md.msg_seq_number = header.msg_seq_number;
    md.offset = header.offset;
    md.msg_flags = header.msg_flags;
    md.original_length = header.original_length;
}
