//! Wire framing (spec §4.2, C2).
//!
//! ```text
//! protocolId: u8
//! messageType: u16
//! length: u32            (low bit = "has dynamic type table" flag, rest is byte length)
//! [typeCount: u16, [tagLen: u16, tag: utf8]*typeCount]   iff the flag bit is set
//! [iv: [u8; 16]]                                         iff the message type is encrypted
//! payload: [u8]                                          (ciphertext if encrypted)
//! [tag: [u8; 32]]                                        iff the message type is authenticated
//! ```
//!
//! `length` is the total frame length, including the 7-byte base header and
//! the trailing HMAC tag (if any) — everything a receiver must have
//! buffered before the frame can be decoded. `encrypted`/`authenticated` are
//! static per message type
//! (spec §3), so the decoder looks them up via [`crate::message::MessageFactory::flags`]
//! before it has anything to construct a [`Message`] from.
//!
//! Whether a frame also carries a UDP message-id/is-response pair ahead of
//! its payload (spec §4.6, §9) is a property of which transport produced
//! it, not of the bytes themselves, so callers say so explicitly via
//! `want_udp_meta` rather than the decoder guessing.

use crate::buffer::{Reader, Writer};
use crate::crypto::cipher::{self, IV_LEN};
use crate::crypto::handshake::SymmetricKeys;
use crate::crypto::mac::{self, TAG_LEN};
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Message, MessageHeader, SerializationContext};
use crate::protocol::ProtocolTable;

const BASE_HEADER_LEN: usize = 1 + 2 + 4; // protocolId + messageType + length word
const HAS_TYPE_TABLE_FLAG: u32 = 1;

/// Per-message-id UDP fields folded into the payload region (spec §4.6, §9).
#[derive(Debug, Clone, Copy)]
pub struct UdpMeta {
    pub message_id: u32,
    pub is_response: bool,
}

/// Result of attempting to decode one frame out of a byte stream.
pub enum DecodeOutcome {
    /// Not enough bytes buffered yet to tell.
    NeedMore,
    /// A structurally valid frame whose protocol or message type is
    /// unregistered; `consumed` bytes should be dropped from the stream.
    Drop { consumed: usize },
    /// A fully decoded frame; `consumed` bytes should be dropped from the
    /// stream.
    Ready { header: MessageHeader, message: Box<dyn Message>, udp_meta: Option<UdpMeta>, consumed: usize },
}

/// Encodes `message` into a self-contained frame. `keys` must be `Some` iff
/// `message.encrypted() || message.authenticated()`.
pub fn encode(
    message: &dyn Message,
    keys: Option<&SymmetricKeys>,
    udp_meta: Option<UdpMeta>,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.write_u8(message.protocol_id());
    w.write_u16(message.message_type());
    let length_offset = w.len();
    w.pad(4); // length word, patched once the payload length is known

    let payload_start = w.len();

    let mut ctx = SerializationContext::new(message.protocol_id());
    let mut payload = Writer::new();
    if let Some(meta) = udp_meta {
        payload.write_u32(meta.message_id);
        payload.write_bool(meta.is_response);
    }
    message.write_payload(&mut ctx, &mut payload)?;
    let mut payload_bytes = payload.into_inner();

    if message.encrypted() {
        let keys = keys.ok_or_else(|| Error::simple(ErrorKind::InvalidOperation))?;
        let pad = cipher::padding_len(payload_bytes.len());
        payload_bytes.resize(payload_bytes.len() + pad, 0);
        let iv = cipher::generate_iv();
        cipher::encrypt_in_place(&keys.aes_key, &iv, &mut payload_bytes)?;
        w.write_bytes(&iv);
        w.write_bytes(&payload_bytes);
    } else {
        w.write_bytes(&payload_bytes);
    }

    if ctx.has_types() {
        let mut table = Writer::new();
        table.write_u16(ctx.type_table().len() as u16);
        for tag in ctx.type_table() {
            table.write_string(tag);
        }
        w.insert_bytes(payload_start, table.as_slice());
    }

    if message.authenticated() {
        let keys = keys.ok_or_else(|| Error::simple(ErrorKind::InvalidOperation))?;
        let tag = mac::sign(&keys.hmac_key, &w.as_slice()[payload_start..]);
        w.write_bytes(&tag);
    }

    // Total frame length, including the base header and the trailing tag.
    let length = w.len() as u32;
    let flagged = (length << 1) | if ctx.has_types() { HAS_TYPE_TABLE_FLAG } else { 0 };
    w.patch(length_offset, &flagged.to_le_bytes());

    Ok(w.into_inner())
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Per spec §9 open question: an unrecognized `protocol_id`/`message_type`
/// is a silent [`DecodeOutcome::Drop`] (the frame is still well-formed and
/// its bytes consumed); any other structural problem is
/// `ErrorKind::MalformedFrame`.
pub fn try_get_header(
    buf: &[u8],
    protocols: &ProtocolTable,
    keys: Option<&SymmetricKeys>,
    max_message_length: u32,
    want_udp_meta: bool,
) -> Result<DecodeOutcome> {
    if buf.len() < BASE_HEADER_LEN {
        return Ok(DecodeOutcome::NeedMore);
    }

    let mut r = Reader::new(buf);
    let protocol_id = r.read_u8()?;
    let message_type = r.read_u16()?;
    let raw_length = r.read_u32()?;
    let has_type_table = raw_length & HAS_TYPE_TABLE_FLAG != 0;
    // Total frame length: base header + payload region + trailing tag.
    let total_frame_len = (raw_length >> 1) as usize;

    if total_frame_len as u64 > max_message_length as u64 {
        return Err(Error::simple(ErrorKind::MessageTooLarge));
    }
    if total_frame_len < BASE_HEADER_LEN {
        return Err(Error::simple(ErrorKind::MalformedFrame));
    }

    let protocol = protocols.get(protocol_id);
    let flags = protocol.and_then(|p| p.factory().flags(message_type));

    let (encrypted, authenticated) = match flags {
        Some(f) => (f.encrypted, f.authenticated),
        None => {
            // Unregistered protocol/message type: drop the whole frame once
            // it's fully buffered.
            if buf.len() < total_frame_len {
                return Ok(DecodeOutcome::NeedMore);
            }
            return Ok(DecodeOutcome::Drop { consumed: total_frame_len });
        }
    };

    let tag_len = if authenticated { TAG_LEN } else { 0 };
    if total_frame_len < BASE_HEADER_LEN + tag_len {
        return Err(Error::simple(ErrorKind::MalformedFrame));
    }
    let payload_region_len = total_frame_len - BASE_HEADER_LEN - tag_len;
    if buf.len() < total_frame_len {
        return Ok(DecodeOutcome::NeedMore);
    }

    let mut body = Reader::new(&buf[BASE_HEADER_LEN..BASE_HEADER_LEN + payload_region_len]);

    let type_table = if has_type_table {
        let count = body.read_u16()?;
        let mut tags = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tags.push(body.read_string()?);
        }
        Some(tags)
    } else {
        None
    };

    let iv = if encrypted {
        let iv_bytes = body.read_bytes(IV_LEN)?;
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);
        Some(iv)
    } else {
        None
    };

    let ciphertext_or_plain = body.read_bytes(body.remaining())?;

    let plaintext;
    let payload_bytes: &[u8] = if let Some(iv) = iv {
        let keys = keys.ok_or_else(|| Error::simple(ErrorKind::InvalidOperation))?;
        plaintext = cipher::decrypt(&keys.aes_key, &iv, ciphertext_or_plain)?;
        &plaintext
    } else {
        ciphertext_or_plain
    };

    if authenticated {
        let keys = keys.ok_or_else(|| Error::simple(ErrorKind::InvalidOperation))?;
        let signed_region = &buf[BASE_HEADER_LEN..BASE_HEADER_LEN + payload_region_len];
        let tag = &buf[BASE_HEADER_LEN + payload_region_len..total_frame_len];
        mac::verify(&keys.hmac_key, signed_region, tag)
            .map_err(|e| e.swap_kind(ErrorKind::MessageAuthenticationFailed))?;
    }

    let decode_ctx = match type_table {
        Some(tags) => SerializationContext::from_wire_table(protocol_id, tags),
        None => SerializationContext::new(protocol_id),
    };

    let mut payload_reader = Reader::new(payload_bytes);
    let udp_meta = if want_udp_meta {
        let message_id = payload_reader.read_u32()?;
        let is_response = payload_reader.read_bool()?;
        Some(UdpMeta { message_id, is_response })
    } else {
        None
    };

    let protocol = protocol.expect("flags() returned Some only when protocol exists");
    let decoded = protocol.factory().decode(message_type, &decode_ctx, &mut payload_reader)?;
    let message = match decoded {
        Some(m) => m,
        None => return Ok(DecodeOutcome::Drop { consumed: total_frame_len }),
    };

    let header = MessageHeader {
        protocol_id,
        message_type,
        message_length: total_frame_len as u32,
        header_length: BASE_HEADER_LEN as u16,
        iv,
        message_id: udp_meta.map_or(0, |m| m.message_id),
        is_response: udp_meta.map_or(false, |m| m.is_response),
    };

    Ok(DecodeOutcome::Ready { header, message, udp_meta, consumed: total_frame_len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{internal_protocol, Ping};
    use crate::protocol::ProtocolTable;

    #[test]
    fn encode_then_decode_unencrypted_round_trips() {
        let bytes = encode(&Ping, None, None).unwrap();

        let mut protocols = ProtocolTable::new();
        protocols.register(internal_protocol()).unwrap();

        match try_get_header(&bytes, &protocols, None, 1 << 20, false).unwrap() {
            DecodeOutcome::Ready { header, message, consumed, .. } => {
                assert_eq!(header.protocol_id, 1);
                assert_eq!(message.message_type(), 1);
                assert_eq!(consumed, bytes.len());
            }
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn unknown_protocol_is_dropped_not_errored() {
        let bytes = encode(&Ping, None, None).unwrap();
        let protocols = ProtocolTable::new(); // nothing registered
        match try_get_header(&bytes, &protocols, None, 1 << 20, false).unwrap() {
            DecodeOutcome::Drop { consumed } => assert_eq!(consumed, bytes.len()),
            _ => panic!("expected Drop"),
        }
    }

    #[test]
    fn truncated_frame_needs_more() {
        let bytes = encode(&Ping, None, None).unwrap();
        let mut protocols = ProtocolTable::new();
        protocols.register(internal_protocol()).unwrap();

        let truncated = &bytes[..bytes.len() - 1];
        match try_get_header(truncated, &protocols, None, 1 << 20, false).unwrap() {
            DecodeOutcome::NeedMore => {}
            _ => panic!("expected NeedMore"),
        }
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let bytes = encode(&Ping, None, None).unwrap();
        let protocols = ProtocolTable::new();
        let err = try_get_header(&bytes, &protocols, None, 0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageTooLarge);
    }

    #[test]
    fn udp_meta_round_trips_ahead_of_payload() {
        let meta = UdpMeta { message_id: 7, is_response: true };
        let bytes = encode(&Ping, None, Some(meta)).unwrap();

        let mut protocols = ProtocolTable::new();
        protocols.register(internal_protocol()).unwrap();

        match try_get_header(&bytes, &protocols, None, 1 << 20, true).unwrap() {
            DecodeOutcome::Ready { udp_meta, .. } => {
                let m = udp_meta.unwrap();
                assert_eq!(m.message_id, 7);
                assert!(m.is_response);
            }
            _ => panic!("expected Ready"),
        }
    }
}
