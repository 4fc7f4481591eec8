//! `Message` trait, `MessageHeader`, `SerializationContext`, and the
//! built-in messages of the internal control protocol (spec §3, §4.2).

use std::fmt;

use crate::buffer::{Reader, Writer};
use crate::error::Result;
use crate::protocol::Protocol;

/// Reason a connection closed (spec §4.5 `Disconnect{reason, customReason}`,
/// §7 `Disconnected{reason, customReason}`).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DisconnectReason {
    /// The local side asked to close, no error involved.
    Requested,
    /// Peer-initiated close carrying an application-supplied reason string.
    Custom(String),
    /// A transport-level failure with no more specific classification.
    FailedUnknown,
    /// Decode failure (spec `ErrorKind::MalformedFrame`).
    MalformedFrame,
    /// `messageLength` exceeded `Config::max_message_length`.
    MessageTooLarge,
    /// HMAC verification failed.
    MessageAuthenticationFailed,
    /// The handshake never completed.
    HandshakeFailed,
}

/// A per-frame registry translating stable string type tags to compact
/// per-frame `u16` ids (spec §9 "Dynamic type table"). Populated on encode
/// as payload code registers polymorphic values it is about to write;
/// populated from the wire on decode so the opposite direction can resolve
/// ids back to tags.
#[derive(Debug, Default, Clone)]
pub struct SerializationContext {
    protocol_id: u8,
    tags: Vec<String>,
}

impl SerializationContext {
    pub fn new(protocol_id: u8) -> Self {
        SerializationContext { protocol_id, tags: Vec::new() }
    }

    pub fn from_wire_table(protocol_id: u8, tags: Vec<String>) -> Self {
        SerializationContext { protocol_id, tags }
    }

    pub fn protocol_id(&self) -> u8 {
        self.protocol_id
    }

    /// Registers `tag`, returning its local `u16` id (reusing the id if the
    /// tag was already registered earlier in this frame).
    pub fn register_type(&mut self, tag: &str) -> u16 {
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            return pos as u16;
        }
        self.tags.push(tag.to_owned());
        (self.tags.len() - 1) as u16
    }

    pub fn resolve_type(&self, id: u16) -> Option<&str> {
        self.tags.get(id as usize).map(String::as_str)
    }

    pub fn has_types(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn type_table(&self) -> &[String] {
        &self.tags
    }
}

/// Metadata recomputed (TCP) or carried on the wire (UDP) alongside a
/// decoded [`Message`] (spec §3 `MessageHeader`).
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub protocol_id: u8,
    pub message_type: u16,
    pub message_length: u32,
    pub header_length: u16,
    pub iv: Option<[u8; crate::crypto::cipher::IV_LEN]>,
    /// `0` on TCP (ids are a UDP reliability concept, spec §4.6).
    pub message_id: u32,
    pub is_response: bool,
}

/// An application message: a typed payload plus the static properties the
/// wire pipeline consults to frame it (spec §3). `encrypted`/`authenticated`
/// are "static" in the sense that every instance of a concrete message type
/// answers them identically; implemented as `&self` methods (with `false`
/// defaults) so `dyn Message` stays object-safe.
pub trait Message: fmt::Debug + Send {
    fn protocol_id(&self) -> u8;
    fn message_type(&self) -> u16;

    fn encrypted(&self) -> bool {
        false
    }

    fn authenticated(&self) -> bool {
        false
    }

    fn must_be_reliable(&self) -> bool {
        false
    }

    fn prefer_reliable(&self) -> bool {
        false
    }

    /// Internal-protocol (id `1`) messages are never queued in `pendingAck`
    /// and never raise `MessageSent` (spec §4.6, §8 invariant 7).
    fn is_control(&self) -> bool {
        false
    }

    fn write_payload(&self, ctx: &mut SerializationContext, w: &mut Writer) -> Result<()>;

    /// Enables downcasting a `dyn Message` back to its concrete type, e.g.
    /// for the TCP/UDP connection loops to recognize `Ping`/`Pong`/
    /// `Disconnect` without a dedicated enum (spec §4.5, §4.6).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The static `encrypted`/`authenticated` properties of a message type,
/// looked up before the frame decoder has anything to construct a
/// [`Message`] instance from (the IV/tag are framed ahead of the payload,
/// spec §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFlags {
    pub encrypted: bool,
    pub authenticated: bool,
}

/// Decodes the payload bytes of a known `message_type` into a concrete
/// [`Message`]. One factory per [`Protocol`] (spec §4.8).
pub trait MessageFactory: Send + Sync {
    /// Returns `None` for an unrecognized `message_type`.
    fn flags(&self, message_type: u16) -> Option<MessageFlags>;

    fn decode(
        &self,
        message_type: u16,
        ctx: &SerializationContext,
        r: &mut Reader,
    ) -> Result<Option<Box<dyn Message>>>;
}

pub const INTERNAL_PROTOCOL_ID: u8 = 1;
pub const INTERNAL_PROTOCOL_VERSION: u16 = 1;

pub const MSG_PING: u16 = 1;
pub const MSG_PONG: u16 = 2;
pub const MSG_DISCONNECT: u16 = 3;
pub const MSG_ACKNOWLEDGE: u16 = 4;

#[derive(Debug, Clone, Copy)]
pub struct Ping;

#[derive(Debug, Clone, Copy)]
pub struct Pong;

#[derive(Debug, Clone)]
pub struct Disconnect {
    pub reason: DisconnectReason,
}

#[derive(Debug, Clone, Copy)]
pub struct Acknowledge {
    pub message_id: u32,
}

impl Message for Ping {
    fn protocol_id(&self) -> u8 {
        INTERNAL_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_PING
    }
    fn must_be_reliable(&self) -> bool {
        true
    }
    fn is_control(&self) -> bool {
        true
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, _w: &mut Writer) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

}

impl Message for Pong {
    fn protocol_id(&self) -> u8 {
        INTERNAL_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_PONG
    }
    fn must_be_reliable(&self) -> bool {
        true
    }
    fn is_control(&self) -> bool {
        true
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, _w: &mut Writer) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

}

impl Message for Disconnect {
    fn protocol_id(&self) -> u8 {
        INTERNAL_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_DISCONNECT
    }
    fn is_control(&self) -> bool {
        true
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, w: &mut Writer) -> Result<()> {
        match &self.reason {
            DisconnectReason::Requested => {
                w.write_u8(0);
            }
            DisconnectReason::FailedUnknown => {
                w.write_u8(1);
            }
            DisconnectReason::MalformedFrame => {
                w.write_u8(2);
            }
            DisconnectReason::MessageTooLarge => {
                w.write_u8(3);
            }
            DisconnectReason::MessageAuthenticationFailed => {
                w.write_u8(4);
            }
            DisconnectReason::HandshakeFailed => {
                w.write_u8(5);
            }
            DisconnectReason::Custom(msg) => {
                w.write_u8(255);
                w.write_string(msg);
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

}

impl Disconnect {
    pub fn read_payload(r: &mut Reader) -> Result<Self> {
        let tag = r.read_u8()?;
        let reason = match tag {
            0 => DisconnectReason::Requested,
            1 => DisconnectReason::FailedUnknown,
            2 => DisconnectReason::MalformedFrame,
            3 => DisconnectReason::MessageTooLarge,
            4 => DisconnectReason::MessageAuthenticationFailed,
            5 => DisconnectReason::HandshakeFailed,
            _ => DisconnectReason::Custom(r.read_string()?),
        };
        Ok(Disconnect { reason })
    }
}

impl Message for Acknowledge {
    fn protocol_id(&self) -> u8 {
        INTERNAL_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_ACKNOWLEDGE
    }
    fn is_control(&self) -> bool {
        true
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, w: &mut Writer) -> Result<()> {
        w.write_u32(self.message_id);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

}

impl Acknowledge {
    pub fn read_payload(r: &mut Reader) -> Result<Self> {
        Ok(Acknowledge { message_id: r.read_u32()? })
    }
}

/// The internal control protocol's [`MessageFactory`].
pub struct InternalMessageFactory;

impl MessageFactory for InternalMessageFactory {
    fn flags(&self, message_type: u16) -> Option<MessageFlags> {
        match message_type {
            MSG_PING | MSG_PONG | MSG_DISCONNECT | MSG_ACKNOWLEDGE => Some(MessageFlags::default()),
            _ => None,
        }
    }

    fn decode(
        &self,
        message_type: u16,
        _ctx: &SerializationContext,
        r: &mut Reader,
    ) -> Result<Option<Box<dyn Message>>> {
        let msg: Box<dyn Message> = match message_type {
            MSG_PING => Box::new(Ping),
            MSG_PONG => Box::new(Pong),
            MSG_DISCONNECT => Box::new(Disconnect::read_payload(r)?),
            MSG_ACKNOWLEDGE => Box::new(Acknowledge::read_payload(r)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

/// Builds the internal control [`Protocol`] (id `1`, spec §3).
pub fn internal_protocol() -> Protocol {
    Protocol::new(
        INTERNAL_PROTOCOL_ID,
        INTERNAL_PROTOCOL_VERSION,
        false,
        std::sync::Arc::new(InternalMessageFactory),
    )
}
