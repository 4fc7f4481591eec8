//! Small application protocol used by the integration-style tests in
//! `connection::tcp`, `connection::udp`, `server`, and `client` (spec §8's
//! scenarios need a concrete payload type, not just the internal control
//! protocol). Test-only: not part of the public API.

use std::sync::Arc;

use crate::buffer::{Reader, Writer};
use crate::error::Result;
use crate::message::{Message, MessageFactory, MessageFlags, SerializationContext};
use crate::protocol::Protocol;

pub const TEST_PROTOCOL_ID: u8 = 2;
pub const MSG_ECHO: u16 = 1;
pub const MSG_SEQ: u16 = 2;
pub const MSG_AUTHED: u16 = 3;

#[derive(Debug, Clone)]
pub struct EchoMessage(pub String);

#[derive(Debug, Clone, Copy)]
pub struct SeqMessage(pub u32);

#[derive(Debug, Clone)]
pub struct AuthedMessage(pub String);

impl Message for EchoMessage {
    fn protocol_id(&self) -> u8 {
        TEST_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_ECHO
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, w: &mut Writer) -> Result<()> {
        w.write_string(&self.0);
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Message for SeqMessage {
    fn protocol_id(&self) -> u8 {
        TEST_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_SEQ
    }
    fn must_be_reliable(&self) -> bool {
        true
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, w: &mut Writer) -> Result<()> {
        w.write_u32(self.0);
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Message for AuthedMessage {
    fn protocol_id(&self) -> u8 {
        TEST_PROTOCOL_ID
    }
    fn message_type(&self) -> u16 {
        MSG_AUTHED
    }
    fn authenticated(&self) -> bool {
        true
    }
    fn write_payload(&self, _ctx: &mut SerializationContext, w: &mut Writer) -> Result<()> {
        w.write_string(&self.0);
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct TestFactory;

impl MessageFactory for TestFactory {
    fn flags(&self, message_type: u16) -> Option<MessageFlags> {
        match message_type {
            MSG_ECHO | MSG_SEQ => Some(MessageFlags::default()),
            MSG_AUTHED => Some(MessageFlags { encrypted: false, authenticated: true }),
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
            MSG_ECHO => Box::new(EchoMessage(r.read_string()?)),
            MSG_SEQ => Box::new(SeqMessage(r.read_u32()?)),
            MSG_AUTHED => Box::new(AuthedMessage(r.read_string()?)),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

pub fn test_protocol() -> Protocol {
    Protocol::new(TEST_PROTOCOL_ID, 1, false, Arc::new(TestFactory))
}
