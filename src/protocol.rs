//! Protocol and message-type registry (spec §3, §4.8, C8).

use std::sync::Arc;

use crate::collections::{self, HashMap};
use crate::error::{Error, ErrorKind, Result};
use crate::message::MessageFactory;

/// A registered message family: an id, a version, whether connections
/// carrying it must complete a handshake first, and the factory that
/// decodes its message types.
#[derive(Clone)]
pub struct Protocol {
    id: u8,
    version: u16,
    requires_handshake: bool,
    factory: Arc<dyn MessageFactory>,
}

impl Protocol {
    pub fn new(id: u8, version: u16, requires_handshake: bool, factory: Arc<dyn MessageFactory>) -> Self {
        Protocol { id, version, requires_handshake, factory }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn requires_handshake(&self) -> bool {
        self.requires_handshake
    }

    pub fn factory(&self) -> &Arc<dyn MessageFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("requires_handshake", &self.requires_handshake)
            .finish()
    }
}

/// Per-connection registry of [`Protocol`]s, keyed by id. Registering two
/// protocols under the same id is an invariant violation (spec §4.8).
#[derive(Default)]
pub struct ProtocolTable {
    by_id: HashMap<u8, Protocol>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        ProtocolTable { by_id: collections::hash_map() }
    }

    pub fn register(&mut self, protocol: Protocol) -> Result<()> {
        if self.by_id.contains_key(&protocol.id) {
            return Err(Error::simple(ErrorKind::InvalidOperation));
        }
        self.by_id.insert(protocol.id, protocol);
        Ok(())
    }

    pub fn get(&self, id: u8) -> Option<&Protocol> {
        self.by_id.get(&id)
    }

    pub fn requires_handshake(&self) -> bool {
        self.by_id.values().any(Protocol::requires_handshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::internal_protocol;

    #[test]
    fn registering_duplicate_id_fails() {
        let mut table = ProtocolTable::new();
        table.register(internal_protocol()).unwrap();
        let err = table.register(internal_protocol()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn lookup_by_id_succeeds_after_register() {
        let mut table = ProtocolTable::new();
        table.register(internal_protocol()).unwrap();
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_none());
    }
}
