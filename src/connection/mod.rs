//! Connection identity, lifecycle state, and the event stream a
//! [`crate::server::Server`] drains (spec §3, §4.5, §4.6). `ConnectionId`
//! follows the teacher's `NodeId(u32)` newtype idiom
//! (`communication/mod.rs`).

pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Opaque per-connection identifier, assigned by whichever side accepted
/// or dialed the connection.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct ConnectionId(u32);

impl From<u32> for ConnectionId {
    #[inline]
    fn from(id: u32) -> Self {
        ConnectionId(id)
    }
}

impl From<ConnectionId> for u32 {
    #[inline]
    fn from(id: ConnectionId) -> u32 {
        id.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connection's position in its lifecycle (spec §3).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Why a connection ended (spec §4.5).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DisconnectMode {
    /// Torn down immediately, e.g. on a protocol error.
    Now,
    /// Waits for in-flight sends to drain (`PendingGuard`) before closing.
    Graceful,
}

/// Lifecycle and data events a connection emits onto its owning
/// [`crate::channel::MessageChannelTx`] (spec §9's async-stream-style event
/// model).
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected { id: ConnectionId, peer_addr: SocketAddr },
    MessageReceived { id: ConnectionId, message: Box<dyn Message> },
    /// Raised for every send except internal-protocol control traffic
    /// (spec §8 invariant 7).
    MessageSent { id: ConnectionId, message_type: u16 },
    Disconnected { id: ConnectionId, reason: crate::message::DisconnectReason },
}

/// The operations common to both transports (spec §3's `Connection`
/// abstraction over TCP/UDP).
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn state(&self) -> ConnectionState;

    fn peer_addr(&self) -> SocketAddr;

    /// Queues `message` for sending. Returns once the message has been
    /// handed to the socket, not once the peer has acknowledged it — for
    /// that, see `send_for` on the UDP-specific API (spec §4.6).
    async fn send(&self, message: Box<dyn Message>) -> Result<()>;

    async fn disconnect(&self, mode: DisconnectMode) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_round_trips_through_u32() {
        let id: ConnectionId = 7u32.into();
        assert_eq!(u32::from(id), 7);
        assert_eq!(id.to_string(), "#7");
    }
}
