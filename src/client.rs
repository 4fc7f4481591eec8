//! Dialer-side connection setup (spec §6 `ClientConnection::connect`).
//!
//! Mirrors [`crate::server::Server`]'s accept path but for the single
//! outbound socket a client opens: resolve the transport, spawn the
//! matching connection type, hand back the shared [`Connection`] handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::channel::{self, MessageChannelRx};
use crate::config::Config;
use crate::connection::tcp::TcpConnection;
use crate::connection::udp::UdpConnection;
use crate::connection::{ConnectionEvent, ConnectionId};
use crate::crypto::handshake::SymmetricKeys;
use crate::error::{Error, Result};
use crate::pool::BufferPool;
use crate::protocol::ProtocolTable;
use crate::socket;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Dials `target` over TCP, returning the live connection plus the receiver
/// half of its event channel (the caller owns draining it — there is no
/// server-side accept loop to do so on this end).
pub async fn connect_tcp(
    target: SocketAddr,
    config: Arc<Config>,
    protocols: Arc<ProtocolTable>,
    keys: Option<SymmetricKeys>,
) -> Result<(Arc<TcpConnection>, MessageChannelRx<ConnectionEvent>)> {
    let socket = socket::connect(target).await.map_err(Error::from)?;
    let id = ConnectionId::from(NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst));
    let (tx, rx) = channel::new_message_channel();
    let pool = Arc::new(BufferPool::new(config.buffer_limit));
    let conn = TcpConnection::spawn(id, socket, target, config, pool, protocols, keys, tx);
    Ok((conn, rx))
}

/// Binds an ephemeral local UDP socket and returns a connection addressed
/// at `target`; unlike TCP there is no handshake-at-the-socket-layer step,
/// the peer address alone identifies the session (spec §4.6).
pub async fn connect_udp(
    target: SocketAddr,
    config: Arc<Config>,
    protocols: Arc<ProtocolTable>,
    keys: Option<SymmetricKeys>,
) -> Result<(Arc<UdpConnection>, MessageChannelRx<ConnectionEvent>)> {
    let local_addr: SocketAddr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
    let socket = Arc::new(socket::UdpSocket::bind(local_addr).await.map_err(Error::from)?);
    socket.connect(target).await.map_err(Error::from)?;

    let id = ConnectionId::from(NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst));
    let (tx, rx) = channel::new_message_channel();
    let pool = Arc::new(BufferPool::new(config.buffer_limit));
    let conn = UdpConnection::spawn(id, target, socket, config, pool, protocols, keys, tx);
    Ok((conn, rx))
}

/// Drains one connection's event channel into a handler, the client-side
/// analogue of [`crate::server::Server::start`]'s per-connection task. The
/// caller keeps whatever `Arc<Connection>` handle it needs for sending
/// separately — the connection's own background tasks (resend/ping loops)
/// already hold the clone that keeps it alive, so `drive` only needs the
/// event receiver.
pub fn drive(mut events: MessageChannelRx<ConnectionEvent>, handler: impl Fn(ConnectionEvent) + Send + 'static) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            handler(event);
        }
    });
}
