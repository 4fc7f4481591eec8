//! TCP connection I/O loop (spec §4.5, C5).
//!
//! One task owns the read half and runs the receive-buffer
//! reassembly/compaction/growth loop; `send` writes directly to a
//! `tokio::sync::Mutex`-guarded write half. Lifecycle events cross a
//! channel to whatever owns the connection, following the teacher's
//! "one task per socket, funnel events into one channel" shape
//! (`communication/mod.rs`'s `rx_side_accept_task`/`tx_side_connect_task`).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::channel::MessageChannelTx;
use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState, DisconnectMode};
use crate::crypto::handshake::SymmetricKeys;
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Disconnect, DisconnectReason, Message, Ping, Pong};
use crate::pool::BufferPool;
use crate::protocol::ProtocolTable;
use crate::serialize::{self, DecodeOutcome};
use crate::socket::{TcpReadHalf, TcpSocket, TcpWriteHalf};
use crate::sync::PendingGuard;
use crate::timeouts;

const INITIAL_RECV_CAPACITY: usize = 16 * 1024;

/// A live TCP connection: send half, shared mutable state, and the
/// channel its read/ping tasks report lifecycle events on.
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: RwLock<ConnectionState>,
    writer: AsyncMutex<TcpWriteHalf>,
    pool: Arc<BufferPool>,
    pending: PendingGuard,
    protocols: Arc<ProtocolTable>,
    keys: Option<SymmetricKeys>,
    events_tx: MessageChannelTx<ConnectionEvent>,
    max_message_length: u32,
    response_time_ms: AtomicI64,
    ping_sent_at: AtomicI64,
}

impl TcpConnection {
    /// Splits `socket`, spawns the read loop and ping scheduler, and
    /// returns the shared handle callers use to send on the connection.
    pub fn spawn(
        id: ConnectionId,
        socket: TcpSocket,
        peer_addr: SocketAddr,
        config: Arc<Config>,
        pool: Arc<BufferPool>,
        protocols: Arc<ProtocolTable>,
        keys: Option<SymmetricKeys>,
        events_tx: MessageChannelTx<ConnectionEvent>,
    ) -> Arc<Self> {
        let (read_half, write_half) = socket.split();

        let conn = Arc::new(TcpConnection {
            id,
            peer_addr,
            state: RwLock::new(ConnectionState::Connected),
            writer: AsyncMutex::new(write_half),
            pool,
            pending: PendingGuard::new(),
            protocols,
            keys,
            events_tx,
            max_message_length: config.max_message_length,
            response_time_ms: AtomicI64::new(-1),
            ping_sent_at: AtomicI64::new(0),
        });

        debug!(id = %id, %peer_addr, "tcp connection established");

        let recv_conn = conn.clone();
        tokio::spawn(async move { recv_conn.recv_loop(read_half).await });

        let ping_conn = conn.clone();
        timeouts::spawn_periodic(config.ping_interval, move || {
            let ping_conn = ping_conn.clone();
            async move {
                if ping_conn.state() != ConnectionState::Connected {
                    return false;
                }
                ping_conn.ping_sent_at.store(now_millis(), Ordering::SeqCst);
                ping_conn.send(Box::new(Ping)).await.is_ok()
            }
        });

        conn
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Current round-trip estimate from the last ping/pong pair, or `-1`
    /// if none has completed yet.
    pub fn response_time_ms(&self) -> i64 {
        self.response_time_ms.load(Ordering::SeqCst)
    }

    async fn recv_loop(self: Arc<Self>, mut read_half: TcpReadHalf) {
        let mut buf = vec![0u8; INITIAL_RECV_CAPACITY];
        let mut filled = 0usize;

        loop {
            if filled == buf.len() {
                let new_len = (buf.len() * 2).min(self.max_message_length as usize + 64 * 1024);
                if new_len == buf.len() {
                    self.fail(DisconnectReason::MessageTooLarge).await;
                    return;
                }
                buf.resize(new_len, 0);
            }

            let n = match read_half.read(&mut buf[filled..]).await {
                Ok(0) => {
                    self.fail(DisconnectReason::FailedUnknown).await;
                    return;
                }
                Ok(n) => n,
                Err(_) => {
                    self.fail(DisconnectReason::FailedUnknown).await;
                    return;
                }
            };
            filled += n;

            loop {
                let outcome = serialize::try_get_header(
                    &buf[..filled],
                    &self.protocols,
                    self.keys.as_ref(),
                    self.max_message_length,
                    false,
                );
                let outcome = match outcome {
                    Ok(o) => o,
                    Err(e) => {
                        let reason = match e.kind() {
                            ErrorKind::MessageTooLarge => DisconnectReason::MessageTooLarge,
                            ErrorKind::MessageAuthenticationFailed => {
                                DisconnectReason::MessageAuthenticationFailed
                            }
                            _ => DisconnectReason::MalformedFrame,
                        };
                        warn!(id = %self.id, ?reason, error = %e, "dropping frame");
                        self.fail(reason).await;
                        return;
                    }
                };

                match outcome {
                    DecodeOutcome::NeedMore => break,
                    DecodeOutcome::Drop { consumed } => {
                        compact(&mut buf, &mut filled, consumed);
                    }
                    DecodeOutcome::Ready { message, consumed, .. } => {
                        compact(&mut buf, &mut filled, consumed);
                        if self.handle_message(message).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` if the connection should stop reading (a `Disconnect`
    /// was received).
    async fn handle_message(&self, message: Box<dyn Message>) -> bool {
        if message.is_control() {
            if message.as_any().downcast_ref::<Ping>().is_some() {
                let _ = self.send(Box::new(Pong)).await;
                return false;
            }
            if message.as_any().downcast_ref::<Pong>().is_some() {
                let sent_at = self.ping_sent_at.load(Ordering::SeqCst);
                if sent_at > 0 {
                    self.response_time_ms.store((now_millis() - sent_at).max(0), Ordering::SeqCst);
                }
                return false;
            }
            if let Some(d) = message.as_any().downcast_ref::<Disconnect>() {
                self.finish(d.reason.clone()).await;
                return true;
            }
            return false;
        }

        let _ = self
            .events_tx
            .send(ConnectionEvent::MessageReceived { id: self.id, message });
        false
    }

    async fn fail(&self, reason: DisconnectReason) {
        self.finish(reason).await;
    }

    async fn finish(&self, reason: DisconnectReason) {
        debug!(id = %self.id, ?reason, "tcp connection closed");
        self.set_state(ConnectionState::Disconnected);
        let _ = self.events_tx.send(ConnectionEvent::Disconnected { id: self.id, reason });
    }
}

fn compact(buf: &mut [u8], filled: &mut usize, consumed: usize) {
    buf.copy_within(consumed..*filled, 0);
    *filled -= consumed;
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn send(&self, message: Box<dyn Message>) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Err(Error::simple(ErrorKind::Disconnected));
        }

        let is_control = message.is_control();
        let message_type = message.message_type();
        let encoded = serialize::encode(message.as_ref(), self.keys.as_ref(), None)?;

        let _ticket = self.pending.enter();
        let mut buf = self.pool.take();
        buf.clear();
        buf.extend_from_slice(&encoded);

        let result = {
            let mut w = self.writer.lock().await;
            w.write_all(&buf).await
        };
        self.pool.put(buf);
        result.map_err(Error::from)?;

        if !is_control {
            let _ = self.events_tx.send(ConnectionEvent::MessageSent { id: self.id, message_type });
        }
        Ok(())
    }

    async fn disconnect(&self, mode: DisconnectMode) -> Result<()> {
        self.set_state(ConnectionState::Disconnecting);
        let _ = self.send(Box::new(Disconnect { reason: DisconnectReason::Requested })).await;

        if mode == DisconnectMode::Graceful {
            let _ = tokio::time::timeout(Duration::from_secs(5), self.pending.wait_idle()).await;
        }

        self.finish(DisconnectReason::Requested).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::internal_protocol;
    use crate::testing::{test_protocol, EchoMessage};

    #[test]
    fn compact_shifts_tail_to_front() {
        let mut buf = vec![1, 2, 3, 4, 5, 0, 0, 0];
        let mut filled = 5;
        compact(&mut buf, &mut filled, 2);
        assert_eq!(filled, 3);
        assert_eq!(&buf[..filled], &[3, 4, 5]);
    }

    fn test_protocols() -> Arc<ProtocolTable> {
        let mut table = ProtocolTable::new();
        table.register(internal_protocol()).unwrap();
        table.register(test_protocol()).unwrap();
        Arc::new(table)
    }

    /// S1 — client sends an `EchoMessage`, server echoes it back.
    #[tokio::test]
    async fn s1_echo_over_tcp_round_trips() {
        let listener = crate::socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_protocols = test_protocols();

        let accept = tokio::spawn(async move {
            let (socket, peer_addr) = listener.accept().await.unwrap();
            let (tx, mut rx) = crate::channel::new_message_channel();
            let conn = TcpConnection::spawn(
                1u32.into(),
                socket,
                peer_addr,
                Arc::new(Config::default()),
                Arc::new(BufferPool::new(4)),
                server_protocols,
                None,
                tx,
            );
            while let Some(event) = rx.recv().await {
                if let ConnectionEvent::MessageReceived { message, .. } = event {
                    if let Some(echo) = message.as_any().downcast_ref::<EchoMessage>() {
                        let _ = conn.send(Box::new(EchoMessage(echo.0.clone()))).await;
                    }
                }
            }
        });

        let (client_conn, mut client_events) =
            crate::client::connect_tcp(addr, Arc::new(Config::default()), test_protocols(), None)
                .await
                .unwrap();

        let start = std::time::Instant::now();
        client_conn.send(Box::new(EchoMessage("hello".into()))).await.unwrap();

        let reply = loop {
            match client_events.recv().await.unwrap() {
                ConnectionEvent::MessageReceived { message, .. } => break message,
                _ => continue,
            }
        };

        let elapsed = start.elapsed();
        let echo = reply.as_any().downcast_ref::<EchoMessage>().unwrap();
        assert_eq!(echo.0, "hello");
        assert!(elapsed < Duration::from_secs(2));

        accept.abort();
    }

    /// S2 — a frame whose length word claims 2,000,000 bytes (over the
    /// default 1 MiB limit) gets the connection disconnected without ever
    /// needing the rest of the body to arrive.
    #[tokio::test]
    async fn s2_oversize_frame_disconnects_within_two_seconds() {
        let listener = crate::socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_protocols = test_protocols();

        let (tx, mut rx) = crate::channel::new_message_channel();
        let accept = tokio::spawn(async move {
            let (socket, peer_addr) = listener.accept().await.unwrap();
            TcpConnection::spawn(
                1u32.into(),
                socket,
                peer_addr,
                Arc::new(Config::default()),
                Arc::new(BufferPool::new(4)),
                server_protocols,
                None,
                tx,
            )
        });

        let mut attacker = crate::socket::connect(addr).await.unwrap();
        accept.await.unwrap();

        let mut frame = Vec::new();
        frame.push(1u8); // protocolId, irrelevant: length is checked first
        frame.extend_from_slice(&1u16.to_le_bytes()); // messageType
        let flagged = 2_000_000u32 << 1;
        frame.extend_from_slice(&flagged.to_le_bytes());
        attacker.write_all(&frame).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("server should disconnect within 2s")
            .unwrap();
        match event {
            ConnectionEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::MessageTooLarge);
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    /// S5 — a flipped ciphertext byte on an authenticated message is
    /// rejected; the receiver disconnects and the payload never reaches the
    /// application handler.
    #[tokio::test]
    async fn s5_hmac_tamper_disconnects_without_delivering() {
        use crate::crypto::handshake::SymmetricKeys;
        use crate::testing::AuthedMessage;

        let keys = SymmetricKeys { aes_key: [7u8; 16], hmac_key: [9u8; 32] };

        let listener = crate::socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_protocols = test_protocols();
        let server_keys = keys.clone();

        let (tx, mut rx) = crate::channel::new_message_channel();
        let accept = tokio::spawn(async move {
            let (socket, peer_addr) = listener.accept().await.unwrap();
            TcpConnection::spawn(
                1u32.into(),
                socket,
                peer_addr,
                Arc::new(Config::default()),
                Arc::new(BufferPool::new(4)),
                server_protocols,
                Some(server_keys),
                tx,
            )
        });

        let mut attacker = crate::socket::connect(addr).await.unwrap();
        accept.await.unwrap();

        let mut bytes = serialize::encode(&AuthedMessage("trust me".into()), Some(&keys), None).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF; // flip a byte inside the trailing HMAC tag
        attacker.write_all(&bytes).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("server should disconnect within 2s")
            .unwrap();
        match event {
            ConnectionEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::MessageAuthenticationFailed);
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }
}
