//! UDP connection with an application-level reliability layer (spec §4.6,
//! C6): a monotonic message id per reliable send, a `pendingAck` map
//! resent on a timer until acknowledged, and a [`ReliableQueue`] ordering
//! deliveries on the receiving side. Unlike TCP (C5), nothing here owns a
//! byte stream to reassemble — each datagram is one frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::channel::MessageChannelTx;
use crate::collections::{self, HashMap};
use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState, DisconnectMode};
use crate::crypto::handshake::SymmetricKeys;
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Acknowledge, Disconnect, DisconnectReason, Message, Ping, Pong};
use crate::pool::BufferPool;
use crate::protocol::ProtocolTable;
use crate::serialize::{self, DecodeOutcome, UdpMeta};
use crate::socket::UdpSocket;
use crate::sync::PendingGuard;
use crate::timeouts;

struct PendingSend {
    bytes: Vec<u8>,
    sent_at: Instant,
}

/// One peer endpoint's reliability state over a (possibly shared) bound
/// [`UdpSocket`]; `socket.send_to`/`recv_from` addressing keeps many
/// `UdpConnection`s safely multiplexed over one socket.
pub struct UdpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    state: RwLock<ConnectionState>,
    next_message_id: AtomicU32,
    next_reliable_message_id: AtomicU32,
    pending_ack: Mutex<HashMap<u32, PendingSend>>,
    responses: Mutex<HashMap<u32, oneshot::Sender<Box<dyn Message>>>>,
    reliable_queue: Mutex<crate::reliable::ReliableQueue<Box<dyn Message>>>,
    pool: Arc<BufferPool>,
    pending: PendingGuard,
    protocols: Arc<ProtocolTable>,
    keys: Option<SymmetricKeys>,
    events_tx: MessageChannelTx<ConnectionEvent>,
    max_message_length: u32,
    resend_interval: Duration,
    response_time_ms: AtomicI64,
    ping_sent_at: AtomicI64,
}

impl UdpConnection {
    pub fn spawn(
        id: ConnectionId,
        peer_addr: SocketAddr,
        socket: Arc<UdpSocket>,
        config: Arc<Config>,
        pool: Arc<BufferPool>,
        protocols: Arc<ProtocolTable>,
        keys: Option<SymmetricKeys>,
        events_tx: MessageChannelTx<ConnectionEvent>,
    ) -> Arc<Self> {
        let conn = Arc::new(UdpConnection {
            id,
            peer_addr,
            socket,
            state: RwLock::new(ConnectionState::Connected),
            next_message_id: AtomicU32::new(1),
            next_reliable_message_id: AtomicU32::new(1),
            pending_ack: Mutex::new(collections::hash_map()),
            responses: Mutex::new(collections::hash_map()),
            reliable_queue: Mutex::new(crate::reliable::ReliableQueue::new()),
            pool,
            pending: PendingGuard::new(),
            protocols,
            keys,
            events_tx,
            max_message_length: config.max_message_length,
            resend_interval: config.resend_interval,
            response_time_ms: AtomicI64::new(-1),
            ping_sent_at: AtomicI64::new(0),
        });

        let resend_conn = conn.clone();
        timeouts::spawn_periodic(config.resend_interval, move || {
            let resend_conn = resend_conn.clone();
            async move {
                if resend_conn.state() != ConnectionState::Connected {
                    return false;
                }
                resend_conn.resend_pending().await;
                true
            }
        });

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

    pub fn response_time_ms(&self) -> i64 {
        self.response_time_ms.load(Ordering::SeqCst)
    }

    /// Picks the wire id for `message` off whichever counter spec §3/§4.6
    /// assigns it to: `nextReliableMessageId` for must/prefer-reliable
    /// sends, `nextMessageId` otherwise. Keeping them distinct means a
    /// stream of unreliable sends never burns ids the receiver's
    /// `ReliableQueue` is waiting on.
    fn next_id_for(&self, message: &dyn Message) -> u32 {
        if message.must_be_reliable() || message.prefer_reliable() {
            self.next_reliable_message_id.fetch_add(1, Ordering::SeqCst)
        } else {
            self.next_message_id.fetch_add(1, Ordering::SeqCst)
        }
    }

    async fn resend_pending(&self) {
        let due: Vec<(u32, Vec<u8>)> = {
            let guard = self.pending_ack.lock();
            guard
                .iter()
                .filter(|(_, p)| p.sent_at.elapsed() >= self.resend_interval)
                .map(|(id, p)| (*id, p.bytes.clone()))
                .collect()
        };
        for (id, bytes) in due {
            debug!(id = %self.id, message_id = id, "resending unacked datagram");
            if self.socket.send_to(&bytes, self.peer_addr).await.is_ok() {
                if let Some(entry) = self.pending_ack.lock().get_mut(&id) {
                    entry.sent_at = Instant::now();
                }
            }
        }
    }

    /// Feeds one received datagram through decode, reliability bookkeeping,
    /// and dispatch. Called by whatever task owns the shared socket's
    /// `recv_from` loop and demultiplexes by peer address.
    pub async fn handle_datagram(&self, bytes: &[u8]) {
        let outcome = serialize::try_get_header(
            bytes,
            &self.protocols,
            self.keys.as_ref(),
            self.max_message_length,
            true,
        );

        let (message, meta) = match outcome {
            Ok(DecodeOutcome::Ready { message, udp_meta, .. }) => (message, udp_meta),
            Ok(DecodeOutcome::Drop { .. }) | Ok(DecodeOutcome::NeedMore) => return,
            Err(e) => {
                warn!(id = %self.id, error = %e, "dropping datagram");
                return;
            }
        };
        let meta = meta.unwrap_or(UdpMeta { message_id: 0, is_response: false });

        if let Some(ack) = message.as_any().downcast_ref::<Acknowledge>() {
            self.pending_ack.lock().remove(&ack.message_id);
            return;
        }

        if meta.is_response {
            if let Some(tx) = self.responses.lock().remove(&meta.message_id) {
                let _ = tx.send(message);
            }
            return;
        }

        if meta.message_id != 0 {
            // For a Tempest control message the queue-ordering observation
            // must happen before the ack goes out (spec §4.6 step 3); for
            // everything else the ack goes out first.
            let ready = if message.is_control() {
                let ready = self.reliable_queue.lock().enqueue(meta.message_id, message);
                let _ = self.send_raw_control(Box::new(Acknowledge { message_id: meta.message_id })).await;
                ready
            } else {
                let _ = self.send_raw_control(Box::new(Acknowledge { message_id: meta.message_id })).await;
                self.reliable_queue.lock().enqueue(meta.message_id, message)
            };
            for m in ready {
                if self.dispatch(m).await {
                    return;
                }
            }
        } else {
            self.dispatch(message).await;
        }
    }

    /// Returns `true` if a `Disconnect` was processed.
    async fn dispatch(&self, message: Box<dyn Message>) -> bool {
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

        let _ = self.events_tx.send(ConnectionEvent::MessageReceived { id: self.id, message });
        false
    }

    async fn finish(&self, reason: DisconnectReason) {
        debug!(id = %self.id, ?reason, "udp connection closed");
        self.set_state(ConnectionState::Disconnected);
        let _ = self.events_tx.send(ConnectionEvent::Disconnected { id: self.id, reason });
    }

    /// Sends a control message (e.g. `Acknowledge`) without reliability
    /// wrapping or `MessageSent` accounting; acks are never themselves
    /// acked. Every datagram on this connection carries a `UdpMeta` prefix
    /// (`handle_datagram` always decodes with `want_udp_meta: true`), so
    /// this still passes a sentinel one even though the value is unused on
    /// the receiving end.
    async fn send_raw_control(&self, message: Box<dyn Message>) -> Result<()> {
        let meta = UdpMeta { message_id: 0, is_response: false };
        let encoded = serialize::encode(message.as_ref(), self.keys.as_ref(), Some(meta))?;
        self.socket.send_to(&encoded, self.peer_addr).await.map_err(Error::from)?;
        Ok(())
    }

    /// Sends `message` reliably and awaits the peer's matching response
    /// (correlated by message id), per spec §4.6's request/response path.
    pub async fn send_for(&self, message: Box<dyn Message>, timeout: Duration) -> Result<Box<dyn Message>> {
        if !(message.must_be_reliable() || message.prefer_reliable()) {
            return Err(Error::simple(ErrorKind::InvalidOperation));
        }

        let id = self.next_id_for(message.as_ref());
        let (tx, rx) = oneshot::channel();
        self.responses.lock().insert(id, tx);

        if let Err(e) = self.send_with_id(message, id).await {
            self.responses.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.responses.lock().remove(&id);
                Err(Error::simple(ErrorKind::Disconnected))
            }
        }
    }

    async fn send_with_id(&self, message: Box<dyn Message>, id: u32) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Err(Error::simple(ErrorKind::Disconnected));
        }

        let is_control = message.is_control();
        let message_type = message.message_type();
        let reliable = message.must_be_reliable() || message.prefer_reliable();
        let meta = UdpMeta { message_id: if reliable { id } else { 0 }, is_response: false };
        let encoded = serialize::encode(message.as_ref(), self.keys.as_ref(), Some(meta))?;

        let _ticket = self.pending.enter();
        if reliable && !is_control {
            self.pending_ack.lock().insert(
                id,
                PendingSend { bytes: encoded.clone(), sent_at: Instant::now() },
            );
        }
        self.socket.send_to(&encoded, self.peer_addr).await.map_err(Error::from)?;

        if !is_control {
            let _ = self.events_tx.send(ConnectionEvent::MessageSent { id: self.id, message_type });
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[async_trait]
impl Connection for UdpConnection {
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
        let id = self.next_id_for(message.as_ref());
        self.send_with_id(message, id).await
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
    use crate::testing::{test_protocol, SeqMessage};

    fn test_protocols() -> Arc<ProtocolTable> {
        let mut table = ProtocolTable::new();
        table.register(internal_protocol()).unwrap();
        table.register(test_protocol()).unwrap();
        Arc::new(table)
    }

    /// S3 — reliable messages with ids 1..5 arrive out of order (3,1,5,2,4);
    /// the handler must still observe them in strictly increasing order.
    #[tokio::test]
    async fn s3_out_of_order_reliable_delivers_in_order() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let peer_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (tx, mut rx) = crate::channel::new_message_channel();
        let conn = UdpConnection::spawn(
            1u32.into(),
            peer_addr,
            socket,
            Arc::new(Config::default()),
            Arc::new(BufferPool::new(4)),
            test_protocols(),
            None,
            tx,
        );

        for id in [3u32, 1, 5, 2, 4] {
            let meta = UdpMeta { message_id: id, is_response: false };
            let bytes = serialize::encode(&SeqMessage(id), None, Some(meta)).unwrap();
            conn.handle_datagram(&bytes).await;
        }

        let mut delivered = Vec::new();
        while delivered.len() < 5 {
            match rx.recv().await.unwrap() {
                ConnectionEvent::MessageReceived { message, .. } => {
                    let seq = message.as_any().downcast_ref::<SeqMessage>().unwrap();
                    delivered.push(seq.0);
                }
                _ => continue,
            }
        }
        assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
    }

    /// S4 — a dropped datagram is resent unchanged within the configured
    /// resend interval, and acking it drains `pendingAck`.
    #[tokio::test]
    async fn s4_dropped_datagram_is_resent_then_acked() {
        let sender_socket = Arc::new(UdpSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let network = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let network_addr = network.local_addr().unwrap();

        let mut config = Config::default();
        config.resend_interval = Duration::from_millis(200);

        let (tx, _rx) = crate::channel::new_message_channel();
        let sender = UdpConnection::spawn(
            1u32.into(),
            network_addr,
            sender_socket,
            Arc::new(config),
            Arc::new(BufferPool::new(4)),
            test_protocols(),
            None,
            tx,
        );

        sender.send(Box::new(SeqMessage(7))).await.unwrap();
        assert_eq!(sender.pending_ack.lock().len(), 1);
        let id = *sender.pending_ack.lock().keys().next().unwrap();

        let mut first = vec![0u8; 2048];
        let (n1, _) = network.recv_from(&mut first).await.unwrap();
        let first = &first[..n1];

        let mut second = vec![0u8; 2048];
        let (n2, _) = tokio::time::timeout(Duration::from_secs(2), network.recv_from(&mut second))
            .await
            .expect("sender should resend within a couple of resend intervals")
            .unwrap();
        assert_eq!(first, &second[..n2]);

        let ack_meta = UdpMeta { message_id: id, is_response: false };
        let ack_bytes =
            serialize::encode(&Acknowledge { message_id: id }, None, Some(ack_meta)).unwrap();
        sender.handle_datagram(&ack_bytes).await;

        assert!(sender.pending_ack.lock().is_empty());
    }
}
