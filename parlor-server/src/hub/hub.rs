use crate::presence::{PresenceStore, StoreError};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parlor_core::{ClientFrame, IceMode, IceServer, PeerId, ServerFrame};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest inbound frame the hub will read. Applied at upgrade time.
pub const READ_LIMIT: usize = 64 * 1024;

/// Outbound frames buffered per peer before the hub starts dropping.
pub(crate) const SEND_QUEUE_CAPACITY: usize = 32;

const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = Duration::from_secs(40);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub type OnEmpty = Box<dyn Fn() + Send + Sync>;

/// Configures a [`Hub`] instance.
pub struct HubOptions {
    pub ice_servers: Vec<IceServer>,
    pub ice_mode: IceMode,
    /// Invoked whenever an eviction leaves the hub with no peers.
    pub on_empty: Option<OnEmpty>,
}

/// Controls how a connection is registered.
#[derive(Default)]
pub struct ConnOptions {
    /// Overrides the generated peer id (useful for authenticated callers).
    pub id: Option<PeerId>,
    /// Lets the caller cancel the connection externally.
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("presence registration failed: {0}")]
    Register(#[from] StoreError),
}

struct ClientHandle {
    send: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// Per-room signaling coordinator: registers WebSocket peers, fans out
/// presence snapshots and forwards opaque signal payloads between them.
pub struct Hub {
    clients: DashMap<PeerId, ClientHandle>,
    presence: Arc<dyn PresenceStore>,
    ice_servers: Vec<IceServer>,
    ice_mode: IceMode,
    on_empty: Option<OnEmpty>,
}

impl Hub {
    pub fn new(presence: Arc<dyn PresenceStore>, opts: HubOptions) -> Self {
        Self {
            clients: DashMap::new(),
            presence,
            ice_servers: opts.ice_servers,
            ice_mode: opts.ice_mode,
            on_empty: opts.on_empty,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.clients.len()
    }

    /// Registers an already-upgraded WebSocket connection and starts its
    /// reader and writer tasks. On a registration failure the socket is
    /// closed without any `peer-joined` going out.
    pub async fn accept(
        self: &Arc<Self>,
        mut socket: WebSocket,
        opts: ConnOptions,
    ) -> Result<(), HubError> {
        let id = opts.id.unwrap_or_else(PeerId::random);
        let cancel = opts
            .cancel
            .map(|token| token.child_token())
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        if let Err(err) = self.register(&id, tx, cancel.clone()).await {
            let _ = socket.send(Message::Close(None)).await;
            return Err(err);
        }

        let (sink, stream) = socket.split();
        tokio::spawn(write_pump(sink, rx, cancel.clone()));
        tokio::spawn(read_pump(Arc::clone(self), stream, id, cancel));
        Ok(())
    }

    async fn register(
        &self,
        id: &PeerId,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), HubError> {
        self.clients
            .insert(id.clone(), ClientHandle { send: tx, cancel });

        if let Err(err) = self.presence.add_peer(id.as_str()).await {
            self.clients.remove(id);
            return Err(err.into());
        }

        let (peers, broadcasting, usernames) = self.snapshot().await;
        info!(peer = %id, peers = peers.len(), "registered");

        self.send_to(
            id,
            &ServerFrame::Welcome {
                id: id.clone(),
                peers: peers.clone(),
                broadcasting: broadcasting.clone(),
                usernames: usernames.clone(),
                ice_servers: self.ice_servers.clone(),
                ice_mode: self.ice_mode,
            },
        );
        self.broadcast(
            &ServerFrame::PeerJoined {
                id: id.clone(),
                peers,
                broadcasting,
                usernames,
            },
            Some(id),
        );
        Ok(())
    }

    /// Evicts a peer: registry first, then the store (atomically across all
    /// three sub-structures), then the `peer-left` fanout. Runs at most once
    /// per peer; store failures are logged but never leave the peer wedged
    /// in the registry.
    pub(crate) async fn unregister(&self, id: &PeerId) {
        let Some((_, handle)) = self.clients.remove(id) else {
            return;
        };

        if let Err(err) = self.presence.remove_peer(id.as_str()).await {
            warn!(peer = %id, error = %err, "presence eviction failed");
        }

        let (peers, broadcasting, usernames) = self.snapshot().await;
        self.broadcast(
            &ServerFrame::PeerLeft {
                id: id.clone(),
                peers: peers.clone(),
                broadcasting,
                usernames,
            },
            Some(id),
        );
        info!(peer = %id, peers = peers.len(), "unregistered");

        handle.cancel.cancel();

        if self.clients.is_empty() {
            if let Some(on_empty) = &self.on_empty {
                on_empty();
            }
        }
    }

    pub(crate) async fn handle_inbound(&self, id: &PeerId, frame: ClientFrame) {
        match frame {
            ClientFrame::Signal { to, data } => {
                if to.as_str().trim().is_empty() || data.is_null() {
                    debug!(from = %id, "signal missing target or payload");
                    return;
                }
                self.forward_signal(id, &to, data);
            }
            ClientFrame::Broadcast { enabled } => {
                if let Err(err) = self.presence.set_broadcast(id.as_str(), enabled).await {
                    warn!(peer = %id, error = %err, "broadcast update failed");
                }
                let (peers, broadcasting, usernames) = self.snapshot().await;
                self.broadcast(
                    &ServerFrame::BroadcastState {
                        id: id.clone(),
                        enabled,
                        peers,
                        broadcasting,
                        usernames,
                    },
                    None,
                );
            }
            ClientFrame::SetUsername { username } => {
                if let Err(err) = self.presence.set_username(id.as_str(), &username).await {
                    warn!(peer = %id, error = %err, "username update failed");
                }
                let (peers, broadcasting, usernames) = self.snapshot().await;
                self.broadcast(
                    &ServerFrame::Usernames {
                        id: id.clone(),
                        peers,
                        broadcasting,
                        usernames,
                    },
                    None,
                );
            }
        }
    }

    fn forward_signal(&self, from: &PeerId, to: &PeerId, data: serde_json::Value) {
        if !self.clients.contains_key(to) {
            warn!(%from, %to, "signal target missing");
            return;
        }
        self.send_to(
            to,
            &ServerFrame::Signal {
                from: from.clone(),
                to: to.clone(),
                data,
            },
        );
    }

    /// Point-in-time read of the presence triple. Store errors degrade to an
    /// empty view rather than tearing the connection down.
    async fn snapshot(&self) -> (Vec<PeerId>, Vec<PeerId>, HashMap<PeerId, String>) {
        match self.presence.state().await {
            Ok((peers, broadcasting, usernames)) => (
                peers.into_iter().map(PeerId).collect(),
                broadcasting.into_iter().map(PeerId).collect(),
                usernames
                    .into_iter()
                    .map(|(id, name)| (PeerId(id), name))
                    .collect(),
            ),
            Err(err) => {
                warn!(error = %err, "presence snapshot failed");
                (Vec::new(), Vec::new(), HashMap::new())
            }
        }
    }

    fn broadcast(&self, frame: &ServerFrame, skip: Option<&PeerId>) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "frame serialization failed");
                return;
            }
        };

        for entry in self.clients.iter() {
            if skip == Some(entry.key()) {
                continue;
            }
            enqueue(entry.key(), &entry.value().send, text.clone());
        }
    }

    fn send_to(&self, id: &PeerId, frame: &ServerFrame) {
        let Some(handle) = self.clients.get(id) else {
            return;
        };
        match serde_json::to_string(frame) {
            Ok(text) => enqueue(id, &handle.send, text),
            Err(err) => warn!(error = %err, "frame serialization failed"),
        }
    }
}

/// Non-blocking enqueue onto the peer's bounded send queue. A full queue
/// drops this frame only; the connection and later frames survive.
fn enqueue(id: &PeerId, tx: &mpsc::Sender<String>, text: String) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(text) {
        warn!(peer = %id, "send queue full, dropping frame");
    }
}

/// Reads frames until the socket errors, closes, idles out or the peer is
/// cancelled, then runs the eviction path exactly once.
async fn read_pump(
    hub: Arc<Hub>,
    mut stream: SplitStream<WebSocket>,
    id: PeerId,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            read = timeout(READ_IDLE_TIMEOUT, stream.next()) => match read {
                Err(_) => {
                    warn!(peer = %id, "read deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!(peer = %id, error = %err, "read error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            },
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(inbound) => hub.handle_inbound(&id, inbound).await,
                Err(err) => warn!(peer = %id, error = %err, "bad payload"),
            },
            Message::Close(_) => break,
            // Pongs (and any other control traffic) already refreshed the
            // idle deadline by completing the read.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => debug!(peer = %id, "ignoring binary frame"),
        }
    }

    hub.unregister(&id).await;
}

/// Drains the send queue in FIFO order and emits heartbeat pings. A closed
/// queue or a failed write ends the connection via the shared token.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let mut ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(text) => {
                    match timeout(WRITE_TIMEOUT, sink.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }

    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresence;
    use serde_json::json;

    fn test_hub() -> Arc<Hub> {
        Arc::new(Hub::new(
            Arc::new(MemoryPresence::new()),
            HubOptions {
                ice_servers: vec![],
                ice_mode: IceMode::StunTurn,
                on_empty: None,
            },
        ))
    }

    async fn join(hub: &Arc<Hub>, id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        hub.register(&id.into(), tx, CancellationToken::new())
            .await
            .expect("register");
        rx
    }

    fn next_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let text = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&text).expect("frame is json")
    }

    fn assert_empty(rx: &mut mpsc::Receiver<String>) {
        assert!(rx.try_recv().is_err(), "expected no further frames");
    }

    #[tokio::test]
    async fn solo_join_gets_exactly_one_welcome() {
        let hub = test_hub();
        let mut rx = join(&hub, "p1").await;

        let welcome = next_frame(&mut rx);
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["id"], "p1");
        assert_eq!(welcome["peers"], json!(["p1"]));
        assert_eq!(welcome["broadcasting"], json!([]));
        assert_eq!(welcome["usernames"], json!({}));
        assert_empty(&mut rx);
    }

    #[tokio::test]
    async fn second_join_fans_out_to_first_only() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let _ = next_frame(&mut rx1); // p1 welcome

        let mut rx2 = join(&hub, "p2").await;

        let welcome = next_frame(&mut rx2);
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["id"], "p2");
        assert_eq!(welcome["peers"], json!(["p1", "p2"]));
        assert_empty(&mut rx2);

        let joined = next_frame(&mut rx1);
        assert_eq!(joined["type"], "peer-joined");
        assert_eq!(joined["id"], "p2");
        assert_eq!(joined["peers"], json!(["p1", "p2"]));
        assert_empty(&mut rx1);
    }

    #[tokio::test]
    async fn broadcast_toggle_reaches_everyone_including_sender() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let mut rx2 = join(&hub, "p2").await;
        let _ = next_frame(&mut rx1);
        let _ = next_frame(&mut rx1); // welcome + p2 joined
        let _ = next_frame(&mut rx2);

        hub.handle_inbound(&"p2".into(), ClientFrame::Broadcast { enabled: true })
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let state = next_frame(rx);
            assert_eq!(state["type"], "broadcast-state");
            assert_eq!(state["id"], "p2");
            assert_eq!(state["enabled"], true);
            assert_eq!(state["broadcasting"], json!(["p2"]));
        }

        hub.handle_inbound(&"p2".into(), ClientFrame::Broadcast { enabled: false })
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let state = next_frame(rx);
            assert_eq!(state["enabled"], false);
            assert_eq!(state["broadcasting"], json!([]));
        }
    }

    #[tokio::test]
    async fn signal_reaches_only_the_addressed_peer() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let mut rx2 = join(&hub, "p2").await;
        let mut rx3 = join(&hub, "p3").await;
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            while rx.try_recv().is_ok() {}
        }

        hub.handle_inbound(
            &"p1".into(),
            ClientFrame::Signal {
                to: "p2".into(),
                data: json!({"type": "offer", "sdp": "v=0"}),
            },
        )
        .await;

        let signal = next_frame(&mut rx2);
        assert_eq!(signal["type"], "signal");
        assert_eq!(signal["from"], "p1");
        assert_eq!(signal["to"], "p2");
        assert_eq!(signal["data"]["sdp"], "v=0");
        assert_empty(&mut rx1);
        assert_empty(&mut rx3);
    }

    #[tokio::test]
    async fn signal_to_missing_peer_is_dropped_silently() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let _ = next_frame(&mut rx1);

        hub.handle_inbound(
            &"p1".into(),
            ClientFrame::Signal {
                to: "ghost".into(),
                data: json!({"sdp": "v=0"}),
            },
        )
        .await;

        assert_empty(&mut rx1);
        assert_eq!(hub.peer_count(), 1);
    }

    #[tokio::test]
    async fn signal_without_payload_is_dropped() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let mut rx2 = join(&hub, "p2").await;
        for rx in [&mut rx1, &mut rx2] {
            while rx.try_recv().is_ok() {}
        }

        hub.handle_inbound(
            &"p1".into(),
            ClientFrame::Signal {
                to: "p2".into(),
                data: serde_json::Value::Null,
            },
        )
        .await;
        hub.handle_inbound(
            &"p1".into(),
            ClientFrame::Signal {
                to: "  ".into(),
                data: json!({"sdp": "v=0"}),
            },
        )
        .await;

        assert_empty(&mut rx2);
    }

    #[tokio::test]
    async fn username_update_fans_out_trimmed() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let _ = next_frame(&mut rx1);

        hub.handle_inbound(
            &"p1".into(),
            ClientFrame::SetUsername {
                username: "  Ada  ".into(),
            },
        )
        .await;

        let frame = next_frame(&mut rx1);
        assert_eq!(frame["type"], "usernames");
        assert_eq!(frame["usernames"]["p1"], "Ada");
    }

    #[tokio::test]
    async fn eviction_broadcasts_consistent_snapshot() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let mut rx2 = join(&hub, "p2").await;
        hub.handle_inbound(&"p2".into(), ClientFrame::Broadcast { enabled: true })
            .await;
        hub.handle_inbound(
            &"p2".into(),
            ClientFrame::SetUsername {
                username: "Bob".into(),
            },
        )
        .await;
        for rx in [&mut rx1, &mut rx2] {
            while rx.try_recv().is_ok() {}
        }

        hub.unregister(&"p2".into()).await;

        let left = next_frame(&mut rx1);
        assert_eq!(left["type"], "peer-left");
        assert_eq!(left["id"], "p2");
        assert_eq!(left["peers"], json!(["p1"]));
        assert_eq!(left["broadcasting"], json!([]));
        assert_eq!(left["usernames"], json!({}));
        assert_eq!(hub.peer_count(), 1);
    }

    #[tokio::test]
    async fn eviction_is_idempotent() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let mut rx2 = join(&hub, "p2").await;
        for rx in [&mut rx1, &mut rx2] {
            while rx.try_recv().is_ok() {}
        }

        hub.unregister(&"p2".into()).await;
        hub.unregister(&"p2".into()).await;

        let _ = next_frame(&mut rx1);
        assert_empty(&mut rx1);
    }

    #[tokio::test]
    async fn on_empty_fires_when_last_peer_leaves() {
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        let hub = Arc::new(Hub::new(
            Arc::new(MemoryPresence::new()),
            HubOptions {
                ice_servers: vec![],
                ice_mode: IceMode::StunTurn,
                on_empty: Some(Box::new(move || {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })),
            },
        ));

        let _rx1 = join(&hub, "p1").await;
        let _rx2 = join(&hub, "p2").await;

        hub.unregister(&"p1".into()).await;
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);

        hub.unregister(&"p2".into()).await;
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_send_queue_drops_frames_but_keeps_later_ones_flowing() {
        let hub = test_hub();
        let mut rx1 = join(&hub, "p1").await;
        let mut rx2 = join(&hub, "p2").await;
        for rx in [&mut rx1, &mut rx2] {
            while rx.try_recv().is_ok() {}
        }

        // Saturate p2's queue without draining it.
        for i in 0..SEND_QUEUE_CAPACITY + 4 {
            hub.handle_inbound(
                &"p1".into(),
                ClientFrame::Signal {
                    to: "p2".into(),
                    data: json!({"seq": i}),
                },
            )
            .await;
        }

        let mut received = 0;
        while rx2.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SEND_QUEUE_CAPACITY);

        // Once drained, new frames go through again.
        hub.handle_inbound(
            &"p1".into(),
            ClientFrame::Signal {
                to: "p2".into(),
                data: json!({"seq": "after"}),
            },
        )
        .await;
        let frame = next_frame(&mut rx2);
        assert_eq!(frame["data"]["seq"], "after");
    }
}
