#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parlor_core::{IceMode, IceServer};
use parlor_server::hub::{HubManager, HubManagerOptions};
use parlor_server::ice::IceSettings;
use parlor_server::presence::{MemoryPresence, PresenceStore};
use parlor_server::rooms::{MemoryRooms, RoomStore};
use parlor_server::{router, AppState};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::Level;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which we assert a frame does NOT arrive.
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub rooms: Arc<dyn RoomStore>,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, code: &str) -> String {
        format!("ws://{}/ws?room={}", self.addr, code)
    }

    /// Creates a room directly through the registry.
    pub async fn create_room(&self) -> String {
        self.rooms.create().await.expect("room create").code.0
    }
}

/// Boots the full router on an ephemeral port with in-memory stores.
pub async fn spawn_server(idle_grace: Duration) -> TestServer {
    init_tracing();

    let rooms: Arc<dyn RoomStore> = Arc::new(MemoryRooms::new());
    let ice = IceSettings {
        mode: IceMode::StunTurn,
        servers: vec![IceServer::stun(vec!["stun:stun.example.org".into()])],
    };
    let hubs = HubManager::new(HubManagerOptions {
        rooms: rooms.clone(),
        presence: Box::new(|_code| Arc::new(MemoryPresence::new()) as Arc<dyn PresenceStore>),
        ice_servers: ice.servers.clone(),
        ice_mode: ice.mode,
        idle_grace,
    });
    let state = AppState {
        rooms: rooms.clone(),
        hubs,
        ice,
        public_ws_url: None,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state, None);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    TestServer { addr, rooms }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(server: &TestServer, code: &str) -> Self {
        let (stream, _) = connect_async(server.ws_url(code))
            .await
            .expect("ws connect");
        Self { stream }
    }

    /// Attempts the upgrade and returns the HTTP status the server rejected
    /// it with.
    pub async fn connect_err(server: &TestServer, code: &str) -> u16 {
        match connect_async(server.ws_url(code)).await {
            Err(WsError::Http(response)) => response.status().as_u16(),
            Ok(_) => panic!("expected upgrade rejection"),
            Err(other) => panic!("expected http rejection, got {other:?}"),
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.stream
            .send(Message::Text(value.to_string()))
            .await
            .expect("ws send");
    }

    pub async fn send_text(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .expect("ws send");
    }

    /// Next JSON text frame, skipping transport control frames.
    pub async fn next_json(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("ws error");
            match frame {
                Message::Text(text) => return serde_json::from_str(&text).expect("frame is json"),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Asserts the next frame has the given `type` and returns it.
    pub async fn expect_frame(&mut self, frame_type: &str) -> Value {
        let frame = self.next_json().await;
        assert_eq!(frame["type"], frame_type, "unexpected frame: {frame}");
        frame
    }

    /// Asserts nothing arrives within the quiet window.
    pub async fn expect_silence(&mut self) {
        let outcome = tokio::time::timeout(QUIET_WINDOW, self.stream.next()).await;
        match outcome {
            Err(_) => {}
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(frame) => panic!("expected silence, got {frame:?}"),
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Extracts the peers array as a sorted list of strings.
pub fn peers_of(frame: &Value) -> Vec<String> {
    let mut peers: Vec<String> = frame["peers"]
        .as_array()
        .expect("peers array")
        .iter()
        .map(|p| p.as_str().expect("peer id").to_string())
        .collect();
    peers.sort();
    peers
}
