use anyhow::Context;
use parlor_server::hub::{HubManager, HubManagerOptions, DEFAULT_IDLE_GRACE};
use parlor_server::presence::RedisPresence;
use parlor_server::rooms::{RedisRooms, RoomStore};
use parlor_server::{http, ice, AppState, Config, PresenceStore};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const KEY_PREFIX: &str = "webrtc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let ice = ice::from_env();

    let client =
        redis::Client::open(config.redis_url()).context("invalid REDIS_ADDR")?;
    let conn = ConnectionManager::new(client)
        .await
        .context("redis connection failed")?;
    {
        let mut ping = conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut ping)
            .await
            .context("redis ping failed")?;
    }

    let rooms: Arc<dyn RoomStore> = Arc::new(RedisRooms::new(conn.clone(), KEY_PREFIX));
    let presence_conn = conn.clone();
    let hubs = HubManager::new(HubManagerOptions {
        rooms: rooms.clone(),
        presence: Box::new(move |code| {
            Arc::new(RedisPresence::new(
                presence_conn.clone(),
                &format!("{KEY_PREFIX}:room:{code}"),
            )) as Arc<dyn PresenceStore>
        }),
        ice_servers: ice.servers.clone(),
        ice_mode: ice.mode,
        idle_grace: DEFAULT_IDLE_GRACE,
    });

    let state = AppState {
        rooms,
        hubs,
        ice,
        public_ws_url: config.public_ws_url.clone(),
    };
    let app = http::router(state, Some(config.static_dir.as_path()));

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    info!(addr = %config.addr, static_dir = %config.static_dir.display(), "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
