use std::path::PathBuf;

const DEFAULT_STATIC_DIR: &str = "../frontend/dist";

/// Server configuration read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub addr: String,
    /// Redis endpoint; accepts `host:port` or a full `redis://` URL.
    pub redis_addr: String,
    /// Directory the SPA shell is served from.
    pub static_dir: PathBuf,
    /// Overrides the WebSocket URL advertised by `/api/settings`.
    pub public_ws_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            addr: env_or("ADDR", "0.0.0.0:8080"),
            redis_addr: env_or("REDIS_ADDR", "127.0.0.1:6379"),
            static_dir: PathBuf::from(env_or("STATIC_DIR", DEFAULT_STATIC_DIR)),
            public_ws_url: std::env::var("WS_PUBLIC_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }

    /// The Redis endpoint as a connection URL.
    pub fn redis_url(&self) -> String {
        if self.redis_addr.contains("://") {
            self.redis_addr.clone()
        } else {
            format!("redis://{}", self.redis_addr)
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => fallback.to_string(),
    }
}
