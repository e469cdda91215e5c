use parlor_core::{IceMode, IceServer};
use tracing::warn;

const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

/// ICE configuration advertised to clients via `welcome` and the settings
/// endpoint.
#[derive(Debug, Clone)]
pub struct IceSettings {
    pub mode: IceMode,
    pub servers: Vec<IceServer>,
}

/// Reads ICE configuration from the environment.
///
/// - `ICE_MODE`: `stun-turn` (default), `stun-only`, `turn-only`
/// - `STUN_URLS` / `TURN_URLS`: comma-separated server URLs
/// - `TURN_USERNAME` / `TURN_PASSWORD`: TURN credentials, if required
pub fn from_env() -> IceSettings {
    load(|key| std::env::var(key).ok())
}

fn load(get: impl Fn(&str) -> Option<String>) -> IceSettings {
    let raw_mode = get("ICE_MODE").unwrap_or_default();
    let mode = match raw_mode.parse::<IceMode>() {
        Ok(mode) => mode,
        Err(()) => {
            warn!(value = %raw_mode, "unrecognized ICE_MODE, using stun-turn");
            IceMode::StunTurn
        }
    };

    let mut servers = Vec::new();

    if mode != IceMode::TurnOnly {
        let stun_urls = split_and_clean(&get("STUN_URLS").unwrap_or_default());
        if stun_urls.is_empty() {
            servers.push(IceServer::stun(vec![DEFAULT_STUN.to_string()]));
        } else {
            servers.push(IceServer::stun(stun_urls));
        }
    }

    if mode != IceMode::StunOnly {
        let turn_urls = split_and_clean(&get("TURN_URLS").unwrap_or_default());
        if !turn_urls.is_empty() {
            servers.push(IceServer::turn(
                turn_urls,
                get("TURN_USERNAME").unwrap_or_default().trim().to_string(),
                get("TURN_PASSWORD").unwrap_or_default().trim().to_string(),
            ));
        } else if mode != IceMode::TurnOnly {
            warn!("TURN not configured; set TURN_URLS and credentials for relay fallback");
        }
    }

    if mode == IceMode::TurnOnly && servers.is_empty() {
        warn!("ICE_MODE=turn-only but no TURN servers configured; falling back to default STUN");
        servers.push(IceServer::stun(vec![DEFAULT_STUN.to_string()]));
    }

    IceSettings { mode, servers }
}

fn split_and_clean(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
