use crate::hub::{ConnOptions, HubManager, READ_LIMIT};
use crate::ice::IceSettings;
use crate::rooms::{RoomError, RoomStore};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use parlor_core::RoomCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, warn};

/// Budget for a single registry round-trip from an HTTP handler.
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<dyn RoomStore>,
    pub hubs: Arc<HubManager>,
    pub ice: IceSettings,
    pub public_ws_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error("registry timeout")]
    Timeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Room(RoomError::NotFound) => (StatusCode::NOT_FOUND, "room not found"),
            ApiError::Room(err) => {
                error!(error = %err, "registry failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "registry failure")
            }
            ApiError::Timeout => {
                error!("registry timeout");
                (StatusCode::INTERNAL_SERVER_ERROR, "registry timeout")
            }
        };
        (status, message).into_response()
    }
}

async fn with_registry_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, RoomError>>,
) -> Result<T, ApiError> {
    match timeout(REGISTRY_TIMEOUT, fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::Timeout),
    }
}

/// Builds the service router. `static_dir` is the SPA shell served for
/// everything the API does not claim; `None` leaves the fallback empty
/// (used by the test harness).
pub fn router(state: AppState, static_dir: Option<&std::path::Path>) -> Router {
    let mut router = Router::new()
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{code}", get(lookup_room))
        .route("/api/settings", get(settings))
        .route("/api/debug/ice", get(debug_ice))
        .route("/ws", get(ws_upgrade));

    if let Some(dir) = static_dir {
        let spa = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        router = router.fallback_service(spa);
    }

    router.with_state(state)
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = with_registry_timeout(state.rooms.create()).await?;
    let url = room_url(&headers, room.code.as_str());
    Ok(Json(json!({
        "code": room.code,
        "url": url,
    })))
}

async fn lookup_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = with_registry_timeout(state.rooms.get(&code)).await?;
    let url = room_url(&headers, room.code.as_str());
    Ok(Json(json!({
        "code": room.code,
        "createdAt": room.created_at,
        "url": url,
    })))
}

async fn settings(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let ws_url = state
        .public_ws_url
        .clone()
        .unwrap_or_else(|| derived_ws_url(&headers));
    Json(json!({
        "wsURL": ws_url,
        "iceMode": state.ice.mode,
        "iceServers": state.ice.servers,
    }))
}

async fn debug_ice(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "mode": state.ice.mode,
        "iceServers": state.ice.servers,
    }))
}

#[derive(Deserialize)]
struct WsQuery {
    #[serde(default)]
    room: String,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let code = query.room.trim().to_string();
    if code.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing room code").into_response();
    }

    if let Err(err) = with_registry_timeout(state.rooms.get(&code)).await {
        return err.into_response();
    }

    let hub = state.hubs.hub_for_room(&RoomCode(code.clone())).await;
    ws.max_message_size(READ_LIMIT)
        .on_upgrade(move |socket| async move {
            if let Err(err) = hub.accept(socket, ConnOptions::default()).await {
                warn!(room = %code, error = %err, "accept failed");
            }
        })
}

fn host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost:8080")
}

fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

fn room_url(headers: &HeaderMap, code: &str) -> String {
    let proto = if forwarded_https(headers) { "https" } else { "http" };
    format!("{proto}://{}/rooms/{code}", host(headers))
}

fn derived_ws_url(headers: &HeaderMap) -> String {
    let proto = if forwarded_https(headers) { "wss" } else { "ws" };
    format!("{proto}://{}/ws", host(headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (key, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*key).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn room_url_uses_host_header() {
        let headers = headers(&[("host", "parlor.example.org")]);
        assert_eq!(
            room_url(&headers, "abc123xy"),
            "http://parlor.example.org/rooms/abc123xy"
        );
    }

    #[test]
    fn room_url_honors_forwarded_proto() {
        let headers = headers(&[("host", "parlor.example.org"), ("x-forwarded-proto", "HTTPS")]);
        assert_eq!(
            room_url(&headers, "abc123xy"),
            "https://parlor.example.org/rooms/abc123xy"
        );
    }

    #[test]
    fn ws_url_switches_scheme_with_proto() {
        assert_eq!(
            derived_ws_url(&headers(&[("host", "a.example.org")])),
            "ws://a.example.org/ws"
        );
        assert_eq!(
            derived_ws_url(&headers(&[
                ("host", "a.example.org"),
                ("x-forwarded-proto", "https")
            ])),
            "wss://a.example.org/ws"
        );
    }

    #[test]
    fn missing_host_falls_back() {
        assert_eq!(derived_ws_url(&HeaderMap::new()), "ws://localhost:8080/ws");
    }
}
