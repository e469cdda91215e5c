use super::{generate_code, Room, RoomError, RoomStore, CREATE_ATTEMPTS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

/// Room records as Redis hashes under `{prefix}:rooms:{code}`.
#[derive(Clone)]
pub struct RedisRooms {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRooms {
    pub fn new(conn: ConnectionManager, prefix: &str) -> Self {
        let p = prefix.trim().trim_end_matches(':');
        let p = if p.is_empty() { "webrtc" } else { p };
        Self {
            conn,
            prefix: p.to_string(),
        }
    }

    fn room_key(&self, code: &str) -> String {
        format!("{}:rooms:{}", self.prefix, code)
    }
}

#[async_trait]
impl RoomStore for RedisRooms {
    async fn create(&self) -> Result<Room, RoomError> {
        let mut conn = self.conn.clone();
        for _ in 0..CREATE_ATTEMPTS {
            let code = generate_code();
            let key = self.room_key(code.as_str());
            let exists: bool = conn.exists(&key).await?;
            if exists {
                continue;
            }
            let now = Utc::now();
            let created_at = now.to_rfc3339();
            let _: () = conn
                .hset_multiple(
                    &key,
                    &[("code", code.as_str()), ("created_at", created_at.as_str())],
                )
                .await?;
            return Ok(Room {
                code,
                created_at: now,
            });
        }
        Err(RoomError::CapacityExhausted)
    }

    async fn get(&self, code: &str) -> Result<Room, RoomError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RoomError::NotFound);
        }

        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.room_key(code)).await?;
        if fields.is_empty() {
            return Err(RoomError::NotFound);
        }

        // A mangled stored timestamp degrades to "now" rather than failing
        // the lookup.
        let created_at = fields
            .get("created_at")
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Room {
            code: code.into(),
            created_at,
        })
    }

    async fn delete(&self, code: &str) -> Result<(), RoomError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RoomError::NotFound);
        }

        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(self.room_key(code)).await?;
        if deleted == 0 {
            return Err(RoomError::NotFound);
        }
        Ok(())
    }
}
