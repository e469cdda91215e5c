use super::{PresenceSnapshot, PresenceStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

/// Presence triple kept in Redis: two sets and a hash under a shared prefix
/// (typically `webrtc:room:{code}`), so several rooms coexist in one
/// database and a multi-process deployment sees the same view.
#[derive(Clone)]
pub struct RedisPresence {
    conn: ConnectionManager,
    key_peers: String,
    key_broadcasting: String,
    key_usernames: String,
}

impl RedisPresence {
    pub fn new(conn: ConnectionManager, prefix: &str) -> Self {
        let p = prefix.trim().trim_end_matches(':');
        let p = if p.is_empty() { "webrtc" } else { p };
        Self {
            conn,
            key_peers: format!("{p}:peers"),
            key_broadcasting: format!("{p}:broadcasting"),
            key_usernames: format!("{p}:usernames"),
        }
    }
}

#[async_trait]
impl PresenceStore for RedisPresence {
    async fn reset(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let keys = vec![
            self.key_peers.as_str(),
            self.key_broadcasting.as_str(),
            self.key_usernames.as_str(),
        ];
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn add_peer(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(&self.key_peers, id).await?;
        Ok(())
    }

    async fn remove_peer(&self, id: &str) -> Result<(), StoreError> {
        // MULTI/EXEC so no reader sees the peer gone from one key but not
        // the others.
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .srem(&self.key_peers, id)
            .ignore()
            .srem(&self.key_broadcasting, id)
            .ignore()
            .hdel(&self.key_usernames, id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_broadcast(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = if enabled {
            conn.sadd(&self.key_broadcasting, id).await?
        } else {
            conn.srem(&self.key_broadcasting, id).await?
        };
        Ok(())
    }

    async fn set_username(&self, id: &str, username: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let username = username.trim();
        let _: () = if username.is_empty() {
            conn.hdel(&self.key_usernames, id).await?
        } else {
            conn.hset(&self.key_usernames, id, username).await?
        };
        Ok(())
    }

    async fn state(&self) -> Result<PresenceSnapshot, StoreError> {
        // MULTI/EXEC here too, so a snapshot cannot interleave with an
        // in-flight removal and see a half-evicted peer.
        let mut conn = self.conn.clone();
        let (peers, broadcasting, usernames): (Vec<String>, Vec<String>, HashMap<String, String>) =
            redis::pipe()
                .atomic()
                .smembers(&self.key_peers)
                .smembers(&self.key_broadcasting)
                .hgetall(&self.key_usernames)
                .query_async(&mut conn)
                .await?;
        Ok((peers, broadcasting, usernames))
    }
}
