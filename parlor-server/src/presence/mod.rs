mod memory;
mod redis;

pub use memory::MemoryPresence;
pub use redis::RedisPresence;

use async_trait::async_trait;
use std::collections::HashMap;

/// Error raised by a presence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// A full read of the room's presence: connected peers, the subset that is
/// broadcasting, and the display names peers have claimed.
pub type PresenceSnapshot = (Vec<String>, Vec<String>, HashMap<String, String>);

/// Tracks who is in a room, who is live, and what they are called.
///
/// The store is the authoritative view; the hub never caches any of it.
/// `remove_peer` evicts from all three sub-structures as one atomic step so
/// readers never observe a half-removed peer.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Drop everything. Called when a hub is created and when it is reaped.
    async fn reset(&self) -> Result<(), StoreError>;

    /// Idempotent insert into the peer set.
    async fn add_peer(&self, id: &str) -> Result<(), StoreError>;

    /// Atomically remove the peer from peers, broadcasting and usernames.
    async fn remove_peer(&self, id: &str) -> Result<(), StoreError>;

    async fn set_broadcast(&self, id: &str, enabled: bool) -> Result<(), StoreError>;

    /// Trims the name; an empty result deletes the entry.
    async fn set_username(&self, id: &str, username: &str) -> Result<(), StoreError>;

    /// Consistent point-in-time snapshot of the triple.
    async fn state(&self) -> Result<PresenceSnapshot, StoreError>;
}
