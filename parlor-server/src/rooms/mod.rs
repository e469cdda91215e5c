mod memory;
mod redis;

pub use memory::MemoryRooms;
pub use redis::RedisRooms;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use parlor_core::RoomCode;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// How many times `create` re-rolls a code that already exists.
pub(crate) const CREATE_ATTEMPTS: usize = 5;

/// A joinable room record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub code: RoomCode,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    /// Every retry collided with an existing code.
    #[error("failed to generate unique room code")]
    CapacityExhausted,
    #[error("redis error: {0}")]
    Backend(#[from] ::redis::RedisError),
}

/// Creation, lookup and deletion of room records.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create(&self) -> Result<Room, RoomError>;
    async fn get(&self, code: &str) -> Result<Room, RoomError>;
    async fn delete(&self, code: &str) -> Result<(), RoomError>;
}

/// Short copy-friendly room code: 6 random bytes, URL-safe base64 without
/// padding, which yields 8 characters.
pub(crate) fn generate_code() -> RoomCode {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    RoomCode(URL_SAFE_NO_PAD.encode(bytes))
}
