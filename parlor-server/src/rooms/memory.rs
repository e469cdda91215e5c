use super::{generate_code, Room, RoomError, RoomStore, CREATE_ATTEMPTS};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process room registry used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRooms {
    rooms: Mutex<HashMap<String, Room>>,
}

impl MemoryRooms {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRooms {
    async fn create(&self) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.lock().expect("rooms lock poisoned");
        for _ in 0..CREATE_ATTEMPTS {
            let code = generate_code();
            if rooms.contains_key(code.as_str()) {
                continue;
            }
            let room = Room {
                code: code.clone(),
                created_at: Utc::now(),
            };
            rooms.insert(code.0, room.clone());
            return Ok(room);
        }
        Err(RoomError::CapacityExhausted)
    }

    async fn get(&self, code: &str) -> Result<Room, RoomError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RoomError::NotFound);
        }
        let rooms = self.rooms.lock().expect("rooms lock poisoned");
        rooms.get(code).cloned().ok_or(RoomError::NotFound)
    }

    async fn delete(&self, code: &str) -> Result<(), RoomError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RoomError::NotFound);
        }
        let mut rooms = self.rooms.lock().expect("rooms lock poisoned");
        rooms.remove(code).map(|_| ()).ok_or(RoomError::NotFound)
    }
}
