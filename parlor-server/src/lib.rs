pub mod config;
pub mod http;
pub mod hub;
pub mod ice;
pub mod presence;
pub mod rooms;

pub use config::Config;
pub use http::{router, AppState};
pub use hub::{ConnOptions, Hub, HubError, HubManager, HubManagerOptions, HubOptions};
pub use ice::IceSettings;
pub use presence::{MemoryPresence, PresenceStore, RedisPresence, StoreError};
pub use rooms::{MemoryRooms, RedisRooms, Room, RoomError, RoomStore};
