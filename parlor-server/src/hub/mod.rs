mod hub;
mod manager;

pub use hub::{ConnOptions, Hub, HubError, HubOptions, OnEmpty, READ_LIMIT};
pub use manager::{HubManager, HubManagerOptions, PresenceFactory, DEFAULT_IDLE_GRACE};
