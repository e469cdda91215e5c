use super::hub::{Hub, HubOptions};
use crate::presence::PresenceStore;
use crate::rooms::{RoomError, RoomStore};
use parlor_core::{IceMode, IceServer, RoomCode};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long an empty hub lingers before it and its room are reaped. Long
/// enough to absorb a full-page reload without losing the room.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(30);

pub type PresenceFactory = Box<dyn Fn(&RoomCode) -> Arc<dyn PresenceStore> + Send + Sync>;

pub struct HubManagerOptions {
    pub rooms: Arc<dyn RoomStore>,
    /// Builds the per-room presence store, scoped by room code.
    pub presence: PresenceFactory,
    pub ice_servers: Vec<IceServer>,
    pub ice_mode: IceMode,
    pub idle_grace: Duration,
}

struct HubEntry {
    hub: Arc<Hub>,
    presence: Arc<dyn PresenceStore>,
    idle_timer: Option<JoinHandle<()>>,
}

/// Multiplexes room codes onto live hubs: lazy creation, reuse, and
/// deferred teardown of rooms that stayed empty past the grace period.
pub struct HubManager {
    inner: Mutex<HashMap<RoomCode, HubEntry>>,
    rooms: Arc<dyn RoomStore>,
    presence_factory: PresenceFactory,
    ice_servers: Vec<IceServer>,
    ice_mode: IceMode,
    idle_grace: Duration,
}

impl HubManager {
    pub fn new(opts: HubManagerOptions) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            rooms: opts.rooms,
            presence_factory: opts.presence,
            ice_servers: opts.ice_servers,
            ice_mode: opts.ice_mode,
            idle_grace: opts.idle_grace,
        })
    }

    /// Returns the hub for `code`, creating it on first use. Reuse disarms
    /// any pending idle timer so a rejoin never races the cleanup.
    pub async fn hub_for_room(self: &Arc<Self>, code: &RoomCode) -> Arc<Hub> {
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.get_mut(code) {
            if let Some(timer) = entry.idle_timer.take() {
                debug!(room = %code, "rejoin cancelled idle cleanup");
                timer.abort();
            }
            return entry.hub.clone();
        }

        info!(room = %code, "creating hub");
        let presence = (self.presence_factory)(code);
        // Discard whatever a previous process run left behind for this room.
        if let Err(err) = presence.reset().await {
            warn!(room = %code, error = %err, "presence reset failed");
        }

        let manager = Arc::downgrade(self);
        let room = code.clone();
        let hub = Arc::new(Hub::new(
            presence.clone(),
            HubOptions {
                ice_servers: self.ice_servers.clone(),
                ice_mode: self.ice_mode,
                on_empty: Some(Box::new(move || {
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    let room = room.clone();
                    tokio::spawn(async move {
                        manager.schedule_cleanup(room).await;
                    });
                })),
            },
        ));

        inner.insert(
            code.clone(),
            HubEntry {
                hub: hub.clone(),
                presence,
                idle_timer: None,
            },
        );
        hub
    }

    /// Arms the one-shot idle timer for `code` unless one is already armed.
    async fn schedule_cleanup(self: &Arc<Self>, code: RoomCode) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.get_mut(&code) else {
            return;
        };
        if entry.idle_timer.is_some() {
            return;
        }

        debug!(room = %code, grace = ?self.idle_grace, "hub empty, arming idle cleanup");
        let manager = Arc::downgrade(self);
        let grace = self.idle_grace;
        entry.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(manager) = manager.upgrade() {
                manager.cleanup_if_idle(&code).await;
            }
        }));
    }

    /// Timer body: re-checks emptiness through the store under the manager
    /// lock, and only then tears the hub and its room record down.
    async fn cleanup_if_idle(self: &Arc<Self>, code: &RoomCode) {
        let entry = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.get_mut(code) else {
                return;
            };

            match entry.presence.state().await {
                Ok((peers, _, _)) if !peers.is_empty() => {
                    debug!(room = %code, "room repopulated, skipping cleanup");
                    entry.idle_timer = None;
                    return;
                }
                Err(err) => {
                    // Can't prove the room is empty; keep it.
                    warn!(room = %code, error = %err, "idle check failed");
                    entry.idle_timer = None;
                    return;
                }
                Ok(_) => {}
            }

            inner.remove(code).expect("entry checked above")
        };

        info!(room = %code, "reaping idle room");
        if let Err(err) = entry.presence.reset().await {
            warn!(room = %code, error = %err, "presence reset failed");
        }
        match self.rooms.delete(code.as_str()).await {
            Ok(()) | Err(RoomError::NotFound) => {}
            Err(err) => warn!(room = %code, error = %err, "room delete failed"),
        }
    }

    #[cfg(test)]
    async fn has_hub(&self, code: &RoomCode) -> bool {
        self.inner.lock().await.contains_key(code)
    }
}
