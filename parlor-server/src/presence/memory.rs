use super::{PresenceSnapshot, PresenceStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// In-process presence triple behind a single mutex. One lock acquisition
/// per operation gives the same atomicity the Redis pipeline does, which is
/// what single-process deployments and the test suite use.
#[derive(Default)]
pub struct MemoryPresence {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    peers: BTreeSet<String>,
    broadcasting: BTreeSet<String>,
    usernames: BTreeMap<String, String>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn reset(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        inner.peers.clear();
        inner.broadcasting.clear();
        inner.usernames.clear();
        Ok(())
    }

    async fn add_peer(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        inner.peers.insert(id.to_string());
        Ok(())
    }

    async fn remove_peer(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        inner.peers.remove(id);
        inner.broadcasting.remove(id);
        inner.usernames.remove(id);
        Ok(())
    }

    async fn set_broadcast(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        if enabled {
            inner.broadcasting.insert(id.to_string());
        } else {
            inner.broadcasting.remove(id);
        }
        Ok(())
    }

    async fn set_username(&self, id: &str, username: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        let username = username.trim();
        if username.is_empty() {
            inner.usernames.remove(id);
        } else {
            inner.usernames.insert(id.to_string(), username.to_string());
        }
        Ok(())
    }

    async fn state(&self) -> Result<PresenceSnapshot, StoreError> {
        let inner = self.inner.lock().expect("presence lock poisoned");
        Ok((
            inner.peers.iter().cloned().collect(),
            inner.broadcasting.iter().cloned().collect(),
            inner
                .usernames
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ))
    }
}
