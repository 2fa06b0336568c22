//! Live resource registry.
//!
//! Tracks the containers owned by this session and the routable links they
//! publish. Appends happen during startup; the cleanup controller drains the
//! container list exactly once. Shared between the pipeline and the interrupt
//! listener, so all access goes through one mutex that is never held across
//! an await.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::domain::Link;

/// Result of registering a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Recorded; cleanup will tear it down
    Accepted,

    /// The registry was already drained; the caller owns teardown
    Closed,
}

#[derive(Debug, Default)]
struct RegistryState {
    containers: Vec<String>,
    links: Vec<Link>,
    drained: bool,
}

/// Session-scoped record of live containers and routable links
#[derive(Debug, Default)]
pub struct LiveRegistry {
    state: Mutex<RegistryState>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a started container. Duplicate ids are ignored.
    pub fn register(&self, container_id: &str) -> Registration {
        let mut state = self.lock();
        if state.drained {
            warn!(container = container_id, "Container started after cleanup");
            return Registration::Closed;
        }
        if !state.containers.iter().any(|id| id == container_id) {
            debug!(container = container_id, "Registered container");
            state.containers.push(container_id.to_string());
        }
        Registration::Accepted
    }

    /// Publish a routable link. Duplicate links are ignored.
    pub fn add_link(&self, link: Link) {
        let mut state = self.lock();
        if !state.links.contains(&link) {
            debug!(%link, "Published link");
            state.links.push(link);
        }
    }

    /// Registered containers, in start order
    pub fn containers(&self) -> Vec<String> {
        self.lock().containers.clone()
    }

    /// Published links, in start order
    pub fn links(&self) -> Vec<Link> {
        self.lock().links.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every registered container and close the registry.
    ///
    /// Returns an empty list on every call after the first.
    pub fn drain(&self) -> Vec<String> {
        let mut state = self.lock();
        state.drained = true;
        std::mem::take(&mut state.containers)
    }

    pub fn is_drained(&self) -> bool {
        self.lock().drained
    }
}
