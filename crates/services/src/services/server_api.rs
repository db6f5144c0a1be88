//! Seam for the host's remote-server-selection API.
//!
//! The registry registers the active profile's url here and listens to the
//! change feed to decide whether save redirection is armed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

/// Handle returned when a url is registered with the selection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiRegistration {
    pub id: i32,
}

/// Broadcast whenever the selection API switches to a registered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerChanged {
    pub api_id: i32,
}

pub trait ServerApi: Send + Sync {
    fn register_server(&self, url: &str, priority: i32) -> ApiRegistration;
    fn update_server(&self, api_id: i32, url: &str);
    /// Canonical url of the built-in servers.
    fn base_url(&self) -> String;
    fn subscribe(&self) -> broadcast::Receiver<ServerChanged>;
}

/// Reference implementation backed by a fixed base url.
///
/// Suitable for hosts without a native selection API and for tests; every
/// register/update is announced on the change feed.
pub struct StaticServerApi {
    base_url: String,
    next_id: AtomicI32,
    servers: Mutex<BTreeMap<i32, String>>,
    changes: broadcast::Sender<ServerChanged>,
}

impl StaticServerApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            base_url: base_url.into(),
            next_id: AtomicI32::new(1),
            servers: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    /// Url currently registered under `api_id`, if any.
    pub fn registered_url(&self, api_id: i32) -> Option<String> {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&api_id)
            .cloned()
    }

    /// Announce a server change, as the host would when its selection moves.
    pub fn notify_change(&self, api_id: i32) {
        let _ = self.changes.send(ServerChanged { api_id });
    }
}

impl ServerApi for StaticServerApi {
    fn register_server(&self, url: &str, _priority: i32) -> ApiRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, url.to_string());
        self.notify_change(id);
        ApiRegistration { id }
    }

    fn update_server(&self, api_id: i32, url: &str) {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(api_id, url.to_string());
        self.notify_change(api_id);
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerChanged> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registrations_are_announced() {
        let api = StaticServerApi::new("http://base.test/");
        let mut changes = api.subscribe();

        let registration = api.register_server("http://gdps.test", -40);
        assert_eq!(api.registered_url(registration.id).as_deref(), Some("http://gdps.test"));

        let change = changes.recv().await.expect("change notification");
        assert_eq!(change.api_id, registration.id);

        api.update_server(registration.id, "http://gdps.test/v2");
        assert_eq!(
            api.registered_url(registration.id).as_deref(),
            Some("http://gdps.test/v2")
        );
    }
}
