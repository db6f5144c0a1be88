//! Composition root wiring the registry and the info fetcher together.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::services::registry::{Registry, RegistryEvent};
use crate::services::save_redirect::SaveRedirect;
use crate::services::server_api::ServerApi;
use crate::services::server_info::ServerInfoService;
use crate::services::settings::SettingsStore;

/// One explicitly constructed switcher instance, passed around by handle.
///
/// Replaces the host-global singletons: the fetch-request channel is created
/// first, its sender handed to the registry and its receiver to the fetch
/// worker, so the registry can ask for fetches without owning the fetcher.
pub struct Switcher {
    registry: Arc<Registry>,
    info: ServerInfoService,
}

impl Switcher {
    pub async fn start(
        storage_root: PathBuf,
        settings: Arc<dyn SettingsStore>,
        server_api: Arc<dyn ServerApi>,
        redirect: Arc<dyn SaveRedirect>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let registry = Registry::new(storage_root, settings, server_api, redirect, fetch_tx);
        Arc::clone(&registry).init().await;
        let info = ServerInfoService::spawn(Arc::clone(&registry), fetch_rx);
        Self { registry, info }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Tear down background tasks. Safe to call more than once.
    pub fn shutdown(&self) {
        self.info.shutdown();
        self.registry.shutdown();
    }
}
