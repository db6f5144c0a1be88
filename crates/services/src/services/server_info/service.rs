use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::services::registry::{FetchRequest, ProfileId, Registry};

use super::client::ServerInfoClient;

/// Drains the registry's fetch queue.
///
/// Keeps at most one live request per profile id (a new request supersedes an
/// outstanding one for the same id) and folds completed responses back
/// through the registry's serialized mutation path, so a fetch that lands
/// after its profile was deleted is discarded instead of crashing.
pub struct ServerInfoService {
    worker: JoinHandle<()>,
}

impl ServerInfoService {
    pub fn spawn(registry: Arc<Registry>, requests: mpsc::UnboundedReceiver<FetchRequest>) -> Self {
        Self::spawn_with_client(registry, requests, ServerInfoClient::new())
    }

    pub(crate) fn spawn_with_client(
        registry: Arc<Registry>,
        mut requests: mpsc::UnboundedReceiver<FetchRequest>,
        client: ServerInfoClient,
    ) -> Self {
        let worker = tokio::spawn(async move {
            let mut in_flight: HashMap<ProfileId, JoinHandle<()>> = HashMap::new();
            while let Some(request) = requests.recv().await {
                in_flight.retain(|_, task| !task.is_finished());
                if let Some(previous) = in_flight.remove(&request.id) {
                    tracing::debug!("superseding in-flight info fetch for profile {}", request.id);
                    previous.abort();
                }

                let registry = Arc::clone(&registry);
                let client = client.clone();
                let task = tokio::spawn(async move {
                    match client.fetch_info(&request.url).await {
                        Ok(info) => {
                            registry
                                .apply_server_info(request.id, info.motd, info.icon)
                                .await;
                        }
                        Err(err) => {
                            tracing::warn!("failed to load info for {}: {err:#}", request.url);
                        }
                    }
                });
                in_flight.insert(request.id, task);
            }

            for task in in_flight.into_values() {
                task.abort();
            }
        });
        Self { worker }
    }

    /// Stop the worker and abandon any in-flight fetches.
    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for ServerInfoService {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
