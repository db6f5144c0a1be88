use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use gdps_core_utils::paths;

use crate::services::save_redirect::SaveRedirect;
use crate::services::server_api::ServerApi;
use crate::services::settings::{self, SettingsStore};

use super::error::RegistryError;
use super::types::{
    FetchRequest, ProfileIcon, ProfileId, ProfileValidity, RegistryEvent, ServerProfile,
};

/// Saved-value key holding the persisted profile map.
const SERVERS_KEY: &str = "servers";
/// Saved-value key holding the selected profile id.
const CURRENT_KEY: &str = "current";
/// Priority handed to the selection API when registering the active url.
const SELECTION_PRIORITY: i32 = -40;

/// Conservative url shape check: http(s) scheme, dotted host, optional rest.
static URL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[\w-]+(\.[\w-]+)+[\w.,@?^=%&:/~+#-]*$").expect("url pattern compiles")
});

struct RegistryState {
    profiles: BTreeMap<ProfileId, ServerProfile>,
    current: ProfileId,
    issues: Vec<String>,
    armed: bool,
    api_id: Option<i32>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            profiles: BTreeMap::new(),
            current: ProfileId::Base,
            issues: Vec::new(),
            armed: true,
            api_id: None,
        }
    }
}

/// Owns the profile map, the selected profile, and the decision logic for
/// whether save-data redirection is safe to arm.
///
/// All mutations are serialized behind a single lock and re-persisted through
/// the settings store; completed info fetches join back through the same
/// lock, so an in-flight fetch can never race a concurrent delete or modify
/// of the same id.
pub struct Registry {
    state: RwLock<RegistryState>,
    storage_root: PathBuf,
    settings: Arc<dyn SettingsStore>,
    server_api: Arc<dyn ServerApi>,
    redirect: Arc<dyn SaveRedirect>,
    fetch_tx: mpsc::UnboundedSender<FetchRequest>,
    events: broadcast::Sender<RegistryEvent>,
    armed_listener: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    pub fn new(
        storage_root: PathBuf,
        settings: Arc<dyn SettingsStore>,
        server_api: Arc<dyn ServerApi>,
        redirect: Arc<dyn SaveRedirect>,
        fetch_tx: mpsc::UnboundedSender<FetchRequest>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            state: RwLock::new(RegistryState::default()),
            storage_root,
            settings,
            server_api,
            redirect,
            fetch_tx,
            events,
            armed_listener: Mutex::new(None),
        })
    }

    /// Load persisted state and go live.
    ///
    /// Installs the synthetic base entry over whatever was stored for it,
    /// registers the active profile's url with the selection API, and starts
    /// listening to server-change notifications to keep the armed flag
    /// current. Call exactly once, before handing the registry out.
    pub async fn init(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;

            if let Err(err) = fs::create_dir_all(&self.storage_root) {
                let issue = format!(
                    "cannot create storage root {}: {err}",
                    self.storage_root.display()
                );
                tracing::warn!("{issue}");
                state.issues.push(issue);
            }

            let mut profiles = BTreeMap::new();
            if let Some(value) = self.settings.get(SERVERS_KEY) {
                match serde_json::from_value::<BTreeMap<i32, ServerProfile>>(value) {
                    Ok(stored) => {
                        for (raw, mut profile) in stored {
                            let id = match ProfileId::try_from(raw) {
                                Ok(id) => id,
                                Err(err) => {
                                    tracing::warn!("skipping stored profile: {err}");
                                    continue;
                                }
                            };
                            profile.id = id;
                            if profile.save_dir.is_empty() {
                                profile.save_dir = id.to_string();
                            }
                            profiles.insert(id, profile);
                        }
                    }
                    Err(err) => {
                        let issue = format!("stored profile registry could not be decoded: {err}");
                        tracing::warn!("{issue}");
                        state.issues.push(issue);
                    }
                }
            }

            // The base entry always tracks code defaults, never a stale
            // persisted copy.
            let mut base =
                ServerProfile::new(ProfileId::Base, "Built-in Servers", self.server_api.base_url());
            base.save_dir = "..".to_string();
            base.icon = ProfileIcon::Sprite("base-logo.png".to_string());
            base.motd = "The game's built-in servers.".to_string();
            profiles.insert(ProfileId::Base, base);

            let mut current = ProfileId::try_from(settings::get_or(&*self.settings, CURRENT_KEY, -2))
                .unwrap_or(ProfileId::Base);
            if !profiles.contains_key(&current) {
                tracing::warn!("selected profile {current} has no stored entry, falling back to base");
                current = ProfileId::Base;
            }

            state.profiles = profiles;
            state.current = current;

            if let ProfileId::Custom(_) = state.current
                && Self::is_active_state(&state)
                && let Some(profile) = state.profiles.get(&state.current)
            {
                tracing::info!("loading into private server: {}", profile.url);
                let registration = self
                    .server_api
                    .register_server(&profile.url, SELECTION_PRIORITY);
                state.api_id = Some(registration.id);
            }
        }

        let mut changes = self.server_api.subscribe();
        let registry = Arc::clone(&self);
        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let mut state = registry.state.write().await;
                        state.armed = state.api_id == Some(change.api_id);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("missed {skipped} server change notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self
            .armed_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Tear down the change-notification subscription.
    ///
    /// The registry normally lives until process exit; long-running harnesses
    /// call this before dropping it. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(listener) = self
            .armed_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }

    // Queries

    /// Whether save redirection should run at all: no recorded issues and a
    /// non-base profile selected.
    pub async fn is_active(&self) -> bool {
        Self::is_active_state(&*self.state.read().await)
    }

    /// Whether the last server-change notification concerned our own
    /// registration.
    pub async fn is_armed(&self) -> bool {
        self.state.read().await.armed
    }

    pub async fn is_base(&self) -> bool {
        self.state.read().await.current == ProfileId::Base
    }

    /// Whether `url` addresses the built-in servers, tolerating a single
    /// trailing slash on either side.
    pub fn is_base_url(&self, url: &str) -> bool {
        fn trim(url: &str) -> &str {
            url.strip_suffix('/').unwrap_or(url)
        }
        trim(url) == trim(&self.server_api.base_url())
    }

    pub async fn current_id(&self) -> ProfileId {
        self.state.read().await.current
    }

    pub async fn current_profile(&self) -> Result<ServerProfile, RegistryError> {
        let state = self.state.read().await;
        match state.profiles.get(&state.current) {
            Some(profile) => Ok(profile.clone()),
            None => {
                tracing::error!("current profile {} has no registry entry", state.current);
                Err(RegistryError::CurrentMissing(state.current))
            }
        }
    }

    pub async fn exists(&self, id: ProfileId) -> bool {
        self.state.read().await.profiles.contains_key(&id)
    }

    pub async fn profile(&self, id: ProfileId) -> Option<ServerProfile> {
        self.state.read().await.profiles.get(&id).cloned()
    }

    /// Snapshot of the registered profiles, base entry included.
    pub async fn profiles(&self) -> BTreeMap<ProfileId, ServerProfile> {
        self.state.read().await.profiles.clone()
    }

    pub async fn issues(&self) -> Vec<String> {
        self.state.read().await.issues.clone()
    }

    /// Record a startup/consistency warning. Any recorded issue suppresses
    /// the active state until process restart.
    pub async fn register_issue(&self, issue: impl Into<String>) {
        self.state.write().await.issues.push(issue.into());
    }

    /// Check whether a record is safe to persist.
    pub fn validate(profile: &ServerProfile) -> ProfileValidity {
        let mut validity = ProfileValidity::default();
        if profile.name.is_empty() {
            validity.name_empty = true;
        }
        if profile.url.is_empty() {
            validity.url_empty = true;
        } else if !URL_SHAPE.is_match(&profile.url) {
            validity.url_invalid = true;
        }
        validity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // Mutations

    /// Add a new profile.
    ///
    /// An empty save directory defaults to the id's string form. The save
    /// subtree itself is created lazily by the host on first write.
    pub async fn register(&self, mut profile: ServerProfile) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if state.profiles.contains_key(&profile.id) {
            return Err(RegistryError::Conflict(format!(
                "profile registry already contains id {}",
                profile.id
            )));
        }
        if profile.save_dir.is_empty() {
            profile.save_dir = profile.id.to_string();
        }

        tracing::info!("registered profile {} ({})", profile.id, profile.name);
        let id = profile.id;
        state.profiles.insert(id, profile);
        self.request_fetch_locked(&mut state, id);
        self.persist(&state);
        Ok(())
    }

    /// Update a registered profile's name, url and save directory.
    ///
    /// A changed save directory moves the on-disk subtree first; the field
    /// only commits once the move succeeded. Modifying the active profile
    /// re-points the selection API and the host's save redirection.
    pub async fn modify(&self, profile: ServerProfile) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;

        let mut update = profile;
        if update.save_dir.is_empty() {
            update.save_dir = update.id.to_string();
        }

        {
            let Some(stored) = state.profiles.get_mut(&update.id) else {
                return Err(RegistryError::NotFound(update.id));
            };
            if stored.save_dir != update.save_dir {
                self.set_save_dir(stored, &update.save_dir)?;
            }
            stored.name = update.name.clone();
            stored.url = update.url.clone();
            // Force a re-fetch so cached metadata cannot outlive a url change.
            stored.info_loaded = false;
        }

        if state.current == update.id {
            if let Some(api_id) = state.api_id {
                self.server_api.update_server(api_id, &update.url);
            }
            if let Some(stored) = state.profiles.get(&update.id) {
                self.redirect.repoint(stored);
            }
        }

        self.request_fetch_locked(&mut state, update.id);
        self.persist(&state);
        Ok(())
    }

    /// Remove a profile and its save data.
    ///
    /// The active profile cannot be deleted. If removal of the on-disk
    /// subtree fails the registry entry is kept, so the record for data that
    /// still exists on disk is never lost.
    pub async fn delete(&self, id: ProfileId) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let Some(profile) = state.profiles.get(&id) else {
            return Err(RegistryError::NotFound(id));
        };
        if state.current == id {
            return Err(RegistryError::Conflict(format!(
                "profile {id} is currently in use, switch away before deleting it"
            )));
        }

        let save_path = self.storage_root.join(&profile.save_dir);
        match save_path.try_exists() {
            Ok(true) => {
                let canonical = paths::canonical_contained(&self.storage_root, &save_path)
                    .map_err(|err| {
                        RegistryError::Filesystem(format!(
                            "refusing to delete {}: {err}; only save data inside {} is removed \
                             automatically, delete anything else manually",
                            save_path.display(),
                            self.storage_root.display()
                        ))
                    })?;
                tracing::debug!("deleting save data at {}", canonical.display());
                fs::remove_dir_all(&canonical).map_err(|err| {
                    RegistryError::Filesystem(format!(
                        "failed to delete save data for \"{}\": {err}",
                        profile.name
                    ))
                })?;
            }
            Ok(false) => {}
            Err(err) => {
                return Err(RegistryError::Filesystem(format!(
                    "cannot check save directory {}: {err}",
                    save_path.display()
                )));
            }
        }

        state.profiles.remove(&id);
        self.persist(&state);
        Ok(())
    }

    /// Select a profile. No data moves; the host's redirection layer observes
    /// the change on its own.
    pub async fn switch(&self, id: ProfileId) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if !state.profiles.contains_key(&id) {
            return Err(RegistryError::NotFound(id));
        }
        tracing::info!("switching to profile {id}");
        state.current = id;
        self.settings.set(CURRENT_KEY, Value::from(id.as_i32()));
        Ok(())
    }

    /// Serialize the registry to the settings store. Reserved ids are never
    /// written so the synthetic entries are regenerated from code defaults.
    pub async fn save(&self) {
        let state = self.state.read().await;
        self.persist(&state);
    }

    /// Queue a metadata fetch for `id`.
    ///
    /// A profile whose info is already loaded is left alone; reserved
    /// profiles are marked loaded without ever touching the network. The
    /// loaded flag is set before the request is queued, so rapid repeated
    /// calls produce a single outbound request.
    pub async fn request_fetch(&self, id: ProfileId) {
        let mut state = self.state.write().await;
        self.request_fetch_locked(&mut state, id);
    }

    /// Fold a completed metadata fetch back into the registry.
    ///
    /// The profile may have been deleted since the request went out; that is
    /// a harmless no-op, not an error.
    pub(crate) async fn apply_server_info(
        &self,
        id: ProfileId,
        motd: Option<String>,
        icon: Option<String>,
    ) {
        let mut state = self.state.write().await;
        let Some(profile) = state.profiles.get_mut(&id) else {
            tracing::debug!("discarding server info for unregistered profile {id}");
            return;
        };
        profile.motd = motd.unwrap_or_else(|| "No MOTD found.".to_string());
        profile.icon = match icon {
            Some(url) if !url.is_empty() => ProfileIcon::Remote(url),
            _ => ProfileIcon::None,
        };
        let updated = profile.clone();
        self.persist(&state);
        let _ = self.events.send(RegistryEvent::InfoLoaded(updated));
    }

    // Internals

    fn is_active_state(state: &RegistryState) -> bool {
        state.issues.is_empty() && state.current != ProfileId::Base
    }

    fn request_fetch_locked(&self, state: &mut RegistryState, id: ProfileId) {
        let Some(profile) = state.profiles.get_mut(&id) else {
            return;
        };
        if profile.info_loaded {
            return;
        }
        profile.info_loaded = true;
        if id.is_reserved() {
            return;
        }
        let request = FetchRequest {
            id,
            url: profile.url.clone(),
        };
        if self.fetch_tx.send(request).is_err() {
            tracing::warn!("info fetcher is gone, cannot fetch metadata for profile {id}");
        }
    }

    /// Move a profile's save subtree to a new name under the storage root.
    ///
    /// Touches only the filesystem and the in-memory field; the caller owns
    /// persistence. Containment is enforced on both ends of the move.
    fn set_save_dir(
        &self,
        profile: &mut ServerProfile,
        new_dir: &str,
    ) -> Result<(), RegistryError> {
        if new_dir.is_empty() {
            return Err(RegistryError::Validation(
                "save directory name cannot be empty".to_string(),
            ));
        }
        if profile.save_dir == new_dir {
            tracing::warn!(
                "save directory for profile {} already is \"{new_dir}\"",
                profile.id
            );
            return Ok(());
        }

        let target = paths::contained_child(&self.storage_root, new_dir)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        match target.try_exists() {
            Ok(true) => {
                return Err(RegistryError::Conflict(format!(
                    "save directory \"{}\" already exists",
                    target.display()
                )));
            }
            Ok(false) => {}
            Err(err) => {
                return Err(RegistryError::Filesystem(format!(
                    "cannot check save directory {}: {err}",
                    target.display()
                )));
            }
        }

        if paths::ensure_subdir_name(&profile.save_dir).is_ok() {
            let source = self.storage_root.join(&profile.save_dir);
            match source.try_exists() {
                Ok(true) => {
                    fs::rename(&source, &target).map_err(|err| {
                        RegistryError::Filesystem(format!(
                            "failed to move save directory to {}: {err}",
                            target.display()
                        ))
                    })?;
                }
                // Nothing on disk yet; the subtree is created lazily under
                // the new name.
                Ok(false) => {}
                Err(err) => {
                    return Err(RegistryError::Filesystem(format!(
                        "cannot check save directory {}: {err}",
                        source.display()
                    )));
                }
            }
        } else {
            tracing::warn!(
                "save directory \"{}\" of profile {} is not a plain directory name, leaving disk \
                 untouched",
                profile.save_dir,
                profile.id
            );
        }

        profile.save_dir = new_dir.to_string();
        Ok(())
    }

    fn persist(&self, state: &RegistryState) {
        let stored: BTreeMap<i32, &ServerProfile> = state
            .profiles
            .iter()
            .filter(|(id, _)| !id.is_reserved())
            .map(|(id, profile)| (id.as_i32(), profile))
            .collect();
        match serde_json::to_value(&stored) {
            Ok(value) => self.settings.set(SERVERS_KEY, value),
            Err(err) => tracing::error!("cannot serialize profile registry: {err}"),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
