//! Tests for the server info client and fetch service.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::services::registry::{
    ProfileIcon, ProfileId, Registry, RegistryEvent, ServerProfile,
};
use crate::services::save_redirect::NoopRedirect;
use crate::services::server_api::StaticServerApi;
use crate::services::settings::MemoryStore;

use super::client::ServerInfoClient;
use super::service::ServerInfoService;

struct Harness {
    _root: TempDir,
    registry: Arc<Registry>,
    _service: ServerInfoService,
}

async fn harness() -> Harness {
    let root = TempDir::new().expect("temp storage root");
    let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
    let registry = Registry::new(
        root.path().to_path_buf(),
        Arc::new(MemoryStore::default()),
        Arc::new(StaticServerApi::new("http://base.test/")),
        Arc::new(NoopRedirect),
        fetch_tx,
    );
    Arc::clone(&registry).init().await;
    let service = ServerInfoService::spawn_with_client(
        Arc::clone(&registry),
        fetch_rx,
        ServerInfoClient::new(),
    );
    Harness {
        _root: root,
        registry,
        _service: service,
    }
}

async fn next_event(
    events: &mut broadcast::Receiver<RegistryEvent>,
) -> Option<RegistryEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .ok()
        .and_then(Result::ok)
}

#[test]
fn info_endpoint_inserts_exactly_one_slash() {
    assert_eq!(
        ServerInfoClient::info_endpoint("http://x.test"),
        "http://x.test/switcher/getInfo.php"
    );
    assert_eq!(
        ServerInfoClient::info_endpoint("http://x.test/"),
        "http://x.test/switcher/getInfo.php"
    );
}

#[tokio::test]
async fn fetch_info_decodes_the_payload() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "motd": "Welcome!",
            "icon": "http://x.test/icon.png",
            "mods": {"policy": "open", "modList": ["geode"]}
        })))
        .mount(&mock_server)
        .await;

    let client = ServerInfoClient::new();
    let info = client
        .fetch_info(&mock_server.uri())
        .await
        .expect("info should decode");

    assert_eq!(info.motd.as_deref(), Some("Welcome!"));
    assert_eq!(info.icon.as_deref(), Some("http://x.test/icon.png"));
    let mods = info.mods.expect("mods block");
    assert_eq!(mods.policy.as_deref(), Some("open"));
    assert_eq!(mods.mod_list, ["geode"]);
}

#[tokio::test]
async fn fetch_info_fails_on_http_errors() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
        .mount(&mock_server)
        .await;

    let client = ServerInfoClient::new();
    let result = client.fetch_info(&mock_server.uri()).await;

    let err = result.expect_err("5xx should fail").to_string();
    assert!(err.contains("503"), "error should mention the status, got: {err}");
}

#[tokio::test]
async fn fetch_info_fails_on_garbage_payloads() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&mock_server)
        .await;

    let client = ServerInfoClient::new();
    assert!(client.fetch_info(&mock_server.uri()).await.is_err());
}

#[tokio::test]
async fn service_applies_fetched_info_exactly_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "motd": "Welcome!",
            "icon": "http://x.test/icon.png"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness().await;
    let mut events = h.registry.subscribe();
    let id = ProfileId::Custom(5);

    h.registry
        .register(ServerProfile::new(id, "A", mock_server.uri()))
        .await
        .expect("register");
    // Second request while the first may still be in flight: the loaded flag
    // is already set, so nothing further goes out.
    h.registry.request_fetch(id).await;

    let event = next_event(&mut events).await.expect("info loaded event");
    let RegistryEvent::InfoLoaded(updated) = event;
    assert_eq!(updated.id, id);
    assert_eq!(updated.motd, "Welcome!");
    assert_eq!(
        updated.icon,
        ProfileIcon::Remote("http://x.test/icon.png".to_string())
    );

    let stored = h.registry.profile(id).await.expect("stored profile");
    assert_eq!(stored.motd, "Welcome!");
    assert!(stored.info_loaded);
}

#[tokio::test]
async fn missing_fields_fall_back_to_defaults() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let h = harness().await;
    let mut events = h.registry.subscribe();
    let id = ProfileId::Custom(6);

    h.registry
        .register(ServerProfile::new(id, "A", mock_server.uri()))
        .await
        .expect("register");

    let event = next_event(&mut events).await.expect("info loaded event");
    let RegistryEvent::InfoLoaded(updated) = event;
    assert_eq!(updated.motd, "No MOTD found.");
    assert!(updated.icon.is_none());
}

#[tokio::test]
async fn unparseable_info_leaves_metadata_untouched() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&mock_server)
        .await;

    let h = harness().await;
    let mut events = h.registry.subscribe();
    let id = ProfileId::Custom(7);

    h.registry
        .register(ServerProfile::new(id, "A", mock_server.uri()))
        .await
        .expect("register");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    let stored = h.registry.profile(id).await.expect("stored profile");
    assert_eq!(stored.motd, "");
    assert!(stored.icon.is_none());
}

#[tokio::test]
async fn late_fetch_for_a_deleted_profile_is_discarded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/switcher/getInfo.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"motd": "too late"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&mock_server)
        .await;

    let h = harness().await;
    let mut events = h.registry.subscribe();
    let id = ProfileId::Custom(8);

    h.registry
        .register(ServerProfile::new(id, "A", mock_server.uri()))
        .await
        .expect("register");
    h.registry.delete(id).await.expect("delete");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(h.registry.profile(id).await.is_none());
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}
