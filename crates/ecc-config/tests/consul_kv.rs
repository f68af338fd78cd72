//! ---
//! ecc_section: "03-configuration-management"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Runtime key/value configuration for equipment services."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use ecc_config::{ConfigStore, ConfigStoreError, ConsulKvStore, ServiceConfigProvider};
use tokio::net::TcpListener;

type Kv = Arc<Mutex<HashMap<String, String>>>;

async fn read_key(
    State(kv): State<Kv>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !query.contains_key("raw") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let value = kv.lock().unwrap().get(&key).cloned();
    match value {
        Some(value) => (StatusCode::OK, value).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn write_key(State(kv): State<Kv>, Path(key): Path<String>, body: String) -> Response {
    if key.starts_with("locked/") {
        return (StatusCode::OK, "false").into_response();
    }
    kv.lock().unwrap().insert(key, body);
    (StatusCode::OK, "true").into_response()
}

async fn fake_consul() -> (SocketAddr, Kv) {
    let kv: Kv = Arc::new(Mutex::new(HashMap::new()));
    let app = Router::new()
        .route("/v1/kv/*key", get(read_key).put(write_key))
        .with_state(kv.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, kv)
}

#[tokio::test]
async fn reads_and_writes_through_http() {
    let (addr, kv) = fake_consul().await;
    let store = ConsulKvStore::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();

    assert_eq!(store.get("cnc-service/config/display-message").await.unwrap(), None);
    store
        .set("cnc-service/config/display-message", "Hello from Consul")
        .await
        .unwrap();
    assert_eq!(
        kv.lock()
            .unwrap()
            .get("cnc-service/config/display-message")
            .cloned(),
        Some("Hello from Consul".to_owned())
    );
    assert_eq!(
        store
            .get("cnc-service/config/display-message")
            .await
            .unwrap()
            .as_deref(),
        Some("Hello from Consul")
    );
}

#[tokio::test]
async fn rejected_write_is_reported() {
    let (addr, _kv) = fake_consul().await;
    let store = ConsulKvStore::new(&format!("http://{addr}/"), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        store.set("locked/key", "x").await,
        Err(ConfigStoreError::Unavailable(_))
    ));
}

#[tokio::test]
async fn provider_uses_service_namespace_over_http() {
    let (addr, kv) = fake_consul().await;
    kv.lock()
        .unwrap()
        .insert("printer-service/config/polling-interval".into(), "1500".into());
    let store =
        Arc::new(ConsulKvStore::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap());
    let provider = ServiceConfigProvider::new(store, "printer-service");
    assert_eq!(
        provider
            .get_duration_ms("polling-interval", Duration::from_secs(5))
            .await,
        Duration::from_millis(1500)
    );
}

#[tokio::test]
async fn unreachable_consul_degrades_to_defaults() {
    // Bind and drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = Arc::new(
        ConsulKvStore::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap(),
    );
    let provider = ServiceConfigProvider::new(store, "cnc-service");
    assert_eq!(provider.get_or("polling-interval", 5000u64).await, 5000);
}
