//! End-to-end tests of the HTTP client and unseal cycle against an
//! in-process mock Vault server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use unseal_agent::{ApiError, CycleError, CycleOutcome, HttpVaultClient, Unsealer, VaultApi};
use unseal_core::{Configuration, KeyShare, UnsealKey};

/// Shamir-style mock: sealed until `threshold` valid shares arrive.
struct MockVault {
    threshold: usize,
    valid: Vec<&'static str>,
    accepted: Mutex<Vec<String>>,
    received: Mutex<Vec<String>>,
    status_delay: Duration,
}

impl MockVault {
    fn new(threshold: usize, valid: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            threshold,
            valid: valid.to_vec(),
            accepted: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            status_delay: Duration::ZERO,
        })
    }

    fn status_body(&self) -> Value {
        let progress = self.accepted.lock().unwrap().len();
        let sealed = progress < self.threshold;
        let progress = if sealed { progress } else { 0 };
        json!({
            "type": "shamir",
            "initialized": true,
            "sealed": sealed,
            "t": self.threshold,
            "n": self.valid.len(),
            "progress": progress,
            "version": "1.15.2"
        })
    }
}

#[derive(Deserialize)]
struct UnsealBody {
    key: String,
}

async fn seal_status(State(vault): State<Arc<MockVault>>) -> Json<Value> {
    if !vault.status_delay.is_zero() {
        tokio::time::sleep(vault.status_delay).await;
    }
    Json(vault.status_body())
}

async fn unseal(
    State(vault): State<Arc<MockVault>>,
    Json(body): Json<UnsealBody>,
) -> (StatusCode, Json<Value>) {
    vault.received.lock().unwrap().push(body.key.clone());
    if !vault.valid.contains(&body.key.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"errors": ["'key' must be a valid hex or base64 string"]})),
        );
    }
    {
        let mut accepted = vault.accepted.lock().unwrap();
        if !accepted.contains(&body.key) {
            accepted.push(body.key);
        }
    }
    (StatusCode::OK, Json(vault.status_body()))
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_vault(vault: Arc<MockVault>) -> String {
    let router = Router::new()
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/unseal", put(unseal))
        .with_state(vault);
    spawn(router).await
}

fn config(url: &str, keys: &[&str]) -> Configuration {
    Configuration {
        service_url: url.to_string(),
        poll_interval: Duration::from_secs(1),
        unseal_keys: keys
            .iter()
            .enumerate()
            .map(|(i, share)| UnsealKey {
                id: format!("UNSEAL_KEY_{}", i + 1),
                share: KeyShare::new(*share),
            })
            .collect(),
        request_timeout: Duration::from_secs(2),
        debug: false,
    }
}

fn unsealer(url: &str, keys: &[&str]) -> Unsealer<HttpVaultClient> {
    let config = config(url, keys);
    Unsealer::new(HttpVaultClient::from_config(&config), config)
}

#[tokio::test]
async fn seal_status_over_http() {
    let url = spawn_vault(MockVault::new(2, &["k1", "k2", "k3"])).await;
    let client = HttpVaultClient::new(&url, Duration::from_secs(2));

    let status = client.seal_status().await.unwrap();
    assert_eq!(status.sealed, Some(true));
    assert_eq!(status.progress_label().as_deref(), Some("0/2"));
}

#[tokio::test]
async fn submit_key_sends_json_body() {
    let vault = MockVault::new(2, &["k1", "k2"]);
    let url = spawn_vault(vault.clone()).await;
    let client = HttpVaultClient::new(&format!("{url}/"), Duration::from_secs(2));

    let status = client.submit_key(&KeyShare::new("k1")).await.unwrap();
    assert_eq!(status.sealed, Some(true));
    assert_eq!(status.progress, Some(1));
    assert_eq!(*vault.received.lock().unwrap(), ["k1"]);
}

#[tokio::test]
async fn cycle_unseals_with_threshold_keys_only() {
    let vault = MockVault::new(2, &["k1", "k2", "k3"]);
    let url = spawn_vault(vault.clone()).await;
    let unsealer = unsealer(&url, &["k1", "k2", "k3"]);

    let outcome = unsealer.run_cycle().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Unsealed {
            key_id: "UNSEAL_KEY_2".to_string(),
            submitted: 2,
        }
    );
    assert_eq!(*vault.received.lock().unwrap(), ["k1", "k2"]);

    // Next cycle finds it unsealed and submits nothing.
    assert_eq!(unsealer.run_cycle().await.unwrap(), CycleOutcome::AlreadyUnsealed);
    assert_eq!(vault.received.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn too_few_keys_exhausts() {
    let vault = MockVault::new(3, &["k1", "k2", "k3"]);
    let url = spawn_vault(vault.clone()).await;
    let unsealer = unsealer(&url, &["k1", "k2"]);

    let err = unsealer.run_cycle().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(*vault.received.lock().unwrap(), ["k1", "k2"]);
}

#[tokio::test]
async fn rejected_key_is_a_malformed_response() {
    let vault = MockVault::new(2, &["k1", "k2"]);
    let url = spawn_vault(vault.clone()).await;
    let unsealer = unsealer(&url, &["bogus", "k1", "k2"]);

    let err = unsealer.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Malformed(_)), "unexpected error: {err}");
    assert!(!err.is_fatal());
    assert_eq!(*vault.received.lock().unwrap(), ["bogus"]);
}

#[tokio::test]
async fn slow_vault_times_out() {
    let vault = Arc::new(MockVault {
        status_delay: Duration::from_secs(5),
        ..Arc::into_inner(MockVault::new(1, &["k1"])).unwrap()
    });
    let url = spawn_vault(vault).await;
    let client = HttpVaultClient::new(&url, Duration::from_millis(200));

    let err = client.seal_status().await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn non_json_error_page_is_a_status_error() {
    let router = Router::new().route(
        "/v1/sys/seal-status",
        get(|| async { (StatusCode::BAD_GATEWAY, "<html>502 Bad Gateway</html>") }),
    );
    let url = spawn(router).await;
    let client = HttpVaultClient::new(&url, Duration::from_secs(2));

    let err = client.seal_status().await.unwrap_err();
    match err {
        ApiError::Status { status, body, .. } => {
            assert_eq!(status, StatusCode::BAD_GATEWAY);
            assert!(body.contains("502"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_success_is_a_decode_error() {
    let router = Router::new().route("/v1/sys/seal-status", get(|| async { "ok" }));
    let url = spawn(router).await;
    let client = HttpVaultClient::new(&url, Duration::from_secs(2));

    let err = client.seal_status().await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }), "unexpected error: {err}");
}
