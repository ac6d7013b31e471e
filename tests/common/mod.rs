//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dvarapala::auth::{PasswordHasher, TokenManager};
use dvarapala::config::ServerConfig;
use dvarapala::database::SqliteDatabase;
use dvarapala::otel::Metrics;
use dvarapala::server::{AppState, Server};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_PASSWORD: &str = "correct horse battery";

/// Cheap Argon2 parameters so tests stay fast
pub fn test_hasher() -> PasswordHasher {
    PasswordHasher::with_cost(1024, 1).expect("Failed to build test hasher")
}

pub fn test_tokens() -> Arc<TokenManager> {
    Arc::new(
        TokenManager::new(TEST_SECRET, Duration::from_secs(3600))
            .expect("Failed to build token manager"),
    )
}

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Create a test application state
pub async fn create_test_state() -> AppState<SqliteDatabase> {
    AppState::new(
        create_test_database().await,
        test_tokens(),
        test_hasher(),
        Arc::new(Metrics::default()),
    )
}

/// A server running in the background
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Log in and return the bearer token
    pub async fn login(&self, email: &str, password: &str) -> String {
        let response = self
            .client
            .post(self.url("/users/auth"))
            .json(&json!({"email": email, "password": password}))
            .send()
            .await
            .expect("Login request failed");
        assert_eq!(response.status(), 200, "login for {} failed", email);

        let body: Value = response.json().await.expect("Invalid login body");
        body["data"]["token"]
            .as_str()
            .expect("Missing token")
            .to_string()
    }

    /// Create an app with a token minted for an operator subject
    pub async fn seed_app(&self, name: &str) -> i64 {
        let body: Value = self
            .client
            .post(self.url("/apps"))
            .bearer_auth(operator_token())
            .json(&json!({"name": name}))
            .send()
            .await
            .expect("Create app failed")
            .json()
            .await
            .expect("Invalid app body");
        body["data"]["id"].as_i64().expect("Missing app id")
    }

    /// Create a user with [`TEST_PASSWORD`]
    pub async fn seed_user(&self, app_id: i64, email: &str) -> i64 {
        let body: Value = self
            .client
            .post(self.url("/users"))
            .bearer_auth(operator_token())
            .json(&json!({
                "app_id": app_id,
                "firstname": "Test",
                "lastname": "User",
                "email": email,
                "password": TEST_PASSWORD,
            }))
            .send()
            .await
            .expect("Create user failed")
            .json()
            .await
            .expect("Invalid user body");
        body["data"]["id"].as_i64().expect("Missing user id")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Token for a subject that is not a stored user
pub fn operator_token() -> String {
    test_tokens()
        .issue("operator")
        .expect("Failed to issue operator token")
        .token
}

/// Run a test server in the background
pub async fn run_test_server(state: AppState<SqliteDatabase>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        ..Default::default()
    };
    let server = Server::new(config, state);

    tokio::spawn(async move {
        server
            .run_with_listener(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    TestServer {
        addr,
        client: reqwest::Client::new(),
        shutdown: Some(shutdown_tx),
    }
}

/// Start a fresh server on an empty database
pub async fn start() -> TestServer {
    run_test_server(create_test_state().await).await
}
