//! Test Helper Utilities
//!
//! Shared setup for civitas-api integration tests: a temp-dir database,
//! a recording WhatsApp gateway, and request helpers around `oneshot`.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use civitas_api::auth::bootstrap_admin;
use civitas_api::services::messaging::{MediaRef, MessagingGateway};
use civitas_api::services::{CannedAnalyzer, IncidentAnalyzer};
use civitas_api::{build_router, AppState};
use civitas_common::config::{RootFolder, TomlConfig};
use civitas_common::db::init_database;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

pub const ADMIN_EMAIL: &str = "admin@civitas.test";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const PASSWORD: &str = "password123";

/// Smallest byte prefix recognised as PNG, base64 encoded
pub const PNG_BASE64: &str = "iVBORw0KGgoAAAAA";
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// Gateway double: records outbound texts, serves PNG bytes for any media
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_to(&self, phone: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _)| to == phone)
            .map(|(_, body)| body)
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_text(&self, to: &str, body: &str) -> civitas_common::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn fetch_media(&self, _media: &MediaRef) -> civitas_common::Result<Vec<u8>> {
        Ok(PNG_BYTES.to_vec())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub gateway: Arc<RecordingGateway>,
    _dir: TempDir,
}

/// Fresh app with a bootstrap admin and deterministic analyzer
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut TomlConfig)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let root = RootFolder::new(dir.path().to_path_buf());
    root.ensure_directories().unwrap();

    let mut config = TomlConfig::default();
    config.auth.admin_email = Some(ADMIN_EMAIL.to_string());
    config.auth.admin_password = Some(ADMIN_PASSWORD.to_string());
    customize(&mut config);

    let pool = init_database(&root.database_path()).await.unwrap();
    bootstrap_admin(&pool, &config.auth).await.unwrap();

    let gateway = Arc::new(RecordingGateway::default());
    let state = AppState::new(pool, config, root.uploads_path())
        .with_gateway(gateway.clone())
        .with_analyzer(Arc::new(CannedAnalyzer::with_seed(7)));

    TestApp {
        router: build_router(state.clone()),
        state,
        gateway,
        _dir: dir,
    }
}

impl TestApp {
    /// Same database and gateway, different analyzer
    pub fn with_analyzer(mut self, analyzer: Arc<dyn IncidentAnalyzer>) -> Self {
        self.state = self.state.with_analyzer(analyzer);
        self.router = build_router(self.state.clone());
        self
    }

    pub fn uploads_dir(&self) -> PathBuf {
        RootFolder::new(self._dir.path().to_path_buf()).uploads_path()
    }

    /// Send a request; returns status and parsed JSON body (Null when empty)
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call("GET", uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call("POST", uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call("PUT", uri, token, Some(body)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .post(
                "/api/auth/login",
                None,
                json!({"email": email, "password": password}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Register a citizen and return (user id, token)
    pub async fn citizen(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/auth/register",
                None,
                json!({"email": email, "full_name": "Ciudadano", "password": PASSWORD}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        let id = body["id"].as_str().unwrap().to_string();
        (id, self.login(email, PASSWORD).await)
    }

    /// Register a user and make them a leader at a point in Medellín
    /// (05 / 05001); returns (leader id, token)
    pub async fn leader(&self, admin: &str, email: &str, lat: f64, lon: f64) -> (String, String) {
        let (user_id, _) = self.citizen(email).await;
        let (status, body) = self
            .post(
                "/api/leaders",
                Some(admin),
                json!({
                    "user_id": user_id,
                    "department_code": "05",
                    "municipality_code": "05001",
                    "latitude": lat,
                    "longitude": lon,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "leader creation failed: {}", body);
        let leader_id = body["id"].as_str().unwrap().to_string();
        (leader_id, self.login(email, PASSWORD).await)
    }

    /// Submit a web incident at a point; returns the incident JSON
    pub async fn submit(&self, token: &str, lat: f64, lon: f64) -> Value {
        let (status, body) = self
            .post(
                "/api/incidents",
                Some(token),
                json!({
                    "description": "Hueco profundo frente al colegio",
                    "latitude": lat,
                    "longitude": lon,
                    "municipality_code": "05001",
                    "image": PNG_BASE64,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "submit failed: {}", body);
        body
    }
}

/// Test helper: Extract JSON body from response (Null when empty)
pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Number of regular files below `dir`
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
