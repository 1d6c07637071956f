//! civitas-api library - municipal incident reporting service
//!
//! Citizens report incidents (photo + location) over HTTP or WhatsApp; each
//! incident is classified, numbered, and routed to the nearest leader, who
//! accepts or rejects it.

use axum::Router;
use chrono::{DateTime, Utc};
use civitas_common::config::TomlConfig;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod auth;
pub mod db;
pub mod error;
pub mod events;
pub mod services;

use events::EventBus;
use services::{
    CannedAnalyzer, DisabledGateway, FsObjectStore, IncidentAnalyzer, MessagingGateway,
    ObjectStore,
};

/// Broadcast capacity of the incident event bus
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<TomlConfig>,
    /// Directory served read-only under `storage.public_base_url`
    pub uploads_dir: PathBuf,
    pub store: Arc<dyn ObjectStore>,
    pub analyzer: Arc<dyn IncidentAnalyzer>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub event_bus: Arc<EventBus>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State with a filesystem store under `uploads_dir`, the canned
    /// analyzer and WhatsApp disabled
    pub fn new(db: SqlitePool, config: TomlConfig, uploads_dir: PathBuf) -> Self {
        let store = FsObjectStore::new(uploads_dir.clone(), config.storage.public_base_url.clone());
        Self {
            db,
            config: Arc::new(config),
            uploads_dir,
            store: Arc::new(store),
            analyzer: Arc::new(CannedAnalyzer::new()),
            gateway: Arc::new(DisabledGateway),
            event_bus: Arc::new(EventBus::new(EVENT_BUS_CAPACITY)),
            startup_time: Utc::now(),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn MessagingGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn IncidentAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }
}

/// Build application router
///
/// Public: health, build info, reference data, registration/login,
/// radicate tracking, the WhatsApp webhook and stored media.
/// Everything else requires a bearer session.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post, put};

    // Protected routes (require authentication)
    let protected = Router::new()
        .route("/api/auth/logout", post(api::auth::logout))
        .route("/api/auth/me", get(api::auth::me))
        .route(
            "/api/users",
            get(api::users::list_users).post(api::users::create_user),
        )
        .route(
            "/api/users/:id",
            get(api::users::get_user)
                .put(api::users::update_user)
                .delete(api::users::deactivate_user),
        )
        .route("/api/users/:id/roles", put(api::users::set_roles))
        .route(
            "/api/organizations",
            get(api::organizations::list_organizations)
                .post(api::organizations::create_organization),
        )
        .route(
            "/api/organizations/:id",
            get(api::organizations::get_organization)
                .put(api::organizations::update_organization)
                .delete(api::organizations::delete_organization),
        )
        .route(
            "/api/leaders",
            get(api::leaders::list_leaders).post(api::leaders::create_leader),
        )
        .route(
            "/api/leaders/:id",
            get(api::leaders::get_leader).put(api::leaders::update_leader),
        )
        .route(
            "/api/incidents",
            get(api::incidents::list_incidents).post(api::incidents::submit_incident),
        )
        .route("/api/incidents/stats", get(api::incidents::incident_stats))
        .route("/api/incidents/:id", get(api::incidents::get_incident))
        .route(
            "/api/incidents/:id/accept",
            post(api::incidents::accept_incident),
        )
        .route(
            "/api/incidents/:id/reject",
            post(api::incidents::reject_incident),
        )
        .route(
            "/api/incidents/:id/resolve",
            post(api::incidents::resolve_incident),
        )
        .route(
            "/api/incidents/:id/reassign",
            post(api::incidents::reassign_incident),
        )
        .route("/api/events", get(api::event_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    // Public routes (no authentication)
    let public = Router::new()
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/api/auth/register", post(api::auth::register))
        .route("/api/auth/login", post(api::auth::login))
        .route(
            "/api/geography/departments",
            get(api::geography::list_departments),
        )
        .route(
            "/api/geography/departments/:code/municipalities",
            get(api::geography::list_municipalities),
        )
        .route(
            "/api/geography/municipalities/:code",
            get(api::geography::get_municipality),
        )
        .route(
            "/api/geography/municipalities/:code/townships",
            get(api::geography::list_townships),
        )
        .route("/api/categories", get(api::categories::list_categories))
        .route(
            "/api/categories/:id/subcategories",
            get(api::categories::list_subcategories),
        )
        .route(
            "/api/incidents/track/:radicate",
            get(api::incidents::track_incident),
        )
        .route("/api/webhooks/whatsapp", post(api::whatsapp_webhook))
        .merge(api::health_routes());

    let media_path = media_mount(&state.config.storage.public_base_url);
    let media = ServeDir::new(&state.uploads_dir);

    Router::new()
        .merge(protected)
        .merge(public)
        .nest_service(&media_path, media)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Mount point for stored media: the path part of the public base URL
fn media_mount(public_base_url: &str) -> String {
    let path = match public_base_url.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/media"),
        None => public_base_url,
    };
    let path = path.trim_end_matches('/');
    if path.is_empty() || !path.starts_with('/') {
        "/media".to_string()
    } else {
        path.to_string()
    }
}
