//! HTTP API handlers for civitas-api

pub mod auth;
pub mod buildinfo;
pub mod categories;
pub mod geography;
pub mod health;
pub mod incidents;
pub mod leaders;
pub mod organizations;
pub mod sse;
pub mod users;
pub mod webhooks;

pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use sse::event_stream;
pub use webhooks::whatsapp_webhook;
