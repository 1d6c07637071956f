//! Shared HTTP API building blocks
//!
//! Contains ONLY pure functions and shared types; the axum middleware that
//! wraps them lives in `civitas-api`.

pub mod auth;
pub mod types;

pub use auth::{
    generate_salt, generate_session_token, hash_password, hash_token, sign_webhook,
    verify_password, verify_webhook_signature, AuthPrimitiveError,
};
pub use types::{ErrorBody, ErrorResponse};
