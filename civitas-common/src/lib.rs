//! # Civitas Common Library
//!
//! Shared code for the Civitas incident-reporting services:
//! - Database initialisation, migrations and reference-data seeding
//! - Domain models (users, incidents, leaders, geography, taxonomy)
//! - Configuration loading and root folder resolution
//! - Identity primitives (password hashing, session tokens, webhook signatures)
//! - Geographic distance, pagination and request validation helpers

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod models;
pub mod pagination;
pub mod time;
pub mod validation;

pub use error::{Error, Result};
pub use geo::Coordinates;
pub use validation::{Validate, ValidationErrors};
