//! Repository functions over the shared SQLite pool
//!
//! Schema creation, migrations and seeding live in `civitas_common::db`;
//! this module holds the queries the service issues at runtime.

pub mod incidents;
pub mod leaders;
pub mod organizations;
pub mod reference;
pub mod sessions;
pub mod users;
pub mod whatsapp;
