//! Database schema, migrations and reference data

pub mod init;
pub mod migrations;
pub mod seed;

pub use init::{create_tables, init_database, init_memory_database};
pub use migrations::{get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};
pub use seed::seed_reference_data;
