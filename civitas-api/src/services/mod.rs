//! Business services layered over the database modules

pub mod analyzer;
pub mod incidents;
pub mod intake;
pub mod messaging;
pub mod routing;
pub mod storage;

pub use analyzer::{CannedAnalyzer, IncidentAnalyzer};
pub use messaging::{gateway_from_config, DisabledGateway, KapsoGateway, MessagingGateway};
pub use storage::{FsObjectStore, ObjectStore};
