//! Configuration loading and root folder resolution
//!
//! Every setting resolves in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`CIVITAS_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing default config file is not an error: startup continues with
//! defaults and a warning. An explicitly requested file must exist and parse.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ENV_ROOT_FOLDER: &str = "CIVITAS_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "civitas.db";

/// Uploaded objects live under this directory inside the root folder
pub const UPLOADS_DIR: &str = "uploads";

/// Longest accepted session lifetime (one year)
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// Full TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub routing: RoutingConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5780".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing directive when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer session lifetime
    pub session_ttl_hours: i64,
    /// Bootstrap administrator created at startup when absent
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24,
            admin_email: None,
            admin_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// URL prefix under which stored objects are publicly reachable
    pub public_base_url: String,
    pub max_image_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_base_url: "/media".to_string(),
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Leaders farther than this are never auto-assigned; None = unlimited
    pub max_distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub phone_number_id: Option<String>,
    /// HMAC key for `X-Webhook-Signature`; None disables verification
    pub webhook_secret: Option<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.kapso.ai/meta/whatsapp/v22.0".to_string(),
            api_key: None,
            phone_number_id: None,
            webhook_secret: None,
        }
    }
}

impl WhatsAppConfig {
    /// Outbound messaging needs both an API key and a sender number
    pub fn is_configured(&self) -> bool {
        non_blank(&self.api_key).is_some() && non_blank(&self.phone_number_id).is_some()
    }
}

impl TomlConfig {
    /// Overlay `CIVITAS_*` environment variables onto file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_value("CIVITAS_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env_value("CIVITAS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_value("CIVITAS_SESSION_TTL_HOURS") {
            match v.parse() {
                Ok(hours) => self.auth.session_ttl_hours = hours,
                Err(_) => warn!("Ignoring non-numeric CIVITAS_SESSION_TTL_HOURS={}", v),
            }
        }
        if let Some(v) = env_value("CIVITAS_ADMIN_EMAIL") {
            self.auth.admin_email = Some(v);
        }
        if let Some(v) = env_value("CIVITAS_ADMIN_PASSWORD") {
            self.auth.admin_password = Some(v);
        }
        if let Some(v) = env_value("CIVITAS_PUBLIC_BASE_URL") {
            self.storage.public_base_url = v;
        }
        if let Some(v) = env_value("CIVITAS_MAX_DISTANCE_KM") {
            match v.parse() {
                Ok(km) => self.routing.max_distance_km = Some(km),
                Err(_) => warn!("Ignoring non-numeric CIVITAS_MAX_DISTANCE_KM={}", v),
            }
        }
        if let Some(v) = env_value("CIVITAS_WHATSAPP_API_URL") {
            self.whatsapp.api_base_url = v;
        }
        if let Some(v) = env_value("CIVITAS_WHATSAPP_API_KEY") {
            self.whatsapp.api_key = Some(v);
        }
        if let Some(v) = env_value("CIVITAS_WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = Some(v);
        }
        if let Some(v) = env_value("CIVITAS_WEBHOOK_SECRET") {
            self.whatsapp.webhook_secret = Some(v);
        }
    }

    /// Reject values that would only fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.auth.session_ttl_hours) {
            return Err(Error::Config(format!(
                "auth.session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            )));
        }
        if self.storage.max_image_bytes == 0 {
            return Err(Error::Config("storage.max_image_bytes must be positive".to_string()));
        }
        if let Some(km) = self.routing.max_distance_km {
            if !km.is_finite() || km <= 0.0 {
                return Err(Error::Config(
                    "routing.max_distance_km must be a positive number".to_string(),
                ));
            }
        }
        if self.auth.admin_email.is_some() != self.auth.admin_password.is_some() {
            return Err(Error::Config(
                "auth.admin_email and auth.admin_password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load the TOML config
///
/// - `explicit`: path given on the command line / env; must exist.
/// - otherwise the platform default path is tried and silently skipped when absent.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) => path,
            None => {
                warn!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Default config file location, if one exists
///
/// Linux tries `~/.config/civitas/config.toml` then `/etc/civitas/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("civitas").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/civitas/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the root folder (CLI → env → TOML → OS default)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Some(path) = env_value(ENV_ROOT_FOLDER) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("civitas"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/civitas"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("civitas"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/civitas"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("civitas"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\civitas"))
    } else {
        PathBuf::from("./civitas_data")
    }
}

/// Paths derived from the resolved root folder
#[derive(Debug, Clone)]
pub struct RootFolder {
    root: PathBuf,
}

impl RootFolder {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root and uploads directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.uploads_path())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, "127.0.0.1:5780");
        assert_eq!(config.storage.public_base_url, "/media");
        assert!(config.routing.max_distance_km.is_none());
        assert!(!config.whatsapp.is_configured());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [routing]
            max_distance_km = 25.0

            [whatsapp]
            api_key = "k"
            phone_number_id = "123"
            "#,
        )
        .unwrap();
        assert_eq!(config.routing.max_distance_km, Some(25.0));
        assert_eq!(config.auth.session_ttl_hours, 24);
        assert!(config.whatsapp.is_configured());
    }

    #[test]
    fn test_admin_credentials_must_pair() {
        let mut config = TomlConfig::default();
        config.auth.admin_email = Some("admin@civitas.co".to_string());
        assert!(config.validate().is_err());
        config.auth.admin_password = Some("changeme123".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_positive_distance_rejected() {
        let mut config = TomlConfig::default();
        config.routing.max_distance_km = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_ttl_bounded() {
        let mut config = TomlConfig::default();
        config.auth.session_ttl_hours = 0;
        assert!(config.validate().is_err());

        config.auth.session_ttl_hours = MAX_SESSION_TTL_HOURS;
        assert!(config.validate().is_ok());

        config.auth.session_ttl_hours = i64::MAX / 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_whatsapp_key_is_unconfigured() {
        let mut config = WhatsAppConfig::default();
        config.api_key = Some("  ".to_string());
        config.phone_number_id = Some("123".to_string());
        assert!(!config.is_configured());
    }

    #[test]
    fn test_root_folder_paths() {
        let root = RootFolder::new(PathBuf::from("/tmp/civitas-test"));
        assert_eq!(root.database_path(), PathBuf::from("/tmp/civitas-test/civitas.db"));
        assert_eq!(root.uploads_path(), PathBuf::from("/tmp/civitas-test/uploads"));
    }
}
