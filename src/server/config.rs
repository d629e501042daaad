//! Configuration loading for heimdalld.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag or `HEIMDALL_CONFIG`)
//! 2. `~/.heimdall/config.toml` (user)
//! 3. `/etc/heimdall/config.toml` (system)
//!
//! The signing secret is loaded separately with mandatory permission checks:
//! 1. `~/.heimdall/secrets.toml` (user, must be 0600)
//! 2. `/etc/heimdall/secrets.toml` (system, must be 0600)
//! 3. `HEIMDALL_SIGNING_SECRET` environment variable

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AllowedSources, BackendAuth, FixedRole, SignedAssertion, WebhookAuth};
use crate::cache::StoreConfig;
use crate::cache::ttl::MIN_TTL_SECS;
use crate::gateway::{Gateway, Heimdall};
use crate::{HeimdallError, Result};

/// Environment variable consulted when no secrets file provides a signing secret.
pub const SIGNING_SECRET_ENV: &str = "HEIMDALL_SIGNING_SECRET";

const CONFIG_FILE: &str = "config.toml";
const SECRETS_FILE: &str = "secrets.toml";
const SYSTEM_DIR: &str = "/etc/heimdall";

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8787).
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8787".to_string()
}

/// GraphQL backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub endpoint: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

/// Cache behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL floor in seconds (default: 8).
    #[serde(default = "default_ttl")]
    pub min_ttl_secs: u64,
    /// TTL when `X-Cache-TTL` is absent or invalid (default: 8).
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,
    /// Maximum in-memory entries (default: 10,000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Seconds an expired entry is retained so it reports as EXPIRED (default: 300).
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Coalesce concurrent misses per key (default: true).
    #[serde(default = "default_true")]
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_ttl_secs: default_ttl(),
            default_ttl_secs: default_ttl(),
            max_entries: default_max_entries(),
            retention_secs: default_retention(),
            single_flight: true,
        }
    }
}

fn default_ttl() -> u64 {
    MIN_TTL_SECS
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_retention() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// How forwarded requests authenticate to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Backend calls `/auth`.
    #[default]
    Webhook,
    /// Gateway mints a signed assertion per request.
    Signed,
}

/// Webhook and backend authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Exact addresses allowed to call `/auth`.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// CIDR block (or single address) allowed to call `/auth`.
    #[serde(default)]
    pub network: Option<String>,
    /// Role granted to allowed callers (default: "user").
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub mode: AuthMode,
    /// Lifetime of minted assertions in seconds (default: 60).
    #[serde(default = "default_assertion_ttl")]
    pub assertion_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            network: None,
            role: default_role(),
            mode: AuthMode::default(),
            assertion_ttl_secs: default_assertion_ttl(),
        }
    }
}

fn default_role() -> String {
    crate::auth::DEFAULT_ROLE.to_string()
}

fn default_assertion_ttl() -> u64 {
    60
}

/// Secrets configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub signing_secret: Option<String>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.heimdall/config.toml`
    /// 3. `/etc/heimdall/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Load configuration from one file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HeimdallError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        find_in_standard_dirs(CONFIG_FILE).ok_or_else(|| {
            HeimdallError::Configuration(
                "No config file found. Create ~/.heimdall/config.toml or /etc/heimdall/config.toml"
                    .to_string(),
            )
        })
    }

    /// Build a [`Gateway`] from this configuration.
    pub fn build_gateway(&self, secrets: &Secrets) -> Result<Gateway> {
        if self.auth.role.trim().is_empty() {
            return Err(HeimdallError::Configuration(
                "auth.role must not be empty".to_string(),
            ));
        }
        let sources =
            AllowedSources::from_config(&self.auth.allowed_ips, self.auth.network.as_deref())?;

        let backend_auth: Arc<dyn BackendAuth> = match self.auth.mode {
            AuthMode::Webhook => Arc::new(WebhookAuth),
            AuthMode::Signed => {
                let secret = secrets.signing_secret().ok_or_else(|| {
                    HeimdallError::Configuration(format!(
                        "auth.mode = \"signed\" needs signing_secret in secrets.toml or {SIGNING_SECRET_ENV}"
                    ))
                })?;
                Arc::new(
                    SignedAssertion::new(secret, self.auth.role.clone())?
                        .lifetime(Duration::from_secs(self.auth.assertion_ttl_secs)),
                )
            }
        };

        Heimdall::builder()
            .endpoint(&self.backend.endpoint)
            .timeout(Duration::from_secs(self.backend.timeout_secs))
            .min_ttl(self.cache.min_ttl_secs)
            .default_ttl(self.cache.default_ttl_secs)
            .store_config(
                StoreConfig::new()
                    .max_entries(self.cache.max_entries)
                    .retention(Duration::from_secs(self.cache.retention_secs)),
            )
            .single_flight(self.cache.single_flight)
            .allowed_sources(sources)
            .role_resolver(Arc::new(FixedRole::new(self.auth.role.clone())))
            .backend_auth(backend_auth)
            .build()
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.heimdall/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/heimdall/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (the env var may still apply).
    pub fn load() -> Result<Self> {
        match find_in_standard_dirs(SECRETS_FILE) {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Secrets::default()),
        }
    }

    /// Load one secrets file, enforcing its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(HeimdallError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        // Permission check not available on non-Unix platforms
        Ok(())
    }

    /// Signing secret from the file, falling back to the environment.
    pub fn signing_secret(&self) -> Option<String> {
        self.signing_secret
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var(SIGNING_SECRET_ENV).ok().filter(|s| !s.is_empty()))
    }
}

/// Search directories in resolution order: user, then system.
fn standard_dirs() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".heimdall"))
        .into_iter()
        .chain([PathBuf::from(SYSTEM_DIR)])
        .collect()
}

/// First `file_name` that exists under `search`.
fn find_in_dirs(search: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    search
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|path| path.exists())
}

fn find_in_standard_dirs(file_name: &str) -> Option<PathBuf> {
    find_in_dirs(&standard_dirs(), file_name)
}
