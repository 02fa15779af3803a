//! Server configuration.
//!
//! Every field has a dotted TOML name and an upper-snake-case environment
//! variable override, following the same pattern the teacher used for its
//! two special-cased secrets (`ATTIC_SERVER_CONFIG_BASE64`,
//! `ATTIC_SERVER_TOKEN_HS256_SECRET_BASE64`), generalized to all fields here.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use derivative::Derivative;
use serde::Deserialize;
use xdg::BaseDirectories;

/// Application prefix in XDG base directories.
const XDG_PREFIX: &str = "bytebin";

/// Environment variable storing the Base64-encoded TOML configuration.
const ENV_CONFIG_BASE64: &str = "BYTEBIN_CONFIG_BASE64";

/// Environment variable prefix for per-field overrides (e.g. `BYTEBIN_PORT`).
const ENV_PREFIX: &str = "BYTEBIN_";

/// Top-level server configuration.
#[derive(Clone, Derivative, Deserialize)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address to listen on.
    #[serde(default = "default_listen_address")]
    pub listen: SocketAddr,

    /// HTTP host aliases under which this server is reachable.
    ///
    /// Used to synthesize an absolute-URL `Location` header for the
    /// PUT-as-POST route. The first entry is preferred.
    #[serde(rename = "host-aliases", default = "Vec::new")]
    pub host_aliases: Vec<String>,

    /// Length of generated keys.
    #[serde(rename = "key-length", default = "default_key_length")]
    pub key_length: usize,

    /// Size of the shared blocking worker pool used for disk/S3/index I/O
    /// and gzip (de)compression.
    #[serde(rename = "worker-pool-size", default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Maximum accepted content length, in megabytes, enforced on the raw
    /// (pre server-side-compression) request body.
    #[serde(rename = "max-content-length-mb", default = "default_max_content_length_mb")]
    pub max_content_length_mb: u64,

    /// Database connection.
    pub database: DatabaseConfig,

    /// Storage backend configuration and routing.
    pub storage: StorageConfig,

    /// In-memory content cache.
    #[serde(default = "Default::default")]
    pub cache: CacheConfig,

    /// Default and per-caller content lifetime.
    #[serde(default = "Default::default")]
    pub expiry: ExpiryConfig,

    /// Rate limiting.
    #[serde(rename = "rate-limits", default = "Default::default")]
    pub rate_limits: RateLimitsConfig,

    /// Trusted-proxy and admin API keys.
    #[serde(default = "Default::default")]
    pub auth: AuthConfig,

    /// Whether `/metrics` is exposed at all.
    #[serde(rename = "metrics-enabled", default = "default_true")]
    pub metrics_enabled: bool,

    /// Housekeeper cadence.
    #[serde(default = "Default::default")]
    pub housekeeper: HousekeeperConfig,

    /// Log-export sink.
    #[serde(default = "Default::default")]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite://data/bytebin.db?mode=rwc`.
    pub url: String,

    /// Whether to enable sending of periodic heartbeat queries.
    #[serde(default = "default_db_heartbeat")]
    pub heartbeat: bool,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Local disk backend (always available as the fallback `Static` leaf).
    pub local: LocalStorageConfig,

    /// Optional S3-compatible backend.
    pub s3: Option<S3StorageConfig>,

    /// Routing rules evaluated top-to-bottom; the first match wins.
    #[serde(default = "Vec::new")]
    pub routing: Vec<RoutingRule>,
}

/// A single backend-selector rule, see `storage::selector`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RoutingRule {
    #[serde(rename = "size-gt")]
    SizeGt { threshold_bytes: u64, backend: String },
    #[serde(rename = "expiry-gt")]
    ExpiryGt { threshold_minutes: i64, backend: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Whether the loading cache is enabled ("cached mode" vs "direct mode").
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Idle expiry, in minutes, applied to cache entries.
    #[serde(rename = "expiry-minutes", default = "default_cache_expiry_minutes")]
    pub expiry_minutes: u64,

    /// Maximum total byte weight held by the cache, in megabytes.
    #[serde(rename = "max-size-mb", default = "default_cache_max_size_mb")]
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry_minutes: default_cache_expiry_minutes(),
            max_size_mb: default_cache_max_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExpiryConfig {
    /// Default lifetime in minutes. Non-positive means "never".
    #[serde(rename = "default-minutes", default)]
    pub default_minutes: i64,

    /// Overrides keyed by user-agent, then checked in this order:
    /// user-agent, origin, host (first match wins).
    #[serde(rename = "user-agent-overrides", default)]
    pub user_agent_overrides: HashMap<String, i64>,

    #[serde(rename = "origin-overrides", default)]
    pub origin_overrides: HashMap<String, i64>,

    #[serde(rename = "host-overrides", default)]
    pub host_overrides: HashMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitRule {
    /// Window length in minutes.
    pub period_minutes: u64,
    /// Maximum allowed actions within the window.
    pub max_actions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsConfig {
    pub post: RateLimitRule,
    pub update: RateLimitRule,
    pub get: RateLimitRule,
    /// Secondary not-found limiter, keyed on the same IP as `get`.
    pub not_found: RateLimitRule,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            post: RateLimitRule { period_minutes: 1, max_actions: 4 },
            update: RateLimitRule { period_minutes: 1, max_actions: 4 },
            get: RateLimitRule { period_minutes: 1, max_actions: 60 },
            not_found: RateLimitRule { period_minutes: 1, max_actions: 20 },
        }
    }
}

#[derive(Clone, Derivative, Deserialize, Default)]
#[derivative(Debug)]
pub struct AuthConfig {
    /// API keys trusted to report a forwarded-for IP for rate limiting.
    #[serde(rename = "trusted-proxy-keys", default)]
    #[derivative(Debug = "ignore")]
    pub trusted_proxy_keys: Vec<String>,

    /// API keys permitted to call `/admin/bulkdelete`.
    #[serde(rename = "admin-keys", default)]
    #[derivative(Debug = "ignore")]
    pub admin_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HousekeeperConfig {
    #[serde(with = "humantime_serde", default = "default_housekeeper_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde", default = "default_housekeeper_warmup")]
    pub warmup: Duration,
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        Self {
            interval: default_housekeeper_interval(),
            warmup: default_housekeeper_warmup(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// URI to POST batched log events to. `None` disables the sink.
    pub sink_uri: Option<String>,

    #[serde(with = "humantime_serde", default = "default_log_flush_period")]
    pub flush_period: Duration,

    /// Whether the tracing-subscriber output is JSON (vs. human-readable).
    #[serde(default)]
    pub json: bool,
}

fn default_listen_address() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_key_length() -> usize {
    7
}

fn default_worker_pool_size() -> usize {
    16
}

fn default_max_content_length_mb() -> u64 {
    10
}

fn default_db_heartbeat() -> bool {
    false
}

fn default_cache_expiry_minutes() -> u64 {
    60
}

fn default_cache_max_size_mb() -> u64 {
    256
}

fn default_housekeeper_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_housekeeper_warmup() -> Duration {
    Duration::from_secs(10)
}

fn default_log_flush_period() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn load_config_from_path(path: &Path) -> Result<Config> {
    tracing::info!("Using configuration file: {:?}", path);

    let config = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&config)?)
}

fn load_config_from_str(s: &str) -> Result<Config> {
    tracing::info!("Using configuration from environment variable");
    Ok(toml::from_str(s)?)
}

/// Loads the configuration in the standard order, then applies any
/// per-field `BYTEBIN_*` environment overrides on top as raw TOML patches.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let mut raw = if let Some(config_path) = config_path {
        let text = std::fs::read_to_string(config_path)?;
        toml::from_str::<toml::Value>(&text)?
    } else if let Ok(config_env) = env::var(ENV_CONFIG_BASE64) {
        let decoded = String::from_utf8(base64::decode(config_env.as_bytes())?)?;
        toml::from_str::<toml::Value>(&decoded)?
    } else {
        let config_path = get_xdg_config_path()?;
        toml::from_str::<toml::Value>(&std::fs::read_to_string(config_path)?)?
    };

    apply_env_overrides(&mut raw);

    Ok(toml::Value::try_into(raw)?)
}

/// Parses a TOML string directly, skipping file/env-base64 discovery.
/// Primarily used in tests.
pub fn load_config_str(s: &str) -> Result<Config> {
    load_config_from_str(s)
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    load_config_from_path(path)
}

/// Applies simple top-level `BYTEBIN_<FIELD>` overrides, e.g. `BYTEBIN_PORT`
/// for `listen`'s port component. Nested fields are not covered by this
/// mechanism; they're expected to come from the TOML document or the
/// base64-encoded full-document override.
fn apply_env_overrides(raw: &mut toml::Value) {
    let Some(table) = raw.as_table_mut() else { return };

    for (key, value) in env::vars() {
        let Some(field) = key.strip_prefix(ENV_PREFIX) else { continue };
        if field.is_empty() || field == "CONFIG_BASE64" {
            continue;
        }
        let field = field.to_lowercase().replace('_', "-");
        if let Ok(parsed) = toml::from_str::<toml::Value>(&value) {
            table.insert(field, parsed);
        } else {
            table.insert(field, toml::Value::String(value));
        }
    }
}

pub fn get_xdg_config_path() -> Result<PathBuf> {
    let xdg_dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    let config_path = xdg_dirs.place_config_file("server.toml")?;

    Ok(config_path)
}

pub fn get_xdg_data_path() -> Result<PathBuf> {
    let xdg_dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    let data_path = xdg_dirs.create_data_directory("")?;

    Ok(data_path)
}
