//! TOML configuration for the store connection and the transform stages.
//!
//! ```toml
//! [store]
//! endpoint = "https://assets.es.example.com:443"
//! api_key_env = "APX_API_KEY"
//!
//! [transform]
//! source_collection = "it_asset"
//! target_collection = "it_asset_transformed"
//! bulk_chunk_size = 500
//! ```
//!
//! Credentials are never read from the file itself, only from the
//! environment variables the file names.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub transform: TransformConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_by_query_timeout_secs")]
    pub by_query_timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_api_key_env() -> String {
    "APX_API_KEY".to_string()
}
fn default_password_env() -> String {
    "APX_PASSWORD".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_by_query_timeout_secs() -> u64 {
    3600
}

/// How [`crate::update`] patches documents in place.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// One update-by-query evaluated by the store.
    Scripted,
    /// Stream the collection and write every document back by id.
    Client,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default = "default_source_collection")]
    pub source_collection: String,
    #[serde(default = "default_target_collection")]
    pub target_collection: String,
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,
    #[serde(default = "default_update_mode")]
    pub update_mode: UpdateMode,
    #[serde(default)]
    pub proceed_on_conflicts: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            source_collection: default_source_collection(),
            target_collection: default_target_collection(),
            bulk_chunk_size: default_bulk_chunk_size(),
            scan_page_size: default_scan_page_size(),
            scroll_keep_alive: default_scroll_keep_alive(),
            update_mode: default_update_mode(),
            proceed_on_conflicts: false,
        }
    }
}

fn default_source_collection() -> String {
    "it_asset".to_string()
}
fn default_target_collection() -> String {
    "it_asset_transformed".to_string()
}
fn default_bulk_chunk_size() -> usize {
    500
}
fn default_scan_page_size() -> usize {
    1000
}
fn default_scroll_keep_alive() -> String {
    "5m".to_string()
}
fn default_update_mode() -> UpdateMode {
    UpdateMode::Scripted
}

/// Maximum page size the store accepts for a single scroll request.
pub const MAX_SCAN_PAGE_SIZE: usize = 10_000;

/// Credentials resolved from the environment at connect time.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    Basic { username: String, password: String },
    None,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(***)"),
            Credentials::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Credentials::None => f.write_str("None"),
        }
    }
}

impl StoreConfig {
    /// Resolve credentials: an API key wins over basic auth.
    pub fn credentials(&self) -> Result<Credentials> {
        if let Ok(key) = std::env::var(&self.api_key_env) {
            if !key.trim().is_empty() {
                return Ok(Credentials::ApiKey(key.trim().to_string()));
            }
        }
        if let Some(username) = &self.username {
            let password = std::env::var(&self.password_env).with_context(|| {
                format!(
                    "store.username is set but {} environment variable is not",
                    self.password_env
                )
            })?;
            return Ok(Credentials::Basic {
                username: username.clone(),
                password,
            });
        }
        Ok(Credentials::None)
    }
}

impl Config {
    /// Build a config for an endpoint with every other setting defaulted.
    pub fn for_endpoint(endpoint: &str) -> Self {
        Self {
            store: StoreConfig {
                endpoint: endpoint.to_string(),
                api_key_env: default_api_key_env(),
                username: None,
                password_env: default_password_env(),
                timeout_secs: default_timeout_secs(),
                by_query_timeout_secs: default_by_query_timeout_secs(),
                accept_invalid_certs: false,
            },
            transform: TransformConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check invariants that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    let endpoint = config.store.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        bail!(
            "store.endpoint must start with http:// or https://, got '{}'",
            config.store.endpoint
        );
    }
    if config.store.timeout_secs == 0 || config.store.by_query_timeout_secs == 0 {
        bail!("store timeouts must be > 0");
    }

    let t = &config.transform;
    if t.source_collection.trim().is_empty() || t.target_collection.trim().is_empty() {
        bail!("transform.source_collection and transform.target_collection must not be empty");
    }
    if t.bulk_chunk_size == 0 {
        bail!("transform.bulk_chunk_size must be > 0");
    }
    if t.scan_page_size == 0 || t.scan_page_size > MAX_SCAN_PAGE_SIZE {
        bail!(
            "transform.scan_page_size must be in 1..={}",
            MAX_SCAN_PAGE_SIZE
        );
    }
    if !is_time_value(&t.scroll_keep_alive) {
        bail!(
            "transform.scroll_keep_alive must look like '30s', '5m' or '1h', got '{}'",
            t.scroll_keep_alive
        );
    }

    Ok(())
}

/// Check the collections a migration reads and writes. Only stages that
/// write into the target need this.
pub fn validate_migration(transform: &TransformConfig) -> Result<()> {
    if transform.source_collection == transform.target_collection {
        bail!(
            "transform.target_collection must differ from the source ('{}')",
            transform.source_collection
        );
    }
    Ok(())
}

fn is_time_value(s: &str) -> bool {
    let Some(unit_at) = s.find(|c: char| !c.is_ascii_digit()) else {
        return false;
    };
    unit_at > 0 && matches!(&s[unit_at..], "ms" | "s" | "m" | "h" | "d")
}
