//! `stock_sync.toml` loading.
//!
//! The file holds shop credentials, the column mapping, and run toggles.
//! The access token may also come from [`TOKEN_ENV`], which wins over the
//! file so the token does not have to be stored on disk.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use stock_sync_engine::{RunConfigProvider, SyncError, validators};
use stock_sync_models::{
    ColumnMapping, DEFAULT_API_VERSION, ErrorCode, MatchMode, RunConfig, ShopCredentials,
};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "stock_sync.toml";

/// Environment variable holding the admin API access token.
pub const TOKEN_ENV: &str = "STOCK_SYNC_ACCESS_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No access token: set {TOKEN_ENV} or shop.access_token")]
    MissingToken,

    #[error("No source file given and sync.source_path is not set")]
    MissingSource,

    #[error(transparent)]
    Invalid(#[from] SyncError),
}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Parse(_) | Self::MissingSource => ErrorCode::ConfigInvalid,
            Self::MissingToken => ErrorCode::ConfigTokenInvalid,
            Self::Invalid(e) => e.code(),
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(inner) => inner,
            other => Self::config(other.code(), other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShopSection {
    pub url: String,
    pub api_version: Option<String>,
    pub location_id: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub source_path: Option<PathBuf>,
    pub update_prices: bool,
    pub update_inventory: bool,
    pub dry_run: bool,
    pub match_mode: MatchMode,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            source_path: None,
            update_prices: true,
            update_inventory: true,
            dry_run: false,
            match_mode: MatchMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub interval_minutes: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub path: PathBuf,
    pub max_entries: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stock_sync_history.json"),
            max_entries: stock_sync_engine::history::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Contents of `stock_sync.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub shop: ShopSection,
    pub mapping: ColumnMapping,
    pub sync: SyncSection,
    pub schedule: ScheduleSection,
    pub history: HistorySection,
}

impl AppConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Credentials with the token from `env_token` when set, else from the
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the shop URL is invalid or no token is
    /// available.
    pub fn credentials(&self, env_token: Option<String>) -> Result<ShopCredentials, ConfigError> {
        let url = validators::normalize_shop_url(&self.shop.url)?;
        let token = env_token
            .or_else(|| self.shop.access_token.clone())
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        Ok(ShopCredentials::new(&url, &token).with_api_version(
            self.shop
                .api_version
                .as_deref()
                .unwrap_or(DEFAULT_API_VERSION),
        ))
    }

    /// Builds the configuration for one run. `source` overrides
    /// `sync.source_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if credentials or the source path are
    /// missing.
    pub fn run_config(
        &self,
        source: Option<&Path>,
        env_token: Option<String>,
    ) -> Result<RunConfig, ConfigError> {
        let source_path = source
            .map(Path::to_path_buf)
            .or_else(|| self.sync.source_path.clone())
            .ok_or(ConfigError::MissingSource)?;

        Ok(RunConfig {
            source_path,
            mapping: self.mapping.clone(),
            credentials: self.credentials(env_token)?,
            location_id: self
                .shop
                .location_id
                .clone()
                .filter(|id| !id.trim().is_empty()),
            update_prices: self.sync.update_prices,
            update_inventory: self.sync.update_inventory,
            dry_run: self.sync.dry_run,
            match_mode: self.sync.match_mode,
        })
    }
}

/// Reads the token from [`TOKEN_ENV`].
#[must_use]
pub fn env_token() -> Option<String> {
    std::env::var(TOKEN_ENV).ok()
}

/// Re-reads the config file for every scheduled run so edits take effect
/// on the next tick.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RunConfigProvider for FileConfigProvider {
    fn run_config(&self, source_path: &Path) -> Result<RunConfig, SyncError> {
        let config = AppConfig::load(&self.path)?;
        Ok(config.run_config(Some(source_path), env_token())?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    const SAMPLE: &str = r#"
[shop]
url = "my-store.myshopify.com"
location_id = "gid://shopify/Location/123"
access_token = "file-token-123"

[mapping]
sku = "A"
name = "B"
price = "C"
stock = "D"

[sync]
source_path = "exports/products.csv"
update_prices = false
match_mode = "full_chain"

[schedule]
interval_minutes = 15
"#;

    #[test]
    fn parses_full_file() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.mapping, ColumnMapping::new("A", "B", "C", "D"));
        assert!(!config.sync.update_prices);
        assert!(config.sync.update_inventory);
        assert_eq!(config.sync.match_mode, MatchMode::FullChain);
        assert_eq!(config.schedule.interval_minutes, 15);
        assert_eq!(config.history.max_entries, 10);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.sync.update_prices);
        assert_eq!(config.sync.match_mode, MatchMode::SkuOnly);
        assert_eq!(config.schedule.interval_minutes, 60);
    }

    #[test]
    fn env_token_wins_over_file() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        let run = config
            .run_config(None, Some("env-token-456".to_owned()))
            .unwrap();
        assert_eq!(run.credentials.access_token, "env-token-456");
        assert_eq!(run.credentials.shop_url, "https://my-store.myshopify.com");
        assert_eq!(run.credentials.api_version, DEFAULT_API_VERSION);
        assert_eq!(run.source_path, PathBuf::from("exports/products.csv"));

        let run = config.run_config(None, None).unwrap();
        assert_eq!(run.credentials.access_token, "file-token-123");
    }

    #[test]
    fn missing_pieces_are_reported() {
        let mut config = AppConfig::parse(SAMPLE).unwrap();
        config.shop.access_token = None;
        let err = config.run_config(None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigTokenInvalid);

        config.sync.source_path = None;
        let err = config
            .run_config(None, Some("env-token-456".to_owned()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSource));

        config.shop.url = "example.com".to_owned();
        let err = config
            .run_config(Some(Path::new("x.csv")), Some("env-token-456".to_owned()))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigShopUrlInvalid);
    }

    #[test]
    fn provider_reads_the_file_each_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();
        let provider = FileConfigProvider::new(file.path().to_path_buf());

        let run = provider.run_config(Path::new("today.csv")).unwrap();
        assert_eq!(run.source_path, PathBuf::from("today.csv"));
        assert_eq!(run.match_mode, MatchMode::FullChain);

        let missing = FileConfigProvider::new(PathBuf::from("/definitely/not/here.toml"));
        let err = missing.run_config(Path::new("today.csv")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        assert!(err.requires_attention());
    }
}
