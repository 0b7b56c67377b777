//! Configuration file parser for `config.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`,
//! which still has to pass [`Config::validate`] before handlers are built.
//! Unknown keys are ignored by serde, but we log a warning for each one since
//! they are usually typos.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL under which feeds are published; the feed name is appended.
    pub feed_prefix_url: String,

    /// Base URL under which package artifacts are published.
    pub package_prefix_url: String,

    /// Directory holding local feed working copies and upload temp files.
    pub work_dir: PathBuf,

    /// Feed names to build handlers for at startup.
    pub feeds: Vec<String>,

    /// File extension of stored package artifacts.
    pub artifact_extension: String,

    /// Upper bound on a package fetched by URL.
    pub max_package_bytes: u64,

    pub probe_timeout_secs: u64,

    /// How many liveness probes may run at once while filtering one entry.
    pub probe_concurrency: usize,

    pub fetch_timeout_secs: u64,

    /// Permit remote fetches from localhost and private networks.
    pub allow_private_sources: bool,

    pub storage: StorageConfig,

    pub inspector: InspectorConfig,

    pub notify: NotifyConfig,

    /// Package name → extra artifact name it is also published under.
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the blob store. When unset the service runs in local-only mode.
    pub blob_root: Option<PathBuf>,

    /// Blob container holding feeds and artifacts.
    pub container: String,

    /// Artifact folder for local-only mode. Defaults to `{work_dir}/packages`.
    pub package_folder: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: None,
            container: "repository".to_string(),
            package_folder: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// External program that inspects a package file and prints its manifest as JSON.
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            program: "pkg-inspect".to_string(),
            args: Vec::new(),
            timeout_secs: 120,
        }
    }
}

/// SEC-015: Custom Debug impl masks `token` to prevent secret leakage.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub token: Option<String>,
    /// Maximum length of one announcement.
    pub max_len: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: None,
            max_len: 138,
        }
    }
}

impl std::fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("webhook_url", &self.webhook_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_prefix_url: String::new(),
            package_prefix_url: String::new(),
            work_dir: std::env::temp_dir().join("repofeed"),
            feeds: vec!["current".to_string(), "archive".to_string()],
            artifact_extension: "msi".to_string(),
            max_package_bytes: 512 * 1024 * 1024,
            probe_timeout_secs: 10,
            probe_concurrency: 8,
            fetch_timeout_secs: 300,
            allow_private_sources: false,
            storage: StorageConfig::default(),
            inspector: InspectorConfig::default(),
            notify: NotifyConfig::default(),
            aliases: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_prefix_url", &self.feed_prefix_url)
            .field("package_prefix_url", &self.package_prefix_url)
            .field("work_dir", &self.work_dir)
            .field("feeds", &self.feeds)
            .field("artifact_extension", &self.artifact_extension)
            .field("max_package_bytes", &self.max_package_bytes)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("probe_concurrency", &self.probe_concurrency)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("allow_private_sources", &self.allow_private_sources)
            .field("storage", &self.storage)
            .field("inspector", &self.inspector)
            .field("notify", &self.notify)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 14] = [
        "feed_prefix_url",
        "package_prefix_url",
        "work_dir",
        "feeds",
        "artifact_extension",
        "max_package_bytes",
        "probe_timeout_secs",
        "probe_concurrency",
        "fetch_timeout_secs",
        "allow_private_sources",
        "storage",
        "inspector",
        "notify",
        "aliases",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = ?config.feeds,
            remote = config.storage.blob_root.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Checks the fields that have no usable default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.feed_prefix()?;
        self.package_prefix()?;

        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("at least one feed must be configured".into()));
        }
        if self.artifact_extension.trim().is_empty() {
            return Err(ConfigError::Invalid("artifact_extension must not be empty".into()));
        }
        if self.probe_concurrency == 0 {
            return Err(ConfigError::Invalid("probe_concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Feed URL prefix, normalized to end with `/` so names join beneath it.
    pub fn feed_prefix(&self) -> Result<Url, ConfigError> {
        slashed_url("feed_prefix_url", &self.feed_prefix_url)
    }

    /// Artifact URL prefix, normalized to end with `/`.
    pub fn package_prefix(&self) -> Result<Url, ConfigError> {
        slashed_url("package_prefix_url", &self.package_prefix_url)
    }

    /// Where artifacts go when no blob store is configured.
    pub fn package_folder(&self) -> PathBuf {
        self.storage
            .package_folder
            .clone()
            .unwrap_or_else(|| self.work_dir.join("packages"))
    }
}

fn slashed_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{key} is required")));
    }
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid(format!("{key} must be an absolute base URL")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feeds, vec!["current", "archive"]);
        assert_eq!(config.artifact_extension, "msi");
        assert_eq!(config.storage.container, "repository");
        assert!(config.storage.blob_root.is_none());
        assert_eq!(config.notify.max_len, 138);
        assert!(!config.allow_private_sources);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.artifact_extension, "msi");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds.len(), 2);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
feed_prefix_url = "https://repo.example.com/feeds"
package_prefix_url = "https://repo.example.com/packages/"
work_dir = "/var/lib/repofeed"
feeds = ["current", "archive", "beta"]
allow_private_sources = true

[storage]
blob_root = "/srv/blobs"
container = "pkgs"

[inspector]
program = "/usr/bin/msi-inspect"
args = ["--json"]
timeout_secs = 30

[notify]
webhook_url = "https://hooks.example.com/announce"
token = "hunter2"

[aliases]
coapp = "coapp.msi"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds, vec!["current", "archive", "beta"]);
        assert_eq!(config.storage.blob_root.as_deref(), Some(Path::new("/srv/blobs")));
        assert_eq!(config.storage.container, "pkgs");
        assert_eq!(config.inspector.args, vec!["--json"]);
        assert_eq!(config.notify.token.as_deref(), Some("hunter2"));
        assert_eq!(config.aliases.get("coapp").map(String::as_str), Some("coapp.msi"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_feed_prefix_gains_trailing_slash() {
        let config = Config {
            feed_prefix_url: "https://repo.example.com/feeds".into(),
            ..Config::default()
        };
        let prefix = config.feed_prefix().unwrap();
        assert_eq!(prefix.as_str(), "https://repo.example.com/feeds/");
        assert_eq!(
            prefix.join("current").unwrap().as_str(),
            "https://repo.example.com/feeds/current"
        );
    }

    #[test]
    fn test_default_config_fails_validation() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("feed_prefix_url"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("artifact_extension = \"nupkg\"\ntotally_fake_key = 1\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.artifact_extension, "nupkg");
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }

    // SEC-015: Debug output masks the webhook token
    #[test]
    fn test_debug_masks_token() {
        let mut config = Config::default();
        config.notify.token = Some("super-secret-token".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
