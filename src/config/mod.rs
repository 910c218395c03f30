//! Application configuration.
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`~/.config/feedreader/config.toml`)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Version info, surfaced by `feedreader config --show`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Which embedding provider to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderKind {
    None,
    Http,
}

/// Which reranker provider to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerankerKind {
    None,
    Http,
}

/// Application configuration, resolved from env/file/defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// Directory the JSONL event log is written to.
    pub log_dir: PathBuf,
    /// `tracing` level filter, e.g. "info", "debug".
    pub log_level: String,
    /// Event ring buffer capacity.
    pub ring_capacity: usize,
    pub embedder: EmbedderKind,
    pub embedder_base_url: Option<String>,
    pub embedder_api_key: Option<String>,
    pub embedder_model: Option<String>,
    pub reranker: RerankerKind,
    pub reranker_base_url: Option<String>,
    pub reranker_api_key: Option<String>,
    pub reranker_model: Option<String>,
    /// Default number of items fetched for the background search pool.
    pub default_search_limit: usize,
    /// Default viewport height assumed before the terminal reports a size.
    pub default_viewport_height: usize,
    /// Per-message verbose tracing; default off.
    pub verbose_tracing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            log_level: "info".to_string(),
            ring_capacity: crate::logging::DEFAULT_RING_CAPACITY,
            embedder: EmbedderKind::None,
            embedder_base_url: None,
            embedder_api_key: None,
            embedder_model: None,
            reranker: RerankerKind::None,
            reranker_base_url: None,
            reranker_api_key: None,
            reranker_model: None,
            default_search_limit: 500,
            default_viewport_height: 20,
            verbose_tracing: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedreader")
        .join("feedreader.db")
}

fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedreader")
        .join("logs")
}

/// Config file structure — the subset of `Config` that makes sense to
/// persist to TOML. Secrets (API keys) are read from environment variables
/// only, never written to disk.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub db_path: Option<String>,
    pub log_dir: Option<String>,
    pub log_level: Option<String>,
    pub ring_capacity: Option<usize>,
    pub embedder: Option<String>,
    pub embedder_base_url: Option<String>,
    pub embedder_model: Option<String>,
    pub reranker: Option<String>,
    pub reranker_base_url: Option<String>,
    pub reranker_model: Option<String>,
    pub default_search_limit: Option<usize>,
    pub default_viewport_height: Option<usize>,
    pub verbose_tracing: Option<bool>,
}

impl Config {
    /// `~/.config/feedreader/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("feedreader").join("config.toml"))
    }

    /// Write a default config file if one doesn't already exist, so users
    /// can discover the available options. Failures are silent — config is
    /// optional.
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Load the file config if present.
    ///
    /// # Panics (process exit)
    /// If the file exists but fails to parse, prints a clear error and
    /// exits — a broken config should fail fast, not silently fall back to
    /// defaults while the user debugs the wrong thing.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("config error: failed to parse {}: {e}", path.display());
                eprintln!("fix the file or delete it to regenerate defaults");
                std::process::exit(1);
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("config error: cannot read {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    /// Resolve configuration: env > file > defaults.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let db_path = std::env::var("FEEDREADER_DB_PATH")
            .ok()
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let log_dir = std::env::var("FEEDREADER_LOG_DIR")
            .ok()
            .or(file.log_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir);

        let log_level = std::env::var("FEEDREADER_LOG_LEVEL")
            .ok()
            .or(file.log_level)
            .unwrap_or(defaults.log_level);

        let ring_capacity = std::env::var("FEEDREADER_RING_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.ring_capacity)
            .unwrap_or(defaults.ring_capacity);

        let embedder_kind = std::env::var("FEEDREADER_EMBEDDER")
            .ok()
            .or(file.embedder)
            .unwrap_or_else(|| "none".to_string());
        let embedder = match embedder_kind.as_str() {
            "http" => EmbedderKind::Http,
            _ => EmbedderKind::None,
        };
        let embedder_base_url = std::env::var("FEEDREADER_EMBEDDER_URL").ok().or(file.embedder_base_url);
        let embedder_api_key = std::env::var("FEEDREADER_EMBEDDER_API_KEY").ok();
        let embedder_model = std::env::var("FEEDREADER_EMBEDDER_MODEL").ok().or(file.embedder_model);

        let reranker_kind = std::env::var("FEEDREADER_RERANKER")
            .ok()
            .or(file.reranker)
            .unwrap_or_else(|| "none".to_string());
        let reranker = match reranker_kind.as_str() {
            "http" => RerankerKind::Http,
            _ => RerankerKind::None,
        };
        let reranker_base_url = std::env::var("FEEDREADER_RERANKER_URL").ok().or(file.reranker_base_url);
        let reranker_api_key = std::env::var("FEEDREADER_RERANKER_API_KEY").ok();
        let reranker_model = std::env::var("FEEDREADER_RERANKER_MODEL").ok().or(file.reranker_model);

        let default_search_limit = std::env::var("FEEDREADER_SEARCH_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.default_search_limit)
            .unwrap_or(defaults.default_search_limit);

        let default_viewport_height = file.default_viewport_height.unwrap_or(defaults.default_viewport_height);

        let verbose_tracing = std::env::var("FEEDREADER_VERBOSE_TRACE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .ok()
            .or(file.verbose_tracing)
            .unwrap_or(defaults.verbose_tracing);

        Self {
            db_path,
            log_dir,
            log_level,
            ring_capacity,
            embedder,
            embedder_base_url,
            embedder_api_key,
            embedder_model,
            reranker,
            reranker_base_url,
            reranker_api_key,
            reranker_model,
            default_search_limit,
            default_viewport_height,
            verbose_tracing,
        }
    }

    /// Render as a TOML template (used both for `ensure_config_exists` and
    /// `config --show`/`--reset`). Never includes API keys — those are
    /// env-var only.
    pub fn to_toml(&self) -> String {
        format!(
            "# feedreader configuration\n\
             db_path = \"{}\"\n\
             log_dir = \"{}\"\n\
             log_level = \"{}\"\n\
             ring_capacity = {}\n\
             embedder = \"{}\"\n\
             reranker = \"{}\"\n\
             default_search_limit = {}\n\
             default_viewport_height = {}\n\
             verbose_tracing = {}\n",
            self.db_path.display(),
            self.log_dir.display(),
            self.log_level,
            self.ring_capacity,
            embedder_kind_str(&self.embedder),
            reranker_kind_str(&self.reranker),
            self.default_search_limit,
            self.default_viewport_height,
            self.verbose_tracing,
        )
    }
}

fn embedder_kind_str(kind: &EmbedderKind) -> &'static str {
    match kind {
        EmbedderKind::None => "none",
        EmbedderKind::Http => "http",
    }
}

fn reranker_kind_str(kind: &RerankerKind) -> &'static str {
    match kind {
        RerankerKind::None => "none",
        RerankerKind::Http => "http",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_none_providers() {
        let config = Config::default();
        assert_eq!(config.embedder, EmbedderKind::None);
        assert_eq!(config.reranker, RerankerKind::None);
    }

    #[test]
    fn to_toml_never_includes_api_keys() {
        let mut config = Config::default();
        config.embedder_api_key = Some("super-secret".to_string());
        config.reranker_api_key = Some("also-secret".to_string());
        let toml = config.to_toml();
        assert!(!toml.contains("super-secret"));
        assert!(!toml.contains("also-secret"));
    }

    #[test]
    fn to_toml_roundtrips_through_file_config() {
        let config = Config::default();
        let toml = config.to_toml();
        let parsed: FileConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.log_level.as_deref(), Some("info"));
        assert_eq!(parsed.default_search_limit, Some(500));
    }
}
