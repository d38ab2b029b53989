//! Runtime configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use tunesmith_core::{ClientConfig, LifecycleConfig};

/// Every field has a default so the tool works without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the generation service (default: `http://127.0.0.1:5000`).
    pub api_url: String,

    /// SQLite URL (default: `sqlite://tunesmith.db`).
    pub database_url: String,

    /// Where finished generations are downloaded to.
    pub download_dir: PathBuf,

    /// Where edited audio is written.
    pub output_dir: PathBuf,

    /// Root for per-job scratch directories.
    pub scratch_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Optional directory for a daily-rolling log file.
    pub log_dir: Option<PathBuf>,

    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    pub http_timeout: Duration,

    /// Model used when a command does not name one.
    pub default_model: String,
    pub model_namespace: String,

    /// Explicit codec binaries; `None` uses ffmpeg-sidecar's lookup.
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,

    pub proxy: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let download_dir = path_env("TUNESMITH_DOWNLOAD_DIR").unwrap_or_else(default_download_dir);
        Self {
            api_url: env_or("TUNESMITH_API_URL", "http://127.0.0.1:5000"),
            database_url: env_or("TUNESMITH_DATABASE_URL", "sqlite://tunesmith.db"),
            output_dir: path_env("TUNESMITH_OUTPUT_DIR")
                .unwrap_or_else(|| download_dir.join("edits")),
            download_dir,
            scratch_dir: path_env("TUNESMITH_SCRATCH_DIR")
                .unwrap_or_else(|| std::env::temp_dir().join("tunesmith")),
            log_level: env_or("TUNESMITH_LOG", "info"),
            log_json: std::env::var("TUNESMITH_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            log_dir: path_env("TUNESMITH_LOG_DIR"),
            poll_interval: Duration::from_secs(parse_env("TUNESMITH_POLL_INTERVAL_SECS", 5)),
            max_poll_failures: parse_env("TUNESMITH_MAX_POLL_FAILURES", 6),
            http_timeout: Duration::from_secs(parse_env("TUNESMITH_HTTP_TIMEOUT_SECS", 120)),
            default_model: env_or("TUNESMITH_DEFAULT_MODEL", "small"),
            model_namespace: env_or("TUNESMITH_MODEL_NAMESPACE", "facebook/musicgen-"),
            ffmpeg: path_env("TUNESMITH_FFMPEG"),
            ffprobe: path_env("TUNESMITH_FFPROBE"),
            proxy: std::env::var("HTTPS_PROXY")
                .or_else(|_| std::env::var("HTTP_PROXY"))
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_url.clone(),
            timeout: self.http_timeout,
            model_namespace: self.model_namespace.clone(),
            proxy: self.proxy.clone(),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            poll_interval: self.poll_interval,
            max_consecutive_failures: self.max_poll_failures.max(1),
            ..LifecycleConfig::default()
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn default_download_dir() -> PathBuf {
    dirs_next::audio_dir()
        .or_else(dirs_next::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunesmith")
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn path_env(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
