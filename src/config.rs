//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! an explicit path), then applies `SABLE_WORK_DIR`, `SABLE_LOG_LEVEL`,
//! `SABLE_ENV` and `PORT` overrides. Provider secrets (`GROQ_API_KEY`,
//! `TAVILY_API_KEY`) come from the environment only and are never read from
//! TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Deployment mode. Decides whether missing secrets are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(AppError::Config(format!("unknown environment: '{other}'"))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        })
    }
}

/// Groq (OpenAI-compatible) provider settings, from `[llm.groq]`.
#[derive(Debug, Clone)]
pub struct GroqConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model used for chat replies.
    pub model: String,
    /// Smaller model used to title new conversations.
    pub title_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request HTTP timeout for non-streaming calls.
    pub timeout_seconds: u64,
    /// Longest gap between two streamed chunks before the stream is abandoned.
    pub stream_idle_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// `default = "..."` in `[llm]`: `"groq"` or `"dummy"`.
    pub provider: String,
    pub groq: GroqConfig,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_url: String,
    pub max_results: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub chat_per_window: u32,
    pub search_per_window: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Origins echoed back verbatim.
    pub allowed_origins: Vec<String>,
    /// Host suffixes (e.g. `.vercel.app`) whose origins are echoed back.
    pub allowed_origin_suffixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DesktopConfig {
    /// Root of the per-platform sidecar directories (`<dir>/<platform>/<name>`).
    pub sidecar_dir: PathBuf,
    /// JSON file holding persisted workspaces and widget data.
    pub state_file: PathBuf,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub environment: Environment,
    pub log_level: String,
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    /// SQLite database file (absolute, or relative to the process cwd).
    pub database_path: PathBuf,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub desktop: DesktopConfig,
    /// From `GROQ_API_KEY`.
    pub groq_api_key: Option<String>,
    /// From `TAVILY_API_KEY`. `None` disables `/api/search`.
    pub tavily_api_key: Option<String>,
}

impl Config {
    /// Resolve which LLM provider to build.
    ///
    /// A `groq` provider without a usable `gsk_` key is fatal in production.
    /// Elsewhere it degrades to the offline `dummy` provider with a warning.
    pub fn validate_secrets(&self) -> Result<&'static str, AppError> {
        match self.llm.provider.as_str() {
            "dummy" => Ok("dummy"),
            "groq" => {
                let key_ok = self
                    .groq_api_key
                    .as_deref()
                    .is_some_and(|k| k.starts_with("gsk_"));
                if key_ok {
                    return Ok("groq");
                }
                if self.environment == Environment::Production {
                    return Err(AppError::Config(
                        "GROQ_API_KEY must be set and start with 'gsk_'".into(),
                    ));
                }
                warn!(
                    environment = %self.environment,
                    "GROQ_API_KEY missing or malformed; falling back to dummy provider"
                );
                Ok("dummy")
            }
            other => Err(AppError::Config(format!("unknown llm provider: '{other}'"))),
        }
    }

    pub fn search_enabled(&self) -> bool {
        self.tavily_api_key.is_some()
    }
}

/// Values that override the TOML file. Tests build this directly instead of
/// mutating process env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub environment: Option<String>,
    pub port: Option<String>,
    pub groq_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            work_dir: non_empty("SABLE_WORK_DIR"),
            log_level: non_empty("SABLE_LOG_LEVEL"),
            environment: non_empty("SABLE_ENV"),
            port: non_empty("PORT"),
            groq_api_key: non_empty("GROQ_API_KEY"),
            tavily_api_key: non_empty("TAVILY_API_KEY"),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    database: RawDatabase,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    search: RawSearch,
    #[serde(default)]
    rate_limit: RawRateLimit,
    #[serde(default)]
    cors: RawCors,
    #[serde(default)]
    desktop: RawDesktop,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            environment: default_environment(),
            log_level: default_log_level(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Deserialize)]
struct RawDatabase {
    #[serde(default = "default_database_path")]
    path: String,
}

impl Default for RawDatabase {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    groq: RawGroq,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), groq: RawGroq::default() }
    }
}

#[derive(Deserialize)]
struct RawGroq {
    #[serde(default = "default_groq_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_groq_model")]
    model: String,
    #[serde(default = "default_groq_title_model")]
    title_model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_llm_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_stream_idle_timeout_seconds")]
    stream_idle_timeout_seconds: u64,
}

impl Default for RawGroq {
    fn default() -> Self {
        Self {
            api_base_url: default_groq_api_base_url(),
            model: default_groq_model(),
            title_model: default_groq_title_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_llm_timeout_seconds(),
            stream_idle_timeout_seconds: default_stream_idle_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawSearch {
    #[serde(default = "default_search_api_url")]
    api_url: String,
    #[serde(default = "default_search_max_results")]
    max_results: u32,
    #[serde(default = "default_search_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawSearch {
    fn default() -> Self {
        Self {
            api_url: default_search_api_url(),
            max_results: default_search_max_results(),
            timeout_seconds: default_search_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawRateLimit {
    #[serde(default = "default_chat_per_minute")]
    chat_per_minute: u32,
    #[serde(default = "default_search_per_minute")]
    search_per_minute: u32,
    #[serde(default = "default_window_seconds")]
    window_seconds: u64,
}

impl Default for RawRateLimit {
    fn default() -> Self {
        Self {
            chat_per_minute: default_chat_per_minute(),
            search_per_minute: default_search_per_minute(),
            window_seconds: default_window_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawCors {
    #[serde(default = "default_allowed_origins")]
    allowed_origins: Vec<String>,
    #[serde(default = "default_allowed_origin_suffixes")]
    allowed_origin_suffixes: Vec<String>,
}

impl Default for RawCors {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_origin_suffixes: default_allowed_origin_suffixes(),
        }
    }
}

#[derive(Deserialize)]
struct RawDesktop {
    #[serde(default = "default_sidecar_dir")]
    sidecar_dir: String,
    #[serde(default = "default_state_file")]
    state_file: String,
}

impl Default for RawDesktop {
    fn default() -> Self {
        Self { sidecar_dir: default_sidecar_dir(), state_file: default_state_file() }
    }
}

fn default_bind() -> String { "127.0.0.1:3001".to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_work_dir() -> String { "~/.sable".to_string() }
fn default_database_path() -> String { "sable.db".to_string() }
fn default_llm_provider() -> String { "groq".to_string() }
fn default_groq_api_base_url() -> String { "https://api.groq.com/openai/v1/chat/completions".to_string() }
fn default_groq_model() -> String { "llama-3.3-70b-versatile".to_string() }
fn default_groq_title_model() -> String { "llama-3.1-8b-instant".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 4096 }
fn default_llm_timeout_seconds() -> u64 { 60 }
fn default_stream_idle_timeout_seconds() -> u64 { 60 }
fn default_search_api_url() -> String { "https://api.tavily.com/search".to_string() }
fn default_search_max_results() -> u32 { 5 }
fn default_search_timeout_seconds() -> u64 { 30 }
fn default_chat_per_minute() -> u32 { 30 }
fn default_search_per_minute() -> u32 { 100 }
fn default_window_seconds() -> u64 { 60 }
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string(), "http://localhost:3000".to_string()]
}
fn default_allowed_origin_suffixes() -> Vec<String> { vec![".vercel.app".to_string()] }
fn default_sidecar_dir() -> String { "sidecars".to_string() }
fn default_state_file() -> String { "desktop-state.json".to_string() }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path`, or `config/default.toml`, then apply env-var
/// overrides. With no explicit path and no default file, built-in defaults
/// are used.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    match path {
        Some(p) => load_from(Path::new(p), &overrides),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_from(Path::new(DEFAULT_CONFIG_PATH), &overrides)
        }
        None => from_toml_str("", &overrides),
    }
}

pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    from_toml_str(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
}

pub fn from_toml_str(raw: &str, overrides: &Overrides) -> Result<Config, AppError> {
    let parsed: RawConfig =
        toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;

    let s = parsed.server;
    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&s.work_dir));
    let log_level = overrides.log_level.clone().unwrap_or(s.log_level);
    let environment: Environment = overrides
        .environment
        .as_deref()
        .unwrap_or(&s.environment)
        .parse()?;
    let bind = match overrides.port.as_deref() {
        Some(port) => with_port(&s.bind, port)?,
        None => s.bind,
    };

    Ok(Config {
        bind,
        environment,
        log_level,
        database_path: resolve_in(&work_dir, &parsed.database.path),
        llm: LlmConfig {
            provider: parsed.llm.provider,
            groq: GroqConfig {
                api_base_url: parsed.llm.groq.api_base_url,
                model: parsed.llm.groq.model,
                title_model: parsed.llm.groq.title_model,
                temperature: parsed.llm.groq.temperature,
                max_tokens: parsed.llm.groq.max_tokens,
                timeout_seconds: parsed.llm.groq.timeout_seconds,
                stream_idle_timeout_seconds: parsed.llm.groq.stream_idle_timeout_seconds,
            },
        },
        search: SearchConfig {
            api_url: parsed.search.api_url,
            max_results: parsed.search.max_results,
            timeout_seconds: parsed.search.timeout_seconds,
        },
        rate_limit: RateLimitConfig {
            chat_per_window: parsed.rate_limit.chat_per_minute,
            search_per_window: parsed.rate_limit.search_per_minute,
            window_seconds: parsed.rate_limit.window_seconds,
        },
        cors: CorsConfig {
            allowed_origins: parsed.cors.allowed_origins,
            allowed_origin_suffixes: parsed.cors.allowed_origin_suffixes,
        },
        desktop: DesktopConfig {
            sidecar_dir: expand_home(&parsed.desktop.sidecar_dir),
            state_file: resolve_in(&work_dir, &parsed.desktop.state_file),
        },
        work_dir,
        groq_api_key: overrides.groq_api_key.clone(),
        tavily_api_key: overrides.tavily_api_key.clone(),
    })
}

/// Replace the port of a `host:port` bind address.
fn with_port(bind: &str, port: &str) -> Result<String, AppError> {
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("invalid PORT: '{port}'")))?;
    let host = bind.rsplit_once(':').map(|(h, _)| h).unwrap_or(bind);
    Ok(format!("{host}:{port}"))
}

/// Absolute (or `~`) paths stand alone; relative paths live under `base`.
fn resolve_in(base: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Config for tests: dummy LLM, no secrets, data under `work_dir`.
impl Config {
    pub fn test_default(work_dir: &Path) -> Self {
        let mut cfg = from_toml_str("", &Overrides::default())
            .unwrap_or_else(|e| panic!("built-in defaults must parse: {e}"));
        cfg.environment = Environment::Test;
        cfg.work_dir = work_dir.to_path_buf();
        cfg.database_path = work_dir.join("sable.db");
        cfg.desktop.state_file = work_dir.join("desktop-state.json");
        cfg.llm.provider = "dummy".into();
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[server]
bind = "0.0.0.0:8080"
work_dir = "/tmp/sable-test"
log_level = "debug"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = from_toml_str("", &Overrides::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3001");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.llm.groq.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.llm.groq.title_model, "llama-3.1-8b-instant");
        assert_eq!(cfg.rate_limit.chat_per_window, 30);
        assert_eq!(cfg.rate_limit.search_per_window, 100);
        assert_eq!(cfg.search.max_results, 5);
        assert!(cfg.cors.allowed_origins.contains(&"http://localhost:5173".to_string()));
    }

    #[test]
    fn parse_basic_file() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/sable-test/sable.db"));
    }

    #[test]
    fn port_override_replaces_port_only() {
        let overrides = Overrides { port: Some("4000".into()), ..Default::default() };
        let cfg = from_toml_str(MINIMAL_TOML, &overrides).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:4000");
    }

    #[test]
    fn invalid_port_errors() {
        let overrides = Overrides { port: Some("http".into()), ..Default::default() };
        let err = from_toml_str("", &overrides).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn work_dir_and_level_overrides() {
        let overrides = Overrides {
            work_dir: Some("/srv/sable".into()),
            log_level: Some("trace".into()),
            ..Default::default()
        };
        let cfg = from_toml_str(MINIMAL_TOML, &overrides).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/srv/sable"));
        assert_eq!(cfg.log_level, "trace");
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn unknown_environment_errors() {
        let overrides = Overrides { environment: Some("staging".into()), ..Default::default() };
        assert!(from_toml_str("", &overrides).is_err());
    }

    #[test]
    fn groq_without_key_falls_back_in_development() {
        let cfg = from_toml_str("", &Overrides::default()).unwrap();
        assert_eq!(cfg.validate_secrets().unwrap(), "dummy");
    }

    #[test]
    fn groq_without_key_is_fatal_in_production() {
        let overrides = Overrides { environment: Some("production".into()), ..Default::default() };
        let cfg = from_toml_str("", &overrides).unwrap();
        assert!(cfg.validate_secrets().is_err());
    }

    #[test]
    fn groq_key_must_have_prefix() {
        let overrides = Overrides {
            environment: Some("production".into()),
            groq_api_key: Some("sk-not-groq".into()),
            ..Default::default()
        };
        let cfg = from_toml_str("", &overrides).unwrap();
        assert!(cfg.validate_secrets().is_err());

        let overrides = Overrides { groq_api_key: Some("gsk_live".into()), ..overrides };
        let cfg = from_toml_str("", &overrides).unwrap();
        assert_eq!(cfg.validate_secrets().unwrap(), "groq");
    }

    #[test]
    fn search_enabled_follows_key() {
        let cfg = from_toml_str("", &Overrides::default()).unwrap();
        assert!(!cfg.search_enabled());
        let overrides = Overrides { tavily_api_key: Some("tvly-1".into()), ..Default::default() };
        assert!(from_toml_str("", &overrides).unwrap().search_enabled());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.sable");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".sable"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
