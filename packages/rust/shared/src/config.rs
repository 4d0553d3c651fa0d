//! Application configuration for kbforge.
//!
//! User config lives at `~/.kbforge/kbforge.toml`.
//! Environment variables override the Redis settings; CLI flags override
//! config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KbForgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbforge";

// ---------------------------------------------------------------------------
// Config structs (matching kbforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub task_store: TaskStoreConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Staging directory for uploaded documents.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Maximum accepted request body size.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".into()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// `[rate_limit]` section. Quotas are per client address; 0 disables one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests per day across all routes.
    #[serde(default = "default_per_day")]
    pub per_day: u32,

    /// Requests per hour across all routes.
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,

    /// Uploads per minute on `/api/upload`.
    #[serde(default = "default_upload_per_minute")]
    pub upload_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_day: default_per_day(),
            per_hour: default_per_hour(),
            upload_per_minute: default_upload_per_minute(),
        }
    }
}

fn default_per_day() -> u32 {
    200
}
fn default_per_hour() -> u32 {
    50
}
fn default_upload_per_minute() -> u32 {
    10
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the knowledge base artifact.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Knowledge base file name (one artifact per deployment).
    #[serde(default = "default_output_filename")]
    pub filename: String,

    /// Title written into the artifact header.
    #[serde(default = "default_title")]
    pub title: String,
}

impl OutputConfig {
    /// Full path of the knowledge base artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            filename: default_output_filename(),
            title: default_title(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_output_filename() -> String {
    "knowledge_base.md".into()
}
fn default_title() -> String {
    "Project Knowledge Base".into()
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of documents processed concurrently.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Run load → merge → save for append jobs one at a time.
    #[serde(default = "default_true")]
    pub serialize_merges: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            serialize_merges: true,
        }
    }
}

fn default_pool_size() -> usize {
    4
}
fn default_true() -> bool {
    true
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Name of the env var holding the fallback API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Models a request may select.
    #[serde(default = "default_allowed_models")]
    pub allowed_models: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// API origin; overridden in tests to point at a mock server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout for generation calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn is_allowed_model(&self, model: &str) -> bool {
        self.allowed_models.iter().any(|m| m == model)
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            allowed_models: default_allowed_models(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.5-flash-lite".into()
}
fn default_allowed_models() -> Vec<String> {
    [
        "gemini-2.5-flash-lite",
        "gemini-2.0-flash",
        "gemini-1.5-flash",
        "gemini-1.5-pro",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    8000
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[task_store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStoreConfig {
    /// Redis URL; when unset the in-memory store is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry applied to every record written to Redis.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_key_prefix() -> String {
    "task:".into()
}
fn default_ttl_secs() -> u64 {
    86_400
}

/// `[analysis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Categories the extraction prompt sorts phrases into.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
        }
    }
}

fn default_categories() -> Vec<String> {
    [
        // Corporate register
        "Corporate Jargon",
        "Strategic Vocabulary",
        "Stacked Industry Terms",
        "Policy Language",
        // Expression techniques
        "Opening Lines",
        "Presenting Data",
        "Analysis and Argument",
        "Transitions and Emphasis",
        "Risks and Challenges",
        "Recommendations and Conclusions",
        // Terminology
        "Technical Glossary",
        "Abbreviations",
        "Trending Business Concepts",
        // Situational usage
        "Meeting and Presentation Phrases",
        "Email and Document Conventions",
        "Describing Charts",
        "Citing Case Studies",
        "Q&A Patterns",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply Redis environment overrides.
    ///
    /// `REDIS_URL` wins; otherwise `REDIS_HOST` (+ `REDIS_PORT`, `REDIS_DB`)
    /// is assembled into a URL.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("REDIS_URL") {
            self.task_store.redis_url = Some(url);
        } else if let Some(host) = non_empty("REDIS_HOST") {
            let port = non_empty("REDIS_PORT").unwrap_or_else(|| "6379".into());
            let db = non_empty("REDIS_DB").unwrap_or_else(|| "0".into());
            self.task_store.redis_url = Some(format!("redis://{host}:{port}/{db}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KbForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbforge/kbforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk, then apply environment overrides.
/// Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env_overrides();
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbForgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KbForgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Pick the Gemini credential: an explicit value first, then the configured
/// environment variable.
pub fn resolve_api_key(explicit: Option<&str>, config: &GeminiConfig) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .or_else(|| {
            std::env::var(&config.api_key_env)
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}
