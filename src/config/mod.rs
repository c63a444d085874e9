//! Configuration system (layered: code > env > TOML file > defaults).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BraidError;
use crate::multiplex::{BufferConfig, OverflowPolicy};
use crate::util::retry::RetryPolicy;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<BraidConfig> = OnceLock::new();

/// Environment variables carrying provider API keys.
const API_KEY_VARS: [(&str, &str); 8] = [
    ("OPENAI_API_KEY", "openai"),
    ("OPENAI_COMPAT_API_KEY", "openai-compatible"),
    ("ANTHROPIC_API_KEY", "anthropic"),
    ("GOOGLE_API_KEY", "google"),
    ("GEMINI_API_KEY", "google"),
    ("GROQ_API_KEY", "groq"),
    ("MISTRAL_API_KEY", "mistral"),
    ("XAI_API_KEY", "xai"),
];

/// Environment variables overriding provider base URLs.
const BASE_URL_VARS: [(&str, &str); 5] = [
    ("OPENAI_BASE_URL", "openai"),
    ("OPENAI_COMPAT_BASE_URL", "openai-compatible"),
    ("ANTHROPIC_BASE_URL", "anthropic"),
    ("OLLAMA_BASE_URL", "ollama"),
    ("GROQ_BASE_URL", "groq"),
];

/// Step-loop defaults applied to every run built with [`BraidConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub max_steps: usize,
    /// Re-invoke the model when a step is truncated by `length`.
    pub continuation: bool,
    /// Per provider call; `None` waits indefinitely.
    pub call_timeout_ms: Option<u64>,
    /// Whole run; `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    pub include_raw: bool,
    pub retry: RetryPolicy,
    pub buffer: BufferConfig,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 20,
            continuation: false,
            call_timeout_ms: None,
            timeout_ms: None,
            include_raw: false,
            retry: RetryPolicy::default(),
            buffer: BufferConfig::default(),
        }
    }
}

impl LoopSettings {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(rename = "loop")]
    loop_settings: Option<LoopSettings>,
    providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderEntry {
    api_key: Option<String>,
    base_url: Option<String>,
}

/// Layered configuration for braid.
///
/// Clones share the same credential maps.
#[derive(Clone)]
pub struct BraidConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    loop_settings: Arc<RwLock<LoopSettings>>,
}

impl fmt::Debug for BraidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = self
            .api_keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("BraidConfig")
            .field("api_keys_for", &providers)
            .field("base_urls", &self.base_urls)
            .field("loop_settings", &self.loop_settings())
            .finish()
    }
}

impl Default for BraidConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BraidConfig {
    /// Create a config holding only defaults.
    pub fn new() -> Self {
        Self {
            api_keys: Arc::new(RwLock::new(HashMap::new())),
            base_urls: Arc::new(RwLock::new(HashMap::new())),
            loop_settings: Arc::new(RwLock::new(LoopSettings::default())),
        }
    }

    /// Parse a TOML document on top of the defaults.
    ///
    /// ```toml
    /// [loop]
    /// max_steps = 8
    /// continuation = true
    ///
    /// [loop.buffer]
    /// capacity = 256
    /// overflow = "error"
    ///
    /// [providers.openai]
    /// api_key = "sk-..."
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self, BraidError> {
        let file: FileConfig = toml::from_str(raw)
            .map_err(|e| BraidError::Configuration(format!("invalid config file: {e}")))?;
        let config = Self::new();
        if let Some(settings) = file.loop_settings {
            config.set_loop_settings(settings);
        }
        for (provider, entry) in file.providers {
            if let Some(key) = entry.api_key {
                config.set_api_key(&provider, key);
            }
            if let Some(url) = entry.base_url {
                config.set_base_url(&provider, url);
            }
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, BraidError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load from environment variables (OPENAI_API_KEY, BRAID_MAX_STEPS, etc.).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let config = Self::new();
        config.apply_env_from(|name| std::env::var(name).ok());
        config
    }

    /// Full layering: defaults, then the TOML file (explicit `path`,
    /// `BRAID_CONFIG`, or the per-user default location, whichever exists
    /// first), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, BraidError> {
        let _ = dotenvy::dotenv();
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("BRAID_CONFIG").ok().map(PathBuf::from))
            .or_else(|| default_config_path().filter(|p| p.exists()));
        let config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            None => Self::new(),
        };
        config.apply_env_from(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static BraidConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    /// Overlay values from an environment lookup. Unparseable values are
    /// logged and skipped.
    pub fn apply_env_from(&self, get: impl Fn(&str) -> Option<String>) {
        for (var, provider) in API_KEY_VARS {
            if let Some(key) = get(var) {
                self.set_api_key(provider, key);
            }
        }
        for (var, provider) in BASE_URL_VARS {
            if let Some(url) = get(var) {
                self.set_base_url(provider, url);
            }
        }

        let mut settings = self.loop_settings();
        if let Some(v) = parse_env(&get, "BRAID_MAX_STEPS") {
            settings.max_steps = v;
        }
        if let Some(v) = parse_env(&get, "BRAID_CONTINUATION") {
            settings.continuation = v;
        }
        if let Some(v) = parse_env(&get, "BRAID_CALL_TIMEOUT_MS") {
            settings.call_timeout_ms = Some(v);
        }
        if let Some(v) = parse_env(&get, "BRAID_TIMEOUT_MS") {
            settings.timeout_ms = Some(v);
        }
        if let Some(v) = parse_env(&get, "BRAID_MAX_RETRIES") {
            settings.retry.max_attempts = v;
        }
        if let Some(v) = parse_env(&get, "BRAID_BUFFER_CAPACITY") {
            settings.buffer.capacity = Some(v);
        }
        if let Some(raw) = get("BRAID_BUFFER_OVERFLOW") {
            match raw.as_str() {
                "drop-oldest" => settings.buffer.overflow = OverflowPolicy::DropOldest,
                "error" => settings.buffer.overflow = OverflowPolicy::Error,
                other => tracing::warn!(value = other, "ignoring invalid BRAID_BUFFER_OVERFLOW"),
            }
        }
        self.set_loop_settings(settings);
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        if let Ok(mut keys) = self.api_keys.write() {
            keys.insert(provider.to_string(), key);
        }
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.read().ok()?.get(provider).cloned()
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        if let Ok(mut urls) = self.base_urls.write() {
            urls.insert(provider.to_string(), url);
        }
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.read().ok()?.get(provider).cloned()
    }

    pub fn has_credentials(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }

    pub fn loop_settings(&self) -> LoopSettings {
        self.loop_settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn set_loop_settings(&self, settings: LoopSettings) {
        if let Ok(mut current) = self.loop_settings.write() {
            *current = settings;
        }
    }
}

fn parse_env<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = get(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

/// Per-user config file location (`~/.braid/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".braid").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = BraidConfig::new().loop_settings();
        assert_eq!(settings.max_steps, 20);
        assert!(!settings.continuation);
        assert_eq!(settings.buffer.capacity, None);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = BraidConfig::from_toml_str(
            r#"
            [loop]
            max_steps = 8
            continuation = true
            call_timeout_ms = 1500

            [loop.buffer]
            capacity = 64
            overflow = "error"

            [providers.openai]
            api_key = "sk-file"
            base_url = "http://localhost:8080/v1"
            "#,
        )
        .unwrap();

        let settings = config.loop_settings();
        assert_eq!(settings.max_steps, 8);
        assert!(settings.continuation);
        assert_eq!(settings.call_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(settings.buffer, BufferConfig::bounded(64, OverflowPolicy::Error));
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(config.get_api_key("openai").as_deref(), Some("sk-file"));
        assert_eq!(
            config.get_base_url("openai").as_deref(),
            Some("http://localhost:8080/v1")
        );
    }

    #[test]
    fn env_overrides_file_values() {
        let config = BraidConfig::from_toml_str("[loop]\nmax_steps = 8\n").unwrap();
        config.apply_env_from(env(&[
            ("BRAID_MAX_STEPS", "3"),
            ("BRAID_BUFFER_OVERFLOW", "error"),
            ("ANTHROPIC_API_KEY", "sk-env"),
        ]));

        let settings = config.loop_settings();
        assert_eq!(settings.max_steps, 3);
        assert_eq!(settings.buffer.overflow, OverflowPolicy::Error);
        assert_eq!(config.get_api_key("anthropic").as_deref(), Some("sk-env"));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let config = BraidConfig::new();
        config.apply_env_from(env(&[("BRAID_MAX_STEPS", "many")]));
        assert_eq!(config.loop_settings().max_steps, 20);
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = BraidConfig::from_toml_str("[loop\nmax_steps = ").unwrap_err();
        assert!(matches!(err, BraidError::Configuration(_)));
    }

    #[test]
    fn file_loading_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[providers.groq]\napi_key = \"gsk\"\n").unwrap();
        let config = BraidConfig::from_file(&path).unwrap();
        assert!(config.has_credentials("groq"));
    }
}
