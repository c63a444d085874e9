//! Tests for configuration system.

use std::sync::{Mutex, OnceLock};

use braid::config::{BraidConfig, LoopSettings};
use braid::error::BraidError;
use braid::multiplex::OverflowPolicy;
use pretty_assertions::assert_eq;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 21] = [
    "OPENAI_API_KEY",
    "OPENAI_COMPAT_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "GROQ_API_KEY",
    "MISTRAL_API_KEY",
    "XAI_API_KEY",
    "OPENAI_BASE_URL",
    "OLLAMA_BASE_URL",
    "OPENAI_COMPAT_BASE_URL",
    "ANTHROPIC_BASE_URL",
    "GROQ_BASE_URL",
    "BRAID_CONFIG",
    "BRAID_MAX_STEPS",
    "BRAID_CONTINUATION",
    "BRAID_CALL_TIMEOUT_MS",
    "BRAID_TIMEOUT_MS",
    "BRAID_MAX_RETRIES",
    "BRAID_BUFFER_CAPACITY",
    "BRAID_BUFFER_OVERFLOW",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clean_env() -> (std::sync::MutexGuard<'static, ()>, EnvGuard) {
    let lock = env_lock_guard();
    let guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
    (lock, guard)
}

#[test]
fn from_env_maps_keys_and_base_urls_to_providers() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("OPENAI_API_KEY", "sk-openai");
    std::env::set_var("OPENAI_COMPAT_API_KEY", "sk-compat");
    std::env::set_var("XAI_API_KEY", "sk-xai");
    std::env::set_var("OLLAMA_BASE_URL", "http://localhost:11434");

    let config = BraidConfig::from_env();

    assert_eq!(config.get_api_key("openai").as_deref(), Some("sk-openai"));
    assert_eq!(
        config.get_api_key("openai-compatible").as_deref(),
        Some("sk-compat")
    );
    assert_eq!(config.get_api_key("xai").as_deref(), Some("sk-xai"));
    assert_eq!(
        config.get_base_url("ollama").as_deref(),
        Some("http://localhost:11434")
    );
    assert!(!config.has_credentials("anthropic"));
}

#[test]
fn gemini_key_takes_precedence_over_google_key() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("GOOGLE_API_KEY", "google-key");
    std::env::set_var("GEMINI_API_KEY", "gemini-key");

    let config = BraidConfig::from_env();

    assert_eq!(config.get_api_key("google").as_deref(), Some("gemini-key"));
}

#[test]
fn from_env_reads_loop_settings() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("BRAID_MAX_STEPS", "7");
    std::env::set_var("BRAID_CONTINUATION", "true");
    std::env::set_var("BRAID_TIMEOUT_MS", "30000");
    std::env::set_var("BRAID_BUFFER_CAPACITY", "64");
    std::env::set_var("BRAID_BUFFER_OVERFLOW", "error");

    let settings = BraidConfig::from_env().loop_settings();

    assert_eq!(settings.max_steps, 7);
    assert!(settings.continuation);
    assert_eq!(settings.timeout_ms, Some(30_000));
    assert_eq!(settings.call_timeout_ms, None);
    assert_eq!(settings.buffer.capacity, Some(64));
    assert_eq!(settings.buffer.overflow, OverflowPolicy::Error);
}

#[test]
fn unparseable_env_values_keep_defaults() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("BRAID_MAX_STEPS", "many");
    std::env::set_var("BRAID_BUFFER_OVERFLOW", "sometimes");

    let settings = BraidConfig::from_env().loop_settings();

    assert_eq!(settings, LoopSettings::default());
}

#[test]
fn load_layers_env_over_the_config_file() {
    let (_lock, _guard) = clean_env();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("braid.toml");
    std::fs::write(
        &path,
        r#"
[loop]
max_steps = 4
continuation = true

[providers.anthropic]
api_key = "from-file"
base_url = "https://proxy.example.com"
"#,
    )
    .unwrap();
    std::env::set_var("BRAID_CONFIG", &path);
    std::env::set_var("ANTHROPIC_API_KEY", "from-env");

    let config = BraidConfig::load(None).unwrap();

    assert_eq!(config.get_api_key("anthropic").as_deref(), Some("from-env"));
    assert_eq!(
        config.get_base_url("anthropic").as_deref(),
        Some("https://proxy.example.com")
    );
    let settings = config.loop_settings();
    assert_eq!(settings.max_steps, 4);
    assert!(settings.continuation);
}

#[test]
fn load_reports_missing_explicit_files() {
    let (_lock, _guard) = clean_env();
    let dir = tempfile::TempDir::new().unwrap();

    let err = BraidConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();

    assert!(matches!(err, BraidError::Io(_)));
}

#[test]
fn clones_share_credentials() {
    let config = BraidConfig::new();
    let clone = config.clone();
    clone.set_api_key("groq", "gsk".to_string());

    assert!(config.has_credentials("groq"));
}

#[test]
fn debug_output_hides_api_keys() {
    let config = BraidConfig::new();
    config.set_api_key("openai", "sk-secret".to_string());

    let debug = format!("{config:?}");

    assert!(debug.contains("openai"));
    assert!(!debug.contains("sk-secret"));
}
