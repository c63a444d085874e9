//! Provider configuration: a capability-tagged value built by factory functions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{ModelCapabilities, ModelProvider};
use crate::config::BraidConfig;
use crate::error::BraidError;

/// Supported provider families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ProviderKind {
    #[strum(serialize = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[strum(to_string = "google", serialize = "gemini")]
    Google,
    Mistral,
    Groq,
    Ollama,
    #[strum(serialize = "openai-compatible")]
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    /// Whether calls need an API key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Google => Some("https://generativelanguage.googleapis.com/v1beta"),
            Self::Mistral => Some("https://api.mistral.ai/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Ollama => Some("http://localhost:11434"),
            Self::OpenAiCompatible => None,
        }
    }
}

/// Everything needed to construct a provider for one model.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            kind,
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Fill the API key and base URL from `config` where not set explicitly.
    pub fn resolve_credentials(mut self, config: &BraidConfig) -> Result<Self, BraidError> {
        let name = self.kind.to_string();
        if self.api_key.is_none() {
            self.api_key = config.get_api_key(&name);
        }
        if self.api_key.is_none() && self.kind.requires_api_key() {
            return Err(BraidError::Configuration(format!(
                "missing API key for provider '{name}'"
            )));
        }
        if self.base_url.is_none() {
            self.base_url = config
                .get_base_url(&name)
                .or_else(|| self.kind.default_base_url().map(str::to_string));
        }
        if self.base_url.is_none() {
            return Err(BraidError::Configuration(format!(
                "missing base URL for provider '{name}'"
            )));
        }
        Ok(self)
    }

    /// Capabilities by provider family.
    pub fn capabilities(&self) -> ModelCapabilities {
        match self.kind {
            ProviderKind::OpenAi => ModelCapabilities::full(128_000),
            ProviderKind::Anthropic => ModelCapabilities::full(200_000),
            ProviderKind::Google => ModelCapabilities::full(1_000_000),
            ProviderKind::Mistral | ProviderKind::Groq => ModelCapabilities {
                supports_reasoning: false,
                ..ModelCapabilities::full(128_000)
            },
            ProviderKind::Ollama | ProviderKind::OpenAiCompatible => ModelCapabilities {
                supports_tools: true,
                ..ModelCapabilities::text_only(32_768)
            },
        }
    }
}

/// Parse `"provider:model_id"`, e.g. `"openai:gpt-4o"` or `"ollama:llama3.3"`.
impl FromStr for ProviderConfig {
    type Err = BraidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model_id) = s.split_once(':').ok_or_else(|| {
            BraidError::Configuration(format!(
                "invalid model selector '{s}': expected 'provider:model_id'"
            ))
        })?;
        let kind = ProviderKind::from_str(provider).map_err(|_| {
            BraidError::Configuration(format!("unknown provider '{provider}'"))
        })?;
        if model_id.trim().is_empty() {
            return Err(BraidError::Configuration(format!(
                "invalid model selector '{s}': empty model id"
            )));
        }
        Ok(Self::new(kind, model_id))
    }
}

pub fn openai(model_id: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::OpenAi, model_id)
}

pub fn anthropic(model_id: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Anthropic, model_id)
}

pub fn google(model_id: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Google, model_id)
}

pub fn mistral(model_id: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Mistral, model_id)
}

pub fn groq(model_id: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Groq, model_id)
}

pub fn ollama(model_id: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Ollama, model_id)
}

/// Any endpoint speaking the OpenAI chat format.
pub fn openai_compatible(model_id: impl Into<String>, base_url: impl Into<String>) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::OpenAiCompatible, model_id).with_base_url(base_url)
}

/// Builds a provider from its configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ModelProvider>, BraidError> + Send + Sync>;

/// Maps provider kinds to adapter factories.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: ProviderKind,
        factory: impl Fn(&ProviderConfig) -> Result<Arc<dyn ModelProvider>, BraidError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    pub fn supports(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Construct the provider for `config` as given.
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn ModelProvider>, BraidError> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            BraidError::Configuration(format!("no adapter registered for provider '{}'", config.kind))
        })?;
        tracing::debug!(provider = %config.kind, model = %config.model_id, "creating provider");
        factory(config)
    }

    /// Parse a `"provider:model"` selector, resolve credentials, and construct.
    pub fn create_from_str(
        &self,
        selector: &str,
        config: &BraidConfig,
    ) -> Result<Arc<dyn ModelProvider>, BraidError> {
        let provider = ProviderConfig::from_str(selector)?.resolve_credentials(config)?;
        self.create(&provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderRequest, ProviderStream};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct Stub {
        model_id: String,
        caps: ModelCapabilities,
    }

    #[async_trait]
    impl ModelProvider for Stub {
        fn provider_name(&self) -> &str {
            "stub"
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn capabilities(&self) -> ModelCapabilities {
            self.caps
        }

        async fn stream(&self, _request: &ProviderRequest) -> Result<ProviderStream, BraidError> {
            Ok(ProviderStream::new(futures::stream::empty().boxed()))
        }
    }

    #[test]
    fn parses_provider_model_selectors() {
        let config: ProviderConfig = "openai:gpt-4o".parse().unwrap();
        assert_eq!(config.kind, ProviderKind::OpenAi);
        assert_eq!(config.model_id, "gpt-4o");

        let config: ProviderConfig = "gemini:gemini-2.0-flash".parse().unwrap();
        assert_eq!(config.kind, ProviderKind::Google);

        let config: ProviderConfig = "ollama:llama3.3:70b".parse().unwrap();
        assert_eq!(config.model_id, "llama3.3:70b");

        assert!("gpt-4o".parse::<ProviderConfig>().is_err());
        assert!("nope:model".parse::<ProviderConfig>().is_err());
    }

    #[test]
    fn credentials_resolve_from_config() {
        let config = BraidConfig::new();
        assert!(openai("gpt-4o").resolve_credentials(&config).is_err());

        config.set_api_key("openai", "sk-test".into());
        let resolved = openai("gpt-4o").resolve_credentials(&config).unwrap();
        assert_eq!(resolved.api_key.as_deref(), Some("sk-test"));
        assert_eq!(resolved.base_url.as_deref(), Some("https://api.openai.com/v1"));

        let local = ollama("llama3.3").resolve_credentials(&config).unwrap();
        assert_eq!(local.api_key, None);
    }

    #[test]
    fn debug_redacts_api_keys() {
        let config = anthropic("claude").with_api_key("sk-secret");
        assert!(!format!("{config:?}").contains("sk-secret"));
    }

    #[test]
    fn registry_dispatches_on_kind() {
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderKind::OpenAiCompatible, |config| {
            Ok(Arc::new(Stub {
                model_id: config.model_id.clone(),
                caps: config.capabilities(),
            }) as Arc<dyn ModelProvider>)
        });

        let provider = registry
            .create(&openai_compatible("local-model", "http://localhost:8000/v1"))
            .unwrap();
        assert_eq!(provider.model_id(), "local-model");
        assert!(provider.capabilities().supports_tools);
        assert!(registry.create(&openai("gpt-4o")).is_err());
    }
}
