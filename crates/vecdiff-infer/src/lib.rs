use async_trait::async_trait;
use thiserror::Error;
use vecdiff_config::{ComparisonSettings, MOCK_MODEL_NAME, NarrativeProviderKind, Secret};

mod anthropic;
mod gemini;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub struct LoadedGenerator {
    pub generator: Box<dyn TextGenerator>,
    pub provider_name: String,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("missing {provider} API key in {env}")]
    MissingApiKey { provider: &'static str, env: String },
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("empty response from model")]
    EmptyResponse,
}

/// Free-text generation: one prompt in, one text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MockGenerator;

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferError> {
        Ok(format!(
            "Mock summary of a {}-character comparison prompt.",
            request.prompt.chars().count()
        ))
    }
}

/// Stands in for a provider whose credentials are missing, so the failure
/// surfaces on each call instead of at startup.
#[derive(Debug, Clone)]
pub struct UnconfiguredGenerator {
    provider: &'static str,
    api_key_env: String,
}

#[async_trait]
impl TextGenerator for UnconfiguredGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, InferError> {
        Err(InferError::MissingApiKey {
            provider: self.provider,
            env: self.api_key_env.clone(),
        })
    }
}

pub fn load_generator(settings: &ComparisonSettings) -> LoadedGenerator {
    match settings.provider {
        NarrativeProviderKind::Auto => match &settings.api_key {
            Some(api_key) => anthropic_generator(api_key.clone(), settings.model_id.clone()),
            None => {
                tracing::warn!(
                    api_key_env = %settings.api_key_env,
                    "no API key found, narrative generation falls back to the mock provider"
                );
                mock_generator()
            }
        },
        NarrativeProviderKind::Mock => mock_generator(),
        NarrativeProviderKind::Anthropic => match &settings.api_key {
            Some(api_key) => anthropic_generator(api_key.clone(), settings.model_id.clone()),
            None => {
                unconfigured_generator(NarrativeProviderKind::Anthropic, "Anthropic", settings)
            }
        },
        NarrativeProviderKind::Gemini => match &settings.api_key {
            Some(api_key) => {
                let provider = GeminiProvider::new(api_key.clone(), settings.model_id.clone());
                LoadedGenerator {
                    model_name: provider.model().to_owned(),
                    generator: Box::new(provider),
                    provider_name: NarrativeProviderKind::Gemini.as_str().to_owned(),
                }
            }
            None => unconfigured_generator(NarrativeProviderKind::Gemini, "Gemini", settings),
        },
    }
}

fn anthropic_generator(api_key: Secret, model: String) -> LoadedGenerator {
    let provider = AnthropicProvider::new(api_key, model);
    LoadedGenerator {
        model_name: provider.model().to_owned(),
        generator: Box::new(provider),
        provider_name: NarrativeProviderKind::Anthropic.as_str().to_owned(),
    }
}

fn mock_generator() -> LoadedGenerator {
    LoadedGenerator {
        generator: Box::new(MockGenerator),
        provider_name: NarrativeProviderKind::Mock.as_str().to_owned(),
        model_name: MOCK_MODEL_NAME.to_owned(),
    }
}

fn unconfigured_generator(
    kind: NarrativeProviderKind,
    provider: &'static str,
    settings: &ComparisonSettings,
) -> LoadedGenerator {
    tracing::warn!(
        provider = kind.as_str(),
        api_key_env = %settings.api_key_env,
        "API key missing, narrative generation will report a failure"
    );
    LoadedGenerator {
        generator: Box::new(UnconfiguredGenerator {
            provider,
            api_key_env: settings.api_key_env.clone(),
        }),
        provider_name: kind.as_str().to_owned(),
        model_name: settings.model_id.clone(),
    }
}

/// Pulls a readable message out of a provider error body; both providers
/// nest it under `error.message`.
pub(crate) fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Transport errors are kept without their request URL.
pub(crate) fn request_error(err: reqwest::Error) -> InferError {
    InferError::Request(err.without_url())
}

pub(crate) fn non_empty_text(text: &str) -> Result<String, InferError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(InferError::EmptyResponse);
    }
    Ok(trimmed.to_owned())
}
