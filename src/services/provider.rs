//! [`TextGenerator`] over any `edgequake_llm` provider.
//!
//! Lets the summarization call run against OpenAI, Anthropic, Gemini,
//! Ollama… instead of Vertex AI. Only `temperature` and
//! `max_output_tokens` carry over: `top_p` / `top_k` are Vertex-specific and
//! are left to the provider's defaults.

use super::TextGenerator;
use crate::config::DecodingParams;
use crate::error::{PipelineError, ServiceError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

const SERVICE: &str = "llm-provider";
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

pub struct ProviderTextGenerator {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderTextGenerator {
    /// Wrap a caller-built provider as-is.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Resolve a provider, from most-specific to least-specific:
    ///
    /// 1. `provider_name` (+ `model`, default `gpt-4.1-nano`) through
    ///    [`ProviderFactory::create_llm_provider`], which reads the matching
    ///    API key from the environment.
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
    /// 3. [`ProviderFactory::from_env`] auto-detection.
    pub fn resolve(provider_name: Option<&str>, model: Option<&str>) -> Result<Self, PipelineError> {
        if let Some(name) = provider_name {
            return create(name, model.unwrap_or(DEFAULT_MODEL));
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return create(&prov, &model);
            }
        }

        let (llm_provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment. \
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider. Error: {e}"
                ),
            })?;
        Ok(Self::new(llm_provider))
    }
}

fn create(provider_name: &str, model: &str) -> Result<ProviderTextGenerator, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model)
        .map(ProviderTextGenerator::new)
        .map_err(|e| PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        })
}

fn build_options(params: &DecodingParams) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(params.temperature),
        max_tokens: Some(params.max_output_tokens as usize),
        ..Default::default()
    }
}

#[async_trait]
impl TextGenerator for ProviderTextGenerator {
    async fn predict(&self, prompt: &str, params: &DecodingParams) -> Result<String, ServiceError> {
        let messages = vec![ChatMessage::user_with_images(prompt, vec![])];
        let response = self
            .provider
            .chat(&messages, Some(&build_options(params)))
            .await
            .map_err(|e| ServiceError::Transport {
                service: SERVICE,
                detail: e.to_string(),
            })?;

        debug!(
            "Provider: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_temperature_and_token_limit() {
        let opts = build_options(&DecodingParams::default());
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(256));
    }
}
