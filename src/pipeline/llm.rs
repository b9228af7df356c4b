//! Model interaction: one multimodal call per upload batch.
//!
//! All pages of a batch travel in a single request: the instruction as the
//! system message, then one user message carrying every page image. Prompt
//! text lives in [`crate::prompts`]; this module only deals with transport,
//! timeouts and retries.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! load. Exponential backoff (`retry_backoff_ms * 2^attempt`) with the
//! defaults (500 ms, 2 retries) waits 500 ms then 1 s. Each attempt is
//! bounded by `api_timeout_secs`; a timed-out attempt counts as a failure.

use crate::config::PipelineConfig;
use crate::error::LedgerError;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Text reply plus usage accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Failed attempts before this reply arrived.
    pub retries: u32,
    pub duration_ms: u64,
}

/// A vision-capable model: instruction + images in, text out.
pub trait VisionModel: Send + Sync {
    fn complete<'a>(
        &'a self,
        instruction: &'a str,
        images: Vec<ImageData>,
    ) -> BoxFuture<'a, Result<ModelReply, LedgerError>>;
}

/// [`VisionModel`] backed by an edgequake-llm provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout: Duration,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, LedgerError> {
        let provider = resolve_provider(config).await?;
        Ok(Self::new(provider, config))
    }

    async fn call(&self, instruction: &str, images: Vec<ImageData>) -> Result<ModelReply, LedgerError> {
        let start = Instant::now();
        let page_count = images.len();
        let messages = vec![
            ChatMessage::system(instruction),
            ChatMessage::user_with_images("", images),
        ];

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Extraction: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.timeout, self.provider.chat(&messages, Some(&self.options))).await {
                Ok(Ok(response)) => {
                    let duration = start.elapsed();
                    debug!(
                        "Extraction: {} images, {} input tokens, {} output tokens, {:?}",
                        page_count, response.prompt_tokens, response.completion_tokens, duration
                    );
                    return Ok(ModelReply {
                        text: response.content,
                        input_tokens: response.prompt_tokens as u64,
                        output_tokens: response.completion_tokens as u64,
                        retries: attempt,
                        duration_ms: duration.as_millis() as u64,
                    });
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!("Extraction: attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    let err_msg = format!("timed out after {}s", self.timeout.as_secs());
                    warn!("Extraction: attempt {} {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(LedgerError::InferenceFailed {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

impl VisionModel for LlmVisionModel {
    fn complete<'a>(
        &'a self,
        instruction: &'a str,
        images: Vec<ImageData>,
    ) -> BoxFuture<'a, Result<ModelReply, LedgerError>> {
        Box::pin(self.call(instruction, images))
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.saturating_mul(factor)
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, LedgerError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LedgerError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`]; the factory reads the matching API key variable.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **Auto-detection** via `ProviderFactory::from_env`.
pub async fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, LedgerError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        info!("Using provider {} with model {}", name, model);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LedgerError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY (or another provider key) or name a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
