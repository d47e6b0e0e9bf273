use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::cleaner::ResponseCleaner;
use crate::error::GenerationError;
use crate::inference::ModelBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: i64,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: i64) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
        }
    }

    /// Checked before the backend is touched.
    pub fn validate(&self) -> Result<usize, GenerationError> {
        if self.prompt.is_empty() {
            return Err(GenerationError::InvalidInput("prompt must not be empty".into()));
        }
        if self.max_tokens <= 0 {
            return Err(GenerationError::InvalidInput(format!(
                "max_tokens must be positive, got {}",
                self.max_tokens
            )));
        }
        usize::try_from(self.max_tokens).map_err(|_| {
            GenerationError::InvalidInput(format!("max_tokens out of range: {}", self.max_tokens))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// Cleaned continuation, never the prompt.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Used when the caller leaves `max_tokens` out.
    pub default_max_tokens: usize,
    /// Remove the echoed prompt from the decoded output before cleaning.
    pub strip_prompt_echo: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            default_max_tokens: 100,
            strip_prompt_echo: true,
        }
    }
}

// ---------------------------------------------------------
// PUBLIC SERVICE
// ---------------------------------------------------------
pub struct GenerationService {
    backend: Arc<dyn ModelBackend>,
    cleaner: Arc<dyn ResponseCleaner>,
    options: ServiceOptions,
    // One shared model instance: inference runs one request at a time. The permit lives
    // inside the blocking task, so a dropped request keeps the slot until the model is done.
    inference_slot: Arc<Semaphore>,
}

impl GenerationService {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        cleaner: Arc<dyn ResponseCleaner>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            backend,
            cleaner,
            options,
            inference_slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    pub fn model_name(&self) -> &str {
        self.backend.name()
    }

    pub fn cleaner_name(&self) -> &'static str {
        self.cleaner.name()
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let max_new_tokens = request.validate()?;
        info!(prompt = %request.prompt, max_tokens = max_new_tokens, "received prompt");

        let raw = self.run_backend(request.prompt.clone(), max_new_tokens).await?;

        let continuation = if self.options.strip_prompt_echo {
            strip_prompt_echo(&raw, &request.prompt)
        } else {
            raw.as_str()
        };

        let text = self.cleaner.clean(continuation);
        debug!(
            raw_len = raw.len(),
            cleaned_len = text.len(),
            cleaner = self.cleaner.name(),
            "completion cleaned"
        );

        Ok(GenerationResult { text })
    }

    async fn run_backend(
        &self,
        prompt: String,
        max_new_tokens: usize,
    ) -> Result<String, GenerationError> {
        let permit = self
            .inference_slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow!("inference slot closed: {e}"))?;

        let backend = self.backend.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            backend.complete(&prompt, max_new_tokens)
        })
        .await;

        match joined {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(err)) => {
                error!(error = %format!("{err:#}"), "backend failure");
                Err(GenerationError::Backend(err))
            }
            Err(join_err) => {
                error!(%join_err, "inference task aborted");
                Err(GenerationError::Backend(anyhow!(
                    "inference task aborted: {join_err}"
                )))
            }
        }
    }
}

/// Best-effort removal of the prompt the model echoes at the start of its output.
///
/// Decoding can shift whitespace around the prompt, so a trimmed match is tried when the
/// exact one fails. Output that does not start with the prompt is passed through as is.
pub fn strip_prompt_echo<'a>(raw: &'a str, prompt: &str) -> &'a str {
    if let Some(rest) = raw.strip_prefix(prompt) {
        return rest.trim();
    }

    let trimmed_prompt = prompt.trim();
    if !trimmed_prompt.is_empty() {
        if let Some(rest) = raw.trim_start().strip_prefix(trimmed_prompt) {
            return rest.trim();
        }
    }

    raw
}
