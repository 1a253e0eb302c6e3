//! Multi-model generation with fallback.
//!
//! [`FallbackOrchestrator::generate_with_fallback`] fetches the files once,
//! builds the prompt once, then walks the configured model sequence strictly
//! in order until a model yields a parsable result.
//!
//! Each failed attempt is classified by [`classify`]:
//!
//! | Class | Errors | On a non-last model | On the last model |
//! |-------|--------|---------------------|-------------------|
//! | `Retryable` | 404, 429, 5xx, network | next model | `FallbackExhausted` |
//! | `Retryable` | response format | next model | return the error as-is |
//! | `Abort` | 401, 403, other 4xx, invalid input, fetch, cancelled | stop, return error | stop, return error |
//! | `Unrecognized` | anything else (e.g. parse failures) | next model | return the error as-is |

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::error::GenerationError;
use crate::fetch::FileFetcher;
use crate::models::{GenerateOptions, Generation, Message};
use crate::parse::parse_generation;
use crate::prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Abort,
    Unrecognized,
}

pub fn classify(err: &GenerationError) -> FailureClass {
    match err {
        GenerationError::ServiceUnavailable { .. }
        | GenerationError::RateLimited { .. }
        | GenerationError::ResponseFormat(_) => FailureClass::Retryable,
        GenerationError::Http { status, .. } if *status == 404 || *status >= 500 => {
            FailureClass::Retryable
        }
        GenerationError::Http { .. }
        | GenerationError::Authorization { .. }
        | GenerationError::InvalidInput(_)
        | GenerationError::Fetch { .. }
        | GenerationError::Cancelled => FailureClass::Abort,
        GenerationError::Parse(_) | GenerationError::FallbackExhausted { .. } => {
            FailureClass::Unrecognized
        }
    }
}

/// What to do after a model attempt failed.
enum Step {
    /// Surface this error to the caller now.
    Stop(GenerationError),
    /// Try the next model, remembering this error.
    Continue(GenerationError),
}

fn next_step(err: GenerationError, is_last: bool) -> Step {
    match (classify(&err), is_last) {
        (FailureClass::Abort, _) => Step::Stop(err),
        (FailureClass::Unrecognized, true) => Step::Stop(err),
        // A malformed answer from the final model surfaces as-is.
        (FailureClass::Retryable, true) if matches!(err, GenerationError::ResponseFormat(_)) => {
            Step::Stop(err)
        }
        (FailureClass::Retryable, _) | (FailureClass::Unrecognized, false) => Step::Continue(err),
    }
}

/// Prompt material shared by every model attempt.
struct Prepared {
    messages: Vec<Message>,
    options: GenerateOptions,
}

pub struct FallbackOrchestrator {
    fetcher: FileFetcher,
    client: CompletionClient,
    models: Vec<String>,
    options: GenerateOptions,
}

impl FallbackOrchestrator {
    /// Builds the orchestrator from configuration. The model sequence is
    /// always the configured one.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher: FileFetcher::new(&config.files),
            client: CompletionClient::new(&config.completion)?,
            models: config.completion.model_sequence(),
            options: GenerateOptions {
                model: None,
                parameters: Some(prompt::default_parameters(&config.completion)),
                response_format: Some(prompt::project_response_format()),
            },
        })
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Generates a description and technology list for the given files.
    ///
    /// With `enable_fallback = false` only the default model is tried and its
    /// error is returned unchanged.
    pub async fn generate_with_fallback(
        &self,
        file_urls: &[String],
        project_id: &str,
        enable_fallback: bool,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let span = tracing::info_span!(
            "generate",
            project_id,
            request_id = %Uuid::new_v4(),
            files = file_urls.len()
        );

        let outcome = self
            .run(file_urls, enable_fallback, cancel)
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        match &outcome {
            Ok(generation) => info!(model = %generation.model, "generation succeeded"),
            Err(GenerationError::Cancelled) => info!("generation cancelled by caller"),
            Err(GenerationError::FallbackExhausted { last, .. }) => {
                error!(last_error = %last, "all models failed")
            }
            Err(e) => error!(error = %e, "generation failed"),
        }
        outcome
    }

    async fn run(
        &self,
        file_urls: &[String],
        enable_fallback: bool,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let files = self.fetcher.fetch(file_urls, cancel).await?;
        let prepared = Prepared {
            messages: prompt::build_messages(&files),
            options: self.options.clone(),
        };

        let Some((default, fallbacks)) = self.models.split_first() else {
            return Err(GenerationError::InvalidInput(
                "model sequence is empty".to_string(),
            ));
        };

        if !enable_fallback {
            return self.attempt(default, &prepared, cancel).await;
        }

        let last_index = fallbacks.len();
        let mut last_error = None;
        for (i, model) in self.models.iter().enumerate() {
            let err = match self.attempt(model, &prepared, cancel).await {
                Ok(generation) => return Ok(generation),
                Err(err) => err,
            };

            match next_step(err, i == last_index) {
                Step::Stop(err) => return Err(err),
                Step::Continue(err) => {
                    warn!(model = %model, error = %err, "model attempt failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(last) => Err(GenerationError::FallbackExhausted {
                attempts: self.models.len(),
                last: Box::new(last),
            }),
            None => Err(GenerationError::InvalidInput(
                "model sequence is empty".to_string(),
            )),
        }
    }

    async fn attempt(
        &self,
        model: &str,
        prepared: &Prepared,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let options = GenerateOptions {
            model: Some(model.to_string()),
            ..prepared.options.clone()
        };
        let completion = self
            .client
            .generate(&prepared.messages, &options, cancel)
            .await?;
        let result = parse_generation(&completion.content)?;

        Ok(Generation {
            result,
            model: completion.model,
            usage: completion.usage,
        })
    }
}
