//! Core data types that flow through the generation pipeline.
//!
//! All of these are transient: they are built for one generation request and
//! dropped once the result has been handed back to the caller.

use serde::{Deserialize, Serialize};

/// Raw text of one remote file, as fetched by [`crate::fetch::FileFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub url: String,
    pub content: String,
    /// Body length in bytes as received, before any UTF-8 repair.
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters. Ranges are checked by
/// [`crate::completion::validate_parameters`] before any request is sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationParameters {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
}

/// A structured-output request: the schema the model must answer with.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Overrides the configured default model for this call.
    pub model: Option<String>,
    pub parameters: Option<GenerationParameters>,
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A successful completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub model: String,
    /// The model's message content, untouched.
    pub content: String,
    /// Parsed JSON when a response format was requested and the content
    /// parsed; `None` on graceful degradation to raw text.
    pub structured: Option<serde_json::Value>,
    pub usage: Option<Usage>,
}

/// The parsed `{description, technologies}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub description: String,
    pub technologies: Vec<String>,
}

/// A parsed result together with the model that produced it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub result: GenerationResult,
    pub model: String,
    pub usage: Option<Usage>,
}
