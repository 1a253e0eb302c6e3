//! Parsing of model output into a [`GenerationResult`].
//!
//! Models wrap JSON in markdown fences, prepend chatter, or leave `//`
//! comments in their output even when asked not to. [`parse_generation`]
//! normalises that text and extracts the `{description, technologies}` pair.
//! It performs no I/O.

use serde_json::Value;
use thiserror::Error;

use crate::models::GenerationResult;

const FENCE: &str = "```";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("failed to parse model response as JSON: {0}")]
    Json(String),
    #[error("model response has an unexpected shape: {0}")]
    Format(String),
}

/// Strips one outer markdown code fence, including its info string
/// (` ```json `). Inner fences are left alone. Text that already starts
/// with a JSON object or array is returned trimmed but otherwise untouched.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }

    let (Some(open), Some(close)) = (trimmed.find(FENCE), trimmed.rfind(FENCE)) else {
        return trimmed;
    };
    if close <= open {
        return trimmed;
    }

    let inner = &trimmed[open + FENCE.len()..close];
    let inner = match inner.split_once('\n') {
        Some((info, body)) if is_info_string(info) => body,
        _ => strip_inline_info(inner),
    };
    inner.trim()
}

/// Drops an info string written on the same line as the JSON
/// (` ```json{"a":1}``` `).
fn strip_inline_info(inner: &str) -> &str {
    let rest = inner
        .trim_start()
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    if rest.trim_start().starts_with(['{', '[']) {
        rest
    } else {
        inner
    }
}

fn is_info_string(line: &str) -> bool {
    let line = line.trim();
    !line.contains(['{', '[', ' '])
}

fn strip_comment_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses raw model output into a [`GenerationResult`].
///
/// `technologies` entries that are not strings, or are blank after trimming,
/// are dropped. Duplicates are kept.
pub fn parse_generation(raw: &str) -> Result<GenerationResult, ParseError> {
    let cleaned = strip_comment_lines(strip_code_fence(raw));
    let json: Value =
        serde_json::from_str(cleaned.trim()).map_err(|e| ParseError::Json(e.to_string()))?;

    let description = json
        .get("description")
        .ok_or_else(|| ParseError::Format("missing 'description'".to_string()))?
        .as_str()
        .ok_or_else(|| ParseError::Format("'description' must be a string".to_string()))?
        .trim()
        .to_string();

    let technologies: Vec<String> = json
        .get("technologies")
        .ok_or_else(|| ParseError::Format("missing 'technologies'".to_string()))?
        .as_array()
        .ok_or_else(|| ParseError::Format("'technologies' must be an array".to_string()))?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if description.is_empty() {
        return Err(ParseError::Format("'description' is empty".to_string()));
    }
    if technologies.is_empty() {
        return Err(ParseError::Format(
            "'technologies' has no non-empty entries".to_string(),
        ));
    }

    Ok(GenerationResult {
        description,
        technologies,
    })
}
