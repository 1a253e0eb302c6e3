//! Prompt and response-format construction for project descriptions.

use serde_json::json;

use crate::config::CompletionConfig;
use crate::models::{FetchedFile, GenerationParameters, Message, ResponseFormat};

pub const SCHEMA_NAME: &str = "project_details";

const SYSTEM_PROMPT: &str = "You write concise portfolio entries for software projects. \
Given source files from a repository, reply with a JSON object containing \
\"description\": two to four sentences describing what the project does and how, \
and \"technologies\": the languages, frameworks and notable libraries it uses. \
Reply with the JSON object only.";

/// Builds the system and user messages for a set of fetched files.
pub fn build_messages(files: &[FetchedFile]) -> Vec<Message> {
    let mut user = String::from("Describe the project these files belong to.\n");
    for file in files {
        user.push_str(&format!(
            "\nFile: {}\n```{}\n{}\n```\n",
            file.url,
            fence_language(&file.url),
            file.content.trim_end()
        ));
    }

    vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
}

/// The strict `{description, technologies}` response format.
pub fn project_response_format() -> ResponseFormat {
    ResponseFormat {
        name: SCHEMA_NAME.to_string(),
        strict: true,
        schema: json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "technologies": {
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["description", "technologies"],
            "additionalProperties": false
        }),
    }
}

pub fn default_parameters(config: &CompletionConfig) -> GenerationParameters {
    GenerationParameters {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        ..Default::default()
    }
}

fn fence_language(url: &str) -> &str {
    let name = url.rsplit('/').next().unwrap_or(url);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 8 => ext,
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate_schema;

    fn file(url: &str, content: &str) -> FetchedFile {
        FetchedFile {
            url: url.to_string(),
            content: content.to_string(),
            size_bytes: content.len(),
        }
    }

    #[test]
    fn test_messages_include_every_file() {
        let files = vec![
            file("https://raw.githubusercontent.com/u/r/main/a.ts", "const x=1;"),
            file("https://raw.githubusercontent.com/u/r/main/Cargo.toml", "[package]\n"),
        ];
        let messages = build_messages(&files);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, crate::models::Role::System);

        let user = &messages[1].content;
        assert!(user.contains("File: https://raw.githubusercontent.com/u/r/main/a.ts\n```ts\nconst x=1;\n```"));
        assert!(user.contains("```toml\n[package]\n```"));
    }

    #[test]
    fn test_generated_schema_is_valid() {
        let format = project_response_format();
        assert!(format.strict);
        assert!(validate_schema(&format.schema));
    }

    #[test]
    fn test_fence_language() {
        assert_eq!(fence_language("https://h/u/r/main/src/lib.rs"), "rs");
        assert_eq!(fence_language("https://h/u/r/main/Makefile"), "");
        assert_eq!(fence_language("https://h/u/r/main/.env"), "env");
    }
}
