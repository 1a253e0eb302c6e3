//! Error taxonomy for the generation pipeline.
//!
//! Every failure that crosses the public boundary of [`crate::fetch`],
//! [`crate::completion`] or [`crate::fallback`] is a [`GenerationError`].
//! Variants map one-to-one onto the categories the fallback policy and the
//! HTTP layer need to distinguish:
//!
//! | Variant | Retried in-model | Triggers fallback |
//! |---------|------------------|-------------------|
//! | `InvalidInput` | no | no |
//! | `Fetch` | no | no (aborts before any model) |
//! | `ServiceUnavailable` (5xx, network) | yes | yes |
//! | `RateLimited` | yes | yes |
//! | `Authorization` | no | no |
//! | `Http` (404) | no | yes |
//! | `Http` (other 4xx) | no | no |
//! | `ResponseFormat` | no | yes |
//! | `Parse` | no | yes, unless last model |
//! | `Cancelled` | no | no |

use thiserror::Error;

use crate::parse::ParseError;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Malformed URL, oversized file, bad message list, bad schema or
    /// out-of-range generation parameter.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The file host rejected or failed a fetch.
    #[error("failed to fetch {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Server errors or transport failures persisted past the attempt ceiling.
    /// Carries no provider detail.
    #[error("completion service unavailable after {attempts} attempts")]
    ServiceUnavailable { attempts: u32 },

    #[error("completion service rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("completion service rejected credentials ({status}): {message}")]
    Authorization { status: u16, message: String },

    #[error("completion service returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Structured output missing, unparsable or not matching the schema.
    #[error("response format error: {0}")]
    ResponseFormat(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Every model in the sequence failed with a retryable error. The last
    /// underlying error is kept for diagnostics but never rendered.
    #[error("all {attempts} configured models failed; try again later")]
    FallbackExhausted {
        attempts: usize,
        #[source]
        last: Box<GenerationError>,
    },

    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status reported by the remote side, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => *status,
            Self::Authorization { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Builds the error for a non-2xx completion response that is not retried
    /// inside the client.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Authorization { status, message },
            _ => Self::Http { status, message },
        }
    }
}
