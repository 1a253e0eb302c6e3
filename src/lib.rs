//! # Folio
//!
//! AI-assisted descriptions for portfolio projects.
//!
//! Folio fetches a handful of source files from a trusted raw-content host,
//! asks a chat-completion API for a short description and technology list
//! using a strict JSON-schema response format, and falls back across a
//! configured sequence of models when one is unavailable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────────────┐
//! │ FileFetcher │──▶│ FallbackOrchestrator │──▶│ CompletionClient │
//! │ raw content │   │  model 1, 2, ... n   │   │ retry + backoff  │
//! └─────────────┘   └──────────┬───────────┘   └──────────────────┘
//!                              ▼
//!                       ┌─────────────┐
//!                       │ parse (JSON │
//!                       │ + fences)   │
//!                       └─────────────┘
//! ```
//!
//! The HTTP server and CLI sit on top of the orchestrator and own the
//! per-project quota.
//!
//! ## Quick Start
//!
//! ```bash
//! folio generate --project demo https://raw.githubusercontent.com/u/r/main/src/main.rs
//! folio serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`fetch`] | Trusted-host file fetching |
//! | [`schema`] | Response schema validation |
//! | [`prompt`] | Prompt and response-format construction |
//! | [`completion`] | Chat-completion client |
//! | [`parse`] | Model output parsing |
//! | [`fallback`] | Multi-model orchestration |
//! | [`quota`] | Per-project generation quota |
//! | [`server`] | HTTP server |

pub mod completion;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fetch;
pub mod models;
pub mod parse;
pub mod prompt;
pub mod quota;
pub mod schema;
pub mod server;
