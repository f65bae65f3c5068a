//! Error type shared by the library modules.
//!
//! Strategy and builder operations are infallible for well-formed input, so most
//! variants here come from the streaming client ([`crate::api`]) or from loading
//! state and configuration files.

use thiserror::Error;

/// Errors surfaced by `awful_rp`.
#[derive(Debug, Error)]
pub enum RpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// A streamed chunk did not contain any complete JSON object.
    #[error("No JSON object found in completion chunk: {0:?}")]
    MissingJsonObject(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Unknown character: {0}")]
    UnknownCharacter(String),
}
