//! Error types for the knowledge base, the LLM backend and core construction.

use thiserror::Error;

/// Failure to load or parse a knowledge-base snapshot.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("knowledge base unreadable at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("knowledge base malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures inside the LLM backend. None of these cross the backend boundary
/// on the answer path; they are logged and replaced by a fixed apology.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY environment variable or api_key in the config file is not set")]
    MissingCredentials,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed model response: {0}")]
    InvalidResponse(String),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("could not persist config to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced while assembling the core pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
