use crate::types::{AskExchange, UploadOutcome};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {path}")]
    DocumentNotFound { path: String },

    #[error("Upload response does not contain session_id")]
    MissingSessionId,

    #[error("Backend is not reachable: {message}")]
    Unreachable { message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Client-side contract of the RAG backend under evaluation.
///
/// The evaluation runner depends on this trait so tests can substitute a
/// scripted backend for the real HTTP client.
#[async_trait]
pub trait RagGateway: Send + Sync {
    /// Probe the backend. Succeeds on the first candidate URL that answers
    /// with any status below 500.
    async fn check_reachable(&self) -> GatewayResult<()>;

    /// Upload a document and return the session the backend opened for it.
    async fn upload_document(&self, path: &Path) -> GatewayResult<UploadOutcome>;

    /// Ask a question against a session. When `use_cache` is set, repeated
    /// questions within this gateway's lifetime are served from memory.
    async fn ask_question(
        &self,
        session_id: &str,
        question: &str,
        use_cache: bool,
    ) -> GatewayResult<AskExchange>;
}
