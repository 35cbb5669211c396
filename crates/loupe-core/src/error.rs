use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoupeError {
    // Configuration errors — raised before any node executes
    #[error("config error: {0}")]
    Config(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Collaborator errors
    #[error("search request failed: {0}")]
    Search(String),

    #[error("rerank request failed: {0}")]
    Rerank(String),

    #[error("metrics store error: {0}")]
    Metrics(String),

    // Graph errors
    #[error("graph error: {0}")]
    Graph(String),

    #[error("run cancelled")]
    Cancelled,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoupeError>;
