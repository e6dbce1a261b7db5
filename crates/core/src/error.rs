use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("{tool} not found on PATH")]
    ToolNotFound { tool: String },

    #[error("worker task failed: {0}")]
    Task(String),

    #[error("could not move {from} to {to}: {reason}")]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("Gemini extraction failed after retries ({attempts} attempts): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("sheet rejected append: {0}")]
    Rejected(String),

    #[error("invalid export file {path}: {details}")]
    InvalidFile { path: PathBuf, details: String },
}
