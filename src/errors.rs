use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DustboxError {
    #[error("not found: {0}")]
    #[diagnostic(code(dustbox::not_found))]
    NotFound(String),

    #[error("credential expired: {0}")]
    #[diagnostic(code(dustbox::expired))]
    Expired(String),

    #[error("credential revoked: {0}")]
    #[diagnostic(code(dustbox::revoked))]
    Revoked(String),

    #[error("conflict: {0}")]
    #[diagnostic(code(dustbox::conflict))]
    Conflict(String),

    #[error("malformed record: {0}")]
    #[diagnostic(code(dustbox::data_format))]
    DataFormat(String),

    #[error("storage error: {0}")]
    #[diagnostic(code(dustbox::storage))]
    Storage(String),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(dustbox::serde))]
    Serde(#[from] serde_json::Error),
}
