use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
}
