use thiserror::Error;

/// Errors surfaced by the face pipeline.
#[derive(Error, Debug)]
pub enum FacepipeError {
    #[error("invalid shape: buffer holds {actual} bytes but shape requires {expected}")]
    InvalidShape { expected: usize, actual: usize },
    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("model fetch error: {0}")]
    ModelFetch(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("inference error: {0}")]
    Inference(#[from] ort::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FacepipeError>;
