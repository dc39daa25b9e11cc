use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
