use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpfsError>;

#[derive(Debug, Error)]
pub enum IpfsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Gateway error (status {status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid CID: {0:?}")]
    InvalidCid(String),
}

impl From<reqwest::Error> for IpfsError {
    fn from(err: reqwest::Error) -> Self {
        IpfsError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for IpfsError {
    fn from(err: serde_json::Error) -> Self {
        IpfsError::Parse(err.to_string())
    }
}
