use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid sample: {0}")]
    InvalidSample(String),
    #[error("socket not open")]
    NotConnected,
}

pub type RelayResult<T> = Result<T, RelayError>;
