use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the voice control connection (spec §7 "ControlClose", "Handshake").
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("websocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode/decode a gateway payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("control connection closed with terminal code {0:?}")]
    ControlClosedTerminal(Option<u16>),
    #[error("control connection closed resumably with code {0:?}")]
    ControlClosedResumable(Option<u16>),
    #[error("control connection was stopped before the awaited event arrived")]
    Stopped,
}
