use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of a single console round trip
///
/// None of these are retried by the channel itself; callers decide whether a
/// failed command is worth repeating on their own schedule.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("failed to send command: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("failed to receive reply: {0}")]
    Receive(#[source] tungstenite::Error),

    #[error("connection closed before a reply arrived")]
    Closed,

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed reply {payload:?}: {source}")]
    Malformed {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
}
