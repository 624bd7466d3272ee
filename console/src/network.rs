//! WebSocket console channel to the game server
//!
//! Every command gets its own connection: connect, send one request, wait for
//! the reply carrying the same identifier, close. Nothing survives between
//! calls, so a hung server can never pile up stale sockets on our side.

use crate::error::RconError;
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use log::{debug, warn};
use shared::{RconReply, RconRequest};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

/// Request/response access to the server console
///
/// Implementations hold no clock. Callers that need a deadline race the
/// returned future against one and drop it on expiry.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn send(&self, command: &str, identifier: i32) -> Result<RconReply, RconError>;

    /// Points the channel at a new address or secret after a config reload
    fn retarget(&mut self, _address: &str, _password: &str) {}
}

#[derive(Debug, Clone)]
pub struct WebRconClient {
    address: String,
    password: String,
}

impl WebRconClient {
    pub fn new(address: &str, password: &str) -> Self {
        Self {
            address: address.to_string(),
            password: password.to_string(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The secret travels as the handshake path
    pub fn endpoint(&self) -> String {
        format!("ws://{}/{}", self.address, self.password)
    }
}

#[async_trait]
impl CommandChannel for WebRconClient {
    async fn send(&self, command: &str, identifier: i32) -> Result<RconReply, RconError> {
        let request = RconRequest::new(identifier, command);
        let payload = serde_json::to_string(&request).map_err(RconError::Encode)?;

        let (mut socket, _) =
            connect_async(self.endpoint())
                .await
                .map_err(|source| RconError::Connect {
                    address: self.address.clone(),
                    source,
                })?;

        debug!("Sending command {} to {}: {}", identifier, self.address, command);

        let result = match socket.send(Message::Text(payload)).await {
            Ok(()) => await_reply(&mut socket, identifier).await,
            Err(e) => Err(RconError::Send(e)),
        };

        if let Err(e) = socket.close(None).await {
            debug!("Closing console connection to {} failed: {}", self.address, e);
        }

        result
    }

    fn retarget(&mut self, address: &str, password: &str) {
        self.address = address.to_string();
        self.password = password.to_string();
    }
}

/// Reads frames until the reply correlated with `identifier` shows up
///
/// Broadcast output (identifier -1) and replies to other requests are logged
/// and skipped.
pub async fn await_reply<S>(stream: &mut S, identifier: i32) -> Result<RconReply, RconError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let message = frame.map_err(RconError::Receive)?;

        let Some(reply) = decode_frame(message)? else {
            continue;
        };

        if reply.identifier == identifier {
            return Ok(reply);
        }

        if reply.is_broadcast() {
            debug!("Skipping broadcast output: {}", reply.message);
        } else {
            warn!(
                "Skipping reply for identifier {} while waiting for {}",
                reply.identifier, identifier
            );
        }
    }

    Err(RconError::Closed)
}

/// Decodes one WebSocket frame; control frames yield `None`
fn decode_frame(message: Message) -> Result<Option<RconReply>, RconError> {
    let payload = match message {
        Message::Text(text) => text,
        Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Message::Close(_) => return Err(RconError::Closed),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Ok(None),
    };

    serde_json::from_str::<RconReply>(&payload)
        .map(Some)
        .map_err(|source| RconError::Malformed { payload, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn text(raw: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(raw.to_string()))
    }

    #[test]
    fn test_endpoint_carries_secret_in_path() {
        let client = WebRconClient::new("127.0.0.1:28016", "hunter2");
        assert_eq!(client.endpoint(), "ws://127.0.0.1:28016/hunter2");
    }

    #[test]
    fn test_endpoint_with_empty_secret() {
        let client = WebRconClient::new("10.0.0.5:28016", "");
        assert_eq!(client.endpoint(), "ws://10.0.0.5:28016/");
    }

    #[test]
    fn test_retarget_updates_endpoint() {
        let mut client = WebRconClient::new("127.0.0.1:28016", "old");
        client.retarget("127.0.0.1:28017", "new");
        assert_eq!(client.address(), "127.0.0.1:28017");
        assert_eq!(client.endpoint(), "ws://127.0.0.1:28017/new");
    }

    #[test]
    fn test_matching_reply_is_returned() {
        let mut frames = stream::iter(vec![text(
            r#"{"Message":"ok","Identifier":42,"Type":"Generic"}"#,
        )]);
        let reply = tokio_test::block_on(await_reply(&mut frames, 42)).unwrap();
        assert_eq!(reply.identifier, 42);
        assert_eq!(reply.message, "ok");
    }

    #[test]
    fn test_broadcast_and_foreign_replies_are_skipped() {
        let mut frames = stream::iter(vec![
            text(r#"{"Message":"[chat] hello","Identifier":-1,"Type":"Chat"}"#),
            text(r#"{"Message":"someone else","Identifier":7}"#),
            Ok(Message::Ping(vec![1, 2, 3])),
            text(r#"{"Message":"mine","Identifier":42}"#),
            text(r#"{"Message":"after","Identifier":42}"#),
        ]);
        let reply = tokio_test::block_on(await_reply(&mut frames, 42)).unwrap();
        assert_eq!(reply.message, "mine");
    }

    #[test]
    fn test_binary_frames_are_decoded() {
        let mut frames = stream::iter(vec![Ok(Message::Binary(
            br#"{"Message":"bin","Identifier":3}"#.to_vec(),
        ))]);
        let reply = tokio_test::block_on(await_reply(&mut frames, 3)).unwrap();
        assert_eq!(reply.message, "bin");
    }

    #[test]
    fn test_stream_end_without_reply() {
        let mut frames = stream::iter(vec![text(r#"{"Message":"x","Identifier":-1}"#)]);
        let err = tokio_test::block_on(await_reply(&mut frames, 1)).unwrap_err();
        assert!(matches!(err, RconError::Closed));
    }

    #[test]
    fn test_close_frame_ends_wait() {
        let mut frames = stream::iter(vec![
            Ok(Message::Close(None)),
            text(r#"{"Message":"too late","Identifier":1}"#),
        ]);
        let err = tokio_test::block_on(await_reply(&mut frames, 1)).unwrap_err();
        assert!(matches!(err, RconError::Closed));
    }

    #[test]
    fn test_malformed_reply_is_an_error() {
        let mut frames = stream::iter(vec![text("not json at all")]);
        let err = tokio_test::block_on(await_reply(&mut frames, 1)).unwrap_err();
        match err {
            RconError::Malformed { payload, .. } => assert_eq!(payload, "not json at all"),
            other => panic!("Unexpected error: {}", other),
        }
    }

    #[test]
    fn test_transport_error_is_surfaced() {
        let mut frames = stream::iter(vec![Err(tungstenite::Error::ConnectionClosed)]);
        let err = tokio_test::block_on(await_reply(&mut frames, 1)).unwrap_err();
        assert!(matches!(err, RconError::Receive(_)));
    }
}
