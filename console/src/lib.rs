//! # Server Console Library
//!
//! Client side of the game server's WebSocket remote console (WebRcon).
//!
//! ## Protocol
//!
//! A request is one JSON text frame:
//!
//! ```json
//! { "Identifier": 1, "Message": "status", "Name": "WebRcon" }
//! ```
//!
//! The server answers with frames shaped like
//! `{ "Message": "...", "Identifier": 1, "Type": "Generic", "Stacktrace": "" }`.
//! Console output that was not requested (chat, log lines) arrives with
//! identifier `-1`. The shared secret is the path of the handshake URL.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use console::{CommandChannel, WebRconClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WebRconClient::new("127.0.0.1:28016", "secret");
//!     let reply = tokio::time::timeout(Duration::from_secs(2), client.send("version", 1)).await??;
//!     println!("{}", reply.message);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;

pub use error::RconError;
pub use network::{CommandChannel, WebRconClient};
