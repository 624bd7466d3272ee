use serde::{Deserialize, Serialize};

pub mod vdf;

/// Steam app id of the dedicated server
pub const SERVER_APP_ID: &str = "258550";
/// Steam app id of the game client
pub const CLIENT_APP_ID: &str = "252490";

pub const DEFAULT_RCON_ADDRESS: &str = "127.0.0.1:28016";
pub const WEBRCON_NAME: &str = "WebRcon";

/// Identifier the server stamps on console output nobody asked for
pub const BROADCAST_IDENTIFIER: i32 = -1;

pub const HEALTH_CHECK_COMMAND: &str = "version";
pub const SHUTDOWN_COMMAND: &str = "quit";

/// Reply type the server uses for failed commands
pub const ERROR_REPLY_TYPE: &str = "Error";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RconRequest {
    #[serde(rename = "Identifier")]
    pub identifier: i32,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Name")]
    pub name: String,
}

impl RconRequest {
    pub fn new(identifier: i32, message: &str) -> Self {
        Self {
            identifier,
            message: message.to_string(),
            name: WEBRCON_NAME.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RconReply {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Identifier")]
    pub identifier: i32,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Stacktrace", default)]
    pub stacktrace: String,
}

impl RconReply {
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_REPLY_TYPE
    }

    pub fn is_broadcast(&self) -> bool {
        self.identifier == BROADCAST_IDENTIFIER
    }
}
