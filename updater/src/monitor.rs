//! Health probe for the game server console

use console::CommandChannel;
use log::{debug, warn};
use shared::HEALTH_CHECK_COMMAND;
use std::time::Duration;
use tokio::time::timeout;

/// Sends the health command and waits at most `limit` for its reply
///
/// Any failure (timeout, refused connection, error reply) reads as `false`.
/// On timeout the in-flight request is dropped, which closes its socket, so a
/// late reply has nowhere to land.
pub async fn is_available(channel: &dyn CommandChannel, identifier: i32, limit: Duration) -> bool {
    match timeout(limit, channel.send(HEALTH_CHECK_COMMAND, identifier)).await {
        Ok(Ok(reply)) if reply.is_error() => {
            warn!("Health check returned an error: {}", reply.message);
            false
        }
        Ok(Ok(reply)) => {
            debug!("Health check reply: {}", reply.message);
            true
        }
        Ok(Err(e)) => {
            warn!("Health check failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Health check timed out after {:?}", limit);
            false
        }
    }
}
