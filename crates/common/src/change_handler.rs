//! Handler trait for realtime change subscribers.

use crate::error::Result;
use crate::messages::ChannelCommand;
use async_trait::async_trait;

/// Trait that realtime subscribers implement to consume change frames.
/// The `ChannelManager` calls these methods serially from a single task,
/// so implementations never see two callbacks at once.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    /// Returns the WebSocket URL to connect to.
    fn url(&self) -> &str;

    /// Message sent immediately after each connection (topic join).
    /// Return None if no join is needed.
    fn join_message(&self) -> Option<String>;

    /// Application-level heartbeat sent on every heartbeat tick.
    /// Returning None falls back to a WebSocket ping frame.
    fn heartbeat_message(&self) -> Option<String> {
        None
    }

    /// Message sent before the socket is closed on shutdown (topic leave).
    fn leave_message(&self) -> Option<String> {
        None
    }

    /// Called when a text frame is received.
    async fn on_message(&self, msg: &str) -> Result<()>;

    /// Called when a binary frame is received. Ignored by default.
    async fn on_binary_message(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Called when the connection is lost (before the reconnect attempt).
    async fn on_disconnect(&self) {}

    /// Called after every successful connection. `connection` starts at 1,
    /// so any value above 1 means the socket was re-established.
    async fn on_connected(&self, _connection: u64) {}

    /// Handle a control command other than shutdown.
    /// Returns a frame to send on the socket, if any.
    async fn handle_command(&self, cmd: ChannelCommand) -> Option<String>;
}
