//! Control messages for a running realtime channel.

/// Commands that can be sent to a `ChannelManager` while it is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Ask the handler to resynchronize its state (e.g. refetch a snapshot).
    Resync,
    /// Leave the joined topic and close the socket. The manager exits.
    Shutdown,
}
