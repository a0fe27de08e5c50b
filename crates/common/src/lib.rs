//! Shared building blocks for the storefront and dashboard services.
//!
//! - `ChannelManager`: long-lived realtime WebSocket connection with
//!   heartbeats, reconnection and a command channel for teardown
//! - `ChangeHandler`: trait a subscriber implements to receive change frames
//! - `RecentWindow`: bounded most-recent-first window used by live feeds

pub mod change_handler;
pub mod channel_manager;
pub mod error;
pub mod messages;
pub mod window;

pub use change_handler::ChangeHandler;
pub use channel_manager::{ChannelManager, ChannelManagerConfig};
pub use error::{Error, Result};
pub use messages::ChannelCommand;
pub use window::{prepend_bounded, RecentWindow};
