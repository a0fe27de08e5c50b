//! Realtime channel frames.
//!
//! The backend's change feed speaks Phoenix-channel JSON frames:
//!
//! ```text
//! {"topic": "realtime:<channel>", "event": "phx_join", "payload": {...}, "ref": "1"}
//! {"topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": "2"}
//! {"topic": "realtime:<channel>", "event": "postgres_changes",
//!  "payload": {"data": {"type": "INSERT", "table": "orders", "record": {...}}}}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

/// WebSocket path of the realtime endpoint.
pub const REALTIME_PATH: &str = "/realtime/v1/websocket";

/// Protocol version negotiated in the connection URL.
pub const PROTOCOL_VSN: &str = "1.0.0";

/// Build the realtime WebSocket URL from the REST base URL.
///
/// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub fn realtime_url(base_url: &str, api_key: &str) -> Result<String> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::InvalidResponse(format!(
                "unsupported scheme for realtime: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::InvalidResponse("cannot set realtime scheme".to_string()))?;
    url.set_path(REALTIME_PATH);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url.to_string())
}

/// Row-change event kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeEvent {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "*")]
    All,
}

/// Server-side filter for a change subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeFilter {
    pub event: ChangeEvent,
    pub schema: String,
    pub table: String,
}

impl ChangeFilter {
    /// Inserts into a table of the `public` schema.
    pub fn inserts(table: impl Into<String>) -> Self {
        Self {
            event: ChangeEvent::Insert,
            schema: "public".to_string(),
            table: table.into(),
        }
    }
}

/// A single Phoenix frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// Topic name for a named channel.
pub fn topic(channel: &str) -> String {
    format!("realtime:{}", channel)
}

fn encode(frame: &PhoenixFrame) -> String {
    // Serializing a struct of strings and a Value cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Join a channel with the given change filters.
pub fn join_message(channel: &str, filters: &[ChangeFilter], access_token: &str, reference: u64) -> String {
    encode(&PhoenixFrame {
        topic: topic(channel),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": filters,
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    })
}

/// Leave a channel.
pub fn leave_message(channel: &str, reference: u64) -> String {
    encode(&PhoenixFrame {
        topic: topic(channel),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    })
}

/// Connection-level heartbeat.
pub fn heartbeat_message(reference: u64) -> String {
    encode(&PhoenixFrame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    })
}

/// A row change delivered on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub event: ChangeEvent,
    /// The new row for inserts/updates. `Value::Null` when absent.
    pub record: Value,
    pub commit_timestamp: Option<String>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A row change.
    Change(RowChange),
    /// Reply to a join/leave/heartbeat. `ok` is false when the server refused.
    Reply { topic: String, ok: bool, response: Value },
    /// Server-side channel error or close.
    ChannelError { topic: String, reason: String },
    /// Anything else (presence, system notices).
    Other { topic: String, event: String },
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(default)]
    table: String,
    #[serde(rename = "type", alias = "eventType")]
    event: ChangeEvent,
    #[serde(default, alias = "new")]
    record: Value,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

/// Decode a raw text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame> {
    let frame: PhoenixFrame = serde_json::from_str(text)?;

    match frame.event.as_str() {
        "postgres_changes" => {
            // Newer servers nest the change under `data`.
            let data = frame
                .payload
                .get("data")
                .cloned()
                .unwrap_or_else(|| frame.payload.clone());
            let change: ChangeData = serde_json::from_value(data)?;
            Ok(InboundFrame::Change(RowChange {
                table: change.table,
                event: change.event,
                record: change.record,
                commit_timestamp: change.commit_timestamp,
            }))
        }
        "phx_reply" => {
            let ok = frame.payload.get("status").and_then(Value::as_str) == Some("ok");
            let response = frame.payload.get("response").cloned().unwrap_or(Value::Null);
            Ok(InboundFrame::Reply {
                topic: frame.topic,
                ok,
                response,
            })
        }
        "phx_error" | "phx_close" => Ok(InboundFrame::ChannelError {
            reason: frame.event.clone(),
            topic: frame.topic,
        }),
        _ => Ok(InboundFrame::Other {
            topic: frame.topic,
            event: frame.event,
        }),
    }
}
