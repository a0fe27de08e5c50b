//! Live feed of the most recent orders.
//!
//! On activation the feed loads the newest orders, then joins the backend's
//! realtime channel for inserts on `orders`. Each accepted insert is
//! prepended to a fixed-size window without re-querying. The window is a
//! best-effort cache: a fresh snapshot always replaces it, which is what
//! happens after a reconnect or an explicit resync.

use crate::component::ComponentState;
use crate::error::{DashboardError, Result};
use crate::format::{format_amount, format_time_ago, item_summary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ChangeHandler, ChannelCommand, ChannelManager, ChannelManagerConfig, RecentWindow};
use external_services::backend::realtime::{self, ChangeEvent, ChangeFilter, InboundFrame};
use external_services::{Backend, Order, OrderRecord, Query};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const ORDERS_TABLE: &str = "orders";
pub const ORDER_COLUMNS: &str = "id, customer_name, total_price, created_at, order_items";
pub const CHANNEL_NAME: &str = "recent-sales-feed";

/// Placeholder rows rendered while the first snapshot loads.
pub const LOADING_ROWS: usize = 3;
pub const EMPTY_MESSAGE: &str = "No recent sales";

const COMMAND_BUFFER: usize = 16;

/// Published state of the feed.
pub type FeedState = ComponentState<RecentWindow<OrderRecord>>;

/// Snapshot loader, realtime subscriber and merger for recent orders.
pub struct RecentSalesFeed {
    backend: Arc<dyn Backend>,
    realtime_url: String,
    access_token: String,
    capacity: usize,
    state: watch::Sender<FeedState>,
    next_ref: AtomicU64,
}

impl RecentSalesFeed {
    pub fn new(
        backend: Arc<dyn Backend>,
        realtime_url: impl Into<String>,
        access_token: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let (state, _) = watch::channel(ComponentState::Idle);
        Self {
            backend,
            realtime_url: realtime_url.into(),
            access_token: access_token.into(),
            capacity,
            state,
            next_ref: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receiver notified on every change to the window.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Orders currently in the window, newest first.
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.state
            .borrow()
            .data()
            .map(RecentWindow::to_vec)
            .unwrap_or_default()
    }

    pub fn view(&self, now: DateTime<Utc>) -> RecentSalesView {
        render_recent_sales(&self.state.borrow(), now)
    }

    fn next_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    /// Fetch the newest orders and replace the window with them.
    ///
    /// The first load moves the feed out of `Loading` even when it fails,
    /// leaving an empty list. A failed reload keeps whatever is on display.
    pub async fn load_snapshot(&self) -> bool {
        let first_load = !self.state.borrow().is_ready();
        if first_load {
            self.state.send_modify(|state| {
                state.begin_loading();
            });
        }

        match self.fetch_recent().await {
            Ok(orders) => {
                info!("Loaded {} recent orders", orders.len());
                let capacity = self.capacity;
                self.state.send_modify(move |state| match state.data_mut() {
                    Some(window) => window.replace(orders),
                    None => state.finish(RecentWindow::from_snapshot(orders, capacity)),
                });
                true
            }
            Err(e) => {
                warn!("Failed to load recent orders: {}", e);
                counter!("dashboard_snapshot_errors_total").increment(1);
                if first_load {
                    let capacity = self.capacity;
                    self.state
                        .send_modify(move |state| state.finish(RecentWindow::new(capacity)));
                }
                false
            }
        }
    }

    async fn fetch_recent(&self) -> external_services::Result<Vec<OrderRecord>> {
        let query = Query::table(ORDERS_TABLE)
            .select(ORDER_COLUMNS)
            .order(Order::desc("created_at"))
            .limit(self.capacity);
        let rows = self.backend.fetch(&query).await?;
        Ok(rows.into_iter().filter_map(parse_order).collect())
    }

    /// Merge an inserted row. Returns false when the row was dropped.
    pub fn apply_insert(&self, record: Value) -> bool {
        let Some(order) = parse_order(record) else {
            return false;
        };

        let order_id = order.id.clone();
        let accepted = self.state.send_if_modified(move |state| match state.data_mut() {
            Some(window) => {
                window.push(order);
                true
            }
            None => false,
        });

        if accepted {
            debug!("Merged order {} into recent sales", order_id);
            counter!("dashboard_feed_updates_total").increment(1);
        } else {
            debug!("Ignoring order {} received before the snapshot", order_id);
        }
        accepted
    }
}

/// Validate a raw row. Rows missing a required field are dropped.
fn parse_order(record: Value) -> Option<OrderRecord> {
    match serde_json::from_value::<OrderRecord>(record) {
        Ok(order) => Some(order),
        Err(e) => {
            warn!("Dropping malformed order payload: {}", e);
            counter!("dashboard_feed_payloads_dropped_total").increment(1);
            None
        }
    }
}

#[async_trait]
impl ChangeHandler for RecentSalesFeed {
    fn url(&self) -> &str {
        &self.realtime_url
    }

    fn join_message(&self) -> Option<String> {
        Some(realtime::join_message(
            CHANNEL_NAME,
            &[ChangeFilter::inserts(ORDERS_TABLE)],
            &self.access_token,
            self.next_ref(),
        ))
    }

    fn heartbeat_message(&self) -> Option<String> {
        Some(realtime::heartbeat_message(self.next_ref()))
    }

    fn leave_message(&self) -> Option<String> {
        Some(realtime::leave_message(CHANNEL_NAME, self.next_ref()))
    }

    async fn on_message(&self, msg: &str) -> common::Result<()> {
        match realtime::parse_frame(msg) {
            Ok(InboundFrame::Change(change)) => {
                if change.table == ORDERS_TABLE && change.event == ChangeEvent::Insert {
                    self.apply_insert(change.record);
                } else {
                    debug!("Ignoring {:?} on {}", change.event, change.table);
                }
            }
            Ok(InboundFrame::Reply {
                topic,
                ok: false,
                response,
            }) => {
                return Err(common::Error::JoinRejected(format!("{}: {}", topic, response)));
            }
            Ok(InboundFrame::Reply { .. }) => {}
            Ok(InboundFrame::ChannelError { topic, reason }) => {
                warn!("Realtime channel {} reported {}", topic, reason);
            }
            Ok(InboundFrame::Other { topic, event }) => {
                debug!("Unhandled realtime event {} on {}", event, topic);
            }
            Err(e) => {
                warn!("Dropping malformed realtime frame: {}", e);
                counter!("dashboard_feed_payloads_dropped_total").increment(1);
            }
        }
        Ok(())
    }

    async fn on_disconnect(&self) {
        info!("Recent sales channel disconnected");
    }

    async fn on_connected(&self, connection: u64) {
        // Inserts made while the socket was down were never delivered.
        if connection > 1 {
            info!("Realtime reconnected, resynchronizing recent sales");
            self.load_snapshot().await;
        }
    }

    async fn handle_command(&self, cmd: ChannelCommand) -> Option<String> {
        match cmd {
            ChannelCommand::Resync => {
                self.load_snapshot().await;
            }
            ChannelCommand::Shutdown => {}
        }
        None
    }
}

/// Handle to an activated feed.
///
/// Dropping the handle detaches the realtime channel.
pub struct FeedHandle {
    feed: Arc<RecentSalesFeed>,
    command_tx: mpsc::Sender<ChannelCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandle {
    pub fn feed(&self) -> &Arc<RecentSalesFeed> {
        &self.feed
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.feed.subscribe()
    }

    /// Ask the channel task to refetch the snapshot.
    pub async fn resync(&self) -> Result<()> {
        self.command_tx
            .send(ChannelCommand::Resync)
            .await
            .map_err(|_| DashboardError::ChannelSend)
    }

    /// Leave the channel, close the socket and wait for the task to end.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown).await;
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Recent sales task failed: {:?}", e);
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.try_send(ChannelCommand::Shutdown);
    }
}

/// Load the first snapshot, then attach the realtime subscriber.
pub async fn activate(feed: Arc<RecentSalesFeed>, config: ChannelManagerConfig) -> FeedHandle {
    feed.load_snapshot().await;

    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let manager = ChannelManager::new(feed.clone(), config, command_rx);
    let task = tokio::spawn(async move {
        if let Err(e) = manager.run().await {
            error!("Recent sales channel stopped: {:?}", e);
        }
    });

    FeedHandle {
        feed,
        command_tx,
        task: Mutex::new(Some(task)),
    }
}

// =============================================================================
// View
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleRow {
    pub id: String,
    pub customer_name: String,
    pub summary: String,
    pub total: String,
    /// Lets clients recompute `time_ago` between pushes.
    pub created_at: DateTime<Utc>,
    pub time_ago: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecentSalesView {
    Loading { placeholder_rows: usize },
    Empty { message: &'static str },
    Items { rows: Vec<SaleRow> },
}

/// Render the feed. Relative times are computed against `now`.
pub fn render_recent_sales(state: &FeedState, now: DateTime<Utc>) -> RecentSalesView {
    match state.data() {
        None => RecentSalesView::Loading {
            placeholder_rows: LOADING_ROWS,
        },
        Some(window) if window.is_empty() => RecentSalesView::Empty {
            message: EMPTY_MESSAGE,
        },
        Some(window) => RecentSalesView::Items {
            rows: window
                .iter()
                .map(|order| SaleRow {
                    id: order.id.clone(),
                    customer_name: order.customer_name.clone(),
                    summary: item_summary(&order.order_items),
                    total: format_amount(order.total_price),
                    created_at: order.created_at,
                    time_ago: format_time_ago(order.created_at, now),
                })
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use external_services::testing::FakeBackend;
    use chrono::Duration;
    use serde_json::json;
    use futures::StreamExt;
    use std::time::Duration as StdDuration;
    use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, Message};

    fn order(id: &str, total: i64, minutes_ago: i64) -> Value {
        json!({
            "id": id,
            "customer_name": format!("Customer {}", id),
            "total_price": total,
            "created_at": (Utc::now() - Duration::minutes(minutes_ago)).to_rfc3339(),
            "order_items": [
                {"product_name": "BPC-157", "variation_name": "5mg", "quantity": 1, "price": total}
            ]
        })
    }

    fn insert_frame(record: Value) -> String {
        json!({
            "topic": "realtime:recent-sales-feed",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "orders",
                    "type": "INSERT",
                    "commit_timestamp": "2025-03-01T10:00:00Z",
                    "record": record
                }
            }
        })
        .to_string()
    }

    fn feed_with(backend: Arc<FakeBackend>, capacity: usize) -> RecentSalesFeed {
        RecentSalesFeed::new(backend, "ws://127.0.0.1:1/realtime/v1/websocket", "anon", capacity)
    }

    fn ids(feed: &RecentSalesFeed) -> Vec<String> {
        feed.orders().into_iter().map(|o| o.id).collect()
    }

    #[tokio::test]
    async fn test_insert_is_prepended_to_snapshot() {
        let backend = Arc::new(
            FakeBackend::new().with_rows("orders", vec![order("1", 500, 5), order("2", 300, 10)]),
        );
        let feed = feed_with(backend, 5);
        assert!(feed.load_snapshot().await);

        feed.on_message(&insert_frame(order("3", 100, 0))).await.unwrap();

        assert_eq!(ids(&feed), vec!["3", "1", "2"]);
    }

    #[tokio::test]
    async fn test_window_keeps_most_recent() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![]));
        let feed = feed_with(backend, 3);
        feed.load_snapshot().await;

        for i in 1..=7 {
            feed.on_message(&insert_frame(order(&i.to_string(), 100, 0)))
                .await
                .unwrap();
        }

        assert_eq!(ids(&feed), vec!["7", "6", "5"]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![order("1", 500, 5)]));
        let feed = feed_with(backend, 5);
        feed.load_snapshot().await;

        let missing_name = json!({"id": "9", "total_price": 10, "created_at": "2025-03-01T10:00:00Z"});
        feed.on_message(&insert_frame(missing_name)).await.unwrap();
        feed.on_message("{not json").await.unwrap();

        assert_eq!(ids(&feed), vec!["1"]);
    }

    #[tokio::test]
    async fn test_other_tables_are_ignored() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![]));
        let feed = feed_with(backend, 5);
        feed.load_snapshot().await;

        let frame = insert_frame(order("1", 100, 0)).replace("\"orders\"", "\"products\"");
        feed.on_message(&frame).await.unwrap();
        assert!(feed.orders().is_empty());
    }

    #[tokio::test]
    async fn test_failed_first_load_renders_empty_state() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_failing(true);
        let feed = feed_with(backend, 5);

        assert!(!feed.load_snapshot().await);
        assert_eq!(
            feed.view(Utc::now()),
            RecentSalesView::Empty {
                message: "No recent sales"
            }
        );
    }

    #[tokio::test]
    async fn test_failed_resync_keeps_prior_window() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![order("1", 500, 5)]));
        let feed = feed_with(backend.clone(), 5);
        feed.load_snapshot().await;

        backend.set_failing(true);
        assert_eq!(feed.handle_command(ChannelCommand::Resync).await, None);
        assert_eq!(ids(&feed), vec!["1"]);
    }

    #[tokio::test]
    async fn test_reconnect_refetches_snapshot() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![order("1", 500, 5)]));
        let feed = feed_with(backend.clone(), 5);
        feed.load_snapshot().await;

        feed.on_connected(1).await;
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);

        backend.set_rows("orders", vec![order("2", 800, 1), order("1", 500, 5)]);
        feed.on_connected(2).await;
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(ids(&feed), vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_rejected_join_is_an_error() {
        let feed = feed_with(Arc::new(FakeBackend::new()), 5);
        let reply = r#"{"topic":"realtime:recent-sales-feed","event":"phx_reply","ref":"1",
            "payload":{"status":"error","response":{"reason":"unauthorized"}}}"#;
        assert!(feed.on_message(reply).await.is_err());
    }

    #[test]
    fn test_channel_frames() {
        let feed = feed_with(Arc::new(FakeBackend::new()), 5);
        let join: Value = serde_json::from_str(&feed.join_message().unwrap()).unwrap();
        assert_eq!(join["topic"], "realtime:recent-sales-feed");
        assert_eq!(join["payload"]["config"]["postgres_changes"][0]["table"], "orders");
        assert_eq!(join["payload"]["access_token"], "anon");

        let leave: Value = serde_json::from_str(&feed.leave_message().unwrap()).unwrap();
        assert_eq!(leave["event"], "phx_leave");
        // References increase per frame.
        assert_ne!(join["ref"], leave["ref"]);
    }

    #[tokio::test]
    async fn test_render_rows() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![order("1", 12345, 5)]));
        let feed = feed_with(backend, 5);
        assert!(matches!(
            feed.view(Utc::now()),
            RecentSalesView::Loading { placeholder_rows: 3 }
        ));

        feed.load_snapshot().await;
        match feed.view(Utc::now()) {
            RecentSalesView::Items { rows } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].customer_name, "Customer 1");
                assert_eq!(rows[0].summary, "BPC-157 (5mg)");
                assert_eq!(rows[0].total, "₱12,345");
                assert_eq!(rows[0].time_ago, "5m ago");
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rows_keep_fraction_and_timestamp() {
        let mut row = order("1", 0, 2);
        row["total_price"] = json!(1499.5);
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![row]));
        let feed = feed_with(backend, 5);
        feed.load_snapshot().await;

        let created_at = feed.orders()[0].created_at;
        match feed.view(created_at + Duration::minutes(7)) {
            RecentSalesView::Items { rows } => {
                assert_eq!(rows[0].total, "₱1,499.5");
                assert_eq!(rows[0].created_at, created_at);
                assert_eq!(rows[0].time_ago, "7m ago");
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_activate_then_shutdown() {
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![order("1", 500, 5)]));
        let feed = Arc::new(feed_with(backend, 5));
        let config = ChannelManagerConfig {
            reconnect_delay: StdDuration::from_millis(20),
            connect_timeout: StdDuration::from_millis(200),
            channel_label: "recent_sales_test".to_string(),
            ..Default::default()
        };

        let handle = activate(feed, config).await;
        assert_eq!(handle.feed().orders().len(), 1);

        tokio::time::timeout(StdDuration::from_secs(5), handle.shutdown())
            .await
            .expect("feed task did not stop");
    }

    /// Accept one socket and forward every frame it sends.
    async fn spawn_realtime_server() -> (String, mpsc::UnboundedReceiver<Message>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            while let Some(Ok(msg)) = ws.next().await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });
        (format!("ws://{}/realtime/v1/websocket", addr), rx)
    }

    async fn next_event(frames: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        let msg = tokio::time::timeout(StdDuration::from_secs(5), frames.recv())
            .await
            .expect("no frame within 5s")
            .expect("server stopped");
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropping_handle_leaves_channel() {
        let (url, mut frames) = spawn_realtime_server().await;
        let backend = Arc::new(FakeBackend::new().with_rows("orders", vec![order("1", 500, 5)]));
        let feed = Arc::new(RecentSalesFeed::new(backend, url, "anon", 5));
        let config = ChannelManagerConfig {
            reconnect_delay: StdDuration::from_millis(20),
            channel_label: "recent_sales_drop_test".to_string(),
            ..Default::default()
        };

        let handle = activate(feed, config).await;
        let join = next_event(&mut frames).await;
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["topic"], format!("realtime:{}", CHANNEL_NAME));

        drop(handle);

        let leave = next_event(&mut frames).await;
        assert_eq!(leave["event"], "phx_leave");
        let close = tokio::time::timeout(StdDuration::from_secs(5), frames.recv())
            .await
            .expect("no close frame within 5s");
        match close {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected a normal close, got {:?}", other),
        }
    }
}
