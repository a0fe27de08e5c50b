//! HTTP and WebSocket server using Axum.

use crate::client::{ClientRegistry, ClientState, CLIENT_CHANNEL_BUFFER_SIZE};
use crate::controller::SalesDashboard;
use crate::error::{DashboardError, Result};
use crate::overview::OverviewView;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::recent_sales::{FeedHandle, RecentSalesView};
use crate::toplist::{SortKey, ToplistView};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use external_services::Period;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub feed: Arc<FeedHandle>,
    pub dashboard: Arc<SalesDashboard>,
}

impl AppState {
    fn recent_sales(&self) -> RecentSalesView {
        self.feed.feed().view(Utc::now())
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/dashboard/overview", get(overview_handler))
        .route("/dashboard/toplist", get(toplist_handler))
        .route("/dashboard/recent", get(recent_handler))
        .route("/dashboard/resync", post(resync_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Default, Deserialize)]
struct ViewParams {
    period: Option<String>,
    sort: Option<String>,
}

fn parse_period(raw: Option<&str>) -> Result<Option<Period>> {
    raw.map(|s| {
        s.parse::<Period>()
            .map_err(|_| DashboardError::InvalidPeriod(s.to_string()))
    })
    .transpose()
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.registry.client_count(),
        "recent_orders": state.feed.feed().orders().len(),
        "period": state.dashboard.period(),
    }))
}

async fn overview_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ViewParams>,
) -> Result<Json<OverviewView>> {
    let period = parse_period(params.period.as_deref())?;
    state.dashboard.ensure_period(period).await;
    Ok(Json(state.dashboard.overview_view()))
}

async fn toplist_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ViewParams>,
) -> Result<Json<ToplistView>> {
    let period = parse_period(params.period.as_deref())?;
    let sort = match params.sort.as_deref() {
        Some(raw) => raw.parse::<SortKey>()?,
        None => SortKey::default(),
    };
    state.dashboard.ensure_period(period).await;
    Ok(Json(state.dashboard.toplist_view(sort)))
}

async fn recent_handler(State(state): State<Arc<AppState>>) -> Json<RecentSalesView> {
    Json(state.recent_sales())
}

async fn resync_handler(State(state): State<Arc<AppState>>) -> Result<StatusCode> {
    state.feed.resync().await?;
    Ok(StatusCode::ACCEPTED)
}

/// Push feed changes to every client and refresh the aggregates, until
/// `shutdown_rx` fires or the feed goes away.
pub fn spawn_broadcaster(state: Arc<AppState>, mut shutdown_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
    let mut updates = state.feed.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let delivered = state.registry.broadcast(&ServerMessage::RecentSales(state.recent_sales()));
                    counter!("dashboard_broadcasts_total").increment(1);
                    debug!("Recent sales pushed to {} clients", delivered);

                    // A new order moves the period figures as well.
                    state.dashboard.refresh().await;
                    broadcast_figures(&state);
                }
                _ = shutdown_rx.recv() => {
                    info!("Broadcaster stopping");
                    break;
                }
            }
        }
    })
}

fn broadcast_figures(state: &AppState) {
    state
        .registry
        .broadcast(&ServerMessage::Overview(state.dashboard.overview_view()));
    state
        .registry
        .broadcast(&ServerMessage::Toplist(state.dashboard.toplist_view(SortKey::default())));
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_CHANNEL_BUFFER_SIZE);

    let client = Arc::new(ClientState::new(tx));
    let client_id = state.registry.register(client.clone());

    counter!("dashboard_connections_total").increment(1);
    gauge!("dashboard_active_connections").set(state.registry.client_count() as f64);

    info!("Client {} connected", client_id);

    // Forward queued messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = send_current_views(&state, &client) {
        warn!("Failed to send initial views to {}: {:?}", client_id, e);
    }

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(msg)) => {
                        if let Err(e) = handle_message(&state, &client, msg).await {
                            warn!("Error handling message from {}: {:?}", client_id, e);
                            let _ = client.send(ServerMessage::Error {
                                message: e.to_string(),
                                code: e.code().to_string(),
                            });
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", client_id, e);
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if client.tx.try_send(Message::Ping(Vec::new().into())).is_err() {
                    break;
                }
            }
        }
    }

    state.registry.unregister(&client_id);
    send_task.abort();

    counter!("dashboard_disconnections_total").increment(1);
    gauge!("dashboard_active_connections").set(state.registry.client_count() as f64);

    info!("Client {} disconnected", client_id);
}

fn send_current_views(state: &AppState, client: &ClientState) -> Result<()> {
    client.send(ServerMessage::RecentSales(state.recent_sales()))?;
    client.send(ServerMessage::Overview(state.dashboard.overview_view()))?;
    client.send(ServerMessage::Toplist(state.dashboard.toplist_view(SortKey::default())))?;
    Ok(())
}

/// Handle a single WebSocket message.
async fn handle_message(state: &Arc<AppState>, client: &Arc<ClientState>, msg: Message) -> Result<()> {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = serde_json::from_str(&text)?;
            handle_client_message(state, client, client_msg).await
        }
        Message::Binary(data) => {
            let client_msg: ClientMessage = serde_json::from_slice(&data)?;
            handle_client_message(state, client, client_msg).await
        }
        Message::Ping(data) => {
            client.update_ping();
            client.tx.try_send(Message::Pong(data)).map_err(|_| DashboardError::ChannelSend)
        }
        Message::Pong(_) => {
            client.update_ping();
            Ok(())
        }
        Message::Close(_) => Ok(()),
    }
}

/// Handle a parsed client message.
async fn handle_client_message(
    state: &Arc<AppState>,
    client: &Arc<ClientState>,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::SelectPeriod { period } => {
            debug!("Client {} selected period {}", client.id, period);
            state.dashboard.select_period(period).await;
            broadcast_figures(state);
            Ok(())
        }
        ClientMessage::Refresh => send_current_views(state, client),
        ClientMessage::Ping => {
            client.update_ping();
            client.send(ServerMessage::Pong)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Procedures;
    use crate::recent_sales::{activate, RecentSalesFeed};
    use external_services::testing::FakeBackend;
    use common::ChannelManagerConfig;

    async fn app_state() -> Arc<AppState> {
        let backend = Arc::new(
            FakeBackend::new()
                .with_rows("orders", vec![])
                .with_rpc("get_sales_overview", 0, json!({ "total_orders": 2 }))
                .with_rpc("get_top_products", 0, json!([])),
        );
        let feed = Arc::new(RecentSalesFeed::new(
            backend.clone(),
            "ws://127.0.0.1:1/realtime/v1/websocket",
            "anon",
            5,
        ));
        let config = ChannelManagerConfig {
            reconnect_delay: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        Arc::new(AppState {
            registry: Arc::new(ClientRegistry::new()),
            feed: Arc::new(activate(feed, config).await),
            dashboard: Arc::new(SalesDashboard::new(backend, Procedures::default())),
        })
    }

    #[test]
    fn test_parse_period_param() {
        assert_eq!(parse_period(None).unwrap(), None);
        assert_eq!(parse_period(Some("daily")).unwrap(), Some(Period::Daily));
        assert!(matches!(
            parse_period(Some("hourly")),
            Err(DashboardError::InvalidPeriod(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcaster_pushes_feed_changes() {
        let state = app_state().await;
        let (tx, mut rx) = mpsc::channel(16);
        state.registry.register(Arc::new(ClientState::new(tx)));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let broadcaster = spawn_broadcaster(state.clone(), shutdown_rx);

        state.feed.feed().apply_insert(json!({
            "id": "o1",
            "customer_name": "Ana",
            "total_price": 1500,
            "created_at": Utc::now().to_rfc3339(),
        }));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["type"], "recent_sales");
                assert_eq!(value["state"], "items");
                assert_eq!(value["rows"][0]["summary"], "No items");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let _ = shutdown_tx.send(()).await;
        broadcaster.await.unwrap();
        state.feed.shutdown().await;
    }

    #[tokio::test]
    async fn test_select_period_message() {
        let state = app_state().await;
        let (tx, mut rx) = mpsc::channel(16);
        let client = Arc::new(ClientState::new(tx));
        state.registry.register(client.clone());

        handle_client_message(&state, &client, ClientMessage::SelectPeriod { period: Period::Daily })
            .await
            .unwrap();
        assert_eq!(state.dashboard.period(), Period::Daily);

        let mut types = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            types.push(value["type"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(types, vec!["overview", "toplist"]);
        state.feed.shutdown().await;
    }
}
