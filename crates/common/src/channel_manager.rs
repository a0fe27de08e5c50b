//! Realtime channel manager with heartbeats, reconnection and teardown.

use crate::change_handler::ChangeHandler;
use crate::error::{Error, Result};
use crate::messages::ChannelCommand;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Configuration for the channel manager.
#[derive(Debug, Clone)]
pub struct ChannelManagerConfig {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Initial delay before reconnection attempt.
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay (for exponential backoff).
    pub max_reconnect_delay: Duration,
    /// Label for metrics (e.g., "recent_sales").
    pub channel_label: String,
}

impl Default for ChannelManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            channel_label: "unknown".to_string(),
        }
    }
}

/// Realtime channel manager.
///
/// Owns the socket for the lifetime of one subscription. Reconnects with
/// exponential backoff until a `ChannelCommand::Shutdown` arrives or the
/// command channel is dropped, at which point it leaves the topic and exits.
pub struct ChannelManager<H: ChangeHandler> {
    handler: Arc<H>,
    config: ChannelManagerConfig,
    command_rx: mpsc::Receiver<ChannelCommand>,
    connections: u64,
}

impl<H: ChangeHandler> ChannelManager<H> {
    /// Create a new channel manager around a shared handler.
    pub fn new(
        handler: Arc<H>,
        config: ChannelManagerConfig,
        command_rx: mpsc::Receiver<ChannelCommand>,
    ) -> Self {
        Self {
            handler,
            config,
            command_rx,
            connections: 0,
        }
    }

    /// Run until shutdown, reconnecting on disconnection.
    pub async fn run(mut self) -> Result<()> {
        let label = self.config.channel_label.clone();
        let mut reconnect_delay = self.config.reconnect_delay;

        loop {
            let connected_before = self.connections;
            match self.connect_and_run_loop().await {
                Ok(()) => {
                    info!("[{}] Channel closed gracefully", label);
                    break;
                }
                Err(e) => {
                    counter!("realtime_errors_total", "channel" => label.clone(), "error_type" => "disconnect").increment(1);

                    // A connection that got through the handshake resets the backoff.
                    if self.connections > connected_before {
                        reconnect_delay = self.config.reconnect_delay;
                    }

                    warn!(
                        "[{}] Channel disconnected: {:?}, reconnecting in {:?}",
                        label, e, reconnect_delay
                    );
                    self.handler.on_disconnect().await;

                    // Shutdown requested while waiting to reconnect.
                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        cmd = self.command_rx.recv() => {
                            match cmd {
                                Some(ChannelCommand::Shutdown) | None => {
                                    info!("[{}] Shutdown while disconnected", label);
                                    break;
                                }
                                Some(other) => {
                                    // No socket to write to; the handler may still act on it.
                                    let _ = self.handler.handle_command(other).await;
                                }
                            }
                        }
                    }

                    reconnect_delay = (reconnect_delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }

        Ok(())
    }

    async fn connect(&self, url_str: &str) -> Result<TcpStream> {
        let url = Url::parse(url_str)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Generic("No host in URL".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(443);
        let addr_str = format!("{}:{}", host, port);

        // Prefer IPv4 to avoid IPv6 timeout issues
        let addrs: Vec<SocketAddr> = addr_str
            .to_socket_addrs()
            .map_err(|e| Error::Generic(format!("DNS resolution failed: {}", e)))?
            .collect();
        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        for addr in &sorted_addrs {
            debug!("[{}] Trying to connect to {}", self.config.channel_label, addr);
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    debug!("[{}] TCP connect to {} failed: {}", self.config.channel_label, addr, e);
                }
                Err(_) => {
                    debug!("[{}] TCP connect to {} timed out", self.config.channel_label, addr);
                }
            }
        }

        Err(Error::Generic("All connection attempts failed".to_string()))
    }

    fn tls_connector() -> Result<Connector> {
        let mut root_store = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            let _ = root_store.add(cert);
        }

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Generic(format!("TLS config error: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Connector::Rustls(Arc::new(config)))
    }

    /// Returns `Ok(())` only when shutdown was requested.
    async fn connect_and_run_loop(&mut self) -> Result<()> {
        let label = self.config.channel_label.clone();
        let url_str = self.handler.url().to_string();
        info!("[{}] Connecting to realtime endpoint", label);

        let tcp_stream = self.connect(&url_str).await?;

        // Plain `ws://` URLs ignore the connector.
        let connector = Self::tls_connector()?;
        let (ws_stream, response) =
            client_async_tls_with_config(url_str.as_str(), tcp_stream, None, Some(connector))
                .await?;

        debug!("[{}] Handshake complete, status: {:?}", label, response.status());
        let (mut write, mut read) = ws_stream.split();

        self.connections += 1;
        gauge!("realtime_active_channels", "channel" => label.clone()).increment(1.0);
        info!("[{}] Channel connected (connection #{})", label, self.connections);

        let outcome = async {
            if let Some(join) = self.handler.join_message() {
                debug!("[{}] Sending join: {}", label, join);
                write.send(Message::Text(join.into())).await?;
            }

            self.handler.on_connected(self.connections).await;

            let mut heartbeat = interval(self.config.heartbeat_interval);
            heartbeat.reset();

            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                counter!("realtime_messages_received_total", "channel" => label.clone()).increment(1);
                                if let Err(e) = self.handler.on_message(&text).await {
                                    error!("[{}] Error handling message: {:?}", label, e);
                                    counter!("realtime_errors_total", "channel" => label.clone(), "error_type" => "handler").increment(1);
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                if let Err(e) = self.handler.on_binary_message(&data).await {
                                    error!("[{}] Error handling binary message: {:?}", label, e);
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                write.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Pong(_))) => {
                                debug!("[{}] Received pong", label);
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("[{}] Received close frame: {:?}", label, frame);
                                return Err(Error::ConnectionClosed);
                            }
                            Some(Ok(Message::Frame(_))) => {}
                            Some(Err(e)) => {
                                error!("[{}] WebSocket error: {:?}", label, e);
                                return Err(Error::WebSocket(e));
                            }
                            None => {
                                info!("[{}] Stream ended", label);
                                return Err(Error::ConnectionClosed);
                            }
                        }
                    }

                    cmd = self.command_rx.recv() => {
                        match cmd {
                            Some(ChannelCommand::Shutdown) | None => {
                                info!("[{}] Detaching channel", label);
                                if let Some(leave) = self.handler.leave_message() {
                                    let _ = write.send(Message::Text(leave.into())).await;
                                }
                                let close_frame = CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "Shutdown".into(),
                                };
                                let _ = write.send(Message::Close(Some(close_frame))).await;
                                return Ok(());
                            }
                            Some(cmd) => {
                                if let Some(frame) = self.handler.handle_command(cmd).await {
                                    write.send(Message::Text(frame.into())).await?;
                                }
                            }
                        }
                    }

                    _ = heartbeat.tick() => {
                        match self.handler.heartbeat_message() {
                            Some(beat) => write.send(Message::Text(beat.into())).await?,
                            None => write.send(Message::Ping(Vec::new().into())).await?,
                        }
                    }
                }
            }
        }
        .await;

        gauge!("realtime_active_channels", "channel" => label).decrement(1.0);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Frames the local server received, tagged with the connection number.
    type Received = mpsc::UnboundedReceiver<(usize, Message)>;

    struct RecordingHandler {
        url: String,
        connections: Mutex<Vec<u64>>,
    }

    impl RecordingHandler {
        fn new(url: String) -> Arc<Self> {
            Arc::new(Self {
                url,
                connections: Mutex::new(Vec::new()),
            })
        }

        fn connections(&self) -> Vec<u64> {
            self.connections.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChangeHandler for RecordingHandler {
        fn url(&self) -> &str {
            &self.url
        }

        fn join_message(&self) -> Option<String> {
            Some("JOIN".to_string())
        }

        fn leave_message(&self) -> Option<String> {
            Some("LEAVE".to_string())
        }

        async fn on_message(&self, _msg: &str) -> Result<()> {
            Ok(())
        }

        async fn on_connected(&self, connection: u64) {
            if let Ok(mut connections) = self.connections.lock() {
                connections.push(connection);
            }
        }

        async fn handle_command(&self, _cmd: ChannelCommand) -> Option<String> {
            None
        }
    }

    /// Accept connections and forward every frame. With `close_first`, the
    /// first connection is closed by the server right after its join.
    async fn spawn_server(close_first: bool) -> (String, Received) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut accepted = 0;
            while let Ok((stream, _)) = listener.accept().await {
                accepted += 1;
                let conn = accepted;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let is_join = matches!(&msg, Message::Text(t) if t.as_str() == "JOIN");
                        let _ = tx.send((conn, msg));
                        if close_first && conn == 1 && is_join {
                            let _ = ws.close(None).await;
                            break;
                        }
                    }
                });
            }
        });

        (format!("ws://{}/socket", addr), rx)
    }

    async fn next_frame(rx: &mut Received) -> (usize, Message) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no frame within 5s")
            .expect("server stopped")
    }

    fn test_config() -> ChannelManagerConfig {
        ChannelManagerConfig {
            heartbeat_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(20),
            max_reconnect_delay: Duration::from_millis(100),
            channel_label: "test".to_string(),
        }
    }

    fn assert_text(msg: &Message, expected: &str) {
        match msg {
            Message::Text(text) => assert_eq!(text.as_str(), expected),
            other => panic!("expected {}, got {:?}", expected, other),
        }
    }

    fn assert_normal_close(msg: &Message) {
        match msg {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason.as_str(), "Shutdown");
            }
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_leaves_then_closes() {
        let (url, mut frames) = spawn_server(false).await;
        let handler = RecordingHandler::new(url);
        let (command_tx, command_rx) = mpsc::channel(4);
        let task = tokio::spawn(ChannelManager::new(handler.clone(), test_config(), command_rx).run());

        let (conn, join) = next_frame(&mut frames).await;
        assert_eq!(conn, 1);
        assert_text(&join, "JOIN");

        command_tx.send(ChannelCommand::Shutdown).await.unwrap();
        assert_text(&next_frame(&mut frames).await.1, "LEAVE");
        assert_normal_close(&next_frame(&mut frames).await.1);

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap();
        assert!(outcome.unwrap().is_ok());
        assert_eq!(handler.connections(), vec![1]);
    }

    #[tokio::test]
    async fn test_dropped_sender_detaches() {
        let (url, mut frames) = spawn_server(false).await;
        let handler = RecordingHandler::new(url);
        let (command_tx, command_rx) = mpsc::channel(4);
        let task = tokio::spawn(ChannelManager::new(handler, test_config(), command_rx).run());

        assert_text(&next_frame(&mut frames).await.1, "JOIN");
        drop(command_tx);

        assert_text(&next_frame(&mut frames).await.1, "LEAVE");
        assert_normal_close(&next_frame(&mut frames).await.1);
        assert!(tokio::time::timeout(Duration::from_secs(5), task).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_reports_second_connection() {
        let (url, mut frames) = spawn_server(true).await;
        let handler = RecordingHandler::new(url);
        let (command_tx, command_rx) = mpsc::channel(4);
        let task = tokio::spawn(ChannelManager::new(handler.clone(), test_config(), command_rx).run());

        let (conn, join) = next_frame(&mut frames).await;
        assert_eq!(conn, 1);
        assert_text(&join, "JOIN");

        // The server hangs up; the manager dials again and rejoins.
        let (conn, join) = next_frame(&mut frames).await;
        assert_eq!(conn, 2);
        assert_text(&join, "JOIN");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while handler.connections() != vec![1, 2] {
            assert!(tokio::time::Instant::now() < deadline, "on_connected(2) not seen");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        command_tx.send(ChannelCommand::Shutdown).await.unwrap();
        assert_text(&next_frame(&mut frames).await.1, "LEAVE");
        assert!(tokio::time::timeout(Duration::from_secs(5), task).await.is_ok());
    }
}
