//! WebSocket front end.
//!
//! Accepts TCP connections, performs the HTTP upgrade while capturing the
//! request path and cookie header, hands both to the registry's connect
//! phase (bounded by a timeout), then services the connection with one
//! select! loop: inbound binary frames go to the dispatcher, frames queued
//! by the session fan-out go to the socket in order, pings are answered,
//! and a periodic keepalive ping flushes dead peers. Close or error funnels
//! into a registry disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::auth::CookieValidator;
use crate::error::GatewayError;
use crate::registry::{ConnectRequest, GatewayConfig, SessionRegistry, Services};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Upper bound on the whole connect phase (upgrade, auth, note fetch).
    pub connect_timeout_secs: u64,
    /// Keepalive ping interval.
    pub keepalive_interval_secs: u64,
    /// Gateway knobs shared with the registry.
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
            gateway: GatewayConfig::default(),
        }
    }
}

/// The realtime collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
}

impl CollabServer {
    pub fn new(config: ServerConfig, services: Services, validator: Arc<dyn CookieValidator>) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            services,
            validator,
            config.gateway.clone(),
        ));
        Self { config, registry }
    }

    /// The gateway behind this server, e.g. for registering a persister
    /// hook or reading stats.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        info!("realtime server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            debug!("tcp connection from {addr}");

            let registry = self.registry.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, registry, config).await {
                    if e.is_rejection() {
                        info!("connection from {addr} rejected: {e}");
                    } else {
                        warn!("connection from {addr} failed: {e}");
                    }
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
) -> Result<(), GatewayError> {
    let connect_phase = async {
        let mut url_path = String::new();
        let mut cookie_header = None;
        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            url_path = req.uri().path().to_string();
            cookie_header = req
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        })
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let request = ConnectRequest {
            url_path,
            cookie_header,
        };
        match registry.connect(&request, outbound_tx).await {
            Ok(conn_id) => Ok((ws, outbound_rx, conn_id)),
            Err(e) => {
                // Close the upgraded socket before reporting the rejection.
                let mut ws = ws;
                let _ = ws.close(None).await;
                Err(e)
            }
        }
    };

    let (ws, mut outbound_rx, conn_id) =
        match timeout(Duration::from_secs(config.connect_timeout_secs), connect_phase).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::Transport(format!(
                    "connect phase from {addr} timed out"
                )))
            }
        };

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let mut keepalive =
        tokio::time::interval(Duration::from_secs(config.keepalive_interval_secs.max(1)));
    // Consume the interval's immediate first tick.
    keepalive.tick().await;

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        let frame: Vec<u8> = data.into();
                        if registry.dispatch(conn_id, &frame).await.is_err() {
                            // The dispatcher already tore the connection down.
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("connection {conn_id} closed by peer");
                        break;
                    }
                    Some(Ok(other)) => {
                        warn!("ignoring non-binary frame from {conn_id}: {other:?}");
                    }
                    Some(Err(e)) => {
                        debug!("socket error on {conn_id}: {e}");
                        break;
                    }
                }
            }
            queued = outbound_rx.recv() => {
                match queued {
                    Some(frame) => {
                        if ws_sender.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Queue dropped: the registry already detached us.
                    None => break,
                }
            }
            _ = keepalive.tick() => {
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    registry.disconnect(conn_id).await;
    info!("connection {conn_id} from {addr} closed");
    Ok(())
}
