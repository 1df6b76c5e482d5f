//! # Relay Server
//!
//! WebSocket endpoint in front of the [`RelayHub`].
//!
//! Credentials are checked during the HTTP upgrade: a handshake without a
//! valid token is answered with `401 Unauthorized` and never reaches the
//! hub. Accepted sockets get one `ack` per inbound text message plus every
//! `update`/`command` event of the groups they joined.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::auth::{authenticate, Identity, JwtVerifier, TokenVerifier};
use super::hub::{ConnectionId, RelayHub};
use super::protocol::{Ack, AckOp, ServerEvent};
use crate::config::RelayConfig;
use crate::error::Result;

/// Handshake query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    /// Handshake auth field
    pub token: Option<String>,
}

/// State shared by every relay request.
#[derive(Clone)]
pub struct RelayState {
    pub hub: Arc<RelayHub>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub secret: Option<String>,
}

/// Build the relay router serving the socket endpoint at `path`.
pub fn router(state: RelayState, path: &str) -> Router {
    Router::new()
        .route(path, get(socket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A bound relay, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    app: Router,
    hub: Arc<RelayHub>,
}

impl RelayServer {
    /// Bind with HS256 JWT verification and the configured secret.
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        Self::bind_with(config, Arc::new(JwtVerifier)).await
    }

    /// Bind with a custom token verifier.
    pub async fn bind_with(config: &RelayConfig, verifier: Arc<dyn TokenVerifier>) -> Result<Self> {
        let secret = config.resolve_secret();
        if secret.is_none() {
            warn!("No JWT secret configured: every connection will be rejected");
        }

        let hub = Arc::new(RelayHub::new());
        let state = RelayState {
            hub: Arc::clone(&hub),
            verifier,
            secret,
        };
        let listener = TcpListener::bind(&config.bind).await?;
        info!("Relay listening on {}{}", listener.local_addr()?, config.path);

        Ok(Self {
            listener,
            app: router(state, &config.path),
            hub,
        })
    }

    /// Actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Hub backing this server.
    pub fn hub(&self) -> Arc<RelayHub> {
        Arc::clone(&self.hub)
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Relay stopped");
        Ok(())
    }
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
    State(state): State<RelayState>,
) -> Response {
    let authorization = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());

    let identity = match authenticate(
        state.verifier.as_ref(),
        state.secret.as_deref(),
        params.token.as_deref(),
        authorization,
    ) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected relay handshake: {}", e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let hub = state.hub;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, identity))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<RelayHub>, identity: Identity) {
    let (id, mut events) = hub.connect().await;
    info!(
        "Relay connection {} opened for {} (role: {})",
        id,
        identity.subject,
        identity.role.as_deref().unwrap_or("none")
    );

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let ack = hub.handle_text(id, &text).await;
                        if let Err(e) = send_event(&mut socket, &ServerEvent::Ack(ack)).await {
                            warn!("Failed to send ack on connection {}: {}", id, e);
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let ack = Ack::rejected(AckOp::Invalid, "binary messages are not supported");
                        if let Err(e) = send_event(&mut socket, &ServerEvent::Ack(ack)).await {
                            warn!("Failed to send ack on connection {}: {}", id, e);
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            warn!("Failed to send pong on connection {}: {}", id, e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Relay connection {} closed by peer", id);
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        error!("Relay connection {} failed: {}", id, e);
                        break;
                    }
                }
            }
            Some(event) = events.recv() => {
                if let Err(e) = send_event(&mut socket, &event).await {
                    warn!("Failed to forward event on connection {}: {}", id, e);
                    break;
                }
            }
        }
    }

    close(&hub, id, &identity).await;
}

async fn close(hub: &RelayHub, id: ConnectionId, identity: &Identity) {
    hub.disconnect(id).await;
    info!("Relay connection {} for {} closed", id, identity.subject);
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> std::result::Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(json)).await
}
