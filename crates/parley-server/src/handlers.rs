//! Server wiring and the chat WebSocket gateway.
//!
//! Each WebSocket connection registers its user with the broker, forwards
//! deliveries to the socket as JSON and submits inbound chat frames through
//! the broker's ingress gate.

use crate::api;
use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::models::ChatRequest;
use crate::storage::MemoryStorage;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_core::message::current_timestamp;
use parley_core::{
    subscriber_channel, validate, Broker, Message, MessageStore, StorageError, UserDirectory,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat broker.
    pub broker: Broker,
    /// Log of chat messages accepted by the broker.
    pub history: MessageStore,
    /// Known chat users.
    pub users: UserDirectory,
    /// Message list behind the CRUD endpoints.
    pub storage: MemoryStorage,
    /// Server configuration.
    pub config: Config,
    /// Process-wide shutdown signal.
    pub shutdown: CancellationToken,
    /// Open chat connections.
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state bound to `shutdown`.
    #[must_use]
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self {
            broker: Broker::with_config(shutdown.clone(), config.broker.broker_config()),
            history: MessageStore::new(),
            users: UserDirectory::with_shutdown(shutdown.clone()),
            storage: MemoryStorage::new(),
            config,
            shutdown,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open chat connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/:user_id", get(ws_handler))
        .route(
            "/api/messages",
            get(api::list_messages).post(api::create_message),
        )
        .route(
            "/api/messages/:id",
            get(api::get_message)
                .put(api::update_message)
                .delete(api::delete_message),
        )
        .route("/api/status/:code", get(api::http_status))
        .route("/api/health", get(api::api_health))
        .route("/api/users", post(api::create_user))
        .route(
            "/api/users/:id",
            get(api::get_user).delete(api::delete_user),
        )
        .route("/api/chat/messages", post(api::send_chat_message))
        .route("/api/chat/history", get(api::chat_history))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Run the HTTP/WebSocket server until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the server fails to start or the dispatch loop fails.
pub async fn run_server(config: Config, shutdown: CancellationToken) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone(), shutdown.clone()));
    let dispatch = state.broker.run()?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(Arc::clone(&state));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("Chat endpoint: ws://{}/ws/{{user_id}}", addr);

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await?;

    // The server can also stop on its own; make sure the broker follows.
    shutdown.cancel();
    dispatch.await?;
    metrics::record_broker_stats(&state.broker.stats());

    info!("Parley server stopped");
    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    if state.broker.is_shutting_down() {
        return Err(ApiError::Unavailable("Server is shutting down".to_string()));
    }
    if state.connection_count() >= state.config.limits.max_connections {
        return Err(ApiError::Unavailable("Too many connections".to_string()));
    }
    state.users.get(&user_id)?;

    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, user_id, state)))
}

/// Handle a chat connection.
async fn handle_websocket(socket: WebSocket, user_id: String, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    state.connections.fetch_add(1, Ordering::Relaxed);

    let (tx, mut deliveries) = subscriber_channel(state.config.broker.subscriber_capacity);
    let registration = tx.downgrade();
    state.broker.register_user(user_id.clone(), tx);
    metrics::record_broker_stats(&state.broker.stats());

    debug!(user = %user_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            () = state.shutdown.cancelled() => {
                debug!(user = %user_id, "Closing connection for shutdown");
                let _ = sender.send(WsMessage::Close(None)).await;
                break;
            }

            // Deliveries from the broker
            delivered = deliveries.recv() => match delivered {
                Some(message) => {
                    if send_json(&mut sender, &*message).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!(user = %user_id, "Subscriber channel closed");
                    break;
                }
            },

            // Frames from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        if handle_chat_frame(text.as_bytes(), &user_id, &state, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        if handle_chat_frame(&data, &user_id, &state, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(user = %user_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(user = %user_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(user = %user_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Leave the broker unless a newer connection took over this user.
    if let Some(current) = registration.upgrade() {
        state.broker.unregister_channel(&user_id, &current);
    }
    state.connections.fetch_sub(1, Ordering::Relaxed);
    metrics::record_broker_stats(&state.broker.stats());

    debug!(user = %user_id, "WebSocket disconnected");
}

/// Handle one inbound chat frame, replying with an error frame on rejection.
///
/// Only socket write failures are returned as errors.
async fn handle_chat_frame(
    data: &[u8],
    user_id: &str,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, WsMessage>,
) -> Result<()> {
    let outcome = match serde_json::from_slice::<ChatRequest>(data) {
        Ok(request) => submit_chat(state, user_id, request, Admission::Wait).await,
        Err(e) => Err(ApiError::BadRequest(format!("Invalid chat frame: {e}"))),
    };

    if let Err(e) = outcome {
        debug!(user = %user_id, error = %e, "Chat frame rejected");
        send_json(sender, &json!({ "error": e.to_string() })).await?;
    }
    Ok(())
}

/// How a chat submission treats a full broker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Wait for room. Used by WebSocket connections, which apply backpressure.
    Wait,
    /// Fail with `BrokerError::QueueFull` instead of waiting.
    Reject,
}

/// Validate a chat request from `sender`, route it through the broker and
/// record it in the history.
///
/// # Errors
///
/// Returns an error if the message is too large or invalid, has no
/// recipient, or the broker rejects it.
pub async fn submit_chat(
    state: &AppState,
    sender: &str,
    request: ChatRequest,
    admission: Admission,
) -> Result<Message, ApiError> {
    if request.content.len() > state.config.limits.max_message_size {
        return Err(ApiError::BadRequest("Message too large".to_string()));
    }

    let message = validate(sender, request.content, current_timestamp())?;
    let message = if request.broadcast {
        message.broadcast()
    } else {
        let recipient = request
            .recipient
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                ApiError::BadRequest("recipient is required for direct messages".to_string())
            })?;
        message.to(recipient)
    };

    match admission {
        Admission::Wait => state.broker.send_message(message.clone()).await?,
        Admission::Reject => state.broker.try_send_message(message.clone())?,
    }
    state
        .history
        .append(message.clone())
        .map_err(|e: StorageError| ApiError::Internal(e.to_string()))?;

    Ok(message)
}

/// Serialize `value` and send it as a text frame.
async fn send_json<T: serde::Serialize + ?Sized>(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    value: &T,
) -> Result<()> {
    let text = serde_json::to_string(value)?;
    metrics::record_message(text.len(), "outbound");
    sender.send(WsMessage::Text(text)).await?;
    Ok(())
}
