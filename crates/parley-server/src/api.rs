//! REST handlers.
//!
//! `/api/messages` is a CRUD list independent of the broker. `/api/users`
//! and `/api/chat` front the user directory, the broker and its history.

use crate::error::{status_description, ApiError};
use crate::handlers::{submit_chat, Admission, AppState};
use crate::models::{
    ApiResponse, ChatRequest, CreateMessageRequest, HistoryQuery, HttpStatusResponse,
    StoredMessage, UpdateMessageRequest,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use parley_core::{Message, User};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T>(status: StatusCode, data: T) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::ok(data))))
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        debug!(error = %rejection, "Rejected request body");
        ApiError::BadRequest("Invalid JSON".to_string())
    })
}

fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid ID".to_string()))
}

/// `GET /api/messages`
pub async fn list_messages(State(state): State<Arc<AppState>>) -> ApiResult<Vec<StoredMessage>> {
    ok(StatusCode::OK, state.storage.get_all())
}

/// `POST /api/messages`
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> ApiResult<StoredMessage> {
    let request = parse_body(body)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation failed: {e}")))?;

    let message = state.storage.create(&request.username, &request.content);
    debug!(id = message.id, "Message created");
    ok(StatusCode::CREATED, message)
}

/// `GET /api/messages/:id`
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StoredMessage> {
    let id = parse_id(&id)?;
    ok(StatusCode::OK, state.storage.get_by_id(id)?)
}

/// `PUT /api/messages/:id`
pub async fn update_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<UpdateMessageRequest>, JsonRejection>,
) -> ApiResult<StoredMessage> {
    let id = parse_id(&id)?;
    let request = parse_body(body)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation failed: {e}")))?;

    ok(StatusCode::OK, state.storage.update(id, &request.content)?)
}

/// `DELETE /api/messages/:id`
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.storage.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/status/:code`
pub async fn http_status(Path(code): Path<String>) -> ApiResult<HttpStatusResponse> {
    let code: u16 = code
        .parse()
        .ok()
        .filter(|c| (100..=599).contains(c))
        .ok_or_else(|| ApiError::BadRequest("Invalid status code".to_string()))?;

    ok(
        StatusCode::OK,
        HttpStatusResponse {
            status_code: code,
            image_url: format!("https://http.cat/{code}"),
            description: status_description(code).to_string(),
        },
    )
}

/// `GET /api/health`
pub async fn api_health(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    ok(
        StatusCode::OK,
        json!({
            "status": "ok",
            "message": "API is running",
            "timestamp": Utc::now(),
            "total_messages": state.storage.count(),
        }),
    )
}

/// `POST /api/users`
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<User>, JsonRejection>,
) -> ApiResult<User> {
    let user = parse_body(body)?;
    state.users.add(user.clone())?;
    ok(StatusCode::CREATED, user)
}

/// `GET /api/users/:id`
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<User> {
    ok(StatusCode::OK, state.users.get(&id)?)
}

/// `DELETE /api/users/:id`
///
/// Also disconnects the user from the broker.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.users.remove(&id)?;
    state.broker.unregister_user(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/chat/messages`
///
/// Answers 503 instead of waiting when the broker queue is full.
pub async fn send_chat_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Message> {
    let request = parse_body(body)?;
    let sender = request.sender.clone();
    ok(
        StatusCode::ACCEPTED,
        submit_chat(&state, &sender, request, Admission::Reject).await?,
    )
}

/// `GET /api/chat/history`
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Message>> {
    ok(StatusCode::OK, state.history.query(query.sender.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::build_router;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use parley_core::subscriber_channel;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default(), CancellationToken::new()))
    }

    async fn call(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = build_router(Arc::clone(state))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_message_crud() {
        let state = test_state();

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/messages",
            Some(r#"{"username":"alice","content":"hello"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 1);

        let (status, body) = call(
            &state,
            Method::PUT,
            "/api/messages/1",
            Some(r#"{"content":"edited"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"], "edited");

        let (status, body) = call(&state, Method::GET, "/api/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = call(&state, Method::GET, "/api/messages/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "alice");

        let (status, _) = call(&state, Method::DELETE, "/api/messages/1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&state, Method::DELETE, "/api/messages/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["description"], "Not Found");
    }

    #[tokio::test]
    async fn test_create_message_rejects_bad_input() {
        let state = test_state();

        let (status, body) = call(&state, Method::POST, "/api/messages", Some("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid JSON");

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/messages",
            Some(r#"{"username":"","content":"hello"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.storage.count(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_reject_bad_ids() {
        let state = test_state();

        let (status, _) = call(
            &state,
            Method::PUT,
            "/api/messages/abc",
            Some(r#"{"content":"x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &state,
            Method::PUT,
            "/api/messages/42",
            Some(r#"{"content":"x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, Method::DELETE, "/api/messages/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_http_status() {
        let state = test_state();

        let (status, body) = call(&state, Method::GET, "/api/status/404", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status_code"], 404);
        assert_eq!(body["data"]["image_url"], "https://http.cat/404");
        assert_eq!(body["data"]["description"], "Not Found");

        let (status, _) = call(&state, Method::GET, "/api/status/99", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, Method::GET, "/api/status/teapot", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_health() {
        let state = test_state();
        state.storage.create("alice", "hi");

        let (status, body) = call(&state, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["total_messages"], 1);
    }

    #[tokio::test]
    async fn test_user_endpoints() {
        let state = test_state();
        let alice = r#"{"id":"1","name":"Alice","email":"alice@example.com"}"#;

        let (status, _) = call(&state, Method::POST, "/api/users", Some(alice)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = call(&state, Method::POST, "/api/users", Some(alice)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/users",
            Some(r#"{"id":"2","name":"Bob","email":"bob"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&state, Method::GET, "/api/users/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Alice");

        let (status, _) = call(&state, Method::DELETE, "/api/users/1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&state, Method::GET, "/api/users/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_message_is_routed_and_recorded() {
        let state = test_state();
        state.broker.run().unwrap();

        let (tx, mut rx) = subscriber_channel(4);
        state.broker.register_user("2", tx);

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/chat/messages",
            Some(r#"{"sender":"1","recipient":"2","content":"hi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["recipient"], "2");

        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.sender, "1");
        assert_eq!(delivered.content, "hi");

        let (status, body) = call(&state, Method::GET, "/api/chat/history?sender=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (_, body) = call(&state, Method::GET, "/api/chat/history?sender=9", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_message_validation() {
        let state = test_state();

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/chat/messages",
            Some(r#"{"sender":"1","recipient":"2","content":""}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/chat/messages",
            Some(r#"{"sender":"1","content":"no recipient"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_chat_rejected_when_queue_full() {
        let mut config = Config::default();
        config.broker.queue_capacity = 1;
        let state = Arc::new(AppState::new(config, CancellationToken::new()));
        let body = r#"{"sender":"1","content":"hi all","broadcast":true}"#;

        let (status, _) = call(&state, Method::POST, "/api/chat/messages", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // The dispatch loop is not running, so the queue stays full.
        let (status, body) = tokio::time::timeout(
            Duration::from_secs(2),
            call(&state, Method::POST, "/api/chat/messages", Some(body)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_rejected_after_shutdown() {
        let state = test_state();
        state.shutdown.cancel();

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/chat/messages",
            Some(r#"{"sender":"1","content":"hi all","broadcast":true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Broker is shutting down");
        assert!(state.history.is_empty());
    }
}
