//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in the HTTP message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    pub username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(id: u64, username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
}

impl CreateMessageRequest {
    /// Check that username and content are present.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.username.trim().is_empty() {
            return Err("username is required");
        }
        if self.content.trim().is_empty() {
            return Err("content is required");
        }
        Ok(())
    }
}

/// Body of `PUT /api/messages/:id`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMessageRequest {
    #[serde(default)]
    pub content: String,
}

impl UpdateMessageRequest {
    /// Check that content is present.
    ///
    /// # Errors
    ///
    /// Returns a description of the missing field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.content.trim().is_empty() {
            return Err("content is required");
        }
        Ok(())
    }
}

/// Body of `POST /api/chat/messages`.
///
/// Also the shape of inbound WebSocket chat frames, where the sender is the
/// connected user and `sender` is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub broadcast: bool,
}

/// Query string of `GET /api/chat/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub sender: Option<String>,
}

/// Response of `GET /api/status/:code`.
#[derive(Debug, Clone, Serialize)]
pub struct HttpStatusResponse {
    pub status_code: u16,
    pub image_url: String,
    pub description: String,
}

/// Envelope for every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful response carrying `data`.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(error: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: false,
            data,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let ok = CreateMessageRequest {
            username: "alice".to_string(),
            content: "hi".to_string(),
        };
        assert!(ok.validate().is_ok());

        let no_user = CreateMessageRequest {
            username: " ".to_string(),
            content: "hi".to_string(),
        };
        assert_eq!(no_user.validate(), Err("username is required"));

        let no_content = CreateMessageRequest {
            username: "alice".to_string(),
            content: String::new(),
        };
        assert_eq!(no_content.validate(), Err("content is required"));
    }

    #[test]
    fn test_envelope_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::ok(1)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 1}));

        let json = serde_json::to_value(ApiResponse::<()>::failure("boom", None)).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "boom"}));
    }
}
