use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Keys the API uses for errors that belong to no single field.
const GENERAL_KEYS: [&str; 3] = ["non_field_errors", "detail", "error"];

/// Key under which general (non-field) messages are collected.
pub const GENERAL_FIELD: &str = "non_field_errors";

/// Field-keyed error messages from a rejected form submission.
///
/// Built from payloads like `{"email": ["Enter a valid email."]}`,
/// `{"detail": "No active account found"}` or `{"error": "Invalid token"}`.
/// Messages for `detail`/`error`/`non_field_errors` are merged under
/// [`GENERAL_FIELD`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single general message, e.g. for errors detected before sending.
    pub fn general(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(GENERAL_FIELD, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Parse an error payload. Returns `None` when the payload is not a JSON
    /// object or carries no messages at all.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        let mut errors = Self::new();
        for (key, value) in object {
            let field = if GENERAL_KEYS.contains(&key.as_str()) {
                GENERAL_FIELD
            } else {
                key.as_str()
            };
            for message in Self::messages(value) {
                errors.push(field, message);
            }
        }
        if errors.is_empty() {
            None
        } else {
            Some(errors)
        }
    }

    fn messages(value: &Value) -> Vec<String> {
        match value {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items.iter().flat_map(Self::messages).collect(),
            // Nested serializers report {"field": {"sub": [...]}}; flatten them
            Value::Object(map) => map.values().flat_map(Self::messages).collect(),
            Value::Null => Vec::new(),
            other => vec![other.to_string()],
        }
    }

    pub fn field(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn general_messages(&self) -> &[String] {
        self.field(GENERAL_FIELD)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in self.iter() {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                first = false;
                if field == GENERAL_FIELD {
                    write!(f, "{}", message)?;
                } else {
                    write!(f, "{}: {}", field, message)?;
                }
            }
        }
        Ok(())
    }
}

/// Errors produced by the request layer and the typed API surfaces.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// that joined it; transport errors are shared behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(Arc<reqwest::Error>),

    #[error("Credential refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Session expired - please sign in again")]
    SessionExpired,

    #[error("{0}")]
    Validation(FieldErrors),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(Arc::new(err))
        }
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        if status.as_u16() == 400 {
            let field_errors = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|payload| FieldErrors::from_payload(&payload));
            if let Some(errors) = field_errors {
                return ApiError::Validation(errors);
            }
        }

        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Failures after which the stored credentials are gone and the user
    /// has to sign in again.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthenticated | ApiError::SessionExpired | ApiError::Unauthorized
        )
    }

    /// Transport-level failures; retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }
}
