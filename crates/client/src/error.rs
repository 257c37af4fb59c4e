//! Error taxonomy for the approval client
//!
//! Every failure surfaced to callers carries a stable kind so that callers
//! can decide whether to retry without string matching.

use hitl_common::ConfigError;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Result type alias using the client's error type
pub type Result<T> = std::result::Result<T, ApprovalError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApprovalError {
    /// Malformed request; never retried
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Network-level failure (DNS, connection refused, timeout)
    #[error("request to {url} failed: {message}")]
    Transport {
        url: String,
        message: String,
        timeout: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Non-2xx response not covered by a more specific variant
    #[error("service returned {status}: {message}")]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    /// The request already has a decision
    #[error("{resource} '{id}' conflicts with its current state: {message}")]
    Conflict {
        resource: String,
        id: String,
        message: String,
    },

    /// 2xx response whose body could not be understood
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("event stream gave up after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },
}

/// `{"error": {"code": .., "message": ..}}` error body
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    detail: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

const MAX_ERROR_BODY_CHARS: usize = 512;

impl ApprovalError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP response onto the taxonomy
    pub fn from_response(status: StatusCode, body: &str, resource: &str, id: Option<&str>) -> Self {
        let (code, message) = parse_error_body(body);
        let message = message.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

        match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => Self::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            },
            (StatusCode::CONFLICT, Some(id)) => Self::Conflict {
                resource: resource.to_string(),
                id: id.to_string(),
                message,
            },
            _ => Self::Service {
                status: status.as_u16(),
                code,
                message,
            },
        }
    }

    pub fn from_transport(url: &str, err: reqwest::Error) -> Self {
        let timeout = err.is_timeout();
        let message = if timeout {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else {
            err.to_string()
        };
        Self::Transport {
            url: url.to_string(),
            message,
            timeout,
            source: Some(Box::new(err)),
        }
    }

    /// Stable name of the error kind, printed by front ends
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Transport { .. } => "TransportError",
            Self::Service { .. } => "ServiceError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Conflict { .. } => "ConflictError",
            Self::Decode { .. } => "DecodeError",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "ConfigError",
            Self::ReconnectExhausted { .. } => "ReconnectExhausted",
        }
    }

    /// Transport failures and 5xx responses may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status associated with the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            _ => None,
        }
    }

    /// Errors caused by the caller's input or setup rather than the service
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Config(_))
    }
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, None);
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(trimmed) {
        if let Some(error) = envelope.error {
            return (error.code, error.message);
        }
        if let Some(detail) = envelope.detail {
            let message = match detail {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return (None, Some(message));
        }
    }

    let message: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    (None, Some(message))
}
