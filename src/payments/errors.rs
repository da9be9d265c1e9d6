// Payment API error types and mappings

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Provider REST error envelope: { message, error, status, cause: [{ code, description }] }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderErrorEnvelope {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub cause: Vec<ProviderErrorCause>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderErrorCause {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ProviderErrorEnvelope {
    pub fn to_api_error_with_status(self, status: u16) -> PaymentApiError {
        PaymentApiError::Provider {
            status: self.status.unwrap_or(status),
            error: self.error,
            message: self.message,
            causes: self
                .cause
                .into_iter()
                .filter_map(|c| c.description)
                .collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("provider error: status={status} error={error:?} message={message:?} causes={causes:?}")]
    Provider {
        status: u16,
        error: Option<String>,
        message: Option<String>,
        causes: Vec<String>,
    },
    #[error("payment {0} carries no PIX QR code")]
    MissingQrCode(String),
}

impl PaymentApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            PaymentApiError::Provider { status, .. } => Some(*status),
            PaymentApiError::Http(_) => Some(503),
            _ => None,
        }
    }

    /// Whether a read may be retried (network failure, throttling or 5xx).
    pub fn is_transient(&self) -> bool {
        match self.status() {
            Some(s) => s == 429 || (500..600).contains(&s),
            None => false,
        }
    }
}

/// Failures of a settlement subscription. These are only ever logged.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("status lookup failed: {0}")]
    Lookup(#[from] PaymentApiError),
}

// Webhook-specific errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("timestamp tolerance exceeded: {0}")]
    TimestampTolerance(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("missing webhook secret")]
    MissingSecret,
    #[error("missing signature header")]
    MissingSignature,
    #[error("event processing failed: {0}")]
    ProcessingFailed(String),
}

impl WebhookError {
    /// Map webhook error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookError::InvalidSignature(_) => 401,
            WebhookError::TimestampTolerance(_) => 400,
            WebhookError::MalformedPayload(_) => 400,
            WebhookError::MissingSecret => 500,
            WebhookError::MissingSignature => 401,
            WebhookError::ProcessingFailed(_) => 500,
        }
    }
}
