// Conversion tracking. Events are fire-and-forget: a failed delivery is logged and
// never reaches the checkout that produced it.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionEvent {
    pub event: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    pub currency: &'static str,
    pub transaction_id: String,
}

impl ConversionEvent {
    pub fn purchase(value: Decimal, transaction_id: impl Into<String>) -> Self {
        Self {
            event: "Purchase",
            value,
            currency: "BRL",
            transaction_id: transaction_id.into(),
        }
    }
}

pub trait ConversionTracker: Send + Sync {
    /// Must return immediately; delivery happens in the background.
    fn track(&self, event: ConversionEvent);
}

/// Only logs; used when no tracking endpoint is configured.
pub struct LogTracker;

impl ConversionTracker for LogTracker {
    fn track(&self, event: ConversionEvent) {
        debug!(
            event = event.event,
            value = %event.value,
            transaction_id = %event.transaction_id,
            "conversion event (no endpoint configured)"
        );
    }
}

/// Posts events as JSON to a collector endpoint.
pub struct HttpTracker {
    http: Client,
    endpoint: String,
}

impl HttpTracker {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

impl ConversionTracker for HttpTracker {
    fn track(&self, event: ConversionEvent) {
        let request = self.http.post(&self.endpoint).json(&event);
        tokio::spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => debug!(transaction_id = %event.transaction_id, "conversion event delivered"),
                Err(e) => warn!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "conversion event delivery failed"
                ),
            }
        });
    }
}

pub fn from_endpoint(endpoint: &str) -> Arc<dyn ConversionTracker> {
    if endpoint.is_empty() {
        return Arc::new(LogTracker);
    }
    match HttpTracker::new(endpoint) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            warn!(error = %e, "conversion tracker unavailable; falling back to logging");
            Arc::new(LogTracker)
        }
    }
}
