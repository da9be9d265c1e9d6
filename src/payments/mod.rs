// PIX payment provider module

pub mod errors;
pub mod polling;
pub mod rest;
pub mod settlement_hub;
pub mod types;
pub mod webhook;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::checkout::settlement::SettlementSource;
use crate::settings::{PaymentSettings, SettlementMode, SettlementSettings};
use self::errors::PaymentApiError;
use self::polling::PollingSource;
use self::rest::PaymentsRestClient;
use self::settlement_hub::SettlementHub;
use self::types::{CreatePaymentRequest, Payment};

/// Outbound seam to the payment API.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_pix_payment(&self, request: &CreatePaymentRequest) -> Result<Payment, PaymentApiError>;

    async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError>;
}

#[derive(Clone)]
pub struct PixProvider {
    pub(crate) cfg: PaymentSettings,
    pub(crate) rest: Arc<PaymentsRestClient>,
    pub(crate) hub: Arc<SettlementHub>,
}

impl PixProvider {
    // Build reqwest client with rustls and timeout from cfg
    pub fn new(cfg: PaymentSettings) -> Result<Self, PaymentApiError> {
        let timeout = Duration::from_millis(if cfg.timeout_ms > 0 { cfg.timeout_ms } else { 15_000 });
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentApiError::Http(e.to_string()))?;

        let rest = Arc::new(PaymentsRestClient::new(
            http,
            cfg.base_url.clone(),
            cfg.access_token.clone(),
        ));

        Ok(Self {
            cfg,
            rest,
            hub: Arc::new(SettlementHub::new()),
        })
    }

    pub fn gateway(&self) -> Arc<dyn PaymentGateway> {
        self.rest.clone()
    }

    pub fn hub(&self) -> Arc<SettlementHub> {
        Arc::clone(&self.hub)
    }

    pub fn settlement_source(&self, settings: &SettlementSettings) -> Arc<dyn SettlementSource> {
        match settings.mode {
            SettlementMode::Webhook => self.hub.clone(),
            SettlementMode::Polling => Arc::new(PollingSource::new(self.gateway(), settings.poll_interval)),
        }
    }

    pub fn webhook_secret(&self) -> &str {
        &self.cfg.webhook_secret
    }

    pub fn webhook_tolerance_seconds(&self) -> i64 {
        self.cfg.webhook_tolerance_seconds
    }
}
