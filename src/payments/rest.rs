// Payment provider REST client
// Payment creation is sent exactly once; reads retry transient failures with jittered backoff.

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{info, instrument, warn};

use crate::payments::errors::{PaymentApiError, ProviderErrorEnvelope};
use crate::payments::types::{CreatePaymentRequest, Payment};
use crate::payments::PaymentGateway;

#[derive(Clone)]
pub struct PaymentsRestClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) access_token: String,
    pub(crate) max_retries: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
}

impl PaymentsRestClient {
    pub fn new(http: Client, base_url: impl Into<String>, access_token: String) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms.max(1);
        self.max_delay_ms = max_delay_ms.max(self.base_delay_ms);
        self
    }

    fn map_error(status: StatusCode, body: &str) -> PaymentApiError {
        if let Ok(env) = serde_json::from_str::<ProviderErrorEnvelope>(body) {
            env.to_api_error_with_status(status.as_u16())
        } else {
            PaymentApiError::Provider {
                status: status.as_u16(),
                error: None,
                message: Some(body.to_string()),
                causes: Vec::new(),
            }
        }
    }

    async fn send<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T, PaymentApiError> {
        let resp = req
            .send()
            .await
            .map_err(|e| PaymentApiError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PaymentApiError::Decode(e.to_string()))?;
        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| PaymentApiError::Decode(e.to_string()))
        } else {
            Err(Self::map_error(status, &text))
        }
    }

    async fn with_retries<F, Fut, T>(&self, desc: &str, mut op: F) -> Result<T, PaymentApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PaymentApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !e.is_transient() || attempt >= self.max_retries {
                        return Err(e);
                    }

                    // Exponential backoff with full jitter
                    let exp = self
                        .base_delay_ms
                        .saturating_mul(1u64 << attempt.min(20));
                    let cap = exp.min(self.max_delay_ms);
                    let mut rng = SmallRng::from_entropy();
                    let delay_ms = if cap > self.base_delay_ms {
                        rng.gen_range(self.base_delay_ms..=cap)
                    } else {
                        self.base_delay_ms
                    };

                    warn!(
                        target: "payments",
                        desc = %desc,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        http_status = ?e.status(),
                        next_delay_ms = delay_ms,
                        "retrying transient payment API error"
                    );

                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    // POST /v1/payments
    #[instrument(skip(self, request), fields(method = "POST", path = "/v1/payments", amount = %request.transaction_amount))]
    pub async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<Payment, PaymentApiError> {
        info!(
            target: "payments",
            method = "POST",
            path = "/v1/payments",
            amount = %request.transaction_amount,
            service_id = request.metadata.service_id,
            "payment request"
        );
        let url = format!("{}/v1/payments", self.base_url);
        let req = self.http.post(url).bearer_auth(&self.access_token).json(request);
        Self::send(req).await
    }

    // GET /v1/payments/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/payments/{id}", payment_id = %payment_id))]
    pub async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError> {
        self.with_retries("retrieve_payment", || {
            let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
            Self::send(self.http.get(url).bearer_auth(&self.access_token))
        })
        .await
    }
}

#[async_trait]
impl PaymentGateway for PaymentsRestClient {
    async fn create_pix_payment(&self, request: &CreatePaymentRequest) -> Result<Payment, PaymentApiError> {
        self.create_payment(request).await
    }

    async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError> {
        PaymentsRestClient::retrieve_payment(self, payment_id).await
    }
}
