// HTTP routes for provider payment notifications

use crate::payments::settlement_hub::SettlementHub;
use crate::payments::webhook;
use crate::payments::PaymentGateway;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct WebhookState {
    pub gateway: Arc<dyn PaymentGateway>,
    pub hub: Arc<SettlementHub>,
    pub webhook_secret: String,
    pub tolerance_seconds: i64,
}

pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/payments", post(handle_payment_webhook))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn handle_payment_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match webhook::handle_webhook(
        &body,
        &headers,
        &state.webhook_secret,
        state.tolerance_seconds,
        state.gateway.clone(),
        state.hub.clone(),
    )
    .await
    {
        Ok(()) => {
            info!("Webhook processed successfully");
            (StatusCode::OK, "OK".to_string())
        }
        Err(e) => {
            error!("Webhook processing failed: {}", e);
            let status_code =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status_code, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::errors::PaymentApiError;
    use crate::payments::types::{CreatePaymentRequest, Payment};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tower::ServiceExt;

    struct ApprovedGateway;

    #[async_trait]
    impl PaymentGateway for ApprovedGateway {
        async fn create_pix_payment(&self, _: &CreatePaymentRequest) -> Result<Payment, PaymentApiError> {
            Err(PaymentApiError::Http("not used".into()))
        }

        async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError> {
            Ok(Payment {
                id: payment_id.to_string(),
                status: "approved".into(),
                point_of_interaction: None,
            })
        }
    }

    fn state(hub: Arc<SettlementHub>) -> WebhookState {
        WebhookState {
            gateway: Arc::new(ApprovedGateway),
            hub,
            webhook_secret: "whsec_test".to_string(),
            tolerance_seconds: 300,
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_missing_signature() {
        let headers = HeaderMap::new();
        let body = Bytes::from(r#"{"type":"payment","data":{"id":"1"}}"#);

        let response = handle_payment_webhook(State(state(Arc::new(SettlementHub::new()))), headers, body)
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_notification_reaches_waiter() {
        let hub = Arc::new(SettlementHub::new());
        let mut rx = hub.register_waiter("987").await;
        let app = routes(state(hub));

        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
        let manifest = webhook::signature_manifest("987", "req-1", &ts);
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_test").unwrap();
        mac.update(manifest.as_bytes());
        let v1 = hex::encode(mac.finalize().into_bytes());

        let req = Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .header("x-signature", format!("ts={ts},v1={v1}"))
            .header("x-request-id", "req-1")
            .body(Body::from(r#"{"type":"payment","action":"payment.updated","data":{"id":"987"}}"#))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let update = rx.recv().await.unwrap();
        assert!(update.is_approved());
    }
}
