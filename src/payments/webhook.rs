// Payment notification handling with signature verification and status resolution

use crate::payments::errors::WebhookError;
use crate::payments::settlement_hub::SettlementHub;
use crate::payments::types::PaymentNotification;
use crate::payments::PaymentGateway;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};

type HmacSha256 = Hmac<Sha256>;

/// Main webhook handler - verifies signature, resolves the payment status and publishes it
#[instrument(skip(payload, headers, gateway, hub))]
pub async fn handle_webhook(
    payload: &[u8],
    headers: &http::HeaderMap,
    webhook_secret: &str,
    tolerance_seconds: i64,
    gateway: Arc<dyn PaymentGateway>,
    hub: Arc<SettlementHub>,
) -> Result<(), WebhookError> {
    let notification: PaymentNotification = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {}", e)))?;

    let request_id = header_str(headers, "x-request-id").unwrap_or_default();
    verify_signature(
        &notification.data.id,
        request_id,
        headers,
        webhook_secret,
        tolerance_seconds,
    )?;

    process_notification(&notification, non_empty(request_id), gateway, hub).await
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// The string the provider signs for a notification.
pub fn signature_manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    let mut manifest = format!("id:{};", data_id.to_ascii_lowercase());
    if !request_id.is_empty() {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

/// Verify the `x-signature: ts=...,v1=...` header using HMAC SHA-256
pub fn verify_signature(
    data_id: &str,
    request_id: &str,
    headers: &http::HeaderMap,
    webhook_secret: &str,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    if webhook_secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    let signature_header = headers
        .get("x-signature")
        .ok_or(WebhookError::MissingSignature)?
        .to_str()
        .map_err(|e| WebhookError::InvalidSignature(format!("Invalid header encoding: {}", e)))?;

    let mut ts: Option<&str> = None;
    let mut signature: Option<&str> = None;
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", v)) => ts = Some(v),
            Some(("v1", v)) => signature = Some(v),
            _ => {}
        }
    }

    let ts = ts.ok_or_else(|| WebhookError::InvalidSignature("Missing ts in signature header".to_string()))?;
    let signature = signature.ok_or_else(|| WebhookError::InvalidSignature("No v1 signature found".to_string()))?;

    // The provider sends milliseconds; older integrations sent seconds.
    let raw: i64 = ts
        .parse()
        .map_err(|_| WebhookError::InvalidSignature(format!("Unparseable ts: {}", ts)))?;
    let timestamp = if raw > 100_000_000_000 { raw / 1000 } else { raw };

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| WebhookError::InvalidSignature(format!("System time error: {}", e)))?
        .as_secs() as i64;

    let time_diff = current_time.saturating_sub(timestamp).saturating_abs();
    if time_diff > tolerance_seconds {
        return Err(WebhookError::TimestampTolerance(format!(
            "Timestamp {} differs from current time {} by {} seconds (tolerance: {})",
            timestamp, current_time, time_diff, tolerance_seconds
        )));
    }

    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("HMAC init error: {}", e)))?;
    mac.update(signature_manifest(data_id, request_id, ts).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison
    let valid = expected.len() == signature.len()
        && expected
            .as_bytes()
            .iter()
            .zip(signature.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;

    if !valid {
        return Err(WebhookError::InvalidSignature("Signature mismatch".to_string()));
    }

    debug!(timestamp = timestamp, time_diff = time_diff, "Webhook signature verified successfully");
    Ok(())
}

/// Resolve the current status of the notified payment and publish it to waiters
#[instrument(skip(notification, gateway, hub), fields(payment_id = %notification.data.id))]
pub async fn process_notification(
    notification: &PaymentNotification,
    request_id: Option<&str>,
    gateway: Arc<dyn PaymentGateway>,
    hub: Arc<SettlementHub>,
) -> Result<(), WebhookError> {
    if notification.event_type != "payment" {
        info!(event_type = %notification.event_type, "Ignoring unsupported notification type");
        return Ok(());
    }

    let payment = gateway
        .retrieve_payment(&notification.data.id)
        .await
        .map_err(|e| WebhookError::ProcessingFailed(format!("Failed to resolve payment: {}", e)))?;

    info!(
        payment_id = %payment.id,
        status = %payment.status,
        action = notification.action.as_deref().unwrap_or(""),
        "Payment notification received"
    );

    let receivers = hub.publish_status(&payment.id, &payment.status, request_id).await;
    if receivers == 0 && payment.is_approved() {
        info!(payment_id = %payment.id, "Payment approved before any checkout watched it; kept for replay");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::errors::PaymentApiError;
    use crate::payments::types::{CreatePaymentRequest, Payment};
    use async_trait::async_trait;

    fn now_millis() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
    }

    fn sign(secret: &str, data_id: &str, request_id: &str, ts: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signature_manifest(data_id, request_id, ts).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_headers(secret: &str, data_id: &str, request_id: &str, ts: i64) -> http::HeaderMap {
        let ts = ts.to_string();
        let sig = sign(secret, data_id, request_id, &ts);
        let mut headers = http::HeaderMap::new();
        headers.insert("x-signature", format!("ts={},v1={}", ts, sig).parse().unwrap());
        headers.insert("x-request-id", request_id.parse().unwrap());
        headers
    }

    struct ApprovedGateway;

    #[async_trait]
    impl PaymentGateway for ApprovedGateway {
        async fn create_pix_payment(&self, _: &CreatePaymentRequest) -> Result<Payment, PaymentApiError> {
            Err(PaymentApiError::Http("unused".into()))
        }

        async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError> {
            Ok(Payment {
                id: payment_id.to_string(),
                status: "approved".into(),
                point_of_interaction: None,
            })
        }
    }

    #[test]
    fn test_verify_signature_valid() {
        let headers = signed_headers("mp_secret", "123", "req-1", now_millis());
        assert!(verify_signature("123", "req-1", &headers, "mp_secret", 300).is_ok());
    }

    #[test]
    fn test_verify_signature_invalid() {
        let headers = signed_headers("other_secret", "123", "req-1", now_millis());
        let result = verify_signature("123", "req-1", &headers, "mp_secret", 300);
        assert!(matches!(result, Err(WebhookError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_signature_missing_header() {
        let result = verify_signature("123", "", &http::HeaderMap::new(), "secret", 300);
        assert!(matches!(result, Err(WebhookError::MissingSignature)));
    }

    #[test]
    fn test_verify_signature_missing_secret() {
        let headers = signed_headers("mp_secret", "123", "req-1", now_millis());
        let result = verify_signature("123", "req-1", &headers, "", 300);
        assert!(matches!(result, Err(WebhookError::MissingSecret)));
    }

    #[test]
    fn test_verify_signature_timestamp_tolerance() {
        let headers = signed_headers("mp_secret", "123", "req-1", 1_000_000);
        let result = verify_signature("123", "req-1", &headers, "mp_secret", 300);
        assert!(matches!(result, Err(WebhookError::TimestampTolerance(_))));
    }

    #[test]
    fn manifest_omits_missing_request_id() {
        assert_eq!(signature_manifest("ABC", "", "17"), "id:abc;ts:17;");
        assert_eq!(signature_manifest("1", "r", "17"), "id:1;request-id:r;ts:17;");
    }

    #[tokio::test]
    async fn test_notification_publishes_resolved_status() {
        let hub = Arc::new(SettlementHub::new());
        let mut rx = hub.register_waiter("123").await;
        let payload = br#"{"type":"payment","action":"payment.updated","data":{"id":"123"}}"#;
        let headers = signed_headers("mp_secret", "123", "req-9", now_millis());

        handle_webhook(payload, &headers, "mp_secret", 300, Arc::new(ApprovedGateway), hub.clone())
            .await
            .unwrap();

        let update = rx.recv().await.unwrap();
        assert!(update.is_approved());
        assert_eq!(update.payment_id, "123");
    }

    #[tokio::test]
    async fn test_non_payment_notification_is_ignored() {
        let hub = Arc::new(SettlementHub::new());
        let payload = br#"{"type":"merchant_order","data":{"id":"77"}}"#;
        let headers = signed_headers("mp_secret", "77", "req-2", now_millis());

        let result =
            handle_webhook(payload, &headers, "mp_secret", 300, Arc::new(ApprovedGateway), hub.clone()).await;
        assert!(result.is_ok());
        assert!(hub.last_status("77").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let result = handle_webhook(
            b"not json",
            &http::HeaderMap::new(),
            "mp_secret",
            300,
            Arc::new(ApprovedGateway),
            Arc::new(SettlementHub::new()),
        )
        .await;
        assert!(matches!(result, Err(WebhookError::MalformedPayload(_))));
    }
}
