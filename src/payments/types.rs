// Payment API DTOs for PIX intents
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const PIX_PAYMENT_METHOD: &str = "pix";
pub const CPF_IDENTIFICATION: &str = "CPF";
pub const STATUS_APPROVED: &str = "approved";

/// Body of `POST /v1/payments`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatePaymentRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_amount: Decimal,
    pub description: String,
    pub payment_method_id: String,
    pub payer: Payer,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payer {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub identification: Identification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identification {
    #[serde(rename = "type")]
    pub type_: String,
    pub number: String,
}

/// What the fulfillment backend reads to know what to deliver once paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub service_id: i64,
    pub link: String,
    pub quantity: u64,
    pub email: String,
    pub celular: String,
    pub first_name: String,
    pub platform: String,
}

// Payment minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_of_interaction: Option<PointOfInteraction>,
}

impl Payment {
    pub fn transaction_data(&self) -> Option<&TransactionData> {
        self.point_of_interaction
            .as_ref()
            .and_then(|p| p.transaction_data.as_ref())
    }

    pub fn is_approved(&self) -> bool {
        self.status == STATUS_APPROVED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointOfInteraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<TransactionData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

// Notification events

/// Provider notification envelope posted to the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub data: NotificationData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
}

// The provider emits numeric ids on payments and string ids on some notifications.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(u64),
        Str(String),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}
