use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PaymentSettings {
    pub access_token: String,
    #[serde(default = "default_payments_base_url")]
    pub base_url: String,
    #[serde(default = "default_payments_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_webhook_tolerance_seconds")]
    pub webhook_tolerance_seconds: i64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: default_payments_base_url(),
            timeout_ms: default_payments_timeout_ms(),
            webhook_secret: String::new(),
            webhook_tolerance_seconds: default_webhook_tolerance_seconds(),
        }
    }
}

/// How settlement updates reach a checkout session.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// Provider notifications are pushed to the webhook endpoint.
    Webhook,
    /// The payment record is fetched on an interval.
    Polling,
}

impl SettlementMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "webhook" | "push" => Some(Self::Webhook),
            "polling" | "poll" => Some(Self::Polling),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SettlementSettings {
    #[serde(default = "default_settlement_mode")]
    pub mode: SettlementMode,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            mode: default_settlement_mode(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TrackingSettings {
    /// Conversion events are only logged when empty.
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CheckoutSettings {
    #[serde(default = "default_promo_apply_delay", with = "humantime_serde")]
    pub promo_apply_delay: Duration,
    /// Idle time after which a session is dropped.
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Idle limit for a session whose PIX code is issued but not yet paid.
    #[serde(default = "default_settlement_hold", with = "humantime_serde")]
    pub settlement_hold: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            promo_apply_delay: default_promo_apply_delay(),
            session_ttl: default_session_ttl(),
            settlement_hold: default_settlement_hold(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub payments: PaymentSettings,
    #[serde(default)]
    pub settlement: SettlementSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub checkout: CheckoutSettings,
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payments: PaymentSettings::default(),
            settlement: SettlementSettings::default(),
            tracking: TrackingSettings::default(),
            checkout: CheckoutSettings::default(),
            server_port: 8080,
        }
    }
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: PAYMENTS_ACCESS_TOKEN, PAYMENTS_BASE_URL, PAYMENTS_TIMEOUT_MS,
    /// PAYMENTS_WEBHOOK_SECRET, PAYMENTS_WEBHOOK_TOLERANCE_SECONDS, SETTLEMENT_MODE,
    /// SETTLEMENT_POLL_INTERVAL, TRACKING_ENDPOINT, PROMO_APPLY_DELAY, SESSION_TTL, SETTLEMENT_HOLD,
    /// SERVER_PORT
    pub fn load() -> Self {
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg: Config = fig.extract().unwrap_or_default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PAYMENTS_ACCESS_TOKEN") {
            self.payments.access_token = v;
        }
        if let Some(v) = var("PAYMENTS_BASE_URL") {
            self.payments.base_url = v;
        }
        if let Some(v) = var("PAYMENTS_TIMEOUT_MS") {
            self.payments.timeout_ms = v.parse().unwrap_or(self.payments.timeout_ms);
        }
        if let Some(v) = var("PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = v;
        }
        if let Some(v) = var("PAYMENTS_WEBHOOK_TOLERANCE_SECONDS") {
            self.payments.webhook_tolerance_seconds =
                v.parse().unwrap_or(self.payments.webhook_tolerance_seconds);
        }
        if let Some(v) = var("SETTLEMENT_MODE") {
            self.settlement.mode = SettlementMode::parse(&v).unwrap_or(self.settlement.mode);
        }
        if let Some(v) = var("SETTLEMENT_POLL_INTERVAL") {
            self.settlement.poll_interval = parse_duration_env(&v, self.settlement.poll_interval);
        }
        if let Some(v) = var("TRACKING_ENDPOINT") {
            self.tracking.endpoint = v;
        }
        if let Some(v) = var("PROMO_APPLY_DELAY") {
            self.checkout.promo_apply_delay =
                parse_duration_env(&v, self.checkout.promo_apply_delay);
        }
        if let Some(v) = var("SESSION_TTL") {
            self.checkout.session_ttl = parse_duration_env(&v, self.checkout.session_ttl);
        }
        if let Some(v) = var("SETTLEMENT_HOLD") {
            self.checkout.settlement_hold = parse_duration_env(&v, self.checkout.settlement_hold);
        }
        if let Some(v) = var("SERVER_PORT") {
            self.server_port = v.parse().unwrap_or(self.server_port);
        }
    }
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_payments_base_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_payments_timeout_ms() -> u64 {
    15_000
}

fn default_webhook_tolerance_seconds() -> i64 {
    300 // 5 minutes
}

fn default_settlement_mode() -> SettlementMode {
    SettlementMode::Webhook
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_promo_apply_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(3600) // 1 hour
}

fn default_settlement_hold() -> Duration {
    Duration::from_secs(24 * 3600) // PIX codes are valid for a day
}
