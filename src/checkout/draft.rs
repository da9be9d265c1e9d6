// What is being bought, before any money has moved.

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Where the draft was picked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftChannel {
    Catalog,
    Hero,
    /// No draft reached the checkout; the default package was substituted.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub title: String,
    /// Display-only list price.
    pub base_price: Decimal,
    /// The price actually charged.
    pub discount_price: Decimal,
    pub delivery_time: String,
    pub service_id: i64,
    pub platform: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub channel: DraftChannel,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("discount price {discount} exceeds base price {base}")]
    DiscountAboveBase { base: Decimal, discount: Decimal },
    #[error("prices must not be negative")]
    NegativePrice,
    #[error("package title is empty")]
    EmptyTitle,
}

/// A fixed package card from the catalog listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPackage {
    pub title: String,
    pub base_price: Decimal,
    pub discount_price: Decimal,
    pub delivery_time: String,
    pub service_id: i64,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A choice made in the hero quantity picker.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroSelection {
    pub platform: String,
    pub metric: Metric,
    pub quantity: u64,
    pub base_price: Decimal,
    pub discount_price: Decimal,
    pub service_id: i64,
    pub delivery_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Followers,
    Likes,
    Views,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Followers => "Seguidores",
            Metric::Likes => "Curtidas",
            Metric::Views => "Visualizações",
        }
    }

    pub fn detect(title: &str) -> Option<Self> {
        let lower = title.to_lowercase();
        if lower.contains("seguidores") || lower.contains("inscritos") {
            Some(Metric::Followers)
        } else if lower.contains("curtidas") {
            Some(Metric::Likes)
        } else if lower.contains("visualiza") {
            Some(Metric::Views)
        } else {
            None
        }
    }
}

pub struct Platform;

impl Platform {
    pub const KNOWN: [&'static str; 5] = ["Instagram", "Facebook", "YouTube", "TikTok", "Kwai"];

    /// First known platform named in a package title.
    pub fn detect(title: &str) -> Option<&'static str> {
        let lower = title.to_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|p| lower.contains(&p.to_lowercase()))
    }
}

impl OrderDraft {
    pub fn from_catalog(package: CatalogPackage) -> Result<Self, DraftError> {
        let platform = package
            .platform
            .filter(|p| !p.trim().is_empty())
            .or_else(|| Platform::detect(&package.title).map(str::to_string))
            .unwrap_or_default();
        let draft = Self {
            title: package.title,
            base_price: package.base_price,
            discount_price: package.discount_price,
            delivery_time: package.delivery_time,
            service_id: package.service_id,
            platform,
            features: package.features,
            channel: DraftChannel::Catalog,
        };
        draft.validate()?;
        Ok(draft)
    }

    pub fn from_hero(selection: HeroSelection) -> Result<Self, DraftError> {
        let draft = Self {
            title: format!(
                "{} {} {}",
                selection.quantity,
                selection.metric.label(),
                selection.platform
            ),
            base_price: selection.base_price,
            discount_price: selection.discount_price,
            delivery_time: selection.delivery_time,
            service_id: selection.service_id,
            platform: selection.platform,
            features: Vec::new(),
            channel: DraftChannel::Hero,
        };
        draft.validate()?;
        Ok(draft)
    }

    /// Package shown when the checkout is opened without a selection.
    pub fn fallback() -> Self {
        Self {
            title: "1000 Seguidores Instagram".to_string(),
            base_price: dec!(119.90),
            discount_price: dec!(89.90),
            delivery_time: "Entrega em até 24 horas".to_string(),
            service_id: 1,
            platform: "Instagram".to_string(),
            features: vec![
                "Seguidores brasileiros".to_string(),
                "Início imediato".to_string(),
                "Entrega gradual em até 24 horas".to_string(),
            ],
            channel: DraftChannel::Fallback,
        }
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::EmptyTitle);
        }
        if self.base_price.is_sign_negative() || self.discount_price.is_sign_negative() {
            return Err(DraftError::NegativePrice);
        }
        if self.discount_price > self.base_price {
            return Err(DraftError::DiscountAboveBase {
                base: self.base_price,
                discount: self.discount_price,
            });
        }
        Ok(())
    }

    /// Always derived from the two prices; never stored.
    pub fn save_percentage(&self) -> u32 {
        save_percentage(self.base_price, self.discount_price)
    }

    /// Quantity encoded in the title: its first run of digits.
    pub fn quantity(&self) -> Option<u64> {
        static DIGITS: OnceLock<Regex> = OnceLock::new();
        let re = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("static regex"));
        re.find(&self.title).and_then(|m| m.as_str().parse().ok())
    }

    pub fn metric(&self) -> Option<Metric> {
        Metric::detect(&self.title)
    }

    /// A feature bullet that talks about delivery, else the SLA text.
    pub fn delivery_hint(&self) -> &str {
        self.features
            .iter()
            .find(|f| {
                let lower = f.to_lowercase();
                lower.contains("entrega") || lower.contains("delivery")
            })
            .map(String::as_str)
            .unwrap_or(self.delivery_time.as_str())
    }
}

pub fn save_percentage(base_price: Decimal, discount_price: Decimal) -> u32 {
    if base_price <= Decimal::ZERO || discount_price >= base_price {
        return 0;
    }
    let pct = (base_price - discount_price) * dec!(100) / base_price;
    pct.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u32()
        .unwrap_or(0)
}
