// Payable amount for a checkout, plus the upsell and promo-code inputs that feed it.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Price of the optional add-on offered in steps 1 and 3.
pub const EXTRA_OFFER_PRICE: Decimal = dec!(9.90);
/// Surcharge applied to every PIX amount sent to the provider.
pub const PIX_SURCHARGE_RATE: Decimal = dec!(1.01);
/// Length of the upsell urgency countdown.
pub const OFFER_WINDOW: Duration = Duration::from_secs(15 * 60);

pub fn recompute(discount_price: Decimal, add_extra_offer: bool) -> Decimal {
    if add_extra_offer {
        discount_price + EXTRA_OFFER_PRICE
    } else {
        discount_price
    }
}

/// `total * 1.01` to cents, halves away from zero.
pub fn charge_amount(total_amount: Decimal) -> Decimal {
    (total_amount * PIX_SURCHARGE_RATE).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Single owner of the upsell flag; both render sites go through `set_extra_offer`.
#[derive(Debug)]
pub struct PricingState {
    discount_price: Decimal,
    add_extra_offer: bool,
    total_amount: Decimal,
    promo: PromoCode,
    countdown: OfferCountdown,
}

impl PricingState {
    pub fn new(discount_price: Decimal) -> Self {
        Self {
            discount_price,
            add_extra_offer: false,
            total_amount: recompute(discount_price, false),
            promo: PromoCode::default(),
            countdown: OfferCountdown::start(OFFER_WINDOW),
        }
    }

    pub fn set_extra_offer(&mut self, enabled: bool) {
        self.add_extra_offer = enabled;
        self.total_amount = recompute(self.discount_price, self.add_extra_offer);
    }

    pub fn add_extra_offer(&self) -> bool {
        self.add_extra_offer
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn charge_amount(&self) -> Decimal {
        charge_amount(self.total_amount)
    }

    pub fn promo(&self) -> &PromoCode {
        &self.promo
    }

    pub fn promo_mut(&mut self) -> &mut PromoCode {
        &mut self.promo
    }

    pub fn countdown(&self) -> &OfferCountdown {
        &self.countdown
    }
}

/// Promo code input. Applying a code only shows a loading state; it never changes the total.
#[derive(Debug, Default)]
pub struct PromoCode {
    code: String,
    /// Generation of the apply in flight, 0 when idle.
    applying: Arc<AtomicU64>,
    generation: u64,
}

impl PromoCode {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::SeqCst) != 0
    }

    pub fn apply(&mut self, code: impl Into<String>, delay: Duration) -> JoinHandle<()> {
        self.code = code.into();
        self.generation += 1;
        let generation = self.generation;
        self.applying.store(generation, Ordering::SeqCst);
        debug!(code = %self.code, generation, "applying promo code");
        let applying = Arc::clone(&self.applying);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer apply owns the flag now.
            let _ = applying.compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
        })
    }
}

/// Display-only urgency timer for the upsell banner; restarts when it runs out.
#[derive(Debug, Clone, Copy)]
pub struct OfferCountdown {
    started_at: Instant,
    window: Duration,
}

impl OfferCountdown {
    pub fn start(window: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            window,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    fn remaining_at(&self, now: Instant) -> Duration {
        if self.window.is_zero() {
            return Duration::ZERO;
        }
        let elapsed = now.saturating_duration_since(self.started_at).as_millis() % self.window.as_millis();
        self.window - Duration::from_millis(elapsed as u64)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingView {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub charge_amount: Decimal,
    pub add_extra_offer: bool,
    #[serde(with = "rust_decimal::serde::float")]
    pub extra_offer_price: Decimal,
    pub promocode: String,
    pub promo_applying: bool,
    pub offer_remaining_secs: u64,
}

impl From<&PricingState> for PricingView {
    fn from(p: &PricingState) -> Self {
        Self {
            total_amount: p.total_amount(),
            charge_amount: p.charge_amount(),
            add_extra_offer: p.add_extra_offer(),
            extra_offer_price: EXTRA_OFFER_PRICE,
            promocode: p.promo().code().to_string(),
            promo_applying: p.promo().is_applying(),
            offer_remaining_secs: p.countdown().remaining().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_follows_any_toggle_sequence() {
        let mut pricing = PricingState::new(dec!(89.90));
        assert_eq!(pricing.total_amount(), dec!(89.90));

        for (i, enabled) in [true, true, false, true, false, false, true].into_iter().enumerate() {
            pricing.set_extra_offer(enabled);
            let expected = if enabled { dec!(99.80) } else { dec!(89.90) };
            assert_eq!(pricing.total_amount(), expected, "toggle #{i}");
        }
    }

    #[test]
    fn recompute_is_pure() {
        assert_eq!(recompute(dec!(20), true), dec!(29.90));
        assert_eq!(recompute(dec!(20), true), recompute(dec!(20), true));
        assert_eq!(recompute(dec!(20), false), dec!(20));
    }

    #[test]
    fn charge_amount_adds_one_percent_and_rounds_to_cents() {
        assert_eq!(charge_amount(dec!(89.90)), dec!(90.80));
        assert_eq!(charge_amount(dec!(99.80)), dec!(100.80));
        assert_eq!(charge_amount(dec!(100)), dec!(101.00));
        assert_eq!(charge_amount(dec!(0.50)), dec!(0.51)); // 0.505 rounds up
        assert_eq!(charge_amount(dec!(29.90)), dec!(30.20));
    }

    #[tokio::test]
    async fn promo_code_is_inert() {
        let mut pricing = PricingState::new(dec!(89.90));
        let handle = pricing.promo_mut().apply("BLACKFRIDAY", Duration::from_millis(20));
        assert!(pricing.promo().is_applying());
        assert_eq!(pricing.total_amount(), dec!(89.90));

        handle.await.unwrap();
        assert!(!pricing.promo().is_applying());
        assert_eq!(pricing.promo().code(), "BLACKFRIDAY");
        assert_eq!(pricing.total_amount(), dec!(89.90));
    }

    #[tokio::test]
    async fn reapplying_restarts_the_loading_window() {
        let mut promo = PromoCode::default();
        let first = promo.apply("A", Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = promo.apply("B", Duration::from_millis(100));

        first.await.unwrap();
        assert!(promo.is_applying());
        assert_eq!(promo.code(), "B");

        second.await.unwrap();
        assert!(!promo.is_applying());
    }

    #[test]
    fn countdown_wraps_around() {
        let countdown = OfferCountdown::start(Duration::from_secs(60));
        let start = countdown.started_at;
        assert_eq!(countdown.remaining_at(start), Duration::from_secs(60));
        assert_eq!(countdown.remaining_at(start + Duration::from_secs(45)), Duration::from_secs(15));
        assert_eq!(countdown.remaining_at(start + Duration::from_secs(75)), Duration::from_secs(45));
    }
}
