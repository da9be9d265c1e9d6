// A checkout session owns everything one checkout screen needs: the draft, the customer
// data, the pricing state and, once paid, the settlement watch.

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkout::draft::{DraftChannel, OrderDraft};
use crate::checkout::errors::CheckoutError;
use crate::checkout::intake::{CustomerIntake, Field};
use crate::checkout::pricing::{PricingState, PricingView};
use crate::checkout::settlement::{SettlementSource, SettlementWatcher, WatchState};
use crate::checkout::steps::{Step, StepEvent};
use crate::checkout::submit::{build_payment_request, SettlementRecord};
use crate::payments::errors::PaymentApiError;
use crate::payments::types::{CreatePaymentRequest, Payment};
use crate::tracking::{ConversionEvent, ConversionTracker};

pub struct CheckoutSession {
    id: Uuid,
    draft: OrderDraft,
    intake: CustomerIntake,
    pricing: PricingState,
    step: Step,
    terms_accepted: bool,
    is_processing: bool,
    /// Latches once the provider accepted a payment; never cleared.
    payment_requested: bool,
    settlement: Option<SettlementRecord>,
    watcher: Option<SettlementWatcher>,
    alert: Option<String>,
    last_activity: Instant,
}

impl CheckoutSession {
    pub fn open(draft: Option<OrderDraft>) -> Self {
        let draft = draft.unwrap_or_else(|| {
            warn!("checkout opened without an order draft; using the default package");
            OrderDraft::fallback()
        });
        let session = Self {
            id: Uuid::new_v4(),
            pricing: PricingState::new(draft.discount_price),
            draft,
            intake: CustomerIntake::default(),
            step: Step::default(),
            terms_accepted: false,
            is_processing: false,
            payment_requested: false,
            settlement: None,
            watcher: None,
            alert: None,
            last_activity: Instant::now(),
        };
        debug!(checkout_id = %session.id, title = %session.draft.title, "checkout opened");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn draft(&self) -> &OrderDraft {
        &self.draft
    }

    pub fn intake(&self) -> &CustomerIntake {
        &self.intake
    }

    pub fn pricing(&self) -> &PricingState {
        &self.pricing
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn payment_requested(&self) -> bool {
        self.payment_requested
    }

    pub fn settlement(&self) -> Option<&SettlementRecord> {
        self.settlement.as_ref()
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    /// Marks the customer as still on the screen.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// A PIX code was issued and no approval has been seen yet.
    pub fn awaiting_settlement(&self) -> bool {
        self.payment_requested && !self.settlement_state().is_some_and(|s| s.is_confirmed())
    }

    /// Idle sessions expire after `ttl`; a session awaiting settlement is held for
    /// `settlement_hold` instead.
    pub fn is_expired(&self, ttl: Duration, settlement_hold: Duration) -> bool {
        let limit = if self.awaiting_settlement() {
            settlement_hold.max(ttl)
        } else {
            ttl
        };
        self.last_activity.elapsed() > limit
    }

    fn frozen(&self) -> bool {
        self.is_processing || self.payment_requested
    }

    pub fn update_field(&mut self, field: Field, value: impl Into<String>) -> Result<(), CheckoutError> {
        if self.frozen() {
            return Err(CheckoutError::IntakeFrozen);
        }
        self.intake.update_field(field, value);
        Ok(())
    }

    pub fn set_terms_accepted(&mut self, accepted: bool) {
        self.terms_accepted = accepted;
    }

    /// The one upsell toggle, reached from both the personal-data and confirmation steps.
    pub fn set_extra_offer(&mut self, enabled: bool) -> Result<(), CheckoutError> {
        if self.frozen() {
            return Err(CheckoutError::AlreadySubmitted);
        }
        self.pricing.set_extra_offer(enabled);
        Ok(())
    }

    pub fn apply_promo_code(&mut self, code: impl Into<String>, delay: Duration) -> JoinHandle<()> {
        self.pricing.promo_mut().apply(code, delay)
    }

    fn transition(&self, event: StepEvent) -> Result<Step, CheckoutError> {
        self.step.on(event).ok_or(CheckoutError::InvalidTransition {
            from: self.step,
            event,
        })
    }

    pub fn advance(&mut self) -> Result<Step, CheckoutError> {
        let next = self.transition(StepEvent::Continue)?;
        if self.step == Step::PersonalData {
            let report = self.intake.validate();
            if !report.valid {
                self.intake.errors = report.errors.clone();
                let err = CheckoutError::IntakeInvalid(report);
                self.alert = err.alert().map(str::to_string);
                return Err(err);
            }
            if !self.terms_accepted {
                let err = CheckoutError::TermsNotAccepted;
                self.alert = err.alert().map(str::to_string);
                return Err(err);
            }
        }
        self.alert = None;
        self.step = next;
        debug!(checkout_id = %self.id, step = %self.step, "checkout advanced");
        Ok(next)
    }

    pub fn back(&mut self) -> Result<Step, CheckoutError> {
        self.step = self.transition(StepEvent::Back)?;
        self.alert = None;
        Ok(self.step)
    }

    /// Checks the submit guards and latches `is_processing`. The returned payload must be
    /// sent exactly once and its outcome handed to `finish_submission`.
    pub fn begin_submission(&mut self) -> Result<CreatePaymentRequest, CheckoutError> {
        self.transition(StepEvent::Submit)?;
        if !self.terms_accepted {
            return Err(CheckoutError::TermsNotAccepted);
        }
        if self.is_processing {
            return Err(CheckoutError::AlreadyProcessing);
        }
        if self.payment_requested {
            return Err(CheckoutError::AlreadySubmitted);
        }
        self.is_processing = true;
        self.alert = None;
        Ok(build_payment_request(&self.draft, &self.intake, &self.pricing))
    }

    pub fn finish_submission(
        &mut self,
        outcome: Result<Payment, PaymentApiError>,
        tracker: &dyn ConversionTracker,
    ) -> Result<SettlementRecord, CheckoutError> {
        self.is_processing = false;
        let record = match outcome.and_then(|p| SettlementRecord::from_payment(&p)) {
            Ok(r) => r,
            Err(e) => {
                warn!(checkout_id = %self.id, error = %e, "PIX payment creation failed");
                let err = CheckoutError::Submission(e);
                self.alert = err.alert().map(str::to_string);
                return Err(err);
            }
        };

        self.payment_requested = true;
        self.touch();
        info!(
            checkout_id = %self.id,
            payment_id = %record.provider_payment_id,
            amount = %self.pricing.charge_amount(),
            "PIX payment created"
        );
        tracker.track(ConversionEvent::purchase(
            self.pricing.charge_amount(),
            record.provider_payment_id.clone(),
        ));
        self.settlement = Some(record.clone());
        Ok(record)
    }

    /// Starts watching the active settlement record. Watch failures are logged only.
    pub async fn start_watch(&mut self, source: &dyn SettlementSource) {
        let Some(record) = &self.settlement else {
            return;
        };
        if self.watcher.is_some() {
            return;
        }
        match SettlementWatcher::start(source, &record.provider_payment_id).await {
            Ok(w) => self.watcher = Some(w),
            Err(e) => warn!(
                checkout_id = %self.id,
                payment_id = %record.provider_payment_id,
                error = %e,
                "could not start settlement watch"
            ),
        }
    }

    pub fn settlement_state(&self) -> Option<WatchState> {
        self.watcher.as_ref().map(SettlementWatcher::state)
    }

    pub fn watch_state(&self) -> Option<watch::Receiver<WatchState>> {
        self.watcher.as_ref().map(SettlementWatcher::watch_state)
    }

    /// Tears down the settlement watch; the screen is being abandoned.
    pub fn close(&mut self) {
        if let Some(w) = self.watcher.take() {
            w.cancel();
        }
        debug!(checkout_id = %self.id, "checkout closed");
    }

    pub fn view(&self) -> CheckoutView {
        CheckoutView {
            id: self.id,
            step: self.step,
            channel: self.draft.channel,
            draft: self.draft.clone(),
            save_percentage: self.draft.save_percentage(),
            delivery_hint: self.draft.delivery_hint().to_string(),
            pricing: PricingView::from(&self.pricing),
            intake: self.intake.clone(),
            terms_accepted: self.terms_accepted,
            is_processing: self.is_processing,
            payment_requested: self.payment_requested,
            settlement: self.settlement.clone(),
            settlement_state: self.settlement_state(),
            alert: self.alert.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub id: Uuid,
    pub step: Step,
    pub channel: DraftChannel,
    pub draft: OrderDraft,
    pub save_percentage: u32,
    pub delivery_hint: String,
    pub pricing: PricingView,
    pub intake: CustomerIntake,
    pub terms_accepted: bool,
    pub is_processing: bool,
    pub payment_requested: bool,
    pub settlement: Option<SettlementRecord>,
    pub settlement_state: Option<WatchState>,
    pub alert: Option<String>,
}
