// Payment intent construction and the settlement record produced from the provider reply.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::checkout::draft::OrderDraft;
use crate::checkout::errors::CheckoutError;
use crate::checkout::intake::CustomerIntake;
use crate::checkout::pricing::PricingState;
use crate::checkout::session::CheckoutSession;
use crate::checkout::settlement::SettlementSource;
use crate::payments::errors::PaymentApiError;
use crate::payments::PaymentGateway;
use crate::tracking::ConversionTracker;
use crate::payments::types::{
    CreatePaymentRequest, Identification, Payer, Payment, PaymentMetadata, CPF_IDENTIFICATION,
    PIX_PAYMENT_METHOD,
};

pub fn build_payment_request(
    draft: &OrderDraft,
    intake: &CustomerIntake,
    pricing: &PricingState,
) -> CreatePaymentRequest {
    let (first_name, last_name) = intake.split_name();
    let quantity = draft.quantity().unwrap_or_else(|| {
        warn!(title = %draft.title, "package title carries no quantity; sending 0");
        0
    });

    CreatePaymentRequest {
        transaction_amount: pricing.charge_amount(),
        description: draft.title.clone(),
        payment_method_id: PIX_PAYMENT_METHOD.to_string(),
        payer: Payer {
            email: intake.email.trim().to_string(),
            first_name: first_name.clone(),
            last_name,
            identification: Identification {
                type_: CPF_IDENTIFICATION.to_string(),
                number: intake.document.trim().to_string(),
            },
        },
        metadata: PaymentMetadata {
            service_id: draft.service_id,
            link: intake.link.trim().to_string(),
            quantity,
            email: intake.email.trim().to_string(),
            celular: intake.phone.trim().to_string(),
            first_name,
            platform: draft.platform.clone(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub qr_code_image: String,
    /// PIX copy-and-paste code.
    pub pix_code: String,
    pub provider_payment_id: String,
}

impl SettlementRecord {
    pub fn from_payment(payment: &Payment) -> Result<Self, PaymentApiError> {
        let data = payment
            .transaction_data()
            .ok_or_else(|| PaymentApiError::MissingQrCode(payment.id.clone()))?;
        match (&data.qr_code_base64, &data.qr_code) {
            (Some(image), Some(code)) if !code.is_empty() => Ok(Self {
                qr_code_image: image.clone(),
                pix_code: code.clone(),
                provider_payment_id: payment.id.clone(),
            }),
            _ => Err(PaymentApiError::MissingQrCode(payment.id.clone())),
        }
    }

    pub fn qr_image_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.qr_code_image.trim())
    }
}

/// Sends a session's payment intent exactly once and hands the reply back to it.
#[derive(Clone)]
pub struct PaymentSubmitter {
    gateway: Arc<dyn PaymentGateway>,
    tracker: Arc<dyn ConversionTracker>,
    source: Arc<dyn SettlementSource>,
}

impl PaymentSubmitter {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        tracker: Arc<dyn ConversionTracker>,
        source: Arc<dyn SettlementSource>,
    ) -> Self {
        Self {
            gateway,
            tracker,
            source,
        }
    }

    /// The session lock is released while the provider call is in flight so the screen
    /// can still be read; `is_processing` keeps a second submit out meanwhile.
    ///
    /// Once sent, the submission runs to completion on its own task: a caller that goes
    /// away mid-flight does not strand the session or lose the issued PIX code.
    #[instrument(skip_all)]
    pub async fn submit(&self, session: &Arc<Mutex<CheckoutSession>>) -> Result<SettlementRecord, CheckoutError> {
        let request = session.lock().await.begin_submission()?;

        let this = self.clone();
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let outcome = this.gateway.create_pix_payment(&request).await;

            let mut session = session.lock().await;
            let record = session.finish_submission(outcome, this.tracker.as_ref())?;
            session.start_watch(this.source.as_ref()).await;
            Ok::<_, CheckoutError>(record)
        })
        .await
        .map_err(|e| CheckoutError::SubmissionTask(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::intake::Field;
    use crate::checkout::settlement::{SettlementUpdate, Subscription, UpdateCallback, WatchState};
    use crate::checkout::steps::Step;
    use crate::payments::errors::WatchError;
    use crate::payments::types::{PointOfInteraction, TransactionData};
    use crate::tracking::ConversionEvent;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn intake() -> CustomerIntake {
        let mut intake = CustomerIntake::default();
        intake.update_field(Field::Email, " ana@example.com ");
        intake.update_field(Field::Name, "Ana Souza");
        intake.update_field(Field::Document, "12345678900");
        intake.update_field(Field::Link, "https://instagram.com/ana");
        intake.update_field(Field::Phone, "11999990000");
        intake
    }

    #[test]
    fn payload_carries_surcharged_amount_and_fulfillment_metadata() {
        let draft = OrderDraft::fallback();
        let pricing = PricingState::new(draft.discount_price);
        let req = build_payment_request(&draft, &intake(), &pricing);

        assert_eq!(req.transaction_amount, dec!(90.80));
        assert_eq!(req.payment_method_id, "pix");
        assert_eq!(req.description, "1000 Seguidores Instagram");
        assert_eq!(req.payer.email, "ana@example.com");
        assert_eq!(req.payer.first_name, "Ana");
        assert_eq!(req.payer.last_name, "Souza");
        assert_eq!(req.payer.identification.type_, "CPF");
        assert_eq!(req.metadata.quantity, 1000);
        assert_eq!(req.metadata.service_id, draft.service_id);
        assert_eq!(req.metadata.celular, "11999990000");
        assert_eq!(req.metadata.platform, "Instagram");
    }

    #[test]
    fn upsell_is_included_in_the_charge() {
        let draft = OrderDraft::fallback();
        let mut pricing = PricingState::new(draft.discount_price);
        pricing.set_extra_offer(true);
        let req = build_payment_request(&draft, &intake(), &pricing);
        assert_eq!(req.transaction_amount, dec!(100.80));
    }

    #[test]
    fn record_requires_qr_payload() {
        let mut payment = Payment {
            id: "77".into(),
            status: "pending".into(),
            point_of_interaction: None,
        };
        assert!(matches!(
            SettlementRecord::from_payment(&payment),
            Err(PaymentApiError::MissingQrCode(_))
        ));

        payment.point_of_interaction = Some(PointOfInteraction {
            transaction_data: Some(TransactionData {
                qr_code_base64: Some("aGVsbG8=".into()),
                qr_code: Some("00020126pix".into()),
            }),
        });
        let record = SettlementRecord::from_payment(&payment).unwrap();
        assert_eq!(record.provider_payment_id, "77");
        assert_eq!(record.qr_image_bytes().unwrap(), b"hello");
    }

    fn pix_payment(id: &str) -> Payment {
        Payment {
            id: id.to_string(),
            status: "pending".into(),
            point_of_interaction: Some(PointOfInteraction {
                transaction_data: Some(TransactionData {
                    qr_code_base64: Some("aGVsbG8=".into()),
                    qr_code: Some("00020126pix".into()),
                }),
            }),
        }
    }

    /// Counts create calls and answers slowly so concurrent submits overlap.
    struct CountingGateway {
        creates: AtomicUsize,
        last_amount: std::sync::Mutex<Option<rust_decimal::Decimal>>,
        fail: bool,
    }

    impl CountingGateway {
        fn new(fail: bool) -> Self {
            Self {
                creates: AtomicUsize::new(0),
                last_amount: std::sync::Mutex::new(None),
                fail,
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for CountingGateway {
        async fn create_pix_payment(&self, request: &CreatePaymentRequest) -> Result<Payment, PaymentApiError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_amount.lock().unwrap() = Some(request.transaction_amount);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(PaymentApiError::Http("connection reset".into()));
            }
            Ok(pix_payment(&n.to_string()))
        }

        async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError> {
            Ok(pix_payment(payment_id))
        }
    }

    #[derive(Default)]
    struct RecordingTracker {
        events: std::sync::Mutex<Vec<ConversionEvent>>,
    }

    impl ConversionTracker for RecordingTracker {
        fn track(&self, event: ConversionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Reports the payment as approved right away.
    struct ApprovingSource;

    #[async_trait]
    impl SettlementSource for ApprovingSource {
        async fn subscribe(&self, payment_id: &str, mut on_update: UpdateCallback) -> Result<Subscription, WatchError> {
            let id = payment_id.to_string();
            let handle = tokio::spawn(async move {
                let _ = on_update(SettlementUpdate::new(id, "approved"));
                std::future::pending::<()>().await;
            });
            Ok(Subscription::new(handle))
        }
    }

    fn ready_session() -> Arc<Mutex<CheckoutSession>> {
        let mut session = CheckoutSession::open(Some(OrderDraft::fallback()));
        for (field, value) in [
            (Field::Email, "ana@example.com"),
            (Field::Name, "Ana Souza"),
            (Field::Document, "12345678900"),
            (Field::Link, "https://instagram.com/ana"),
            (Field::Phone, "11999990000"),
        ] {
            session.update_field(field, value).unwrap();
        }
        session.set_terms_accepted(true);
        session.advance().unwrap();
        session.advance().unwrap();
        assert_eq!(session.step(), Step::Confirmation);
        Arc::new(Mutex::new(session))
    }

    fn submitter(gateway: Arc<CountingGateway>, tracker: Arc<RecordingTracker>) -> PaymentSubmitter {
        PaymentSubmitter::new(gateway, tracker, Arc::new(ApprovingSource))
    }

    #[tokio::test]
    async fn concurrent_submits_create_one_payment() {
        let gateway = Arc::new(CountingGateway::new(false));
        let tracker = Arc::new(RecordingTracker::default());
        let submitter = submitter(gateway.clone(), tracker.clone());
        let session = ready_session();

        let (a, b) = tokio::join!(submitter.submit(&session), submitter.submit(&session));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(CheckoutError::AlreadyProcessing)
        ));

        let again = submitter.submit(&session).await;
        assert!(matches!(again, Err(CheckoutError::AlreadySubmitted)));
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_submit_tracks_purchase_and_watches_settlement() {
        let gateway = Arc::new(CountingGateway::new(false));
        let tracker = Arc::new(RecordingTracker::default());
        let session = ready_session();

        let record = submitter(gateway.clone(), tracker.clone())
            .submit(&session)
            .await
            .unwrap();
        assert_eq!(record.pix_code, "00020126pix");
        assert_eq!(*gateway.last_amount.lock().unwrap(), Some(dec!(90.80)));

        let events = tracker.events.lock().unwrap().clone();
        assert_eq!(events, vec![ConversionEvent::purchase(dec!(90.80), "1")]);

        let mut state = session.lock().await.watch_state().unwrap();
        state.wait_for(WatchState::is_confirmed).await.unwrap();
        let view = session.lock().await.view();
        assert_eq!(view.save_percentage, 25);
        assert_eq!(view.settlement_state, Some(WatchState::Confirmed));
    }

    #[tokio::test]
    async fn failed_submit_can_be_retried() {
        let gateway = Arc::new(CountingGateway::new(true));
        let tracker = Arc::new(RecordingTracker::default());
        let submitter = submitter(gateway.clone(), tracker.clone());
        let session = ready_session();

        assert!(matches!(
            submitter.submit(&session).await,
            Err(CheckoutError::Submission(_))
        ));
        assert!(matches!(
            submitter.submit(&session).await,
            Err(CheckoutError::Submission(_))
        ));
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 2);
        assert!(tracker.events.lock().unwrap().is_empty());
        assert!(!session.lock().await.payment_requested());
    }

    #[tokio::test]
    async fn submission_completes_when_caller_goes_away() {
        let gateway = Arc::new(CountingGateway::new(false));
        let tracker = Arc::new(RecordingTracker::default());
        let submitter = submitter(gateway.clone(), tracker.clone());
        let session = ready_session();

        let caller = {
            let submitter = submitter.clone();
            let session = Arc::clone(&session);
            tokio::spawn(async move { submitter.submit(&session).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let session = session.lock().await;
            assert!(!session.is_processing());
            assert!(session.payment_requested());
            assert_eq!(session.settlement().map(|r| r.provider_payment_id.as_str()), Some("1"));
        }
        assert!(matches!(
            submitter.submit(&session).await,
            Err(CheckoutError::AlreadySubmitted)
        ));
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.events.lock().unwrap().len(), 1);
    }
}
