// Pull-based settlement source for deployments that receive no provider notifications.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::checkout::settlement::{SettlementSource, SettlementUpdate, Subscription, UpdateCallback};
use crate::payments::errors::WatchError;
use crate::payments::PaymentGateway;

/// Fetches the payment on a fixed interval and reports status changes only.
pub struct PollingSource {
    gateway: Arc<dyn PaymentGateway>,
    interval: Duration,
}

impl PollingSource {
    pub fn new(gateway: Arc<dyn PaymentGateway>, interval: Duration) -> Self {
        Self {
            gateway,
            interval: interval.max(Duration::from_millis(10)),
        }
    }
}

#[async_trait]
impl SettlementSource for PollingSource {
    async fn subscribe(
        &self,
        payment_id: &str,
        mut on_update: UpdateCallback,
    ) -> Result<Subscription, WatchError> {
        let gateway = Arc::clone(&self.gateway);
        let interval = self.interval;
        let id = payment_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_status: Option<String> = None;
            loop {
                ticker.tick().await;
                let payment = match gateway.retrieve_payment(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(payment_id = %id, error = %WatchError::from(e), "settlement poll failed");
                        continue;
                    }
                };
                if last_status.as_deref() == Some(payment.status.as_str()) {
                    continue;
                }
                debug!(payment_id = %id, status = %payment.status, "settlement status changed");
                last_status = Some(payment.status.clone());
                if on_update(SettlementUpdate::new(id.clone(), payment.status)).is_break() {
                    break;
                }
            }
        });
        Ok(Subscription::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::settlement::{SettlementWatcher, WatchState};
    use crate::payments::errors::PaymentApiError;
    use crate::payments::types::{CreatePaymentRequest, Payment};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers each lookup with the next scripted status, repeating the last one.
    struct ScriptedGateway {
        statuses: Mutex<Vec<Result<&'static str, u16>>>,
        lookups: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(statuses: Vec<Result<&'static str, u16>>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn create_pix_payment(&self, _: &CreatePaymentRequest) -> Result<Payment, PaymentApiError> {
            Err(PaymentApiError::Http("not scripted".into()))
        }

        async fn retrieve_payment(&self, payment_id: &str) -> Result<Payment, PaymentApiError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let next = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            };
            match next {
                Ok(status) => Ok(Payment {
                    id: payment_id.to_string(),
                    status: status.to_string(),
                    point_of_interaction: None,
                }),
                Err(code) => Err(PaymentApiError::Provider {
                    status: code,
                    error: None,
                    message: None,
                    causes: vec![],
                }),
            }
        }
    }

    #[tokio::test]
    async fn polling_confirms_after_errors_and_pending() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Ok("pending"),
            Err(500),
            Ok("pending"),
            Ok("approved"),
        ]));
        let source = PollingSource::new(gateway.clone(), Duration::from_millis(10));
        let mut watcher = SettlementWatcher::start(&source, "321").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), watcher.confirmed())
            .await
            .expect("settlement should be confirmed");
        assert_eq!(watcher.state(), WatchState::Confirmed);

        let lookups = gateway.lookups.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway.lookups.load(Ordering::SeqCst), lookups);
    }
}
