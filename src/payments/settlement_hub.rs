// Push-based settlement source: provider notifications are published here and
// fanned out to the checkout sessions watching each payment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::checkout::settlement::{SettlementSource, SettlementUpdate, Subscription, UpdateCallback};
use crate::payments::errors::WatchError;

const DEFAULT_CHANNEL_CAPACITY: usize = 16;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600); // 1 hour

/// Internal record for one watched payment
struct WatchedPayment {
    tx: broadcast::Sender<SettlementUpdate>,
    created_at: Instant,
    last_event_id: Option<String>,
    last_status: Option<String>,
}

impl WatchedPayment {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            tx,
            created_at: Instant::now(),
            last_event_id: None,
            last_status: None,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

pub struct SettlementHub {
    payments: Arc<RwLock<HashMap<String, WatchedPayment>>>,
    ttl: Duration,
}

impl SettlementHub {
    pub fn new() -> Self {
        Self {
            payments: Arc::new(RwLock::new(HashMap::new())),
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register interest in a payment and return a receiver for its updates
    pub async fn register_waiter(&self, payment_id: &str) -> broadcast::Receiver<SettlementUpdate> {
        self.attach(payment_id).await.0
    }

    /// Subscribes to a payment and returns the last status it was published with, if any.
    async fn attach(&self, payment_id: &str) -> (broadcast::Receiver<SettlementUpdate>, Option<String>) {
        let mut payments = self.payments.write().await;

        self.cleanup_expired(&mut payments);

        let watched = payments.entry(payment_id.to_string()).or_insert_with(|| {
            debug!(payment_id = %payment_id, "Registering settlement waiter");
            WatchedPayment::new()
        });
        (watched.tx.subscribe(), watched.last_status.clone())
    }

    /// Publish a status to all waiters of a payment. Returns the number of receivers reached.
    /// The status is kept for waiters that register later.
    pub async fn publish_status(&self, payment_id: &str, status: &str, event_id: Option<&str>) -> usize {
        let mut payments = self.payments.write().await;

        self.cleanup_expired(&mut payments);

        let watched = payments.entry(payment_id.to_string()).or_insert_with(|| {
            debug!(payment_id = %payment_id, status = %status, "Settlement update before any waiter; keeping it");
            WatchedPayment::new()
        });

        if let (Some(event_id), Some(last)) = (event_id, &watched.last_event_id) {
            if event_id == last {
                debug!(payment_id = %payment_id, event_id = %event_id, "Skipping duplicate notification");
                return 0;
            }
        }
        if let Some(event_id) = event_id {
            watched.last_event_id = Some(event_id.to_string());
        }
        watched.last_status = Some(status.to_string());

        match watched.tx.send(SettlementUpdate::new(payment_id, status)) {
            Ok(count) => {
                debug!(payment_id = %payment_id, receivers = count, "Published settlement update");
                count
            }
            Err(_) => {
                debug!(payment_id = %payment_id, "Settlement update had no receivers");
                0
            }
        }
    }

    pub async fn last_status(&self, payment_id: &str) -> Option<String> {
        let payments = self.payments.read().await;
        payments.get(payment_id).and_then(|w| w.last_status.clone())
    }

    pub async fn has_waiter(&self, payment_id: &str) -> bool {
        self.payments.read().await.contains_key(payment_id)
    }

    fn cleanup_expired(&self, payments: &mut HashMap<String, WatchedPayment>) {
        payments.retain(|id, w| {
            let keep = !w.is_expired(self.ttl);
            if !keep {
                debug!(payment_id = %id, "Cleaned up expired settlement waiter");
            }
            keep
        });
    }
}

/// A subscriber's receiver. Dropping it removes the payment's entry once no other
/// subscriber is left, whether the subscription finished or was aborted.
struct Waiter {
    rx: Option<broadcast::Receiver<SettlementUpdate>>,
    payments: Arc<RwLock<HashMap<String, WatchedPayment>>>,
    payment_id: String,
}

impl Waiter {
    async fn recv(&mut self) -> Result<SettlementUpdate, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        drop(self.rx.take());
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let payments = Arc::clone(&self.payments);
        let payment_id = std::mem::take(&mut self.payment_id);
        runtime.spawn(async move {
            let mut payments = payments.write().await;
            if payments.get(&payment_id).is_some_and(|w| w.tx.receiver_count() == 0) {
                payments.remove(&payment_id);
                debug!(payment_id = %payment_id, "Released settlement waiter");
            }
        });
    }
}

impl Default for SettlementHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementSource for SettlementHub {
    async fn subscribe(
        &self,
        payment_id: &str,
        mut on_update: UpdateCallback,
    ) -> Result<Subscription, WatchError> {
        let (rx, last_status) = self.attach(payment_id).await;
        let mut waiter = Waiter {
            rx: Some(rx),
            payments: Arc::clone(&self.payments),
            payment_id: payment_id.to_string(),
        };
        let id = payment_id.to_string();
        let handle = tokio::spawn(async move {
            if let Some(status) = last_status {
                if on_update(SettlementUpdate::new(id.clone(), status)).is_break() {
                    debug!(payment_id = %id, "Settlement subscription finished on replayed status");
                    return;
                }
            }
            loop {
                match waiter.recv().await {
                    Ok(update) => {
                        if on_update(update).is_break() {
                            debug!(payment_id = %id, "Settlement subscription finished");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(payment_id = %id, skipped, "Settlement subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(payment_id = %id, "Settlement channel closed before approval");
                        break;
                    }
                }
            }
        });
        Ok(Subscription::new(handle))
    }
}
