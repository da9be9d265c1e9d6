// Settlement watching: a source delivers status updates for one payment until the
// watcher sees the terminal "approved" status or the subscription is dropped.

use async_trait::async_trait;
use serde::Serialize;
use std::ops::ControlFlow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::payments::errors::WatchError;
use crate::payments::types::STATUS_APPROVED;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementUpdate {
    pub payment_id: String,
    /// Provider status, passed through verbatim.
    pub status: String,
}

impl SettlementUpdate {
    pub fn new(payment_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            payment_id: payment_id.into(),
            status: status.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == STATUS_APPROVED
    }
}

/// Returning `Break` ends the subscription; no further calls follow.
pub type UpdateCallback = Box<dyn FnMut(SettlementUpdate) -> ControlFlow<()> + Send>;

#[async_trait]
pub trait SettlementSource: Send + Sync {
    async fn subscribe(
        &self,
        payment_id: &str,
        on_update: UpdateCallback,
    ) -> Result<Subscription, WatchError>;
}

/// Cancel token for a running subscription. Dropping it tears the subscription down.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WatchState {
    Awaiting { status: Option<String> },
    Confirmed,
}

impl WatchState {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WatchState::Confirmed)
    }
}

pub struct SettlementWatcher {
    payment_id: String,
    state: watch::Receiver<WatchState>,
    subscription: Subscription,
}

impl SettlementWatcher {
    pub async fn start(source: &dyn SettlementSource, payment_id: &str) -> Result<Self, WatchError> {
        let (tx, rx) = watch::channel(WatchState::Awaiting { status: None });
        let mut confirmed = false;
        let on_update: UpdateCallback = Box::new(move |update: SettlementUpdate| {
            if confirmed {
                return ControlFlow::Break(());
            }
            if update.is_approved() {
                confirmed = true;
                info!(payment_id = %update.payment_id, "PIX payment settled");
                tx.send_replace(WatchState::Confirmed);
                ControlFlow::Break(())
            } else {
                debug!(payment_id = %update.payment_id, status = %update.status, "settlement still pending");
                tx.send_replace(WatchState::Awaiting {
                    status: Some(update.status),
                });
                ControlFlow::Continue(())
            }
        });

        let subscription = source.subscribe(payment_id, on_update).await?;
        Ok(Self {
            payment_id: payment_id.to_string(),
            state: rx,
            subscription,
        })
    }

    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }

    pub fn state(&self) -> WatchState {
        self.state.borrow().clone()
    }

    /// A fresh receiver for streaming state changes to the presentation layer.
    pub fn watch_state(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn cancel(&self) {
        debug!(payment_id = %self.payment_id, "cancelling settlement watch");
        self.subscription.cancel();
    }

    pub async fn confirmed(&mut self) -> bool {
        self.state.wait_for(WatchState::is_confirmed).await.is_ok()
    }
}
