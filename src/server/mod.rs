use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::checkout::draft::{CatalogPackage, HeroSelection, OrderDraft};
use crate::checkout::errors::CheckoutError;
use crate::checkout::intake::Field;
use crate::checkout::session::{CheckoutSession, CheckoutView};
use crate::checkout::submit::{PaymentSubmitter, SettlementRecord};
use crate::settings::CheckoutSettings;

type SharedSession = Arc<Mutex<CheckoutSession>>;

pub struct CheckoutService {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    submitter: PaymentSubmitter,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(submitter: PaymentSubmitter, settings: CheckoutSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            submitter,
            settings,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/checkout", post(open_checkout))
            .route("/checkout/:id", get(get_checkout).delete(close_checkout))
            .route("/checkout/:id/fields", put(update_field))
            .route("/checkout/:id/terms", put(accept_terms))
            .route("/checkout/:id/extra-offer", put(set_extra_offer))
            .route("/checkout/:id/promo", post(apply_promo))
            .route("/checkout/:id/continue", post(continue_step))
            .route("/checkout/:id/back", post(back_step))
            .route("/checkout/:id/submit", post(submit_payment))
            .route("/checkout/:id/qr.png", get(qr_image))
            .route("/checkout/:id/events", get(settlement_events))
            .with_state(self)
    }

    async fn session(&self, id: Uuid) -> Result<SharedSession, ApiError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ApiError::NotFound(id))
    }

    /// Drops sessions idle past the configured TTL, or past the settlement hold while a
    /// PIX code is outstanding. Busy sessions are left for the next pass.
    pub async fn reap_expired(&self) -> usize {
        let ttl = self.settings.session_ttl;
        let hold = self.settings.settlement_hold;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| match session.try_lock() {
            Ok(mut s) if s.is_expired(ttl, hold) => {
                debug!(checkout_id = %id, "checkout session expired");
                s.close();
                false
            }
            _ => true,
        });
        before - sessions.len()
    }

    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let svc = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let reaped = svc.reap_expired().await;
                if reaped > 0 {
                    info!(reaped, "expired checkout sessions removed");
                }
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("checkout {0} not found")]
    NotFound(Uuid),
    #[error("no PIX code issued for this checkout yet")]
    NoSettlement,
    #[error("QR image could not be decoded: {0}")]
    QrImage(String),
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    field_errors: BTreeMap<Field, String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) | ApiError::NoSettlement => StatusCode::NOT_FOUND,
            ApiError::QrImage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Checkout(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };
        let (alert, field_errors) = match &self {
            ApiError::Checkout(e @ CheckoutError::IntakeInvalid(report)) => (e.alert(), report.errors.clone()),
            ApiError::Checkout(e) => (e.alert(), BTreeMap::new()),
            _ => (None, BTreeMap::new()),
        };
        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
            alert,
            field_errors,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum DraftSource {
    Catalog(CatalogPackage),
    Hero(HeroSelection),
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenCheckout {
    #[serde(default)]
    pub draft: Option<DraftSource>,
}

#[derive(Debug, Deserialize)]
pub struct FieldUpdate {
    pub field: Field,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TermsUpdate {
    pub accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExtraOfferUpdate {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PromoRequest {
    pub code: String,
}

type Svc = State<Arc<CheckoutService>>;

#[instrument(skip_all)]
async fn open_checkout(
    State(svc): Svc,
    Json(req): Json<OpenCheckout>,
) -> Result<(StatusCode, Json<CheckoutView>), ApiError> {
    let draft = match req.draft {
        Some(DraftSource::Catalog(p)) => Some(OrderDraft::from_catalog(p).map_err(CheckoutError::from)?),
        Some(DraftSource::Hero(h)) => Some(OrderDraft::from_hero(h).map_err(CheckoutError::from)?),
        None => None,
    };
    let session = CheckoutSession::open(draft);
    let view = session.view();
    svc.sessions
        .write()
        .await
        .insert(session.id(), Arc::new(Mutex::new(session)));
    info!(checkout_id = %view.id, title = %view.draft.title, "checkout session opened");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_checkout(State(svc): Svc, Path(id): Path<Uuid>) -> Result<Json<CheckoutView>, ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    Ok(Json(session.view()))
}

async fn close_checkout(State(svc): Svc, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    let session = svc.sessions.write().await.remove(&id).ok_or(ApiError::NotFound(id))?;
    session.lock().await.close();
    Ok(StatusCode::NO_CONTENT)
}

async fn update_field(
    State(svc): Svc,
    Path(id): Path<Uuid>,
    Json(req): Json<FieldUpdate>,
) -> Result<Json<CheckoutView>, ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    session.update_field(req.field, req.value)?;
    Ok(Json(session.view()))
}

async fn accept_terms(
    State(svc): Svc,
    Path(id): Path<Uuid>,
    Json(req): Json<TermsUpdate>,
) -> Result<Json<CheckoutView>, ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    session.set_terms_accepted(req.accepted);
    Ok(Json(session.view()))
}

async fn set_extra_offer(
    State(svc): Svc,
    Path(id): Path<Uuid>,
    Json(req): Json<ExtraOfferUpdate>,
) -> Result<Json<CheckoutView>, ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    session.set_extra_offer(req.enabled)?;
    Ok(Json(session.view()))
}

async fn apply_promo(
    State(svc): Svc,
    Path(id): Path<Uuid>,
    Json(req): Json<PromoRequest>,
) -> Result<(StatusCode, Json<CheckoutView>), ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    // The code has no pricing effect; only the "applying" indicator is driven.
    let _ = session.apply_promo_code(req.code, svc.settings.promo_apply_delay);
    Ok((StatusCode::ACCEPTED, Json(session.view())))
}

async fn continue_step(State(svc): Svc, Path(id): Path<Uuid>) -> Result<Json<CheckoutView>, ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    session.advance()?;
    Ok(Json(session.view()))
}

async fn back_step(State(svc): Svc, Path(id): Path<Uuid>) -> Result<Json<CheckoutView>, ApiError> {
    let session = svc.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    session.back()?;
    Ok(Json(session.view()))
}

#[instrument(skip(svc))]
async fn submit_payment(State(svc): Svc, Path(id): Path<Uuid>) -> Result<Json<SettlementRecord>, ApiError> {
    let session = svc.session(id).await?;
    let record = svc.submitter.submit(&session).await.map_err(|e| {
        warn!(checkout_id = %id, error = %e, "checkout submission rejected");
        e
    })?;
    Ok(Json(record))
}

async fn qr_image(State(svc): Svc, Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    let session = svc.session(id).await?;
    let record = {
        let mut session = session.lock().await;
        session.touch();
        session.settlement().cloned().ok_or(ApiError::NoSettlement)?
    };
    let bytes = record
        .qr_image_bytes()
        .map_err(|e| ApiError::QrImage(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

async fn settlement_events(
    State(svc): Svc,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = svc.session(id).await?;
    let rx = {
        let mut session = session.lock().await;
        session.touch();
        session.watch_state().ok_or(ApiError::NoSettlement)?
    };
    let stream = WatchStream::new(rx).map(|state| {
        let event = Event::default().event("settlement");
        Ok(event.json_data(&state).unwrap_or_else(|_| Event::default().comment("unserializable state")))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
