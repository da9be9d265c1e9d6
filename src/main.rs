mod checkout;
mod payments;
mod server;
mod settings;
mod tracking;
mod webhook_server;

use crate::checkout::PaymentSubmitter;
use crate::payments::PixProvider;
use crate::server::CheckoutService;
use crate::webhook_server::WebhookState;
use anyhow::Result;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = settings::Config::load();

    if cfg.payments.access_token.is_empty() {
        tracing::error!("PAYMENTS_ACCESS_TOKEN not set; exiting");
        return Ok(());
    }
    tracing::info!(mode = ?cfg.settlement.mode, "Starting PIX checkout service");

    let provider = PixProvider::new(cfg.payments.clone())?;
    let submitter = PaymentSubmitter::new(
        provider.gateway(),
        tracking::from_endpoint(&cfg.tracking.endpoint),
        provider.settlement_source(&cfg.settlement),
    );

    let checkout = Arc::new(CheckoutService::new(submitter, cfg.checkout.clone()));
    checkout.spawn_reaper(Duration::from_secs(60));

    let mut app = checkout.router();
    if provider.webhook_secret().is_empty() {
        tracing::warn!("Webhook secret not configured - payment notifications will be rejected");
    }
    app = app.merge(webhook_server::routes(WebhookState {
        gateway: provider.gateway(),
        hub: provider.hub(),
        webhook_secret: provider.webhook_secret().to_string(),
        tolerance_seconds: provider.webhook_tolerance_seconds(),
    }));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server_port));
    tracing::info!(addr = %addr, "Starting checkout HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
