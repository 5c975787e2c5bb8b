pub mod payment;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{Router, http::Request, routing};
use tokio::net::TcpListener;

use crate::{config::Config, db::PaymentStore, provider::ProviderClient};

pub type Data = Arc<InnerData>;

pub struct InnerData {
    pub config: Config,
    pub provider: ProviderClient,
    pub store: Box<dyn PaymentStore>,
}

pub fn router(data: Data) -> Router {
    let layer = tower_http::trace::TraceLayer::new_for_http()
        .on_request(|request: &Request<_>, _: &tracing::Span| {
            tracing::debug!(method = ?request.method(), url = ?request.uri(), "req");
        })
        .on_response(
            |response: &axum::http::Response<_>, latency: Duration, _: &tracing::Span| {
                tracing::debug!(status = ?response.status(), ?latency, "res");
            },
        );

    Router::new()
        .route("/payments", routing::post(payment::initiate))
        .route("/payments/execute", routing::post(payment::execute))
        .route("/payments/cancel", routing::get(payment::cancel))
        .route("/health", routing::get(health))
        .with_state(data)
        .layer(layer)
}

pub async fn serve(data: Data, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;

    tracing::info!("listening on {bind}");

    axum::serve(listener, router(data)).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}
