use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use axum_extra::extract::Query;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::{
    api::Data,
    db::PaymentStore,
    error::{ApiError, StoreError},
    payment::STATUS_APPROVED,
    provider::{self, CreatePaymentRequest, RedirectUrls},
};

type JsonResponse = (StatusCode, Json<Value>);

#[derive(Debug, serde::Deserialize)]
pub struct InitiateRequest {
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_description")]
    pub description: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_description() -> String {
    "Payment transaction description".to_string()
}

#[derive(Debug, serde::Deserialize)]
pub struct ExecuteQuery {
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    #[serde(rename = "PayerID")]
    pub payer_id: String,
}

pub async fn initiate(
    State(data): State<Data>,
    headers: HeaderMap,
    Json(req): Json<InitiateRequest>,
) -> Result<JsonResponse, ApiError> {
    let base = external_base(&data, &headers);

    let request = CreatePaymentRequest::sale(
        req.amount,
        req.currency,
        req.description,
        RedirectUrls {
            return_url: format!("{base}/payments/execute"),
            cancel_url: format!("{base}/payments/cancel"),
        },
    );

    let res = data.provider.create_payment(&request).await?;

    match provider::approval_url(&res) {
        Some(url) => {
            tracing::info!(payment_id = ?res.get("id"), "payment_created");

            Ok((StatusCode::OK, Json(json!({ "approval_url": url }))))
        }
        None => {
            tracing::warn!(response = %res, "no approval_url");

            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to create payment" })),
            ))
        }
    }
}

pub async fn execute(
    State(data): State<Data>,
    Query(query): Query<ExecuteQuery>,
) -> Result<JsonResponse, ApiError> {
    let res = data
        .provider
        .execute_payment(&query.payment_id, &query.payer_id)
        .await?;

    if !provider::is_approved(&res) {
        tracing::warn!(query.payment_id, state = ?res.get("state"), "payment_failed");

        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Payment failed", "details": res })),
        ));
    }

    let store = data.clone();
    let payment_id = query.payment_id.clone();

    tokio::task::spawn_blocking(move || approve_record(store.store.as_ref(), &payment_id))
        .await
        .map_err(StoreError::from)??;

    tracing::info!(query.payment_id, "payment_approved");

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Payment successful", "payment": res })),
    ))
}

/// Marks the oldest record for `payment_id` approved. A missing record is not an error.
fn approve_record(store: &dyn PaymentStore, payment_id: &str) -> Result<(), StoreError> {
    match store.find_by_payment_id(payment_id)? {
        Some(mut payment) => {
            payment.status = STATUS_APPROVED.to_string();
            store.save(&mut payment)
        }
        None => {
            tracing::debug!(payment_id, "no local record");
            Ok(())
        }
    }
}

pub async fn cancel() -> JsonResponse {
    (
        StatusCode::OK,
        Json(json!({ "message": "Payment cancelled by user" })),
    )
}

fn external_base(data: &Data, headers: &HeaderMap) -> String {
    if let Some(url) = &data.config.public_url {
        return url.clone();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");

    format!("http://{host}")
}
