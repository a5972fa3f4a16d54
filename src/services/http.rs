//! HTTP listener for payment gateway callbacks: the CloudPayments "pay"
//! notification and the website order webhook. Settlement itself happens in
//! the subscription service; this layer only authenticates and translates.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::subscriptions::SubscriptionRequest;
use super::ServiceError;
use crate::models::payments::Tariff;
use crate::repositories::payments::CloudPaymentsApi;

const SIGNATURE_HEADER: &str = "X-HMAC-SHA256";

#[derive(Clone)]
struct AppState {
    subscription_channel: mpsc::Sender<SubscriptionRequest>,
    gateway: Arc<CloudPaymentsApi>,
}

/// Body of a CloudPayments "pay" notification. The gateway sends more fields;
/// only these drive settlement.
#[derive(Debug, Deserialize)]
struct GatewayNotification {
    #[serde(rename = "InvoiceId")]
    invoice_id: String,
    #[serde(rename = "Amount")]
    amount: f64,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "AccountId", default)]
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebsiteOrder {
    phone_number: String,
    tariff_type: i64,
    amount: i64,
}

pub async fn start_http_server(
    bind: &str,
    subscription_channel: mpsc::Sender<SubscriptionRequest>,
    gateway: Arc<CloudPaymentsApi>,
) -> Result<(), anyhow::Error> {
    let state = AppState {
        subscription_channel,
        gateway,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhook/cloudpayments", post(gateway_webhook))
        .route("/webhook/website", post(website_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    log::info!("HTTP server listening on {}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.gateway.verify_notification(&body, signature) {
        log::warn!("Rejected gateway notification with bad signature.");
        return StatusCode::UNAUTHORIZED;
    }

    let notification: GatewayNotification = match serde_json::from_str(&body) {
        Ok(n) => n,
        Err(e) => {
            log::warn!("Malformed gateway notification: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    if notification.status != "Completed" {
        log::info!(
            "Ignoring gateway notification for {} with status {}.",
            notification.invoice_id,
            notification.status
        );
        return StatusCode::OK;
    }

    log::info!(
        "Gateway settlement for payment {} (account {:?}, amount {}).",
        notification.invoice_id,
        notification.account_id,
        notification.amount
    );

    let (tx, rx) = oneshot::channel();
    let request = SubscriptionRequest::PaymentCompleted {
        payment_id: notification.invoice_id,
        response: tx,
    };

    settle(&state, request, rx).await
}

async fn website_webhook(
    State(state): State<AppState>,
    Json(order): Json<WebsiteOrder>,
) -> StatusCode {
    let Some(tariff) = Tariff::from_code(order.tariff_type) else {
        log::warn!("Website order with unknown tariff {}.", order.tariff_type);
        return StatusCode::BAD_REQUEST;
    };

    log::info!(
        "Website payment for {} ({}, amount {}).",
        order.phone_number,
        tariff.name(),
        order.amount
    );

    let (tx, rx) = oneshot::channel();
    let request = SubscriptionRequest::WebsitePayment {
        phone: order.phone_number,
        tariff,
        amount: order.amount,
        response: tx,
    };

    settle(&state, request, rx).await
}

async fn settle(
    state: &AppState,
    request: SubscriptionRequest,
    rx: oneshot::Receiver<Result<(), ServiceError>>,
) -> StatusCode {
    if state.subscription_channel.send(request).await.is_err() {
        log::error!("Subscription service is gone, cannot settle payment.");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    match rx.await {
        Ok(result) => settlement_status(result),
        Err(_) => {
            log::error!("Subscription service dropped the settlement reply.");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn settlement_status(result: Result<(), ServiceError>) -> StatusCode {
    match result {
        Ok(()) => StatusCode::OK,
        Err(ServiceError::NotFound(what)) => {
            log::warn!("Settlement rejected, not found: {}", what);
            StatusCode::NOT_FOUND
        }
        Err(ServiceError::Validation(what)) => {
            log::warn!("Settlement rejected: {}", what);
            StatusCode::BAD_REQUEST
        }
        Err(e) => {
            log::error!("Settlement failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
