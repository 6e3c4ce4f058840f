use axum::{
    extract::{RawQuery, State},
    http::HeaderMap,
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::client_ip;
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    gateway::GatewayConfig,
    services::payments::{GatewayPaymentUrl, GatewayReturnOutcome, IpnResponse},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentUrlRequest {
    pub order_id: Uuid,
}

/// Authenticated payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new().route("/payments/gateway/create-url", post(create_payment_url))
}

/// Callbacks from the gateway; authenticated by signature rather than token
pub fn gateway_callback_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/gateway/return", get(gateway_return))
        .route("/payments/gateway/ipn", get(gateway_ipn))
}

fn callback_params(query: Option<String>) -> Vec<(String, String)> {
    query
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn with_query(base: &str, pairs: &[(&str, String)]) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in pairs {
                    query.append_pair(key, value);
                }
            }
            url.into()
        }
        Err(_) => base.to_string(),
    }
}

/// Where the shopper's browser goes after a gateway return
pub fn redirect_target(
    config: &GatewayConfig,
    result: &Result<GatewayReturnOutcome, ServiceError>,
) -> String {
    match result {
        Ok(outcome) if outcome.is_paid() => with_query(
            &config.success_redirect_url,
            &[("orderId", outcome.order_id().to_string())],
        ),
        Ok(GatewayReturnOutcome::Declined {
            order_id,
            response_code,
        }) => with_query(
            &config.failure_redirect_url,
            &[
                ("orderId", order_id.to_string()),
                ("code", response_code.clone()),
            ],
        ),
        Ok(_) => config.success_redirect_url.clone(),
        // Rejections are logged server side; the browser learns nothing about why
        Err(_) => config.failure_redirect_url.clone(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/gateway/create-url",
    summary = "Start gateway payment",
    description = "Build a signed redirect URL to the payment gateway for an open order",
    request_body = CreatePaymentUrlRequest,
    responses(
        (status = 200, description = "Redirect URL created", body = GatewayPaymentUrl),
        (status = 400, description = "Order cannot be paid", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn create_payment_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentUrlRequest>,
) -> Result<Json<GatewayPaymentUrl>, ServiceError> {
    let ip = client_ip(&headers);
    let created = state
        .services
        .payments
        .initiate_gateway_payment(request.order_id, &user, &ip)
        .await?;
    Ok(Json(created))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/gateway/return",
    summary = "Gateway browser return",
    description = "Verifies the signed gateway parameters and redirects to the storefront result page",
    responses(
        (status = 303, description = "Redirect to the success or failure page"),
    ),
    tag = "Payments"
)]
pub async fn gateway_return(State(state): State<AppState>, RawQuery(query): RawQuery) -> Redirect {
    let result = state
        .services
        .payments
        .handle_gateway_return(callback_params(query))
        .await;
    if let Err(e) = &result {
        warn!(error = %e, "gateway return did not settle an order");
    }
    Redirect::to(&redirect_target(&state.config.gateway, &result))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/gateway/ipn",
    summary = "Gateway payment notification",
    description = "Server-to-server notification; acknowledged with gateway response codes",
    responses(
        (status = 200, description = "Acknowledgement", body = IpnResponse),
    ),
    tag = "Payments"
)]
pub async fn gateway_ipn(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Json<IpnResponse> {
    let result = state
        .services
        .payments
        .handle_gateway_return(callback_params(query))
        .await;
    Json(IpnResponse::from_result(&result))
}
