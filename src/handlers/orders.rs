use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    models::Order,
    services::orders::{CreateOrderRequest, PaymentConfirmation},
    AppState,
};

/// Order routes; callers must already be authenticated
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/mine", get(list_my_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/pay", put(pay_order))
        .route("/orders/:id/deliver", put(deliver_order))
        .route("/orders/:id/cancel", put(cancel_order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create a pending order, reserving stock and optionally applying a coupon",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = Order,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.create_order(&user, request).await?;
    Ok(created_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = Order),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ServiceError> {
    Ok(Json(state.services.orders.get_order(id, &user).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/mine",
    summary = "List my orders",
    description = "Orders placed by the authenticated user, newest first",
    responses(
        (status = 200, description = "Orders listed", body = [Order]),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Order>>, ServiceError> {
    Ok(Json(state.services.orders.list_mine(&user).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/pay",
    summary = "Confirm payment",
    description = "Mark an order paid outside the payment gateway",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body(content = PaymentConfirmation, description = "Optional provider details"),
    responses(
        (status = 200, description = "Order paid", body = Order),
        (status = 400, description = "Order cancelled or already paid", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn pay_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    confirmation: Option<Json<PaymentConfirmation>>,
) -> Result<Response, ServiceError> {
    let confirmation = confirmation.map(|Json(c)| c).unwrap_or_default();
    let order = state
        .services
        .orders
        .mark_paid(id, &user, confirmation)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/deliver",
    summary = "Mark delivered",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order delivered", body = Order),
        (status = 400, description = "Order is not paid or already delivered", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn deliver_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ServiceError> {
    Ok(Json(state.services.orders.mark_delivered(id, &user).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel an unpaid order and return its stock",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = Order),
        (status = 400, description = "Order already paid, delivered or cancelled", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ServiceError> {
    Ok(Json(state.services.orders.cancel_order(id, &user).await?))
}
