use axum::{extract::State, routing::post, Extension, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::coupons::{CouponApplication, DiscountDescriptor},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    pub code: String,
    pub cart_total: Decimal,
    #[serde(default)]
    pub product_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    pub code: String,
    pub order_id: Uuid,
}

pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/coupons/validate", post(validate_coupon))
        .route("/coupons/apply", post(apply_coupon))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    summary = "Validate coupon",
    description = "Check a coupon against a prospective cart without consuming it",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon is valid for the cart", body = DiscountDescriptor),
        (status = 400, description = "Expired, exhausted or minimum not met", body = crate::errors::ErrorResponse),
        (status = 403, description = "Coupon not available for this user or cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<DiscountDescriptor>, ServiceError> {
    let descriptor = state
        .services
        .coupons
        .validate(
            &request.code,
            request.cart_total,
            &user,
            request.product_ids.as_deref(),
        )
        .await?;
    Ok(Json(descriptor))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/apply",
    summary = "Apply coupon",
    description = "Attach a coupon to an open order and consume one use",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applied", body = CouponApplication),
        (status = 400, description = "Coupon or order state does not allow it", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon or order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ApplyCouponRequest>,
) -> Result<Json<CouponApplication>, ServiceError> {
    let applied = state
        .services
        .coupons
        .apply(&request.code, request.order_id, &user)
        .await?;
    Ok(Json(applied))
}
