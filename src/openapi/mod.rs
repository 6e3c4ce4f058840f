use axum::{routing::get, Json, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Orders, coupons and payment settlement for a small online store.

## Authentication

All `/api/v1` endpoints except the payment gateway callbacks require a JWT:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock: ...",
  "code": "out_of_stock",
  "request_id": "…",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Payments", description = "Payment gateway endpoints"),
        (name = "Coupons", description = "Coupon validation and redemption"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::pay_order,
        crate::handlers::orders::deliver_order,
        crate::handlers::orders::cancel_order,

        // Payments
        crate::handlers::payments::create_payment_url,
        crate::handlers::payments::gateway_return,
        crate::handlers::payments::gateway_ipn,

        // Coupons
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::apply_coupon,

        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            // Order types
            crate::models::Order,
            crate::models::OrderItem,
            crate::models::OrderStatus,
            crate::models::PaymentStatus,
            crate::models::PaymentMethod,
            crate::models::PaymentResult,
            crate::models::ShippingAddress,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderLineRequest,
            crate::services::orders::PaymentConfirmation,

            // Payment types
            crate::handlers::payments::CreatePaymentUrlRequest,
            crate::services::payments::GatewayPaymentUrl,
            crate::services::payments::IpnResponse,

            // Coupon types
            crate::models::DiscountType,
            crate::handlers::coupons::ValidateCouponRequest,
            crate::handlers::coupons::ApplyCouponRequest,
            crate::services::coupons::DiscountDescriptor,
            crate::services::coupons::CouponApplication,

            // Health
            crate::handlers::health::ReadinessResponse,
            crate::handlers::health::ComponentStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
