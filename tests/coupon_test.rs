mod common;

use axum::http::{Method, StatusCode};
use common::{coupon, decimal_field, response_json, uuid_field, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use storefront_api::models::DiscountType;
use tokio::task::JoinSet;

#[tokio::test]
async fn validate_is_case_insensitive_and_caps_discount() {
    let app = TestApp::new().await;
    let mut capped = coupon("SUMMER20", DiscountType::Percentage, dec!(20));
    capped.maximum_discount = Some(dec!(50000));
    app.seed_coupon(&capped).await;
    let token = app.token_for("user-1");

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&token),
            Some(json!({ "code": "summer20", "cartTotal": "400000" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["code"], "SUMMER20");
    assert_eq!(decimal_field(&body, "discount"), dec!(50000));
    assert_eq!(decimal_field(&body, "finalTotal"), dec!(350000));
    // Validation never consumes a use
    assert_eq!(app.coupon_usage("SUMMER20").await, 0);
}

#[tokio::test]
async fn validate_rejects_exhausted_and_unknown_codes() {
    let app = TestApp::new().await;
    let mut once = coupon("ONCE", DiscountType::FixedAmount, dec!(10000));
    once.usage_limit = Some(1);
    once.usage_count = 1;
    app.seed_coupon(&once).await;
    let token = app.token_for("user-1");

    let exhausted = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&token),
            Some(json!({ "code": "ONCE", "cartTotal": "100000" })),
        )
        .await;
    assert_eq!(exhausted.status(), StatusCode::BAD_REQUEST);
    let body = response_json(exhausted).await;
    assert_eq!(body["code"], "usage_limit_reached");

    let unknown = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&token),
            Some(json!({ "code": "NOPE", "cartTotal": "100000" })),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_enforces_minimum_purchase() {
    let app = TestApp::new().await;
    let mut big_spender = coupon("BIG", DiscountType::FixedAmount, dec!(50000));
    big_spender.minimum_purchase = dec!(500000);
    app.seed_coupon(&big_spender).await;
    let token = app.token_for("user-1");

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&token),
            Some(json!({ "code": "BIG", "cartTotal": "499999" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["code"], "minimum_not_met");
}

#[tokio::test]
async fn apply_attaches_coupon_to_open_order() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(100000), 5).await;
    app.seed_coupon(&coupon("TENPCT", DiscountType::Percentage, dec!(10)))
        .await;
    let token = app.token_for("user-1");
    let order = app.place_order(&token, &[(product.id, 1)], None).await;
    let order_id = uuid_field(&order, "id");

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(&token),
            Some(json!({ "code": "tenpct", "orderId": order_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let applied = &body["order"];
    assert_eq!(applied["couponCode"], "TENPCT");
    assert_eq!(decimal_field(applied, "discount"), dec!(14000));
    assert_eq!(decimal_field(applied, "totalPrice"), dec!(126000));
    assert_eq!(app.coupon_usage("TENPCT").await, 1);

    // A second coupon cannot be stacked on the same order
    let again = app
        .request(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(&token),
            Some(json!({ "code": "TENPCT", "orderId": order_id })),
        )
        .await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.coupon_usage("TENPCT").await, 1);
}

#[tokio::test]
async fn apply_to_someone_elses_order_is_forbidden() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(100000), 5).await;
    app.seed_coupon(&coupon("TENPCT", DiscountType::Percentage, dec!(10)))
        .await;
    let owner = app.token_for("user-1");
    let order = app.place_order(&owner, &[(product.id, 1)], None).await;
    let order_id = uuid_field(&order, "id");

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(&app.token_for("user-2")),
            Some(json!({ "code": "TENPCT", "orderId": order_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.coupon_usage("TENPCT").await, 0);
}

#[tokio::test]
async fn restricted_coupon_is_not_eligible_for_other_users() {
    let app = TestApp::new().await;
    let mut vip = coupon("VIP", DiscountType::FixedAmount, dec!(10000));
    vip.allowed_users = vec!["vip-user".to_string()];
    app.seed_coupon(&vip).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&app.token_for("regular-user")),
            Some(json!({ "code": "VIP", "cartTotal": "100000" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let allowed = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&app.token_for("vip-user")),
            Some(json!({ "code": "VIP", "cartTotal": "100000" })),
        )
        .await;
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_applies_never_exceed_usage_limit() {
    let app = Arc::new(TestApp::new().await);
    let product = app.seed_product(dec!(100000), 50).await;
    let mut limited = coupon("LIMITED", DiscountType::FixedAmount, dec!(5000));
    limited.usage_limit = Some(2);
    app.seed_coupon(&limited).await;

    let mut orders = Vec::new();
    for i in 0..8 {
        let token = app.token_for(&format!("user-{i}"));
        let order = app.place_order(&token, &[(product.id, 1)], None).await;
        orders.push((token, uuid_field(&order, "id")));
    }

    let mut attempts = JoinSet::new();
    for (token, order_id) in orders.clone() {
        let app = app.clone();
        attempts.spawn(async move {
            app.request(
                Method::POST,
                "/api/v1/coupons/apply",
                Some(&token),
                Some(json!({ "code": "LIMITED", "orderId": order_id })),
            )
            .await
            .status()
        });
    }

    let mut accepted = 0;
    while let Some(status) = attempts.join_next().await {
        if status.expect("apply task") == StatusCode::OK {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 2);
    assert_eq!(app.coupon_usage("LIMITED").await, 2);

    let mut discounted = 0;
    for (_, order_id) in &orders {
        let order = app
            .stores
            .orders
            .find_by_id(*order_id)
            .await
            .expect("read order")
            .expect("order exists");
        if order.coupon_code.is_some() {
            discounted += 1;
            assert_eq!(order.total_price, dec!(135000));
        } else {
            assert_eq!(order.total_price, dec!(140000));
        }
    }
    assert_eq!(discounted, 2);
}
