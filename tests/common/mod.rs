#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront_api::{
    auth::ADMIN_ROLE,
    build_router,
    config::AppConfig,
    db,
    events::{self, EventSender},
    gateway::{self, build_signable_string, canonicalize, sign},
    models::{Coupon, DiscountType, Product},
    repositories::Stores,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str =
    "integration_test_secret_key_that_is_comfortably_longer_than_sixty_four_chars";
pub const GATEWAY_SECRET: &str = "TESTGATEWAYSECRET";

/// Full router over a fresh set of stores
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub stores: Stores,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        JWT_SECRET.to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.storage_backend = "in-memory".to_string();
    cfg.gateway.tmn_code = "TESTTMN1".to_string();
    cfg.gateway.hash_secret = GATEWAY_SECRET.to_string();
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_stores(Stores::in_memory(), None).await
    }

    /// Same application on SeaORM repositories over in-memory SQLite
    pub async fn sqlite() -> Self {
        let db_config = db::DbConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let pool = Arc::new(pool);
        Self::with_stores(Stores::database(pool.clone()), Some(pool)).await
    }

    async fn with_stores(
        stores: Stores,
        db: Option<Arc<sea_orm::DatabaseConnection>>,
    ) -> Self {
        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(test_config(), &stores, db, event_sender);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            stores,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: &str) -> String {
        self.state
            .auth
            .issue_token(user_id, &["user"])
            .expect("issue user token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token("admin-1", &[ADMIN_ROLE])
            .expect("issue admin token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn seed_product(&self, price: Decimal, stock: i32) -> Product {
        let product = Product {
            id: Uuid::new_v4(),
            name: format!("Product {}", &Uuid::new_v4().simple().to_string()[..6]),
            image: None,
            brand: Some("Acme".to_string()),
            category: Some("Kitchen".to_string()),
            price,
            count_in_stock: stock,
        };
        self.stores
            .inventory
            .upsert_product(&product)
            .await
            .expect("seed product");
        product
    }

    pub async fn seed_coupon(&self, coupon: &Coupon) {
        self.stores.coupons.upsert(coupon).await.expect("seed coupon");
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.stores
            .inventory
            .find_product(product_id)
            .await
            .expect("read product")
            .expect("product exists")
            .count_in_stock
    }

    pub async fn coupon_usage(&self, code: &str) -> i32 {
        self.stores
            .coupons
            .find_by_code(code)
            .await
            .expect("read coupon")
            .expect("coupon exists")
            .usage_count
    }

    /// Places an order through the API and returns its JSON body
    pub async fn place_order(&self, token: &str, lines: &[(Uuid, i32)], coupon: Option<&str>) -> Value {
        let response = self
            .request(Method::POST, "/api/v1/orders", Some(token), Some(order_body(lines, coupon)))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response_json(response).await
    }
}

pub fn order_body(lines: &[(Uuid, i32)], coupon: Option<&str>) -> Value {
    let items: Vec<Value> = lines
        .iter()
        .map(|(id, qty)| json!({ "productId": id, "quantity": qty }))
        .collect();
    json!({
        "items": items,
        "shippingAddress": {
            "fullName": "Tran Thi B",
            "address": "45 Le Loi",
            "city": "Ho Chi Minh City",
            "postalCode": "700000",
            "country": "VN",
            "phone": "0911111111"
        },
        "paymentMethod": "cod",
        "couponCode": coupon
    })
}

pub fn coupon(code: &str, discount_type: DiscountType, value: Decimal) -> Coupon {
    let now = Utc::now();
    Coupon {
        code: code.to_string(),
        description: None,
        discount_type,
        discount_value: value,
        minimum_purchase: Decimal::ZERO,
        maximum_discount: None,
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(30),
        is_active: true,
        usage_limit: None,
        usage_count: 0,
        applicable_products: vec![],
        applicable_categories: vec![],
        applicable_brands: vec![],
        excluded_products: vec![],
        allowed_users: vec![],
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Gateway callback query for `order_id`, signed like the gateway signs it
pub fn signed_callback_query(order_id: Uuid, amount: i64, response_code: &str, secret: &str) -> String {
    let params = vec![
        (gateway::PARAM_TMN_CODE, "TESTTMN1".to_string()),
        (gateway::PARAM_TXN_REF, format!("R{}", order_id.simple())),
        (gateway::PARAM_ORDER_INFO, gateway::order_info(order_id)),
        (gateway::PARAM_AMOUNT, amount.to_string()),
        (gateway::PARAM_RESPONSE_CODE, response_code.to_string()),
        (gateway::PARAM_TRANSACTION_NO, "14099999".to_string()),
        (gateway::PARAM_BANK_CODE, "NCB".to_string()),
        (gateway::PARAM_PAY_DATE, "20240101203500".to_string()),
    ];
    let canonical = canonicalize(params);
    let signable = build_signable_string(&canonical);
    let hash = sign(&signable, secret).expect("sign callback");
    format!("{signable}&{}={hash}", gateway::PARAM_SECURE_HASH)
}

/// Reads a decimal field whether it was serialized as a string or a number
pub fn decimal_field(value: &Value, key: &str) -> Decimal {
    match &value[key] {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("field {key} is not a decimal: {other}"),
    }
}

pub fn uuid_field(value: &Value, key: &str) -> Uuid {
    value[key]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("uuid field")
}
