use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::pricing::round_money;
use super::{transition_order, Transition};
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{normalize_code, Coupon, DiscountType, Order, Product};
use crate::repositories::{CouponStore, InventoryLedger, OrderStore};

/// The catalog facts a coupon's product restrictions are checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub category: Option<String>,
    pub brand: Option<String>,
}

impl From<&Product> for CartLine {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id,
            category: product.category.clone(),
            brand: product.brand.clone(),
        }
    }
}

/// Facts known at the point a coupon is checked. A `None` fact is not
/// checked, so callers that know less run a narrower check.
#[derive(Debug, Clone, Copy)]
pub struct CouponCheck<'a> {
    pub now: DateTime<Utc>,
    pub cart_total: Option<Decimal>,
    pub requester: Option<&'a AuthUser>,
    pub lines: Option<&'a [CartLine]>,
}

impl<'a> CouponCheck<'a> {
    /// Only the active flag, time window and usage limit
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            cart_total: None,
            requester: None,
            lines: None,
        }
    }

    pub fn with_cart_total(mut self, total: Decimal) -> Self {
        self.cart_total = Some(total);
        self
    }

    pub fn with_requester(mut self, requester: &'a AuthUser) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn with_lines(mut self, lines: &'a [CartLine]) -> Self {
        self.lines = Some(lines);
        self
    }
}

fn line_is_eligible(coupon: &Coupon, line: &CartLine) -> bool {
    if coupon.excluded_products.contains(&line.product_id) {
        return false;
    }
    let has_inclusions = !coupon.applicable_products.is_empty()
        || !coupon.applicable_categories.is_empty()
        || !coupon.applicable_brands.is_empty();
    if !has_inclusions {
        return true;
    }
    let matches = |allowed: &[String], value: &Option<String>| {
        value
            .as_deref()
            .map(|v| allowed.iter().any(|a| a.eq_ignore_ascii_case(v)))
            .unwrap_or(false)
    };
    coupon.applicable_products.contains(&line.product_id)
        || matches(&coupon.applicable_categories, &line.category)
        || matches(&coupon.applicable_brands, &line.brand)
}

/// Single rule set behind both `validate` and `apply`. Checks run in a fixed
/// order so the first failing rule determines the error.
pub fn evaluate_coupon(coupon: &Coupon, check: &CouponCheck<'_>) -> Result<(), ServiceError> {
    if !coupon.is_active || !coupon.within_window(check.now) {
        return Err(ServiceError::CouponExpired(format!(
            "Coupon {} is not active",
            coupon.code
        )));
    }

    if let Some(total) = check.cart_total {
        if total < coupon.minimum_purchase {
            return Err(ServiceError::MinimumNotMet(format!(
                "Coupon {} requires a minimum purchase of {}",
                coupon.code, coupon.minimum_purchase
            )));
        }
    }

    if coupon.usage_exhausted() {
        return Err(ServiceError::UsageLimitReached(format!(
            "Coupon {} has reached its usage limit",
            coupon.code
        )));
    }

    if let Some(requester) = check.requester {
        if !coupon.allowed_users.is_empty()
            && !coupon.allowed_users.iter().any(|u| u == &requester.user_id)
        {
            return Err(ServiceError::NotEligible(format!(
                "Coupon {} is not available to this user",
                coupon.code
            )));
        }
    }

    if let Some(lines) = check.lines {
        if coupon.has_product_restrictions() && !lines.iter().any(|l| line_is_eligible(coupon, l)) {
            return Err(ServiceError::NotEligible(format!(
                "Coupon {} does not apply to any product in the cart",
                coupon.code
            )));
        }
    }

    Ok(())
}

/// Discount for `order_total`, bounded by the coupon's cap and by the total
pub fn calculate_discount(coupon: &Coupon, order_total: Decimal, now: DateTime<Utc>) -> Decimal {
    if !coupon.is_currently_valid(now) || order_total <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => order_total * coupon.discount_value / Decimal::ONE_HUNDRED,
        DiscountType::FixedAmount => coupon.discount_value,
    };

    let mut discount = round_money(raw.max(Decimal::ZERO));
    if let Some(cap) = coupon.maximum_discount {
        discount = discount.min(cap);
    }
    discount.min(order_total)
}

/// What a coupon is worth against a particular cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscountDescriptor {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub maximum_discount: Option<Decimal>,
    pub minimum_purchase: Decimal,
    pub discount: Decimal,
    pub final_total: Decimal,
}

impl DiscountDescriptor {
    fn new(coupon: &Coupon, cart_total: Decimal, now: DateTime<Utc>) -> Self {
        let discount = calculate_discount(coupon, cart_total, now);
        Self {
            code: coupon.code.clone(),
            description: coupon.description.clone(),
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            maximum_discount: coupon.maximum_discount,
            minimum_purchase: coupon.minimum_purchase,
            discount,
            final_total: (cart_total - discount).max(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponApplication {
    pub coupon: DiscountDescriptor,
    pub order: Order,
}

/// Service for validating coupons and attaching them to orders
#[derive(Clone)]
pub struct CouponService {
    coupons: Arc<dyn CouponStore>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryLedger>,
    event_sender: EventSender,
}

impl CouponService {
    pub fn new(
        coupons: Arc<dyn CouponStore>,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryLedger>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            coupons,
            orders,
            inventory,
            event_sender,
        }
    }

    async fn find(&self, code: &str) -> Result<Coupon, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }
        self.coupons
            .find_by_code(&code)
            .await?
            .ok_or(ServiceError::CouponNotFound(code))
    }

    /// Read-only check of a coupon against a prospective cart. Product
    /// restrictions are only checked when `product_ids` is given.
    #[instrument(skip(self, requester, product_ids), fields(code = %code, user_id = %requester.user_id))]
    pub async fn validate(
        &self,
        code: &str,
        cart_total: Decimal,
        requester: &AuthUser,
        product_ids: Option<&[Uuid]>,
    ) -> Result<DiscountDescriptor, ServiceError> {
        if cart_total < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Cart total cannot be negative".to_string(),
            ));
        }

        let coupon = self.find(code).await?;

        let lines = match product_ids {
            Some(ids) => {
                let mut lines = Vec::with_capacity(ids.len());
                for &id in ids {
                    let product = self
                        .inventory
                        .find_product(id)
                        .await?
                        .ok_or(ServiceError::ProductNotFound(id))?;
                    lines.push(CartLine::from(&product));
                }
                Some(lines)
            }
            None => None,
        };

        let now = Utc::now();
        let mut check = CouponCheck::at(now)
            .with_cart_total(cart_total)
            .with_requester(requester);
        if let Some(lines) = lines.as_deref() {
            check = check.with_lines(lines);
        }
        evaluate_coupon(&coupon, &check)?;

        Ok(DiscountDescriptor::new(&coupon, cart_total, now))
    }

    /// Full check used before an order is written
    pub(crate) async fn validate_for_checkout(
        &self,
        code: &str,
        cart_total: Decimal,
        requester: &AuthUser,
        lines: &[CartLine],
    ) -> Result<Coupon, ServiceError> {
        let coupon = self.find(code).await?;
        let check = CouponCheck::at(Utc::now())
            .with_cart_total(cart_total)
            .with_requester(requester)
            .with_lines(lines);
        evaluate_coupon(&coupon, &check)?;
        Ok(coupon)
    }

    /// Attaches a coupon to an open order and consumes one use of it
    #[instrument(skip(self, requester), fields(code = %code, order_id = %order_id, user_id = %requester.user_id))]
    pub async fn apply(
        &self,
        code: &str,
        order_id: Uuid,
        requester: &AuthUser,
    ) -> Result<CouponApplication, ServiceError> {
        let coupon = self.find(code).await?;
        let now = Utc::now();
        evaluate_coupon(&coupon, &CouponCheck::at(now))?;

        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| super::order_not_found(order_id))?;
        if !requester.can_access(&order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }

        let attached = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if !order.can_attach_coupon() {
                let reason = if order.payment_attempt_at.is_some() {
                    "has a gateway payment in progress"
                } else {
                    "cannot take a coupon"
                };
                return Err(ServiceError::InvalidState(format!("Order {} {reason}", order.id)));
            }
            let discount = calculate_discount(&coupon, order.gross_total(), now);
            order.coupon_code = Some(coupon.code.clone());
            order.discount = discount;
            order.recompute_total();
            Ok(Transition::Write(order, discount))
        })
        .await?;

        let consumed = match self.coupons.increment_usage(&coupon.code).await {
            Ok(consumed) => consumed,
            Err(e) => {
                self.detach(order_id, &coupon.code).await;
                return Err(e);
            }
        };
        if !consumed {
            warn!(code = %coupon.code, %order_id, "coupon usage limit reached while applying");
            self.detach(order_id, &coupon.code).await;
            return Err(ServiceError::UsageLimitReached(format!(
                "Coupon {} has reached its usage limit",
                coupon.code
            )));
        }

        let discount = attached.value;
        crate::metrics::COUPONS_APPLIED.inc();
        info!(code = %coupon.code, %order_id, %discount, "coupon applied");
        self.event_sender
            .send_or_log(Event::CouponApplied {
                order_id,
                code: coupon.code.clone(),
                discount,
            })
            .await;

        let gross_total = attached.order.gross_total();
        Ok(CouponApplication {
            coupon: DiscountDescriptor::new(&coupon, gross_total, now),
            order: attached.order,
        })
    }

    /// Undoes an attachment whose usage increment failed
    async fn detach(&self, order_id: Uuid, code: &str) {
        let result = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if order.coupon_code.as_deref() != Some(code) || !order.is_open() {
                return Ok(Transition::Skip(order, ()));
            }
            order.coupon_code = None;
            order.discount = Decimal::ZERO;
            order.recompute_total();
            Ok(Transition::Write(order, ()))
        })
        .await;

        if let Err(e) = result {
            tracing::error!(%order_id, code, error = %e, "failed to detach coupon from order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::repositories::Stores;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(code: &str) -> Coupon {
        let now = Utc::now();
        Coupon {
            code: code.into(),
            description: Some("Ten percent off".into()),
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            minimum_purchase: Decimal::ZERO,
            maximum_discount: None,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
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

    fn user(id: &str) -> AuthUser {
        AuthUser::new(id, vec!["user".into()])
    }

    fn service(stores: &Stores) -> CouponService {
        let (events, _rx) = EventSender::channel(16);
        CouponService::new(
            stores.coupons.clone(),
            stores.orders.clone(),
            stores.inventory.clone(),
            events,
        )
    }

    #[test]
    fn percentage_discount_is_capped() {
        let mut c = coupon("CAP");
        c.maximum_discount = Some(dec!(5000));
        assert_eq!(calculate_discount(&c, dec!(140000), Utc::now()), dec!(5000));
    }

    #[test]
    fn fixed_discount_never_exceeds_total() {
        let mut c = coupon("FLAT");
        c.discount_type = DiscountType::FixedAmount;
        c.discount_value = dec!(50000);
        assert_eq!(calculate_discount(&c, dec!(20000), Utc::now()), dec!(20000));
    }

    #[test]
    fn invalid_coupon_discounts_nothing() {
        let mut c = coupon("GONE");
        c.is_active = false;
        assert_eq!(calculate_discount(&c, dec!(1000), Utc::now()), Decimal::ZERO);
    }

    #[test]
    fn checks_run_in_order() {
        let mut c = coupon("ORDER");
        c.minimum_purchase = dec!(500);
        c.usage_limit = Some(1);
        c.usage_count = 1;
        let now = Utc::now();

        assert_matches!(
            evaluate_coupon(&c, &CouponCheck::at(now).with_cart_total(dec!(100))),
            Err(ServiceError::MinimumNotMet(_))
        );
        assert_matches!(
            evaluate_coupon(&c, &CouponCheck::at(now).with_cart_total(dec!(1000))),
            Err(ServiceError::UsageLimitReached(_))
        );
        c.end_date = now - Duration::hours(1);
        assert_matches!(
            evaluate_coupon(&c, &CouponCheck::at(now).with_cart_total(dec!(100))),
            Err(ServiceError::CouponExpired(_))
        );
    }

    #[test]
    fn narrow_check_ignores_minimum_and_users() {
        let mut c = coupon("NARROW");
        c.minimum_purchase = dec!(1_000_000);
        c.allowed_users = vec!["someone-else".into()];
        assert!(evaluate_coupon(&c, &CouponCheck::at(Utc::now())).is_ok());

        let u = user("u1");
        assert_matches!(
            evaluate_coupon(&c, &CouponCheck::at(Utc::now()).with_requester(&u)),
            Err(ServiceError::NotEligible(_))
        );
    }

    #[test]
    fn restrictions_need_one_eligible_line() {
        let shoe = CartLine {
            product_id: Uuid::new_v4(),
            category: Some("Shoes".into()),
            brand: Some("Acme".into()),
        };
        let hat = CartLine {
            product_id: Uuid::new_v4(),
            category: Some("Hats".into()),
            brand: None,
        };
        let mut c = coupon("SHOES");
        c.applicable_categories = vec!["shoes".into()];
        let now = Utc::now();

        let both = [shoe.clone(), hat.clone()];
        assert!(evaluate_coupon(&c, &CouponCheck::at(now).with_lines(&both)).is_ok());

        let hats = [hat];
        assert_matches!(
            evaluate_coupon(&c, &CouponCheck::at(now).with_lines(&hats)),
            Err(ServiceError::NotEligible(_))
        );

        c.excluded_products = vec![shoe.product_id];
        let shoes = [shoe];
        assert_matches!(
            evaluate_coupon(&c, &CouponCheck::at(now).with_lines(&shoes)),
            Err(ServiceError::NotEligible(_))
        );
    }

    #[tokio::test]
    async fn validate_is_case_insensitive_and_read_only() {
        let stores = Stores::in_memory();
        stores.coupons.upsert(&coupon("SAVE10")).await.unwrap();
        let service = service(&stores);

        let descriptor = service
            .validate("save10", dec!(140000), &user("u1"), None)
            .await
            .unwrap();
        assert_eq!(descriptor.discount, dec!(14000));
        assert_eq!(descriptor.final_total, dec!(126000));

        let stored = stores.coupons.find_by_code("SAVE10").await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 0);
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let stores = Stores::in_memory();
        let service = service(&stores);
        assert_matches!(
            service.validate("NOPE", dec!(10), &user("u1"), None).await,
            Err(ServiceError::CouponNotFound(code)) if code == "NOPE"
        );
    }

    #[tokio::test]
    async fn apply_attaches_and_consumes_a_use() {
        let stores = Stores::in_memory();
        let mut c = coupon("ONCE");
        c.discount_type = DiscountType::FixedAmount;
        c.discount_value = dec!(10000);
        c.usage_limit = Some(1);
        stores.coupons.upsert(&c).await.unwrap();

        let order = crate::services::orders::tests::sample_order("u1");
        stores.orders.insert(&order).await.unwrap();
        let service = service(&stores);

        let applied = service.apply("once", order.id, &user("u1")).await.unwrap();
        assert_eq!(applied.order.discount, dec!(10000));
        assert_eq!(applied.order.total_price, dec!(130000));
        assert_eq!(applied.order.coupon_code.as_deref(), Some("ONCE"));

        let stored = stores.coupons.find_by_code("ONCE").await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 1);

        // A second order cannot use the exhausted coupon
        let other = crate::services::orders::tests::sample_order("u1");
        stores.orders.insert(&other).await.unwrap();
        assert_matches!(
            service.apply("ONCE", other.id, &user("u1")).await,
            Err(ServiceError::UsageLimitReached(_))
        );
        let untouched = stores.orders.find_by_id(other.id).await.unwrap().unwrap();
        assert_eq!(untouched.total_price, dec!(140000));
        assert!(untouched.coupon_code.is_none());
    }

    #[tokio::test]
    async fn apply_rejects_foreign_and_closed_orders() {
        let stores = Stores::in_memory();
        stores.coupons.upsert(&coupon("SAVE10")).await.unwrap();
        let service = service(&stores);

        let order = crate::services::orders::tests::sample_order("owner");
        stores.orders.insert(&order).await.unwrap();
        assert_matches!(
            service.apply("SAVE10", order.id, &user("intruder")).await,
            Err(ServiceError::Forbidden(_))
        );

        let mut cancelled = crate::services::orders::tests::sample_order("owner");
        cancelled.status = OrderStatus::Cancelled;
        stores.orders.insert(&cancelled).await.unwrap();
        assert_matches!(
            service.apply("SAVE10", cancelled.id, &user("owner")).await,
            Err(ServiceError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn apply_is_refused_once_a_gateway_attempt_is_signed() {
        let stores = Stores::in_memory();
        stores.coupons.upsert(&coupon("SAVE10")).await.unwrap();
        let service = service(&stores);

        let mut order = crate::services::orders::tests::sample_order("u1");
        order.payment_attempt_at = Some(Utc::now());
        stores.orders.insert(&order).await.unwrap();

        assert_matches!(
            service.apply("SAVE10", order.id, &user("u1")).await,
            Err(ServiceError::InvalidState(msg)) if msg.contains("gateway payment")
        );
        let stored = stores.orders.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.total_price, dec!(140000));
        let coupon = stores.coupons.find_by_code("SAVE10").await.unwrap().unwrap();
        assert_eq!(coupon.usage_count, 0);
    }

    #[tokio::test]
    async fn concurrent_applies_never_exceed_the_limit() {
        let stores = Stores::in_memory();
        let mut c = coupon("RACE");
        c.usage_limit = Some(3);
        stores.coupons.upsert(&c).await.unwrap();
        let service = Arc::new(service(&stores));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let order = crate::services::orders::tests::sample_order("u1");
            stores.orders.insert(&order).await.unwrap();
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.apply("RACE", order.id, &user("u1")).await.is_ok()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 3);
        let stored = stores.coupons.find_by_code("RACE").await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 3);
    }
}
