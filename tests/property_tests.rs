use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use storefront_api::{
    auth::AuthUser,
    config::PricingConfig,
    events::EventSender,
    gateway::{build_signable_string, canonicalize, sign, verify},
    models::{Coupon, DiscountType, OrderStatus, PaymentMethod, Product, ShippingAddress},
    repositories::{InMemoryInventory, InventoryLedger, Stores},
    services::{
        coupons::calculate_discount,
        orders::{CreateOrderRequest, OrderLineRequest},
        CouponService, InventoryService, OrderService,
    },
};
use uuid::Uuid;

fn param_key() -> impl Strategy<Value = String> {
    "vnp_[A-Za-z]{1,12}"
}

fn param_value() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 :/&=+.%-]{1,24}"
}

fn money(max_units: i64) -> impl Strategy<Value = Decimal> {
    (0..=max_units, 0u32..100).prop_map(|(units, cents)| {
        Decimal::from(units) + Decimal::new(i64::from(cents), 2)
    })
}

fn coupon(discount_type: DiscountType, value: Decimal, cap: Option<Decimal>) -> Coupon {
    let now = Utc::now();
    Coupon {
        code: "PROP".to_string(),
        description: None,
        discount_type,
        discount_value: value,
        minimum_purchase: Decimal::ZERO,
        maximum_discount: cap,
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

#[derive(Debug, Clone)]
enum StockOp {
    Reserve(i32),
    ReleaseOldest,
}

#[derive(Debug, Clone)]
enum CheckoutOp {
    Place { quantity: i32, with_coupon: bool },
    Cancel(prop::sample::Index),
}

fn checkout_op() -> impl Strategy<Value = CheckoutOp> {
    prop_oneof![
        3 => (1i32..6, any::<bool>())
            .prop_map(|(quantity, with_coupon)| CheckoutOp::Place { quantity, with_coupon }),
        2 => any::<prop::sample::Index>().prop_map(CheckoutOp::Cancel),
    ]
}

fn order_service(stores: &Stores) -> OrderService {
    // Nobody listens; events are dropped with a warning
    let (events, receiver) = EventSender::channel(1);
    drop(receiver);
    let coupons = CouponService::new(
        stores.coupons.clone(),
        stores.orders.clone(),
        stores.inventory.clone(),
        events.clone(),
    );
    OrderService::new(
        stores.orders.clone(),
        stores.payments.clone(),
        InventoryService::new(stores.inventory.clone()),
        coupons,
        PricingConfig::default(),
        events,
    )
}

fn checkout_request(
    product_id: Uuid,
    quantity: i32,
    coupon_code: Option<String>,
) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![OrderLineRequest {
            product_id,
            quantity,
        }],
        shipping_address: ShippingAddress {
            full_name: "Tran Thi B".to_string(),
            address: "5 Hang Bai".to_string(),
            city: "Hanoi".to_string(),
            postal_code: "100000".to_string(),
            country: "VN".to_string(),
            phone: None,
        },
        payment_method: PaymentMethod::Cod,
        coupon_code,
    }
}

fn stock_op() -> impl Strategy<Value = StockOp> {
    prop_oneof![
        3 => (1i32..6).prop_map(StockOp::Reserve),
        1 => Just(StockOp::ReleaseOldest),
    ]
}

proptest! {
    #[test]
    fn signatures_verify_regardless_of_parameter_order(
        params in prop::collection::btree_map(param_key(), param_value(), 1..10),
        secret in "[A-Z0-9]{8,32}",
    ) {
        let forward: Vec<(String, String)> = params.clone().into_iter().collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let signed = sign(&build_signable_string(&canonicalize(forward)), &secret).unwrap();
        let data = build_signable_string(&canonicalize(reversed));
        prop_assert!(verify(&data, &secret, &signed));
    }

    #[test]
    fn changing_any_single_value_breaks_the_signature(
        params in prop::collection::btree_map(param_key(), param_value(), 1..10),
        pick in any::<prop::sample::Index>(),
        secret in "[A-Z0-9]{8,32}",
    ) {
        let canonical = canonicalize(params.clone());
        let signed = sign(&build_signable_string(&canonical), &secret).unwrap();

        let victim = pick.get(&params.keys().cloned().collect::<Vec<_>>()).clone();
        let mut tampered = params;
        tampered.entry(victim).and_modify(|v| v.push('X'));
        let data = build_signable_string(&canonicalize(tampered));
        prop_assert!(!verify(&data, &secret, &signed));
    }

    #[test]
    fn canonicalizing_is_idempotent(
        params in prop::collection::vec((param_key(), param_value()), 0..10),
    ) {
        let once = canonicalize(params);
        let twice = canonicalize(
            once.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<Vec<_>>(),
        );
        prop_assert_eq!(build_signable_string(&once), build_signable_string(&twice));
    }

    #[test]
    fn percentage_discount_respects_cap_and_total(
        total in money(10_000_000),
        percent in 0i64..=100,
        cap in prop::option::of(money(1_000_000)),
    ) {
        let coupon = coupon(DiscountType::Percentage, Decimal::from(percent), cap);
        let discount = calculate_discount(&coupon, total, Utc::now());
        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= total.max(Decimal::ZERO));
        if let Some(cap) = cap {
            prop_assert!(discount <= cap);
        }
    }

    #[test]
    fn fixed_discount_never_exceeds_total(
        total in money(1_000_000),
        value in money(2_000_000),
    ) {
        let coupon = coupon(DiscountType::FixedAmount, value, None);
        let discount = calculate_discount(&coupon, total, Utc::now());
        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= total);
    }

    #[test]
    fn stock_never_goes_negative(
        initial in 0i32..20,
        ops in prop::collection::vec(stock_op(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let ledger = Arc::new(InMemoryInventory::default());
            let product_id = Uuid::new_v4();
            ledger
                .upsert_product(&Product {
                    id: product_id,
                    name: "Widget".to_string(),
                    image: None,
                    brand: None,
                    category: None,
                    price: Decimal::from(1000),
                    count_in_stock: initial,
                })
                .await
                .unwrap();
            let inventory = InventoryService::new(ledger.clone());

            let mut outstanding: Vec<i32> = Vec::new();
            for op in ops {
                match op {
                    StockOp::Reserve(qty) => {
                        if inventory.reserve_all(&[(product_id, qty)]).await.is_ok() {
                            outstanding.push(qty);
                        }
                    }
                    StockOp::ReleaseOldest => {
                        if !outstanding.is_empty() {
                            let qty = outstanding.remove(0);
                            inventory.release_all(&[(product_id, qty)]).await.unwrap();
                        }
                    }
                }
                let stock = ledger.find_product(product_id).await.unwrap().unwrap().count_in_stock;
                assert!(stock >= 0);
                assert_eq!(stock, initial - outstanding.iter().sum::<i32>());
            }
        });
    }

    #[test]
    fn checkout_and_cancel_keep_stock_consistent(
        initial in 0i32..20,
        coupon_limit in 0i32..3,
        ops in prop::collection::vec(checkout_op(), 1..30),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let stores = Stores::in_memory();
            let product_id = Uuid::new_v4();
            stores
                .inventory
                .upsert_product(&Product {
                    id: product_id,
                    name: "Widget".to_string(),
                    image: None,
                    brand: None,
                    category: None,
                    price: Decimal::from(1000),
                    count_in_stock: initial,
                })
                .await
                .unwrap();
            let mut limited = coupon(DiscountType::FixedAmount, Decimal::from(100), None);
            limited.usage_limit = Some(coupon_limit);
            stores.coupons.upsert(&limited).await.unwrap();

            let service = order_service(&stores);
            let shopper = AuthUser::new("shopper", vec!["user".to_string()]);
            // (order id, quantity, cancelled)
            let mut placed: Vec<(Uuid, i32, bool)> = Vec::new();

            for op in ops {
                match op {
                    CheckoutOp::Place { quantity, with_coupon } => {
                        let code = with_coupon.then(|| "prop".to_string());
                        if let Ok(order) = service
                            .create_order(&shopper, checkout_request(product_id, quantity, code))
                            .await
                        {
                            placed.push((order.id, quantity, false));
                        }
                    }
                    CheckoutOp::Cancel(pick) => {
                        if placed.is_empty() {
                            continue;
                        }
                        let slot = pick.index(placed.len());
                        let (order_id, _, cancelled) = placed[slot];
                        let result = service.cancel_order(order_id, &shopper).await;
                        // A second cancel of the same order is refused and releases nothing
                        assert_eq!(result.is_ok(), !cancelled);
                        if let Ok(order) = result {
                            assert_eq!(order.status, OrderStatus::Cancelled);
                            placed[slot].2 = true;
                        }
                    }
                }

                let stock = stores
                    .inventory
                    .find_product(product_id)
                    .await
                    .unwrap()
                    .unwrap()
                    .count_in_stock;
                let held: i32 = placed
                    .iter()
                    .filter(|(_, _, cancelled)| !cancelled)
                    .map(|(_, quantity, _)| quantity)
                    .sum();
                assert!(stock >= 0);
                assert_eq!(stock, initial - held);
            }

            let usage = stores.coupons.find_by_code("PROP").await.unwrap().unwrap().usage_count;
            assert!(usage <= coupon_limit);
        });
    }
}
