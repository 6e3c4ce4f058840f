//! `dashmap`-backed stores. Each conditional write happens under the entry's
//! shard lock, which gives the same single-row atomicity as the SQL guards.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{CouponStore, InventoryLedger, OrderStore, PaymentLedger};
use crate::errors::ServiceError;
use crate::models::{Coupon, Order, Payment, Product};

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    products: DashMap<Uuid, Product>,
}

#[async_trait]
impl InventoryLedger for InMemoryInventory {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, ServiceError> {
        Ok(self.products.get(&id).map(|p| p.clone()))
    }

    async fn try_reserve(&self, id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        match self.products.get_mut(&id) {
            Some(mut product) if product.count_in_stock >= quantity => {
                product.count_in_stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        match self.products.get_mut(&id) {
            Some(mut product) => {
                product.count_in_stock += quantity;
                Ok(())
            }
            None => Err(ServiceError::ProductNotFound(id)),
        }
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), ServiceError> {
        self.products.insert(product.id, product.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrders {
    orders: DashMap<Uuid, Order>,
}

#[async_trait]
impl OrderStore for InMemoryOrders {
    async fn insert(&self, order: &Order) -> Result<(), ServiceError> {
        if self.orders.contains_key(&order.id) {
            return Err(ServiceError::InternalError(format!(
                "order {} already exists",
                order.id
            )));
        }
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>, ServiceError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_if_version(
        &self,
        next: &Order,
        expected_version: i32,
    ) -> Result<bool, ServiceError> {
        match self.orders.get_mut(&next.id) {
            Some(mut current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCoupons {
    coupons: DashMap<String, Coupon>,
}

#[async_trait]
impl CouponStore for InMemoryCoupons {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ServiceError> {
        Ok(self.coupons.get(code).map(|c| c.clone()))
    }

    async fn increment_usage(&self, code: &str) -> Result<bool, ServiceError> {
        match self.coupons.get_mut(code) {
            Some(mut coupon) if !coupon.usage_exhausted() => {
                coupon.usage_count += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ServiceError::CouponNotFound(code.to_string())),
        }
    }

    async fn upsert(&self, coupon: &Coupon) -> Result<(), ServiceError> {
        self.coupons.insert(coupon.code.clone(), coupon.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPayments {
    payments: DashMap<Uuid, Vec<Payment>>,
}

#[async_trait]
impl PaymentLedger for InMemoryPayments {
    async fn record(&self, payment: &Payment) -> Result<bool, ServiceError> {
        let mut records = self.payments.entry(payment.order_id).or_default();
        if records.iter().any(|existing| existing.id == payment.id) {
            return Ok(false);
        }
        records.push(payment.clone());
        Ok(true)
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, ServiceError> {
        Ok(self
            .payments
            .get(&order_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn product(stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Lamp".into(),
            image: None,
            brand: None,
            category: None,
            price: dec!(100),
            count_in_stock: stock,
        }
    }

    #[tokio::test]
    async fn reserve_never_goes_negative() {
        let inventory = InMemoryInventory::default();
        let p = product(3);
        inventory.upsert_product(&p).await.unwrap();

        assert!(inventory.try_reserve(p.id, 2).await.unwrap());
        assert!(!inventory.try_reserve(p.id, 2).await.unwrap());
        assert!(inventory.try_reserve(p.id, 1).await.unwrap());
        assert_eq!(
            inventory.find_product(p.id).await.unwrap().unwrap().count_in_stock,
            0
        );
    }

    #[tokio::test]
    async fn concurrent_reservations_respect_stock() {
        let inventory = Arc::new(InMemoryInventory::default());
        let p = product(10);
        inventory.upsert_product(&p).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let inventory = inventory.clone();
            handles.push(tokio::spawn(async move {
                inventory.try_reserve(p.id, 1).await.unwrap()
            }));
        }
        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap() {
                won += 1;
            }
        }

        assert_eq!(won, 10);
        assert_eq!(
            inventory.find_product(p.id).await.unwrap().unwrap().count_in_stock,
            0
        );
    }

    #[tokio::test]
    async fn stale_version_update_is_rejected() {
        let store = InMemoryOrders::default();
        let mut order = crate::services::orders::tests::sample_order("u1");
        store.insert(&order).await.unwrap();

        order.version += 1;
        assert!(store.update_if_version(&order, 1).await.unwrap());
        assert!(!store.update_if_version(&order, 1).await.unwrap());
    }

    #[tokio::test]
    async fn recording_the_same_payment_twice_keeps_one() {
        let ledger = InMemoryPayments::default();
        let payment = Payment::completed(
            Uuid::new_v4(),
            crate::models::PaymentMethod::Gateway,
            dec!(140000),
            "VND",
            Some("14099999".into()),
            None,
        );
        assert!(ledger.record(&payment).await.unwrap());
        assert!(!ledger.record(&payment).await.unwrap());
        assert_eq!(ledger.list_for_order(payment.order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_payments_list_is_empty() {
        let ledger = InMemoryPayments::default();
        assert!(ledger.list_for_order(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
