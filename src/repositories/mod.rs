//! Storage contracts for the checkout pipeline.
//!
//! Shared state (stock, coupon usage, order flags) changes only through
//! conditional single-row writes, so every trait method that mutates
//! contended state reports whether its guard held instead of locking.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Coupon, Order, Payment, Product};

pub mod coupon_repository;
pub mod in_memory;
pub mod order_repository;
pub mod payment_repository;
pub mod product_repository;

pub use coupon_repository::CouponRepository;
pub use in_memory::{InMemoryCoupons, InMemoryInventory, InMemoryOrders, InMemoryPayments};
pub use order_repository::OrderRepository;
pub use payment_repository::PaymentRepository;
pub use product_repository::ProductRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Product catalog reads plus the stock counter
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, ServiceError>;

    /// Decrements stock by `quantity` only if at least that much is available.
    /// Returns `false` when the guard fails; stock never goes negative.
    async fn try_reserve(&self, id: Uuid, quantity: i32) -> Result<bool, ServiceError>;

    /// Returns previously reserved stock
    async fn release(&self, id: Uuid, quantity: i32) -> Result<(), ServiceError>;

    async fn upsert_product(&self, product: &Product) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Orders owned by `user_id`, newest first
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>, ServiceError>;

    /// Replaces the stored order with `next` only if the stored version still
    /// equals `expected_version`. Returns `false` if another writer got there first.
    async fn update_if_version(
        &self,
        next: &Order,
        expected_version: i32,
    ) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Looks up a coupon by its normalized (upper-case) code
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ServiceError>;

    /// Increments `usage_count` only while it is below `usage_limit` (or the
    /// coupon is unlimited). Returns `false` when the limit was already reached.
    async fn increment_usage(&self, code: &str) -> Result<bool, ServiceError>;

    async fn upsert(&self, coupon: &Coupon) -> Result<(), ServiceError>;
}

/// Append-only payment records
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Stores the record unless one with the same id exists. Returns `false`
    /// when the write was a duplicate.
    async fn record(&self, payment: &Payment) -> Result<bool, ServiceError>;

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, ServiceError>;
}

/// The full set of stores a running service needs
#[derive(Clone)]
pub struct Stores {
    pub inventory: Arc<dyn InventoryLedger>,
    pub orders: Arc<dyn OrderStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub payments: Arc<dyn PaymentLedger>,
}

impl Stores {
    /// Process-local stores backed by concurrent maps
    pub fn in_memory() -> Self {
        Self {
            inventory: Arc::new(InMemoryInventory::default()),
            orders: Arc::new(InMemoryOrders::default()),
            coupons: Arc::new(InMemoryCoupons::default()),
            payments: Arc::new(InMemoryPayments::default()),
        }
    }

    /// SeaORM-backed stores sharing one connection pool
    pub fn database(db: Arc<DatabaseConnection>) -> Self {
        Self {
            inventory: Arc::new(ProductRepository::new(db.clone())),
            orders: Arc::new(OrderRepository::new(db.clone())),
            coupons: Arc::new(CouponRepository::new(db.clone())),
            payments: Arc::new(PaymentRepository::new(db)),
        }
    }
}
