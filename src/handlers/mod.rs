pub mod common;
pub mod coupons;
pub mod health;
pub mod orders;
pub mod payments;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::repositories::Stores;
use crate::services::{CouponService, InventoryService, OrderService, PaymentService};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub coupons: Arc<CouponService>,
    pub inventory: Arc<InventoryService>,
}

impl AppServices {
    /// Wires every service onto one set of stores and one event channel
    pub fn new(stores: &Stores, config: &AppConfig, event_sender: EventSender) -> Self {
        let inventory = InventoryService::new(stores.inventory.clone());
        let coupons = CouponService::new(
            stores.coupons.clone(),
            stores.orders.clone(),
            stores.inventory.clone(),
            event_sender.clone(),
        );
        let orders = OrderService::new(
            stores.orders.clone(),
            stores.payments.clone(),
            inventory.clone(),
            coupons.clone(),
            config.pricing.clone(),
            event_sender.clone(),
        );
        let payments = PaymentService::new(
            stores.orders.clone(),
            orders.clone(),
            Arc::new(config.gateway.clone()),
            event_sender,
        );

        Self {
            orders: Arc::new(orders),
            payments: Arc::new(payments),
            coupons: Arc::new(coupons),
            inventory: Arc::new(inventory),
        }
    }
}
