//! Business logic for the checkout pipeline.
//!
//! Services never hold locks across awaits. Every state change on an order is
//! a read, a guard evaluated against that read, and a version-checked write;
//! if the write loses, the guard is evaluated again against fresh state.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::Order;
use crate::repositories::OrderStore;

pub mod coupons;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;

pub use coupons::CouponService;
pub use inventory::InventoryService;
pub use orders::OrderService;
pub use payments::PaymentService;

const MAX_WRITE_ATTEMPTS: u32 = 5;

/// What a guard decided to do with the order it was shown
pub(crate) enum Transition<T> {
    /// Persist the modified order
    Write(Order, T),
    /// Leave the stored order as it is
    Skip(Order, T),
}

#[derive(Debug)]
pub(crate) struct Committed<T> {
    pub order: Order,
    pub value: T,
    pub written: bool,
}

pub(crate) fn order_not_found(order_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Order {} not found", order_id))
}

/// Runs `decide` against the latest stored order and writes the result with a
/// version check, retrying on a lost race. `decide` must be a pure function of
/// the order it is given.
pub(crate) async fn transition_order<T, F>(
    orders: &dyn OrderStore,
    order_id: Uuid,
    mut decide: F,
) -> Result<Committed<T>, ServiceError>
where
    F: FnMut(Order) -> Result<Transition<T>, ServiceError> + Send,
    T: Send,
{
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let current = orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        let expected_version = current.version;

        match decide(current)? {
            Transition::Skip(order, value) => {
                return Ok(Committed {
                    order,
                    value,
                    written: false,
                })
            }
            Transition::Write(mut next, value) => {
                next.version = expected_version + 1;
                next.updated_at = Utc::now();
                if orders.update_if_version(&next, expected_version).await? {
                    return Ok(Committed {
                        order: next,
                        value,
                        written: true,
                    });
                }
                debug!(%order_id, attempt, "order changed underneath us, retrying");
            }
        }
    }
    Err(ServiceError::ConcurrentModification(order_id))
}
