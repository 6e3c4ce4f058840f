use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{OrderItem, Product};
use crate::repositories::InventoryLedger;

/// A product together with the merged quantity requested for it
#[derive(Debug, Clone)]
pub struct StockLine {
    pub product: Product,
    pub quantity: i32,
}

/// Merges duplicate product lines, keeping first-seen order
pub fn merge_lines(lines: &[(Uuid, i32)]) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    let mut merged: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());
    for &(product_id, quantity) in lines {
        match merged.iter_mut().find(|(id, _)| *id == product_id) {
            Some((_, total)) => {
                *total = total.checked_add(quantity).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "quantity for product {product_id} is too large"
                    ))
                })?;
            }
            None => merged.push((product_id, quantity)),
        }
    }
    Ok(merged)
}

/// Service for reading stock and moving it between the shelf and orders
#[derive(Clone)]
pub struct InventoryService {
    ledger: Arc<dyn InventoryLedger>,
}

impl InventoryService {
    pub fn new(ledger: Arc<dyn InventoryLedger>) -> Self {
        Self { ledger }
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product, ServiceError> {
        self.ledger
            .find_product(id)
            .await?
            .ok_or(ServiceError::ProductNotFound(id))
    }

    /// Reads every requested product and checks availability without
    /// reserving anything.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn check_availability(
        &self,
        lines: &[(Uuid, i32)],
    ) -> Result<Vec<StockLine>, ServiceError> {
        let mut checked = Vec::with_capacity(lines.len());
        for (product_id, quantity) in merge_lines(lines)? {
            let product = self.get_product(product_id).await?;
            if quantity > product.count_in_stock {
                return Err(ServiceError::OutOfStock(format!(
                    "product {} has {} available, {} requested",
                    product_id, product.count_in_stock, quantity
                )));
            }
            checked.push(StockLine { product, quantity });
        }
        Ok(checked)
    }

    /// Reserves stock for every line with a conditional decrement. If any line
    /// loses a race the lines already reserved are returned.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve_all(&self, lines: &[(Uuid, i32)]) -> Result<(), ServiceError> {
        let mut reserved: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());

        for &(product_id, quantity) in lines {
            let outcome = self.ledger.try_reserve(product_id, quantity).await;
            match outcome {
                Ok(true) => reserved.push((product_id, quantity)),
                Ok(false) => {
                    warn!(%product_id, quantity, "stock reservation lost a race");
                    self.release_all(&reserved).await?;
                    return Err(ServiceError::OutOfStock(format!(
                        "product {product_id} no longer has {quantity} available"
                    )));
                }
                Err(e) => {
                    self.release_all(&reserved).await?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Returns stock for each line. Every line is attempted; the first
    /// failure is reported after the rest have been released.
    pub async fn release_all(&self, lines: &[(Uuid, i32)]) -> Result<(), ServiceError> {
        let mut first_error = None;
        for &(product_id, quantity) in lines {
            if let Err(e) = self.ledger.release(product_id, quantity).await {
                error!(%product_id, quantity, error = %e, "failed to restore stock");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn release_items(&self, items: &[OrderItem]) -> Result<(), ServiceError> {
        let lines: Vec<(Uuid, i32)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();
        self.release_all(&lines).await
    }
}
