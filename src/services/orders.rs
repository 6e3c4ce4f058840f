use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::coupons::{CartLine, CouponService};
use super::inventory::InventoryService;
use super::pricing::price_items;
use super::{order_not_found, transition_order, Transition};
use crate::auth::AuthUser;
use crate::config::PricingConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{
    Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentResult, PaymentStatus,
    ShippingAddress,
};
use crate::repositories::{OrderStore, PaymentLedger};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderLineRequest>,
    #[validate]
    pub shipping_address: ShippingAddress,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Cod
}

impl CreateOrderRequest {
    fn check(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if let Some(line) = self.items.iter().find(|line| line.quantity < 1) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        Ok(())
    }
}

/// Direct (non-gateway) payment confirmation
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub transaction_id: Option<String>,
    pub status: Option<String>,
}

/// Provider details recorded when an order is settled
#[derive(Debug, Clone)]
pub struct Settlement {
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub status: String,
    pub bank_code: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Settled { order: Order, payment: Payment },
    AlreadyPaid(Order),
}

/// Service for the order lifecycle: creation, cancellation, settlement and delivery
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentLedger>,
    inventory: InventoryService,
    coupons: CouponService,
    pricing: PricingConfig,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        payments: Arc<dyn PaymentLedger>,
        inventory: InventoryService,
        coupons: CouponService,
        pricing: PricingConfig,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            payments,
            inventory,
            coupons,
            pricing,
            event_sender,
        }
    }

    /// Creates a pending order, reserving stock for every line.
    #[instrument(skip(self, requester, request), fields(user_id = %requester.user_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        requester: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<Order, ServiceError> {
        request.check()?;

        let requested: Vec<(Uuid, i32)> = request
            .items
            .iter()
            .map(|line| (line.product_id, line.quantity))
            .collect();
        let stock_lines = self.inventory.check_availability(&requested).await?;

        let items: Vec<OrderItem> = stock_lines
            .iter()
            .map(|line| OrderItem {
                product_id: line.product.id,
                name: line.product.name.clone(),
                image: line.product.image.clone(),
                quantity: line.quantity,
                unit_price: line.product.price,
            })
            .collect();
        let prices = price_items(&items, &self.pricing);

        let coupon_code = match request.coupon_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let cart: Vec<CartLine> =
                    stock_lines.iter().map(|l| CartLine::from(&l.product)).collect();
                let coupon = self
                    .coupons
                    .validate_for_checkout(code, prices.gross_total(), requester, &cart)
                    .await?;
                Some(coupon.code)
            }
            _ => None,
        };

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: requester.user_id.clone(),
            items,
            shipping_address: request.shipping_address,
            payment_method: request.payment_method,
            items_price: prices.items_price,
            tax_price: prices.tax_price,
            shipping_price: prices.shipping_price,
            discount: Decimal::ZERO,
            total_price: prices.gross_total(),
            coupon_code: None,
            is_paid: false,
            paid_at: None,
            payment_result: None,
            payment_status: PaymentStatus::Pending,
            payment_attempt_at: None,
            is_delivered: false,
            delivered_at: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        self.orders.insert(&order).await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to persist order");
            e
        })?;

        let reservations: Vec<(Uuid, i32)> = order
            .items
            .iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();
        if let Err(e) = self.inventory.reserve_all(&reservations).await {
            warn!(order_id = %order.id, error = %e, "stock reservation failed, cancelling order");
            self.mark_cancelled(order.id, false).await?;
            return Err(e);
        }

        crate::metrics::ORDERS_CREATED.inc();
        info!(order_id = %order.id, total = %order.total_price, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                user_id: order.user_id.clone(),
                total_price: order.total_price,
            })
            .await;

        let Some(code) = coupon_code else {
            return Ok(order);
        };
        match self.coupons.apply(&code, order.id, requester).await {
            Ok(applied) => Ok(applied.order),
            Err(e) => {
                warn!(order_id = %order.id, code = %code, error = %e, "coupon could not be applied, cancelling order");
                self.mark_cancelled(order.id, true).await?;
                Err(e)
            }
        }
    }

    async fn load_for(&self, order_id: Uuid, requester: &AuthUser) -> Result<Order, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        if !requester.can_access(&order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }
        Ok(order)
    }

    #[instrument(skip(self, requester), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid, requester: &AuthUser) -> Result<Order, ServiceError> {
        self.load_for(order_id, requester).await
    }

    /// Orders owned by the requester, newest first
    pub async fn list_mine(&self, requester: &AuthUser) -> Result<Vec<Order>, ServiceError> {
        self.orders.find_by_user(&requester.user_id).await
    }

    #[instrument(skip(self, requester), fields(order_id = %order_id, user_id = %requester.user_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        requester: &AuthUser,
    ) -> Result<Order, ServiceError> {
        self.load_for(order_id, requester).await?;
        self.mark_cancelled(order_id, true).await
    }

    /// Moves an open order to `cancelled`; only the winning writer restores stock.
    async fn mark_cancelled(&self, order_id: Uuid, restore_stock: bool) -> Result<Order, ServiceError> {
        let committed = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if !order.is_open() {
                return Err(ServiceError::InvalidState(format!(
                    "Order {} is {} and can no longer be cancelled",
                    order.id, order.status
                )));
            }
            order.status = OrderStatus::Cancelled;
            Ok(Transition::Write(order, ()))
        })
        .await?;

        let order = committed.order;
        if restore_stock {
            self.inventory.release_items(&order.items).await?;
        }

        crate::metrics::ORDERS_CANCELLED.inc();
        info!(order_id = %order_id, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        Ok(order)
    }

    /// Owner or admin confirms payment outside the gateway
    #[instrument(skip(self, requester, confirmation), fields(order_id = %order_id, user_id = %requester.user_id))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        requester: &AuthUser,
        confirmation: PaymentConfirmation,
    ) -> Result<Order, ServiceError> {
        let order = self.load_for(order_id, requester).await?;

        let settlement = Settlement {
            method: order.payment_method,
            transaction_id: confirmation
                .transaction_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("DIRECT-{}", Uuid::new_v4().simple())),
            status: confirmation
                .status
                .unwrap_or_else(|| "COMPLETED".to_string()),
            bank_code: None,
            gateway_response: None,
        };

        match self.settle(order_id, settlement).await? {
            SettleOutcome::Settled { order, .. } => Ok(order),
            SettleOutcome::AlreadyPaid(_) => Err(ServiceError::InvalidState(format!(
                "Order {} is already paid",
                order_id
            ))),
        }
    }

    /// The completed record for a paid order. Transaction details come from
    /// the order's stored result so a replay records what was first settled.
    fn settlement_record(&self, order: &Order, settlement: &Settlement) -> Payment {
        let transaction_id = order
            .payment_result
            .as_ref()
            .map(|result| result.transaction_id.clone())
            .unwrap_or_else(|| settlement.transaction_id.clone());
        Payment::completed(
            order.id,
            order.payment_method,
            order.total_price,
            self.pricing.currency.clone(),
            Some(transaction_id),
            settlement.gateway_response.clone(),
        )
    }

    /// Conditionally flips an open order to paid and records the payment.
    /// Exactly one concurrent caller gets `Settled`; later callers see `AlreadyPaid`.
    pub async fn settle(
        &self,
        order_id: Uuid,
        settlement: Settlement,
    ) -> Result<SettleOutcome, ServiceError> {
        let now = Utc::now();
        let committed = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if order.is_paid {
                return Ok(Transition::Skip(order, ()));
            }
            if !order.is_open() {
                return Err(ServiceError::InvalidState(format!(
                    "Order {} is {} and cannot be paid",
                    order.id, order.status
                )));
            }
            order.is_paid = true;
            order.paid_at = Some(now);
            order.payment_method = settlement.method;
            order.payment_result = Some(PaymentResult {
                transaction_id: settlement.transaction_id.clone(),
                status: settlement.status.clone(),
                settled_at: now,
                bank_code: settlement.bank_code.clone(),
            });
            order.status = OrderStatus::Paid;
            order.payment_status = PaymentStatus::Completed;
            Ok(Transition::Write(order, ()))
        })
        .await?;

        if !committed.written {
            // A previous settle may have flipped the order and then failed to write its record
            let order = committed.order;
            let payment = self.settlement_record(&order, &settlement);
            if self.payments.record(&payment).await? {
                warn!(%order_id, payment_id = %payment.id, "backfilled missing payment record");
            } else {
                info!(%order_id, "order already paid, settlement ignored");
            }
            return Ok(SettleOutcome::AlreadyPaid(order));
        }

        let order = committed.order;
        let payment = self.settlement_record(&order, &settlement);
        self.payments.record(&payment).await.map_err(|e| {
            error!(%order_id, payment_id = %payment.id, error = %e, "order settled but payment record failed");
            e
        })?;

        crate::metrics::PAYMENTS_SETTLED
            .with_label_values(&[settlement.method.as_str()])
            .inc();
        info!(%order_id, payment_id = %payment.id, amount = %payment.amount, "Order paid");
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id,
                payment_id: payment.id,
                amount: payment.amount,
            })
            .await;

        Ok(SettleOutcome::Settled { order, payment })
    }

    #[instrument(skip(self, requester), fields(order_id = %order_id, user_id = %requester.user_id))]
    pub async fn mark_delivered(
        &self,
        order_id: Uuid,
        requester: &AuthUser,
    ) -> Result<Order, ServiceError> {
        if !requester.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only administrators can mark orders delivered".to_string(),
            ));
        }

        let now = Utc::now();
        let committed = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if !order.is_paid || order.is_delivered || order.status != OrderStatus::Paid {
                return Err(ServiceError::InvalidState(format!(
                    "Order {} must be paid and undelivered to be delivered",
                    order.id
                )));
            }
            order.is_delivered = true;
            order.delivered_at = Some(now);
            order.status = OrderStatus::Delivered;
            Ok(Transition::Write(order, ()))
        })
        .await?;

        info!(%order_id, "Order delivered");
        self.event_sender
            .send_or_log(Event::OrderDelivered(order_id))
            .await;
        Ok(committed.order)
    }

    pub async fn payments_for(&self, order_id: Uuid) -> Result<Vec<Payment>, ServiceError> {
        self.payments.list_for_order(order_id).await
    }
}
