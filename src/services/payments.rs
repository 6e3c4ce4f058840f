use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::orders::{OrderService, SettleOutcome, Settlement};
use super::{order_not_found, transition_order, Transition};
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{self, GatewayConfig, PaymentUrlRequest, AMOUNT_MULTIPLIER, PARAM_TXN_REF};
use crate::models::{PaymentMethod, PaymentStatus};
use crate::repositories::OrderStore;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPaymentUrl {
    pub redirect_url: String,
    pub txn_ref: String,
}

/// Result of a correctly signed gateway callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReturnOutcome {
    Settled { order_id: Uuid, payment_id: Uuid },
    AlreadyPaid { order_id: Uuid },
    Declined { order_id: Uuid, response_code: String },
}

impl GatewayReturnOutcome {
    pub fn order_id(&self) -> Uuid {
        match self {
            GatewayReturnOutcome::Settled { order_id, .. }
            | GatewayReturnOutcome::AlreadyPaid { order_id }
            | GatewayReturnOutcome::Declined { order_id, .. } => *order_id,
        }
    }

    /// Whether the shopper should land on the success page
    pub fn is_paid(&self) -> bool {
        !matches!(self, GatewayReturnOutcome::Declined { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            GatewayReturnOutcome::Settled { .. } => "settled",
            GatewayReturnOutcome::AlreadyPaid { .. } => "already_paid",
            GatewayReturnOutcome::Declined { .. } => "declined",
        }
    }
}

/// Acknowledgement body the gateway expects from the IPN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IpnResponse {
    #[serde(rename = "RspCode")]
    pub rsp_code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl IpnResponse {
    fn new(code: &str, message: &str) -> Self {
        Self {
            rsp_code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn from_result(result: &Result<GatewayReturnOutcome, ServiceError>) -> Self {
        match result {
            Ok(GatewayReturnOutcome::AlreadyPaid { .. }) => {
                Self::new("02", "Order already confirmed")
            }
            Ok(_) => Self::new("00", "Confirm Success"),
            Err(ServiceError::NotFound(_)) | Err(ServiceError::ValidationError(_)) => {
                Self::new("01", "Order not found")
            }
            Err(ServiceError::InvalidState(_)) => Self::new("02", "Order already confirmed"),
            Err(ServiceError::GatewayAmountInvalid(_)) => Self::new("04", "Invalid amount"),
            Err(ServiceError::SignatureMismatch) => Self::new("97", "Invalid signature"),
            Err(_) => Self::new("99", "Unknown error"),
        }
    }
}

/// Service driving the redirect gateway: starting payments and settling callbacks
#[derive(Clone)]
pub struct PaymentService {
    orders: Arc<dyn OrderStore>,
    order_service: OrderService,
    gateway: Arc<GatewayConfig>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        order_service: OrderService,
        gateway: Arc<GatewayConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            order_service,
            gateway,
            event_sender,
        }
    }

    /// Builds a signed redirect URL for an open order. Never marks it paid.
    #[instrument(skip(self, requester), fields(order_id = %order_id, user_id = %requester.user_id))]
    pub async fn initiate_gateway_payment(
        &self,
        order_id: Uuid,
        requester: &AuthUser,
        client_ip: &str,
    ) -> Result<GatewayPaymentUrl, ServiceError> {
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

        let now = Utc::now();
        let committed = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if !order.is_open() {
                return Err(ServiceError::InvalidState(format!(
                    "Order {} is {} and cannot be paid",
                    order.id, order.status
                )));
            }
            let amount = gateway::gateway_amount(order.total_price)?;
            order.payment_method = PaymentMethod::Gateway;
            order.payment_status = PaymentStatus::Pending;
            order.payment_attempt_at = Some(now);
            Ok(Transition::Write(order, amount))
        })
        .await?;

        let request = PaymentUrlRequest {
            order_id,
            amount: committed.value,
            txn_ref: gateway::txn_ref(now, order_id),
            client_ip: client_ip.to_string(),
            created_at: now,
        };
        let redirect_url = gateway::build_payment_url(&request, &self.gateway)?;

        info!(%order_id, txn_ref = %request.txn_ref, amount = request.amount, "gateway payment initiated");
        Ok(GatewayPaymentUrl {
            redirect_url,
            txn_ref: request.txn_ref,
        })
    }

    /// Verifies and applies a gateway callback. Safe to call any number of
    /// times with the same parameters.
    #[instrument(skip(self, params))]
    pub async fn handle_gateway_return(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<GatewayReturnOutcome, ServiceError> {
        let result = self.apply_gateway_return(params).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "rejected",
        };
        crate::metrics::GATEWAY_RETURNS
            .with_label_values(&[label])
            .inc();
        result
    }

    async fn apply_gateway_return(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<GatewayReturnOutcome, ServiceError> {
        let txn_ref = params
            .iter()
            .find(|(k, _)| k == PARAM_TXN_REF)
            .map(|(_, v)| v.clone());

        let verified = match gateway::verify_return(params, &self.gateway) {
            Ok(verified) => verified,
            Err(e) => {
                warn!(
                    security_event = true,
                    txn_ref = txn_ref.as_deref().unwrap_or("-"),
                    "gateway callback rejected: signature mismatch"
                );
                crate::metrics::GATEWAY_SIGNATURE_MISMATCHES.inc();
                self.event_sender
                    .send_or_log(Event::GatewaySignatureMismatch { txn_ref })
                    .await;
                return Err(e);
            }
        };

        let order_id = verified.order_id().ok_or_else(|| {
            ServiceError::ValidationError("Gateway order info is malformed".to_string())
        })?;
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;

        if !verified.is_success() {
            let response_code = verified.response_code().to_string();
            return self.record_decline(order_id, response_code).await;
        }

        // Paid orders still go through settle so a missing payment record gets backfilled
        if order.is_paid {
            info!(%order_id, "duplicate gateway confirmation for a paid order");
        } else {
            let expected = gateway::gateway_amount(order.total_price)?
                .checked_mul(AMOUNT_MULTIPLIER)
                .ok_or_else(|| ServiceError::GatewayAmountInvalid(order.total_price.to_string()))?;
            if verified.amount() != Some(expected) {
                warn!(%order_id, expected, received = ?verified.amount(), "gateway amount does not match order total");
                return Err(ServiceError::GatewayAmountInvalid(format!(
                    "expected {expected} for order {order_id}"
                )));
            }
        }

        let settlement = Settlement {
            method: PaymentMethod::Gateway,
            transaction_id: verified
                .transaction_no()
                .or(verified.txn_ref())
                .unwrap_or_default()
                .to_string(),
            status: verified.response_code().to_string(),
            bank_code: verified.bank_code().map(str::to_string),
            gateway_response: Some(verified.params.to_json()),
        };

        match self.order_service.settle(order_id, settlement).await? {
            SettleOutcome::Settled { payment, .. } => Ok(GatewayReturnOutcome::Settled {
                order_id,
                payment_id: payment.id,
            }),
            SettleOutcome::AlreadyPaid(_) => Ok(GatewayReturnOutcome::AlreadyPaid { order_id }),
        }
    }

    /// Marks the attempt failed while the order is still unpaid. The order
    /// stays pending so the shopper can retry.
    async fn record_decline(
        &self,
        order_id: Uuid,
        response_code: String,
    ) -> Result<GatewayReturnOutcome, ServiceError> {
        let committed = transition_order(self.orders.as_ref(), order_id, |mut order| {
            if !order.is_open() || order.payment_status == PaymentStatus::Failed {
                return Ok(Transition::Skip(order, ()));
            }
            order.payment_status = PaymentStatus::Failed;
            Ok(Transition::Write(order, ()))
        })
        .await?;

        if committed.written {
            info!(%order_id, response_code = %response_code, "gateway payment declined");
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    order_id,
                    response_code: response_code.clone(),
                })
                .await;
        }

        Ok(GatewayReturnOutcome::Declined {
            order_id,
            response_code,
        })
    }
}
