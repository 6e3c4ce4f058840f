use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::order::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRecordStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Completed => "completed",
            PaymentRecordStatus::Failed => "failed",
            PaymentRecordStatus::Refunded => "refunded",
            PaymentRecordStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for PaymentRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentRecordStatus::Pending),
            "completed" => Ok(PaymentRecordStatus::Completed),
            "failed" => Ok(PaymentRecordStatus::Failed),
            "refunded" => Ok(PaymentRecordStatus::Refunded),
            "cancelled" => Ok(PaymentRecordStatus::Cancelled),
            other => Err(format!("unknown payment record status '{other}'")),
        }
    }
}

/// Ledger entry for a settled payment. Owned by exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub transaction_id: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Id of the completed record for an order's settlement. The same order
    /// always maps to the same id, so a replayed write collides instead of
    /// adding a second record.
    pub fn settlement_id(order_id: Uuid) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("settlement:{order_id}").as_bytes())
    }

    pub fn completed(
        order_id: Uuid,
        method: PaymentMethod,
        amount: Decimal,
        currency: impl Into<String>,
        transaction_id: Option<String>,
        gateway_response: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Self::settlement_id(order_id),
            order_id,
            method,
            amount,
            currency: currency.into(),
            status: PaymentRecordStatus::Completed,
            transaction_id,
            gateway_response,
            created_at: Utc::now(),
        }
    }
}
