use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Payment, PaymentMethod, PaymentRecordStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(column_type = "Text")]
    pub payment_method: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    #[sea_orm(column_type = "Text")]
    pub currency: String,
    pub status: String,
    pub transaction_id: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Payment> for ActiveModel {
    fn from(payment: &Payment) -> Self {
        use sea_orm::ActiveValue::Set;
        ActiveModel {
            id: Set(payment.id),
            order_id: Set(payment.order_id),
            payment_method: Set(payment.method.as_str().to_string()),
            amount: Set(payment.amount),
            currency: Set(payment.currency.clone()),
            status: Set(payment.status.as_str().to_string()),
            transaction_id: Set(payment.transaction_id.clone()),
            gateway_response: Set(payment.gateway_response.clone()),
            created_at: Set(payment.created_at),
        }
    }
}

impl TryFrom<Model> for Payment {
    type Error = ServiceError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: model.id,
            order_id: model.order_id,
            method: model
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(ServiceError::InternalError)?,
            amount: model.amount,
            currency: model.currency,
            status: model
                .status
                .parse::<PaymentRecordStatus>()
                .map_err(ServiceError::InternalError)?,
            transaction_id: model.transaction_id,
            gateway_response: model.gateway_response,
            created_at: model.created_at,
        })
    }
}
