use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Order, OrderStatus, PaymentMethod, PaymentStatus};

/// Line items, address and payment result are embedded as JSON documents;
/// they are snapshots and never queried individually.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    #[sea_orm(column_type = "Json")]
    pub items: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: serde_json::Value,
    pub payment_method: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub items_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Decimal,
    pub coupon_code: Option<String>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Json", nullable)]
    pub payment_result: Option<serde_json::Value>,
    pub payment_status: String,
    pub payment_attempt_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Order> for ActiveModel {
    type Error = ServiceError;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        use sea_orm::ActiveValue::Set;
        Ok(ActiveModel {
            id: Set(order.id),
            user_id: Set(order.user_id.clone()),
            items: Set(serde_json::to_value(&order.items)?),
            shipping_address: Set(serde_json::to_value(&order.shipping_address)?),
            payment_method: Set(order.payment_method.as_str().to_string()),
            items_price: Set(order.items_price),
            tax_price: Set(order.tax_price),
            shipping_price: Set(order.shipping_price),
            discount: Set(order.discount),
            total_price: Set(order.total_price),
            coupon_code: Set(order.coupon_code.clone()),
            is_paid: Set(order.is_paid),
            paid_at: Set(order.paid_at),
            payment_result: Set(order
                .payment_result
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?),
            payment_status: Set(order.payment_status.as_str().to_string()),
            payment_attempt_at: Set(order.payment_attempt_at),
            is_delivered: Set(order.is_delivered),
            delivered_at: Set(order.delivered_at),
            status: Set(order.status.as_str().to_string()),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
            version: Set(order.version),
        })
    }
}

impl TryFrom<Model> for Order {
    type Error = ServiceError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Order {
            id: model.id,
            user_id: model.user_id,
            items: serde_json::from_value(model.items)?,
            shipping_address: serde_json::from_value(model.shipping_address)?,
            payment_method: model
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(ServiceError::InternalError)?,
            items_price: model.items_price,
            tax_price: model.tax_price,
            shipping_price: model.shipping_price,
            discount: model.discount,
            total_price: model.total_price,
            coupon_code: model.coupon_code,
            is_paid: model.is_paid,
            paid_at: model.paid_at,
            payment_result: model
                .payment_result
                .map(serde_json::from_value)
                .transpose()?,
            payment_status: model
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(ServiceError::InternalError)?,
            payment_attempt_at: model.payment_attempt_at,
            is_delivered: model.is_delivered,
            delivered_at: model.delivered_at,
            status: model
                .status
                .parse::<OrderStatus>()
                .map_err(ServiceError::InternalError)?,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        })
    }
}
