use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{Coupon, DiscountType};

/// Restriction lists are stored as JSON arrays
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub minimum_purchase: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub maximum_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    #[sea_orm(column_type = "Json")]
    pub applicable_products: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub applicable_categories: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub applicable_brands: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub excluded_products: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub allowed_users: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Coupon> for ActiveModel {
    type Error = ServiceError;

    fn try_from(coupon: &Coupon) -> Result<Self, Self::Error> {
        use sea_orm::ActiveValue::Set;
        Ok(ActiveModel {
            code: Set(coupon.code.clone()),
            description: Set(coupon.description.clone()),
            discount_type: Set(coupon.discount_type.as_str().to_string()),
            discount_value: Set(coupon.discount_value),
            minimum_purchase: Set(coupon.minimum_purchase),
            maximum_discount: Set(coupon.maximum_discount),
            start_date: Set(coupon.start_date),
            end_date: Set(coupon.end_date),
            is_active: Set(coupon.is_active),
            usage_limit: Set(coupon.usage_limit),
            usage_count: Set(coupon.usage_count),
            applicable_products: Set(serde_json::to_value(&coupon.applicable_products)?),
            applicable_categories: Set(serde_json::to_value(&coupon.applicable_categories)?),
            applicable_brands: Set(serde_json::to_value(&coupon.applicable_brands)?),
            excluded_products: Set(serde_json::to_value(&coupon.excluded_products)?),
            allowed_users: Set(serde_json::to_value(&coupon.allowed_users)?),
        })
    }
}

impl TryFrom<Model> for Coupon {
    type Error = ServiceError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Coupon {
            code: model.code,
            description: model.description,
            discount_type: model
                .discount_type
                .parse::<DiscountType>()
                .map_err(ServiceError::InternalError)?,
            discount_value: model.discount_value,
            minimum_purchase: model.minimum_purchase,
            maximum_discount: model.maximum_discount,
            start_date: model.start_date,
            end_date: model.end_date,
            is_active: model.is_active,
            usage_limit: model.usage_limit,
            usage_count: model.usage_count,
            applicable_products: serde_json::from_value(model.applicable_products)?,
            applicable_categories: serde_json::from_value(model.applicable_categories)?,
            applicable_brands: serde_json::from_value(model.applicable_brands)?,
            excluded_products: serde_json::from_value(model.excluded_products)?,
            allowed_users: serde_json::from_value(model.allowed_users)?,
        })
    }
}
