use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::FixedAmount => "fixed_amount",
        }
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed_amount" => Ok(DiscountType::FixedAmount),
            other => Err(format!("unknown discount type '{other}'")),
        }
    }
}

/// Coupon codes are stored upper-case and matched case-insensitively
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_purchase: Decimal,
    pub maximum_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    #[serde(default)]
    pub applicable_products: Vec<Uuid>,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    #[serde(default)]
    pub applicable_brands: Vec<String>,
    #[serde(default)]
    pub excluded_products: Vec<Uuid>,
    /// Empty means every user may redeem it
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl Coupon {
    pub fn within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }

    pub fn usage_exhausted(&self) -> bool {
        self.usage_limit
            .map(|limit| self.usage_count >= limit)
            .unwrap_or(false)
    }

    /// Active, inside its window and with uses left
    pub fn is_currently_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.within_window(now) && !self.usage_exhausted()
    }

    pub fn has_product_restrictions(&self) -> bool {
        !self.applicable_products.is_empty()
            || !self.applicable_categories.is_empty()
            || !self.applicable_brands.is_empty()
            || !self.excluded_products.is_empty()
    }
}
