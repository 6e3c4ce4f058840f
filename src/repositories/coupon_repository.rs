use async_trait::async_trait;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;

use super::{BaseRepository, CouponStore, Repository};
use crate::entities::coupon::{ActiveModel, Column, Entity as CouponEntity};
use crate::errors::ServiceError;
use crate::models::Coupon;

#[derive(Debug, Clone)]
pub struct CouponRepository {
    base: BaseRepository,
}

impl CouponRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl CouponStore for CouponRepository {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, ServiceError> {
        CouponEntity::find_by_id(code.to_string())
            .one(self.base.get_db())
            .await?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn increment_usage(&self, code: &str) -> Result<bool, ServiceError> {
        // UPDATE coupons SET usage_count = usage_count + 1
        //  WHERE code = ? AND (usage_limit IS NULL OR usage_count < usage_limit)
        let result = CouponEntity::update_many()
            .col_expr(Column::UsageCount, Expr::col(Column::UsageCount).add(1))
            .filter(Column::Code.eq(code))
            .filter(
                Condition::any()
                    .add(Column::UsageLimit.is_null())
                    .add(Expr::col(Column::UsageCount).lt(Expr::col(Column::UsageLimit))),
            )
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 1 {
            return Ok(true);
        }

        // Distinguish "limit reached" from "no such coupon"
        match self.find_by_code(code).await? {
            Some(_) => Ok(false),
            None => Err(ServiceError::CouponNotFound(code.to_string())),
        }
    }

    async fn upsert(&self, coupon: &Coupon) -> Result<(), ServiceError> {
        let model = ActiveModel::try_from(coupon)?;
        CouponEntity::insert(model)
            .on_conflict(
                OnConflict::column(Column::Code)
                    .update_columns([
                        Column::Description,
                        Column::DiscountType,
                        Column::DiscountValue,
                        Column::MinimumPurchase,
                        Column::MaximumDiscount,
                        Column::StartDate,
                        Column::EndDate,
                        Column::IsActive,
                        Column::UsageLimit,
                        Column::UsageCount,
                        Column::ApplicableProducts,
                        Column::ApplicableCategories,
                        Column::ApplicableBrands,
                        Column::ExcludedProducts,
                        Column::AllowedUsers,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await?;
        Ok(())
    }
}
