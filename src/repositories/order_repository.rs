use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{BaseRepository, OrderStore, Repository};
use crate::entities::order::{ActiveModel, Column, Entity as OrderEntity};
use crate::errors::ServiceError;
use crate::models::Order;

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), ServiceError> {
        ActiveModel::try_from(order)?
            .insert(self.base.get_db())
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>, ServiceError> {
        OrderEntity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn update_if_version(
        &self,
        next: &Order,
        expected_version: i32,
    ) -> Result<bool, ServiceError> {
        // UPDATE orders SET ... WHERE id = ? AND version = expected
        let result = OrderEntity::update_many()
            .set(ActiveModel::try_from(next)?)
            .filter(Column::Id.eq(next.id))
            .filter(Column::Version.eq(expected_version))
            .exec(self.base.get_db())
            .await?;

        debug!(
            order_id = %next.id,
            expected_version,
            rows = result.rows_affected,
            "conditional order update"
        );
        Ok(result.rows_affected == 1)
    }
}
