use async_trait::async_trait;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{BaseRepository, PaymentLedger, Repository};
use crate::entities::payment::{ActiveModel, Column, Entity as PaymentEntity};
use crate::errors::ServiceError;
use crate::models::Payment;

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    base: BaseRepository,
}

impl PaymentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl PaymentLedger for PaymentRepository {
    async fn record(&self, payment: &Payment) -> Result<bool, ServiceError> {
        let inserted = PaymentEntity::insert(ActiveModel::from(payment))
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
            .exec_without_returning(self.base.get_db())
            .await?;
        Ok(inserted > 0)
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, ServiceError> {
        PaymentEntity::find()
            .filter(Column::OrderId.eq(order_id))
            .order_by_asc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }
}
