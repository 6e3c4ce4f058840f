use async_trait::async_trait;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{BaseRepository, InventoryLedger, Repository};
use crate::entities::product::{ActiveModel, Column, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::models::Product;

/// Repository for catalog products and their stock counters
#[derive(Debug, Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl InventoryLedger for ProductRepository {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, ServiceError> {
        Ok(ProductEntity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .map(Product::from))
    }

    async fn try_reserve(&self, id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        // UPDATE products SET count_in_stock = count_in_stock - q
        //  WHERE id = ? AND count_in_stock >= q
        let result = ProductEntity::update_many()
            .col_expr(
                Column::CountInStock,
                Expr::col(Column::CountInStock).sub(quantity),
            )
            .filter(Column::Id.eq(id))
            .filter(Column::CountInStock.gte(quantity))
            .exec(self.base.get_db())
            .await?;

        debug!(product_id = %id, quantity, rows = result.rows_affected, "conditional stock decrement");
        Ok(result.rows_affected == 1)
    }

    async fn release(&self, id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                Column::CountInStock,
                Expr::col(Column::CountInStock).add(quantity),
            )
            .filter(Column::Id.eq(id))
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ProductNotFound(id));
        }
        Ok(())
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), ServiceError> {
        use sea_orm::ActiveValue::Set;
        let model = ActiveModel {
            id: Set(product.id),
            name: Set(product.name.clone()),
            image: Set(product.image.clone()),
            brand: Set(product.brand.clone()),
            category: Set(product.category.clone()),
            price: Set(product.price),
            count_in_stock: Set(product.count_in_stock),
        };

        ProductEntity::insert(model)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::Image,
                        Column::Brand,
                        Column::Category,
                        Column::Price,
                        Column::CountInStock,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await?;
        Ok(())
    }
}
