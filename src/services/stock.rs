use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    services::checkout::pricing::VerifiedItem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockUpdate {
    /// Compare-and-swap succeeded
    Atomic { before: i32, after: i32 },
    /// Lost the race, then wrote over a fresh read
    BestEffort { before: i32, after: i32 },
}

/// Post-payment stock decrements. The payment has already been captured,
/// so stock clamps at zero instead of rejecting.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn read_stock(&self, product_id: i64) -> Result<i32, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .map(|p| p.stock)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    async fn write_stock(
        &self,
        product_id: i64,
        stock: i32,
        observed: Option<i32>,
    ) -> Result<u64, ServiceError> {
        let mut update = ProductEntity::update_many()
            .col_expr(product::Column::Stock, Expr::value(stock))
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id));
        if let Some(observed) = observed {
            update = update.filter(product::Column::Stock.eq(observed));
        }
        Ok(update.exec(&*self.db).await?.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn decrement(&self, product_id: i64, quantity: i32) -> Result<StockUpdate, ServiceError> {
        let observed = self.read_stock(product_id).await?;
        let after = (observed - quantity).max(0);
        if self.write_stock(product_id, after, Some(observed)).await? == 1 {
            debug!(product_id, before = observed, after, "stock decremented");
            return Ok(StockUpdate::Atomic {
                before: observed,
                after,
            });
        }

        metrics::counter!("storefront.stock.cas_conflicts", 1);
        let fresh = self.read_stock(product_id).await?;
        let after = (fresh - quantity).max(0);
        self.write_stock(product_id, after, None).await?;
        error!(
            severity = "CRITICAL",
            product_id,
            quantity,
            before = fresh,
            after,
            "stock compare-and-swap lost; applied non-atomic decrement"
        );
        Ok(StockUpdate::BestEffort {
            before: fresh,
            after,
        })
    }

    /// Decrements every line; failures are logged and skipped.
    pub async fn decrement_all(&self, items: &[VerifiedItem]) -> Vec<(i64, Result<StockUpdate, ServiceError>)> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self.decrement(item.product_id, item.quantity).await;
            if let Err(e) = &outcome {
                error!(
                    severity = "CRITICAL",
                    product_id = item.product_id,
                    quantity = item.quantity,
                    error = %e,
                    "stock decrement failed after payment"
                );
            }
            results.push((item.product_id, outcome));
        }
        results
    }
}
