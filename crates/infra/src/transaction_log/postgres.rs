//! Postgres-backed transaction log.
//!
//! `sequence_number` is a `BIGSERIAL`. Appends for one inventory record are
//! serialized by the ledger's per-key lock, so per-record order matches
//! commit order even though sequence values are global.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

use censudx_core::{
    CorrelationId, InventoryError, InventoryRecordId, InventoryResult, Location, ProductId,
    ReferenceId, StockKey,
};
use censudx_inventory::{NewTransaction, TransactionRecord};

use super::r#trait::{PageRequest, TransactionLog, TransactionPage};
use crate::db::{PgHandle, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresTransactionLog {
    db: PgHandle,
}

impl PostgresTransactionLog {
    pub fn new(db: PgHandle) -> Self {
        Self { db }
    }

    async fn select_page(
        &self,
        inventory_record_id: InventoryRecordId,
        page: PageRequest,
    ) -> Result<Vec<sqlx::postgres::PgRow>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT
                sequence_number, inventory_record_id, product_id, location,
                transaction_type, quantity_delta, resulting_total, resulting_reserved,
                reason, reference_id, correlation_id, occurred_at
            FROM inventory_transactions
            WHERE inventory_record_id = $1
              AND ($2::bigint IS NULL OR sequence_number < $2)
            ORDER BY sequence_number DESC
            LIMIT $3
            "#,
        )
        .bind(inventory_record_id.as_uuid())
        .bind(page.before().map(|b| b as i64))
        .bind(page.limit() as i64 + 1)
        .fetch_all(self.db.pool())
        .await
    }

    async fn select_key_page(
        &self,
        key: &StockKey,
        page: PageRequest,
    ) -> Result<Vec<sqlx::postgres::PgRow>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT
                sequence_number, inventory_record_id, product_id, location,
                transaction_type, quantity_delta, resulting_total, resulting_reserved,
                reason, reference_id, correlation_id, occurred_at
            FROM inventory_transactions
            WHERE product_id = $1 AND location = $2
              AND ($3::bigint IS NULL OR sequence_number < $3)
            ORDER BY sequence_number DESC
            LIMIT $4
            "#,
        )
        .bind(key.product_id.as_str())
        .bind(key.location.as_str())
        .bind(page.before().map(|b| b as i64))
        .bind(page.limit() as i64 + 1)
        .fetch_all(self.db.pool())
        .await
    }
}

/// Insert one transaction row, on the pool or inside a caller's transaction.
pub(crate) async fn insert_transaction<'e, E>(executor: E, tx: &NewTransaction) -> Result<i64, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO inventory_transactions (
            inventory_record_id, product_id, location, transaction_type,
            quantity_delta, resulting_total, resulting_reserved,
            reason, reference_id, correlation_id, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING sequence_number
        "#,
    )
    .bind(tx.inventory_record_id.as_uuid())
    .bind(tx.product_id.as_str())
    .bind(tx.location.as_str())
    .bind(tx.transaction_type.as_str())
    .bind(tx.quantity_delta)
    .bind(tx.resulting_total)
    .bind(tx.resulting_reserved)
    .bind(tx.reason.as_deref())
    .bind(tx.reference_id.as_ref().map(|r| r.as_str()))
    .bind(tx.correlation_id.as_uuid())
    .bind(tx.timestamp)
    .fetch_one(executor)
    .await?;

    row.try_get("sequence_number")
}

fn page_from_rows(rows: Vec<sqlx::postgres::PgRow>, page: PageRequest) -> InventoryResult<TransactionPage> {
    let transactions = rows
        .iter()
        .map(transaction_from_row)
        .collect::<InventoryResult<Vec<_>>>()?;
    Ok(TransactionPage::from_newest_first(transactions, page.limit()))
}

impl TransactionLog for PostgresTransactionLog {
    #[instrument(
        skip(self, transaction),
        fields(
            product_id = %transaction.product_id,
            location = %transaction.location,
            transaction_type = %transaction.transaction_type
        ),
        err
    )]
    fn append(&self, transaction: NewTransaction) -> InventoryResult<u64> {
        let sequence_number = self
            .db
            .block_on(insert_transaction(self.db.pool(), &transaction))
            .map_err(|e| map_sqlx_error("append", e))?;
        Ok(sequence_number as u64)
    }

    #[instrument(skip(self), fields(inventory_record_id = %inventory_record_id), err)]
    fn query(
        &self,
        inventory_record_id: InventoryRecordId,
        page: PageRequest,
    ) -> InventoryResult<TransactionPage> {
        let rows = self
            .db
            .block_on(self.select_page(inventory_record_id, page))
            .map_err(|e| map_sqlx_error("query", e))?;
        page_from_rows(rows, page)
    }

    #[instrument(skip(self, page), fields(key = %key), err)]
    fn query_key(&self, key: &StockKey, page: PageRequest) -> InventoryResult<TransactionPage> {
        let rows = self
            .db
            .block_on(self.select_key_page(key, page))
            .map_err(|e| map_sqlx_error("query key", e))?;
        page_from_rows(rows, page)
    }

    fn is_healthy(&self) -> bool {
        self.db.ping()
    }
}

fn transaction_from_row(row: &sqlx::postgres::PgRow) -> InventoryResult<TransactionRecord> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode transaction", e);

    let sequence_number: i64 = row.try_get("sequence_number").map_err(decode)?;
    let inventory_record_id: uuid::Uuid = row.try_get("inventory_record_id").map_err(decode)?;
    let product_id: String = row.try_get("product_id").map_err(decode)?;
    let location: String = row.try_get("location").map_err(decode)?;
    let transaction_type: String = row.try_get("transaction_type").map_err(decode)?;
    let reason: Option<String> = row.try_get("reason").map_err(decode)?;
    let reference_id: Option<String> = row.try_get("reference_id").map_err(decode)?;
    let correlation_id: uuid::Uuid = row.try_get("correlation_id").map_err(decode)?;
    let timestamp: DateTime<Utc> = row.try_get("occurred_at").map_err(decode)?;

    Ok(TransactionRecord {
        sequence_number: sequence_number as u64,
        inventory_record_id: InventoryRecordId::from_uuid(inventory_record_id),
        product_id: ProductId::parse(product_id)?,
        location: Location::parse(location)?,
        transaction_type: transaction_type
            .parse()
            .map_err(|_| InventoryError::invalid_state(format!("unknown transaction type {transaction_type}")))?,
        quantity_delta: row.try_get("quantity_delta").map_err(decode)?,
        resulting_total: row.try_get("resulting_total").map_err(decode)?,
        resulting_reserved: row.try_get("resulting_reserved").map_err(decode)?,
        reason,
        reference_id: reference_id.map(ReferenceId::parse).transpose()?,
        correlation_id: CorrelationId::from_uuid(correlation_id),
        timestamp,
    })
}
