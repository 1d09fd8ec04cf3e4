//! Postgres connection handle for the synchronous store traits.
//!
//! The ledger and its collaborators are synchronous. Postgres-backed stores
//! own a small dedicated tokio runtime and drive sqlx through `block_on`, so
//! they must not be called from inside another async runtime.

use std::future::Future;
use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::{Builder, Runtime};

use censudx_core::{InventoryError, InventoryResult};

/// Schema for the transaction log, ledger state and alert tables.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_transactions (
    sequence_number BIGSERIAL PRIMARY KEY,
    inventory_record_id UUID NOT NULL,
    product_id TEXT NOT NULL,
    location TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    quantity_delta BIGINT NOT NULL,
    resulting_total BIGINT NOT NULL CHECK (resulting_total >= 0),
    resulting_reserved BIGINT NOT NULL CHECK (resulting_reserved >= 0),
    reason TEXT,
    reference_id TEXT,
    correlation_id UUID NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_inventory_transactions_record
    ON inventory_transactions (inventory_record_id, sequence_number DESC);

CREATE INDEX IF NOT EXISTS idx_inventory_transactions_key
    ON inventory_transactions (product_id, location, sequence_number DESC);

CREATE TABLE IF NOT EXISTS inventory_items (
    inventory_record_id UUID PRIMARY KEY,
    product_id TEXT NOT NULL,
    location TEXT NOT NULL,
    total_quantity BIGINT NOT NULL CHECK (total_quantity >= 0),
    reserved_quantity BIGINT NOT NULL CHECK (reserved_quantity >= 0 AND reserved_quantity <= total_quantity),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (product_id, location)
);

CREATE TABLE IF NOT EXISTS inventory_reservations (
    product_id TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    location TEXT NOT NULL,
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    state TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ,
    consumed_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (product_id, reference_id)
);

CREATE TABLE IF NOT EXISTS low_stock_alerts (
    inventory_record_id UUID PRIMARY KEY,
    product_id TEXT NOT NULL,
    location TEXT NOT NULL,
    current_quantity BIGINT NOT NULL,
    threshold BIGINT NOT NULL,
    severity TEXT NOT NULL,
    raised_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    resolved_at TIMESTAMPTZ
);
"#;

/// Pool plus the runtime that drives it.
#[derive(Debug, Clone)]
pub struct PgHandle {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PgHandle {
    /// Connect and ensure the schema exists.
    pub fn connect(database_url: &str, max_connections: u32) -> InventoryResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("censudx-pg")
            .enable_all()
            .build()
            .map_err(|e| InventoryError::unavailable(format!("failed to start db runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        let handle = Self {
            pool,
            runtime: Arc::new(runtime),
        };
        handle.migrate()?;
        Ok(handle)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn migrate(&self) -> InventoryResult<()> {
        self.block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Round-trip `SELECT 1`.
    pub fn ping(&self) -> bool {
        self.block_on(sqlx::query("SELECT 1").execute(&self.pool))
            .is_ok()
    }
}

/// Map SQLx errors to `InventoryError`.
///
/// Connectivity problems are retryable (`Unavailable`). Constraint
/// violations mean a row we produced broke a storage invariant.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> InventoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => InventoryError::invalid_state(msg),
                _ => InventoryError::unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            InventoryError::unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            InventoryError::invalid_state(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => InventoryError::unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
