//! Postgres journal for the in-memory ledger.
//!
//! Each journaled change writes its transaction row, the record's current
//! quantities and the reservation it touched in one database transaction.
//! On startup [`PostgresLedgerStore::load`] reads the current state back so
//! the ledger can be restored.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;

use censudx_core::{InventoryError, InventoryRecordId, InventoryResult, Location, StockKey};
use censudx_inventory::{InventoryRecord, Reservation, ReservationKey, ReservationState, StockChange};

use super::r#trait::{ChangeJournal, LedgerSnapshot};
use crate::db::{PgHandle, map_sqlx_error};
use crate::transaction_log::postgres::insert_transaction;

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    db: PgHandle,
}

impl PostgresLedgerStore {
    pub fn new(db: PgHandle) -> Self {
        Self { db }
    }

    /// Current records and reservations, for [`super::InMemoryLedger::restore`].
    #[instrument(skip(self), err)]
    pub fn load(&self) -> InventoryResult<LedgerSnapshot> {
        let (record_rows, reservation_rows) = self
            .db
            .block_on(async {
                let records = sqlx::query(
                    r#"
                    SELECT inventory_record_id, product_id, location, total_quantity,
                           reserved_quantity, created_at, updated_at
                    FROM inventory_items
                    "#,
                )
                .fetch_all(self.db.pool())
                .await?;
                let reservations = sqlx::query(
                    r#"
                    SELECT product_id, reference_id, location, quantity, state,
                           created_at, expires_at, consumed_at, updated_at
                    FROM inventory_reservations
                    "#,
                )
                .fetch_all(self.db.pool())
                .await?;
                Ok::<_, sqlx::Error>((records, reservations))
            })
            .map_err(|e| map_sqlx_error("load ledger", e))?;

        Ok(LedgerSnapshot {
            records: record_rows
                .iter()
                .map(record_from_row)
                .collect::<InventoryResult<_>>()?,
            reservations: reservation_rows
                .iter()
                .map(reservation_from_row)
                .collect::<InventoryResult<_>>()?,
        })
    }

    async fn write_change(&self, change: &StockChange) -> Result<(), sqlx::Error> {
        let mut tx = self.db.pool().begin().await?;
        insert_transaction(&mut *tx, &change.to_transaction()).await?;
        upsert_record(&mut tx, &change.after).await?;
        if let Some(reservation) = &change.reservation {
            upsert_reservation(&mut tx, reservation).await?;
        }
        tx.commit().await
    }

    async fn write_removal(&self, change: &StockChange) -> Result<(), sqlx::Error> {
        let key = change.after.key();
        let mut tx = self.db.pool().begin().await?;
        insert_transaction(&mut *tx, &change.to_transaction()).await?;
        sqlx::query("DELETE FROM inventory_reservations WHERE product_id = $1 AND location = $2")
            .bind(key.product_id.as_str())
            .bind(key.location.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM inventory_items WHERE inventory_record_id = $1")
            .bind(change.after.id_typed().as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

async fn upsert_record(tx: &mut Transaction<'_, Postgres>, record: &InventoryRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO inventory_items (
            inventory_record_id, product_id, location, total_quantity,
            reserved_quantity, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (inventory_record_id) DO UPDATE SET
            total_quantity = EXCLUDED.total_quantity,
            reserved_quantity = EXCLUDED.reserved_quantity,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(record.id_typed().as_uuid())
    .bind(record.product_id().as_str())
    .bind(record.location().as_str())
    .bind(record.total_quantity())
    .bind(record.reserved_quantity())
    .bind(record.created_at())
    .bind(record.updated_at())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_reservation(
    tx: &mut Transaction<'_, Postgres>,
    reservation: &Reservation,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO inventory_reservations (
            product_id, reference_id, location, quantity, state,
            created_at, expires_at, consumed_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (product_id, reference_id) DO UPDATE SET
            state = EXCLUDED.state,
            consumed_at = EXCLUDED.consumed_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(reservation.product_id().as_str())
    .bind(reservation.reference_id().as_str())
    .bind(reservation.location().as_str())
    .bind(reservation.quantity())
    .bind(reservation.state().as_str())
    .bind(reservation.created_at())
    .bind(reservation.expires_at())
    .bind(reservation.consumed_at())
    .bind(reservation.updated_at())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl ChangeJournal for PostgresLedgerStore {
    #[instrument(
        skip(self, change),
        fields(key = %change.after.key(), transaction_type = %change.transaction_type),
        err
    )]
    fn record(&self, change: &StockChange) -> InventoryResult<()> {
        self.db
            .block_on(self.write_change(change))
            .map_err(|e| map_sqlx_error("record change", e))
    }

    #[instrument(skip(self, reservation), fields(reservation = %reservation.key()), err)]
    fn record_reservation(&self, reservation: &Reservation) -> InventoryResult<()> {
        self.db
            .block_on(async {
                let mut tx = self.db.pool().begin().await?;
                upsert_reservation(&mut tx, reservation).await?;
                tx.commit().await
            })
            .map_err(|e| map_sqlx_error("record reservation", e))
    }

    #[instrument(skip(self, change), fields(key = %change.after.key()), err)]
    fn record_removal(&self, change: &StockChange) -> InventoryResult<()> {
        self.db
            .block_on(self.write_removal(change))
            .map_err(|e| map_sqlx_error("record removal", e))
    }

    fn is_healthy(&self) -> bool {
        self.db.ping()
    }
}

fn record_from_row(row: &PgRow) -> InventoryResult<InventoryRecord> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode inventory item", e);

    let id: uuid::Uuid = row.try_get("inventory_record_id").map_err(decode)?;
    let product_id: String = row.try_get("product_id").map_err(decode)?;
    let location: String = row.try_get("location").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    InventoryRecord::restore(
        InventoryRecordId::from_uuid(id),
        StockKey::parse(product_id, location)?,
        row.try_get("total_quantity").map_err(decode)?,
        row.try_get("reserved_quantity").map_err(decode)?,
        created_at,
        updated_at,
    )
}

fn reservation_from_row(row: &PgRow) -> InventoryResult<Reservation> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode reservation", e);

    let product_id: String = row.try_get("product_id").map_err(decode)?;
    let reference_id: String = row.try_get("reference_id").map_err(decode)?;
    let location: String = row.try_get("location").map_err(decode)?;
    let state: String = row.try_get("state").map_err(decode)?;
    let state: ReservationState = state
        .parse()
        .map_err(|_| InventoryError::invalid_state(format!("unknown reservation state {state}")))?;

    Reservation::restore(
        ReservationKey::parse(product_id, reference_id)?,
        Location::parse(location)?,
        row.try_get("quantity").map_err(decode)?,
        state,
        row.try_get("created_at").map_err(decode)?,
        row.try_get("expires_at").map_err(decode)?,
        row.try_get("consumed_at").map_err(decode)?,
        row.try_get("updated_at").map_err(decode)?,
    )
}
