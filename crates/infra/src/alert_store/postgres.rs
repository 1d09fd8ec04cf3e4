//! Postgres-backed alert store (`low_stock_alerts`, one row per record).

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

use censudx_core::{InventoryError, InventoryRecordId, InventoryResult, Location, ProductId};
use censudx_events::{LowStockAlert, Severity};

use super::r#trait::{AlertStore, LowStockAlertRecord};
use crate::db::{PgHandle, map_sqlx_error};

const COLUMNS: &str = "inventory_record_id, product_id, location, current_quantity, threshold, \
                       severity, raised_at, updated_at, resolved_at";

#[derive(Debug, Clone)]
pub struct PostgresAlertStore {
    db: PgHandle,
}

impl PostgresAlertStore {
    pub fn new(db: PgHandle) -> Self {
        Self { db }
    }
}

impl AlertStore for PostgresAlertStore {
    #[instrument(skip(self, alert), fields(product_id = %alert.product_id, location = %alert.location), err)]
    fn upsert(&self, alert: &LowStockAlert, now: DateTime<Utc>) -> InventoryResult<LowStockAlertRecord> {
        let sql = format!(
            r#"
            INSERT INTO low_stock_alerts ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, NULL)
            ON CONFLICT (inventory_record_id) DO UPDATE SET
                current_quantity = EXCLUDED.current_quantity,
                threshold = EXCLUDED.threshold,
                severity = EXCLUDED.severity,
                raised_at = CASE
                    WHEN low_stock_alerts.resolved_at IS NULL THEN low_stock_alerts.raised_at
                    ELSE EXCLUDED.raised_at
                END,
                updated_at = EXCLUDED.updated_at,
                resolved_at = NULL
            RETURNING {COLUMNS}
            "#
        );

        let row = self
            .db
            .block_on(
                sqlx::query(&sql)
                    .bind(alert.inventory_record_id.as_uuid())
                    .bind(alert.product_id.as_str())
                    .bind(alert.location.as_str())
                    .bind(alert.current_quantity)
                    .bind(alert.threshold)
                    .bind(alert.severity.as_str())
                    .bind(now)
                    .fetch_one(self.db.pool()),
            )
            .map_err(|e| map_sqlx_error("upsert_alert", e))?;

        alert_from_row(&row)
    }

    #[instrument(skip(self), err)]
    fn resolve(
        &self,
        inventory_record_id: InventoryRecordId,
        now: DateTime<Utc>,
    ) -> InventoryResult<Option<LowStockAlertRecord>> {
        let sql = format!(
            r#"
            UPDATE low_stock_alerts
            SET resolved_at = $2, updated_at = $2
            WHERE inventory_record_id = $1 AND resolved_at IS NULL
            RETURNING {COLUMNS}
            "#
        );

        let row = self
            .db
            .block_on(
                sqlx::query(&sql)
                    .bind(inventory_record_id.as_uuid())
                    .bind(now)
                    .fetch_optional(self.db.pool()),
            )
            .map_err(|e| map_sqlx_error("resolve_alert", e))?;

        row.as_ref().map(alert_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    fn unresolved(&self) -> InventoryResult<Vec<LowStockAlertRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM low_stock_alerts WHERE resolved_at IS NULL ORDER BY product_id, location"
        );

        let rows = self
            .db
            .block_on(sqlx::query(&sql).fetch_all(self.db.pool()))
            .map_err(|e| map_sqlx_error("unresolved_alerts", e))?;

        rows.iter().map(alert_from_row).collect()
    }
}

fn alert_from_row(row: &sqlx::postgres::PgRow) -> InventoryResult<LowStockAlertRecord> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode alert", e);

    let inventory_record_id: uuid::Uuid = row.try_get("inventory_record_id").map_err(decode)?;
    let product_id: String = row.try_get("product_id").map_err(decode)?;
    let location: String = row.try_get("location").map_err(decode)?;
    let severity: String = row.try_get("severity").map_err(decode)?;
    let severity = match severity.as_str() {
        "warning" => Severity::Warning,
        "critical" => Severity::Critical,
        other => return Err(InventoryError::invalid_state(format!("unknown alert severity {other}"))),
    };

    Ok(LowStockAlertRecord {
        alert: LowStockAlert {
            inventory_record_id: InventoryRecordId::from_uuid(inventory_record_id),
            product_id: ProductId::parse(product_id)?,
            location: Location::parse(location)?,
            current_quantity: row.try_get("current_quantity").map_err(decode)?,
            threshold: row.try_get("threshold").map_err(decode)?,
            severity,
        },
        raised_at: row.try_get("raised_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        resolved_at: row.try_get("resolved_at").map_err(decode)?,
    })
}
