//! Persistence backend for tillsync: the `SalesStore` contract consumed by
//! the sync pipeline, plus its Postgres implementation on sqlx.
//!
//! Layout: a `sync_batches` run-log table keyed by batch id, a
//! `pos_sales_staging` table of raw export rows tagged with the owning batch
//! id, and a typed `pos_sales` final table that staging rows are promoted
//! into.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tillsync_core::{BatchStatus, DateRange, ProcessType, SalesRecord, SyncBatch};
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tillsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

/// Persistence contract consumed by the sync pipeline. Injected at
/// orchestrator construction so tests can substitute an in-memory fake.
#[async_trait]
pub trait SalesStore: Send + Sync {
    /// Create a run-log entry with status `running` and return its batch id.
    async fn create_batch(
        &self,
        process_type: ProcessType,
        metadata: serde_json::Value,
    ) -> Result<Uuid, StoreError>;

    /// Write the terminal status of a batch. `metadata = None` leaves the
    /// stored metadata untouched.
    async fn update_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        records_processed: i64,
        error_message: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<SyncBatch>, StoreError>;

    /// Delete staging rows whose business date falls inside `range` and
    /// return the deleted count.
    async fn delete_staging_for_range(&self, range: DateRange) -> Result<u64, StoreError>;

    /// Delete final-table rows whose sale date falls inside `range`.
    async fn delete_final_for_range(&self, range: DateRange) -> Result<u64, StoreError>;

    /// Insert raw rows into staging tagged with `batch_id` in one statement.
    async fn bulk_insert_staging(
        &self,
        batch_id: Uuid,
        records: &[SalesRecord],
    ) -> Result<u64, StoreError>;

    /// Transform staging rows tagged with `batch_id` into the final table.
    /// Keyed strictly on the batch id, so only rows that actually landed are
    /// promoted.
    async fn promote_staging(&self, batch_id: Uuid) -> Result<u64, StoreError>;

    /// Drop staging rows for `batch_id` after promotion.
    async fn cleanup_staging(&self, batch_id: Uuid) -> Result<u64, StoreError>;
}

/// Column-major view of a staging insert, one vector per text column. Kept
/// separate from the SQL so the mapping is testable without a database.
#[derive(Debug, Default)]
pub struct StagingColumns {
    pub date: Vec<String>,
    pub receipt_number: Vec<String>,
    pub invoice_number: Vec<String>,
    pub payment_method: Vec<String>,
    pub payment_details: Vec<String>,
    pub customer_name: Vec<String>,
    pub customer_phone_number: Vec<String>,
    pub product_name: Vec<String>,
    pub tab: Vec<String>,
    pub category: Vec<String>,
    pub quantity: Vec<String>,
    pub unit_price: Vec<String>,
    pub total_price: Vec<String>,
    pub gross_amount: Vec<String>,
    pub discount_amount: Vec<String>,
    pub net_sales_amount: Vec<String>,
    pub tax_amount: Vec<String>,
    pub total_amount: Vec<String>,
    pub store_id: Vec<String>,
    pub update_time: Vec<String>,
}

impl StagingColumns {
    pub fn from_records(records: &[SalesRecord]) -> Self {
        let mut cols = Self::default();
        for r in records {
            cols.date.push(r.date.clone());
            cols.receipt_number.push(r.receipt_number.clone());
            cols.invoice_number.push(r.invoice_number.clone());
            cols.payment_method.push(r.payment_method.clone());
            cols.payment_details.push(r.payment_details.clone());
            cols.customer_name.push(r.customer_name.clone());
            cols.customer_phone_number.push(r.customer_phone_number.clone());
            cols.product_name.push(r.product_name.clone());
            cols.tab.push(r.tab.clone());
            cols.category.push(r.category.clone());
            cols.quantity.push(r.quantity.clone());
            cols.unit_price.push(r.unit_price.clone());
            cols.total_price.push(r.total_price.clone());
            cols.gross_amount.push(r.gross_amount.clone());
            cols.discount_amount.push(r.discount_amount.clone());
            cols.net_sales_amount.push(r.net_sales_amount.clone());
            cols.tax_amount.push(r.tax_amount.clone());
            cols.total_amount.push(r.total_amount.clone());
            cols.store_id.push(r.store_id.clone());
            cols.update_time.push(r.update_time.clone());
        }
        cols
    }

    pub fn len(&self) -> usize {
        self.date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_empty()
    }
}

/// Postgres-backed [`SalesStore`].
#[derive(Debug, Clone)]
pub struct PgSalesStore {
    pool: PgPool,
}

impl PgSalesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("connected to sales database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema. Idempotent; every statement is `IF NOT EXISTS`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("schema migration applied");
        Ok(())
    }
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_batches (
        batch_id          UUID PRIMARY KEY,
        process_type      TEXT NOT NULL,
        status            TEXT NOT NULL,
        records_processed BIGINT NOT NULL DEFAULT 0,
        error_message     TEXT,
        metadata          JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at        TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pos_sales_staging (
        id                    BIGSERIAL PRIMARY KEY,
        import_batch_id       UUID NOT NULL,
        date                  TEXT NOT NULL DEFAULT '',
        receipt_number        TEXT NOT NULL DEFAULT '',
        invoice_number        TEXT NOT NULL DEFAULT '',
        payment_method        TEXT NOT NULL DEFAULT '',
        payment_details       TEXT NOT NULL DEFAULT '',
        customer_name         TEXT NOT NULL DEFAULT '',
        customer_phone_number TEXT NOT NULL DEFAULT '',
        product_name          TEXT NOT NULL DEFAULT '',
        tab                   TEXT NOT NULL DEFAULT '',
        category              TEXT NOT NULL DEFAULT '',
        quantity              TEXT NOT NULL DEFAULT '',
        unit_price            TEXT NOT NULL DEFAULT '',
        total_price           TEXT NOT NULL DEFAULT '',
        gross_amount          TEXT NOT NULL DEFAULT '',
        discount_amount       TEXT NOT NULL DEFAULT '',
        net_sales_amount      TEXT NOT NULL DEFAULT '',
        tax_amount            TEXT NOT NULL DEFAULT '',
        total_amount          TEXT NOT NULL DEFAULT '',
        store_id              TEXT NOT NULL DEFAULT '',
        update_time           TEXT NOT NULL DEFAULT '',
        loaded_at             TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pos_sales_staging_batch ON pos_sales_staging (import_batch_id)",
    r#"
    CREATE TABLE IF NOT EXISTS pos_sales (
        id                    BIGSERIAL PRIMARY KEY,
        sale_date             DATE NOT NULL,
        sale_timestamp        TIMESTAMP,
        receipt_number        TEXT NOT NULL DEFAULT '',
        invoice_number        TEXT NOT NULL DEFAULT '',
        payment_method        TEXT NOT NULL DEFAULT '',
        payment_details       TEXT NOT NULL DEFAULT '',
        customer_name         TEXT NOT NULL DEFAULT '',
        customer_phone_number TEXT NOT NULL DEFAULT '',
        product_name          TEXT NOT NULL DEFAULT '',
        tab                   TEXT NOT NULL DEFAULT '',
        category              TEXT NOT NULL DEFAULT '',
        quantity              NUMERIC,
        unit_price            NUMERIC,
        total_price           NUMERIC,
        gross_amount          NUMERIC,
        discount_amount       NUMERIC,
        net_sales_amount      NUMERIC,
        tax_amount            NUMERIC,
        total_amount          NUMERIC,
        store_id              TEXT NOT NULL DEFAULT '',
        update_time           TIMESTAMP,
        import_batch_id       UUID NOT NULL,
        created_at            TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pos_sales_date ON pos_sales (sale_date)",
];

// Staging dates are normalized to ISO by the loader; the guard keeps stray
// rows from older imports from poisoning the cast.
const ISO_DATE_GUARD: &str = r"left(date, 10) ~ '^\d{4}-\d{2}-\d{2}$'";

#[async_trait]
impl SalesStore for PgSalesStore {
    async fn create_batch(
        &self,
        process_type: ProcessType,
        metadata: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let batch_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sync_batches (batch_id, process_type, status, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(batch_id)
        .bind(process_type.as_str())
        .bind(BatchStatus::Running.as_str())
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        info!(%batch_id, process_type = process_type.as_str(), "created sync batch");
        Ok(batch_id)
    }

    async fn update_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        records_processed: i64,
        error_message: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sync_batches
               SET status = $2,
                   records_processed = $3,
                   error_message = $4,
                   metadata = COALESCE($5, metadata),
                   updated_at = now()
             WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(status.as_str())
        .bind(records_processed)
        .bind(error_message)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        info!(%batch_id, status = status.as_str(), records_processed, "updated sync batch");
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<SyncBatch>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT batch_id, process_type, status, records_processed, error_message, metadata
              FROM sync_batches
             WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let process_type: String = row.try_get("process_type")?;
        let status: String = row.try_get("status")?;
        Ok(Some(SyncBatch {
            batch_id: row.try_get("batch_id")?,
            process_type: match process_type.as_str() {
                "historical_sync" => ProcessType::HistoricalSync,
                _ => ProcessType::DailySync,
            },
            status: match status.as_str() {
                "completed" => BatchStatus::Completed,
                "partial" => BatchStatus::Partial,
                "failed" => BatchStatus::Failed,
                _ => BatchStatus::Running,
            },
            records_processed: row.try_get("records_processed")?,
            error_message: row.try_get("error_message")?,
            metadata: row.try_get("metadata")?,
        }))
    }

    async fn delete_staging_for_range(&self, range: DateRange) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM pos_sales_staging WHERE {ISO_DATE_GUARD} AND left(date, 10)::date BETWEEN $1 AND $2"
        );
        let result = sqlx::query(&sql)
            .bind(range.start)
            .bind(range.end)
            .execute(&self.pool)
            .await?;
        debug!(start = %range.start, end = %range.end, deleted = result.rows_affected(), "deleted staging rows for range");
        Ok(result.rows_affected())
    }

    async fn delete_final_for_range(&self, range: DateRange) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM pos_sales WHERE sale_date BETWEEN $1 AND $2")
            .bind(range.start)
            .bind(range.end)
            .execute(&self.pool)
            .await?;
        debug!(start = %range.start, end = %range.end, deleted = result.rows_affected(), "deleted final rows for range");
        Ok(result.rows_affected())
    }

    async fn bulk_insert_staging(
        &self,
        batch_id: Uuid,
        records: &[SalesRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let cols = StagingColumns::from_records(records);
        let result = sqlx::query(
            r#"
            INSERT INTO pos_sales_staging (
                import_batch_id, date, receipt_number, invoice_number,
                payment_method, payment_details, customer_name,
                customer_phone_number, product_name, tab, category, quantity,
                unit_price, total_price, gross_amount, discount_amount,
                net_sales_amount, tax_amount, total_amount, store_id,
                update_time
            )
            SELECT $1, u.*
              FROM UNNEST(
                $2::text[], $3::text[], $4::text[], $5::text[], $6::text[],
                $7::text[], $8::text[], $9::text[], $10::text[], $11::text[],
                $12::text[], $13::text[], $14::text[], $15::text[],
                $16::text[], $17::text[], $18::text[], $19::text[],
                $20::text[], $21::text[]
              ) AS u(
                date, receipt_number, invoice_number, payment_method,
                payment_details, customer_name, customer_phone_number,
                product_name, tab, category, quantity, unit_price,
                total_price, gross_amount, discount_amount, net_sales_amount,
                tax_amount, total_amount, store_id, update_time
              )
            "#,
        )
        .bind(batch_id)
        .bind(&cols.date)
        .bind(&cols.receipt_number)
        .bind(&cols.invoice_number)
        .bind(&cols.payment_method)
        .bind(&cols.payment_details)
        .bind(&cols.customer_name)
        .bind(&cols.customer_phone_number)
        .bind(&cols.product_name)
        .bind(&cols.tab)
        .bind(&cols.category)
        .bind(&cols.quantity)
        .bind(&cols.unit_price)
        .bind(&cols.total_price)
        .bind(&cols.gross_amount)
        .bind(&cols.discount_amount)
        .bind(&cols.net_sales_amount)
        .bind(&cols.tax_amount)
        .bind(&cols.total_amount)
        .bind(&cols.store_id)
        .bind(&cols.update_time)
        .execute(&self.pool)
        .await?;
        debug!(%batch_id, inserted = result.rows_affected(), "bulk inserted staging rows");
        Ok(result.rows_affected())
    }

    async fn promote_staging(&self, batch_id: Uuid) -> Result<u64, StoreError> {
        // Expanded-column transform: the loader guarantees rows for this
        // batch carry ISO dates, numeric casts fall back to NULL.
        let sql = format!(
            r#"
            INSERT INTO pos_sales (
                sale_date, sale_timestamp, receipt_number, invoice_number,
                payment_method, payment_details, customer_name,
                customer_phone_number, product_name, tab, category, quantity,
                unit_price, total_price, gross_amount, discount_amount,
                net_sales_amount, tax_amount, total_amount, store_id,
                update_time, import_batch_id
            )
            SELECT left(date, 10)::date,
                   date::timestamp,
                   receipt_number, invoice_number, payment_method,
                   payment_details, customer_name, customer_phone_number,
                   product_name, tab, category,
                   NULLIF(quantity, '')::numeric,
                   NULLIF(unit_price, '')::numeric,
                   NULLIF(total_price, '')::numeric,
                   NULLIF(gross_amount, '')::numeric,
                   NULLIF(discount_amount, '')::numeric,
                   NULLIF(net_sales_amount, '')::numeric,
                   NULLIF(tax_amount, '')::numeric,
                   NULLIF(total_amount, '')::numeric,
                   store_id,
                   NULLIF(update_time, '')::timestamp,
                   import_batch_id
              FROM pos_sales_staging
             WHERE import_batch_id = $1
               AND {ISO_DATE_GUARD}
            "#
        );
        let result = sqlx::query(&sql).bind(batch_id).execute(&self.pool).await?;
        info!(%batch_id, promoted = result.rows_affected(), "promoted staging rows to final table");
        Ok(result.rows_affected())
    }

    async fn cleanup_staging(&self, batch_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM pos_sales_staging WHERE import_batch_id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        debug!(%batch_id, removed = result.rows_affected(), "cleaned up staging rows");
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_columns_preserve_row_order_and_length() {
        let records = vec![
            SalesRecord {
                date: "2025-05-01 10:00:00".into(),
                receipt_number: "R-1".into(),
                quantity: "2".into(),
                ..Default::default()
            },
            SalesRecord {
                date: "2025-05-02 11:30:00".into(),
                receipt_number: "R-2".into(),
                quantity: "1".into(),
                ..Default::default()
            },
        ];
        let cols = StagingColumns::from_records(&records);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols.date, vec!["2025-05-01 10:00:00", "2025-05-02 11:30:00"]);
        assert_eq!(cols.receipt_number, vec!["R-1", "R-2"]);
        assert_eq!(cols.quantity, vec!["2", "1"]);
        assert_eq!(cols.tab, vec!["", ""]);
    }

    #[test]
    fn staging_columns_empty_input() {
        let cols = StagingColumns::from_records(&[]);
        assert!(cols.is_empty());
    }
}
