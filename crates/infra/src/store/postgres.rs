//! Postgres-backed stock store.
//!
//! Movements and aggregate records live in two tables (see
//! `migrations/0001_stock_ledger.sql`). `commit_movement` runs the version-checked
//! aggregate write and the ledger insert in a single transaction, so the pair is
//! atomic without the rollback dance of the default implementation.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (check violation) | `23514` | `InvalidAppend` |
//! | Database (other, including `23505`) | any | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |
//!
//! The one exception is the ledger insert: a unique violation on the per-key
//! sequence number there means another writer took the sequence first, and
//! `insert_movement` reports it as `Concurrency`.
//!
//! ## Runtime
//!
//! The store traits are synchronous. Calls are bridged onto the ambient tokio runtime
//! with `block_in_place`, which requires the multi-threaded runtime flavour. Outside a
//! runtime, or on a current-thread runtime, calls fail with `Backend`.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::RuntimeFlavor;
use tracing::instrument;

use stockledger_core::{
    AggregateRoot, BranchId, MovementId, ProductId, StockKey, TenantId, TransferId, UserId,
};
use stockledger_inventory::{
    InventoryRecord, MovementReference, MovementType, NewMovement, ReferenceType, StockMovement,
};

use super::r#trait::{AggregateStore, MovementLedger, StockStore, StoreError, check_commit};

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables, indexes and the append-only trigger if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn read_record(&self, key: StockKey) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT quantity, version
            FROM inventory_records
            WHERE tenant_id = $1 AND product_id = $2 AND branch_id = $3
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.branch_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_record", e))?;

        match row {
            Some(row) => record_from_row(key, &row),
            None => Ok(InventoryRecord::empty(key)),
        }
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn cas_record(
        &self,
        key: StockKey,
        expected_version: u64,
        new_quantity: i64,
    ) -> Result<InventoryRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let record = write_record(&mut tx, key, expected_version, new_quantity).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self, movement), fields(key = %movement.key, movement_type = %movement.movement_type), err)]
    pub async fn append_movement(&self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        movement
            .validate()
            .map_err(|e| StoreError::InvalidAppend(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let recorded = insert_movement(&mut tx, movement).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(recorded)
    }

    /// Version-checked aggregate write plus ledger insert in one transaction.
    #[instrument(
        skip(self, expected, movement),
        fields(key = %expected.key(), expected_version = expected.version(), delta = movement.delta),
        err
    )]
    pub async fn commit(
        &self,
        expected: &InventoryRecord,
        movement: NewMovement,
    ) -> Result<(InventoryRecord, StockMovement), StoreError> {
        let key = check_commit(expected, &movement)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Row lock from the write serializes the sequence lookup below per key.
        let updated =
            write_record(&mut tx, key, expected.version(), expected.quantity() + movement.delta)
                .await?;
        let recorded = insert_movement(&mut tx, movement).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((updated, recorded))
    }

    pub async fn load_movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "{MOVEMENT_COLUMNS} WHERE tenant_id = $1 AND product_id = $2 AND branch_id = $3 ORDER BY sequence_number ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(key.tenant_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.branch_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_movements", e))?;

        decode_movements(&rows)
    }

    pub async fn load_tenant_movements(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!("{MOVEMENT_COLUMNS} WHERE tenant_id = $1 ORDER BY global_position ASC");
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_tenant_movements", e))?;

        decode_movements(&rows)
    }

    pub async fn load_transfer_movements(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "{MOVEMENT_COLUMNS} WHERE tenant_id = $1 AND transfer_id = $2 ORDER BY global_position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(transfer_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_transfer_movements", e))?;

        decode_movements(&rows)
    }

    pub async fn list_records(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, product_id, branch_id, quantity, version
            FROM inventory_records
            WHERE tenant_id = $1
            ORDER BY product_id, branch_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_records", e))?;

        rows.iter()
            .map(|row| {
                let key = StockKey::new(
                    TenantId::from_uuid(get(row, "tenant_id")?),
                    ProductId::from_uuid(get(row, "product_id")?),
                    BranchId::from_uuid(get(row, "branch_id")?),
                );
                record_from_row(key, row)
            })
            .collect()
    }

    fn block_on<T>(&self, fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Backend(
                "PostgresStockStore requires a tokio runtime; call it from within one".to_string(),
            )
        })?;
        if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err(StoreError::Backend(
                "PostgresStockStore requires the multi-threaded tokio runtime".to_string(),
            ));
        }
        tokio::task::block_in_place(|| handle.block_on(fut))
    }
}

const MOVEMENT_COLUMNS: &str = r#"
    SELECT movement_id, tenant_id, product_id, branch_id, sequence_number, movement_type,
           delta, transfer_id, reference_type, reference_id, actor_id, occurred_at
    FROM stock_movements
"#;

async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    key: StockKey,
) -> Result<u64, StoreError> {
    let version: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT version FROM inventory_records
        WHERE tenant_id = $1 AND product_id = $2 AND branch_id = $3
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(key.product_id.as_uuid())
    .bind(key.branch_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;
    Ok(version.unwrap_or(0) as u64)
}

async fn write_record(
    tx: &mut Transaction<'_, Postgres>,
    key: StockKey,
    expected_version: u64,
    new_quantity: i64,
) -> Result<InventoryRecord, StoreError> {
    if new_quantity < 0 {
        let actual = current_version(tx, key).await?;
        if actual != expected_version {
            return Err(StoreError::Concurrency {
                key,
                expected: expected_version,
                actual,
            });
        }
        return Err(StoreError::NegativeQuantity {
            key,
            quantity: new_quantity,
        });
    }

    let result = if expected_version == 0 {
        sqlx::query(
            r#"
            INSERT INTO inventory_records (tenant_id, product_id, branch_id, quantity, version)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (tenant_id, product_id, branch_id) DO NOTHING
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.branch_id.as_uuid())
        .bind(new_quantity)
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE inventory_records
            SET quantity = $4, version = version + 1, updated_at = NOW()
            WHERE tenant_id = $1 AND product_id = $2 AND branch_id = $3 AND version = $5
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.branch_id.as_uuid())
        .bind(new_quantity)
        .bind(expected_version as i64)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_record", e))?;

    if result.rows_affected() == 0 {
        let actual = current_version(tx, key).await?;
        return Err(StoreError::Concurrency {
            key,
            expected: expected_version,
            actual,
        });
    }

    Ok(InventoryRecord::from_parts(key, new_quantity, expected_version + 1))
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: NewMovement,
) -> Result<StockMovement, StoreError> {
    let key = movement.key;
    let last: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0)
        FROM stock_movements
        WHERE tenant_id = $1 AND product_id = $2 AND branch_id = $3
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(key.product_id.as_uuid())
    .bind(key.branch_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("next_sequence", e))?;

    let sequence = last as u64 + 1;
    let recorded = movement.into_recorded(MovementId::new(), sequence);
    let (reference_type, reference_id) = match &recorded.reference {
        Some(r) => (Some(reference_type_name(r.reference_type)?), Some(r.reference_id.clone())),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            movement_id, tenant_id, product_id, branch_id, sequence_number, movement_type,
            delta, transfer_id, reference_type, reference_id, actor_id, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(recorded.id.as_uuid())
    .bind(key.tenant_id.as_uuid())
    .bind(key.product_id.as_uuid())
    .bind(key.branch_id.as_uuid())
    .bind(sequence as i64)
    .bind(recorded.movement_type.as_str())
    .bind(recorded.delta)
    .bind(recorded.transfer_id.map(|t| *t.as_uuid()))
    .bind(reference_type)
    .bind(reference_id)
    .bind(recorded.actor.as_uuid())
    .bind(recorded.occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Concurrency {
                key,
                expected: last as u64,
                actual: sequence,
            }
        } else {
            map_sqlx_error("insert_movement", e)
        }
    })?;

    Ok(recorded)
}

fn reference_type_name(reference_type: ReferenceType) -> Result<String, StoreError> {
    match serde_json::to_value(reference_type) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(StoreError::Backend(format!(
            "unexpected reference type encoding {other}"
        ))),
        Err(e) => Err(StoreError::Backend(e.to_string())),
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to read {column}: {e}")))
}

fn record_from_row(key: StockKey, row: &PgRow) -> Result<InventoryRecord, StoreError> {
    let quantity: i64 = get(row, "quantity")?;
    let version: i64 = get(row, "version")?;
    Ok(InventoryRecord::from_parts(key, quantity, version as u64))
}

fn decode_movements(rows: &[PgRow]) -> Result<Vec<StockMovement>, StoreError> {
    rows.iter()
        .map(|row| {
            MovementRow::from_row(row)
                .map_err(|e| StoreError::Backend(format!("failed to decode movement row: {e}")))
                .and_then(StockMovement::try_from)
        })
        .collect()
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => StoreError::InvalidAppend(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct MovementRow {
    movement_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    product_id: uuid::Uuid,
    branch_id: uuid::Uuid,
    sequence_number: i64,
    movement_type: String,
    delta: i64,
    transfer_id: Option<uuid::Uuid>,
    reference_type: Option<String>,
    reference_id: Option<String>,
    actor_id: uuid::Uuid,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            movement_id: row.try_get("movement_id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            branch_id: row.try_get("branch_id")?,
            sequence_number: row.try_get("sequence_number")?,
            movement_type: row.try_get("movement_type")?,
            delta: row.try_get("delta")?,
            transfer_id: row.try_get("transfer_id")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            actor_id: row.try_get("actor_id")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type: MovementType = row
            .movement_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("corrupt movement row: {e}")))?;

        let reference = match (row.reference_type, row.reference_id) {
            (Some(t), Some(id)) => {
                let reference_type: ReferenceType =
                    serde_json::from_value(serde_json::Value::String(t))
                        .map_err(|e| StoreError::Backend(format!("corrupt reference type: {e}")))?;
                Some(MovementReference::new(reference_type, id))
            }
            _ => None,
        };

        Ok(StockMovement {
            id: MovementId::from_uuid(row.movement_id),
            key: StockKey::new(
                TenantId::from_uuid(row.tenant_id),
                ProductId::from_uuid(row.product_id),
                BranchId::from_uuid(row.branch_id),
            ),
            sequence: row.sequence_number as u64,
            movement_type,
            delta: row.delta,
            transfer_id: row.transfer_id.map(TransferId::from_uuid),
            reference,
            actor: UserId::from_uuid(row.actor_id),
            occurred_at: row.occurred_at,
        })
    }
}

impl MovementLedger for PostgresStockStore {
    fn append(&self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        self.block_on(self.append_movement(movement))
    }

    fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        self.block_on(self.load_movements(key))
    }

    fn tenant_movements(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        self.block_on(self.load_tenant_movements(tenant_id))
    }

    fn transfer_movements(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.block_on(self.load_transfer_movements(tenant_id, transfer_id))
    }
}

impl AggregateStore for PostgresStockStore {
    fn read(&self, key: StockKey) -> Result<InventoryRecord, StoreError> {
        self.block_on(self.read_record(key))
    }

    fn compare_and_set(
        &self,
        key: StockKey,
        expected_version: u64,
        new_quantity: i64,
    ) -> Result<InventoryRecord, StoreError> {
        self.block_on(self.cas_record(key, expected_version, new_quantity))
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError> {
        self.block_on(self.list_records(tenant_id))
    }
}

impl StockStore for PostgresStockStore {
    fn commit_movement(
        &self,
        expected: &InventoryRecord,
        movement: NewMovement,
    ) -> Result<(InventoryRecord, StockMovement), StoreError> {
        self.block_on(self.commit(expected, movement))
    }
}
