use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{HistoryEntryId, ItemId, OrderId, Version};
use domain::{HistoryEntry, Order, OrderStatus};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderQuery, Result, SortOrder, StoreError,
    store::{HistoryLedger, OrderStore},
};

const ORDER_NUMBER_CONSTRAINT: &str = "orders_order_number_key";
const ORDER_PKEY_CONSTRAINT: &str = "orders_pkey";
const HISTORY_SEQUENCE_CONSTRAINT: &str = "order_history_order_id_sequence_key";

/// PostgreSQL-backed order store.
///
/// Each order is one row in `orders`: filter columns for listing plus the
/// full aggregate as JSONB in `state`. Ledger entries live in
/// `order_history`, which is only ever inserted into.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let state: serde_json::Value = row.try_get("state")?;
        Ok(serde_json::from_value(state)?)
    }

    fn row_to_entry(row: PgRow) -> Result<HistoryEntry> {
        let parse_status = |value: &str| {
            OrderStatus::from_str(value).map_err(|e| StoreError::Corrupt(e.to_string()))
        };
        let previous: Option<String> = row.try_get("previous_status")?;
        let new_status: String = row.try_get("new_status")?;

        Ok(HistoryEntry {
            id: HistoryEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            sequence: Version::new(row.try_get("sequence")?),
            previous_status: previous.as_deref().map(parse_status).transpose()?,
            new_status: parse_status(&new_status)?,
            changed_by: row.try_get("changed_by")?,
            notes: row.try_get("notes")?,
            changed_at: row.try_get("changed_at")?,
        })
    }

    async fn insert_entry(tx: &mut Transaction<'_, Postgres>, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_history (id, order_id, sequence, previous_status, new_status, changed_by, notes, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.order_id.as_uuid())
        .bind(entry.sequence.as_i64())
        .bind(entry.previous_status.map(|s| s.as_str()))
        .bind(entry.new_status.as_str())
        .bind(&entry.changed_by)
        .bind(&entry.notes)
        .bind(entry.changed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            // Two writers produced the same sequence for one order
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(HISTORY_SEQUENCE_CONSTRAINT)
            {
                return StoreError::ConcurrencyConflict {
                    order_id: entry.order_id,
                    expected: Version::new(entry.sequence.as_i64() - 1),
                    actual: entry.sequence,
                };
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: &Order, entry: &HistoryEntry) -> Result<()> {
        let state = serde_json::to_value(order)?;
        let header = order.header();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, status, department_id, department_name, requester_name, priority, created_at, updated_at, version, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_number().to_string())
        .bind(order.status().as_str())
        .bind(&header.department_id)
        .bind(&header.department_name)
        .bind(&header.requester_name)
        .bind(header.priority.as_str())
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(order.version().as_i64())
        .bind(state)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some(ORDER_NUMBER_CONSTRAINT) => {
                        return StoreError::DuplicateOrderNumber(order.order_number());
                    }
                    Some(ORDER_PKEY_CONSTRAINT) => {
                        return StoreError::ConcurrencyConflict {
                            order_id: order.id(),
                            expected: Version::initial(),
                            actual: order.version(),
                        };
                    }
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;

        Self::insert_entry(&mut tx, entry).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save(
        &self,
        order: &Order,
        expected: Version,
        entry: Option<&HistoryEntry>,
    ) -> Result<()> {
        let state = serde_json::to_value(order)?;
        let header = order.header();

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3,
                department_id = $4,
                department_name = $5,
                requester_name = $6,
                priority = $7,
                updated_at = $8,
                version = $9,
                state = $10
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(expected.as_i64())
        .bind(order.status().as_str())
        .bind(&header.department_id)
        .bind(&header.department_name)
        .bind(&header.requester_name)
        .bind(header.priority.as_str())
        .bind(order.updated_at())
        .bind(order.version().as_i64())
        .bind(state)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order.id().as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match actual {
                Some(actual) => StoreError::ConcurrencyConflict {
                    order_id: order.id(),
                    expected,
                    actual: Version::new(actual),
                },
                None => StoreError::OrderNotFound(order.id()),
            });
        }

        if let Some(entry) = entry {
            Self::insert_entry(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query("SELECT state FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_by_item(&self, item_id: ItemId) -> Result<Option<Order>> {
        // Served by the GIN index on state->'items'
        let containment = serde_json::json!([{ "id": item_id }]);
        let row: Option<PgRow> =
            sqlx::query("SELECT state FROM orders WHERE state->'items' @> $1 LIMIT 1")
                .bind(containment)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let mut sql = String::from("SELECT state FROM orders WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.department_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND department_id = ${param_count}"));
        }
        if query.priority.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND priority = ${param_count}"));
        }
        if query.search.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND (order_number ILIKE ${p} OR department_name ILIKE ${p} OR requester_name ILIKE ${p})",
                p = param_count
            ));
        }

        match query.sort {
            SortOrder::NewestFirst => sql.push_str(" ORDER BY created_at DESC, order_number DESC"),
            SortOrder::OldestFirst => sql.push_str(" ORDER BY created_at ASC, order_number ASC"),
        }

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        // Build and execute query with parameters
        let mut sqlx_query = sqlx::query(&sql);

        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(ref department_id) = query.department_id {
            sqlx_query = sqlx_query.bind(department_id.clone());
        }
        if let Some(priority) = query.priority {
            sqlx_query = sqlx_query.bind(priority.as_str());
        }
        if let Some(ref text) = query.search {
            sqlx_query = sqlx_query.bind(like_pattern(text));
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(i64::try_from(offset).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE created_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl HistoryLedger for PostgresOrderStore {
    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, sequence, previous_status, new_status, changed_by, notes, changed_at
            FROM order_history
            WHERE order_id = $1
            ORDER BY changed_at ASC, sequence ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}

/// Wraps free text for a substring `ILIKE`, escaping its wildcards.
fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ward"), "%ward%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
