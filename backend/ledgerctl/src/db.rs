//! Database layer — migrations and the SQLite-backed [`RecordStore`].
//!
//! Each commit runs in one SQL transaction: read versions are re-checked
//! inside it, writes bump versions, and events are appended before the
//! transaction commits. A stale version, a busy/locked database or a
//! unique-key collision all mean another writer won; they are reported as
//! [`StoreError::Conflict`] and nothing is applied.

use async_trait::async_trait;
use research_funding::storage::{
    EventFilter, Record, RecordKey, RecordStore, ScanFilter, StoreError, StoreResult,
    Transaction, Versioned,
};
use research_funding::EventRecord;
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::errors::Result;
use crate::events::{decode_body, encode_body, index_columns, EventRow, RecordRow};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    // Make sure the file is created if it doesn't exist yet.
    let url = if url.contains('?') || url.contains(":memory:") {
        url
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Map a driver error onto the store contract.
fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes.
        let busy = matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"));
        if busy || db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(e.to_string())
}

// ─────────────────────────────────────────────────────────
// RecordStore
// ─────────────────────────────────────────────────────────

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Versioned<Record>>> {
        let row = sqlx::query_as::<Sqlite, RecordRow>(
            "SELECT version, body FROM records WHERE key = ?1",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        row.map(RecordRow::decode).transpose()
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        let mut db = self.pool.begin().await.map_err(classify)?;
        let updated_at = tx.timestamp.timestamp_millis();

        for (key, expected) in &tx.reads {
            let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM records WHERE key = ?1")
                .bind(key.to_string())
                .fetch_optional(&mut *db)
                .await
                .map_err(classify)?;
            let actual = row.map(|(v,)| v as u64);
            if actual != *expected {
                // Dropping `db` rolls the transaction back.
                return Err(StoreError::Conflict(format!(
                    "{key} moved from version {expected:?} to {actual:?}"
                )));
            }
        }

        for (key, record) in &tx.writes {
            let (project_id, funder) = index_columns(record);
            sqlx::query(
                r#"
                INSERT INTO records (key, kind, project_id, funder, version, body, updated_at)
                VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
                ON CONFLICT(key) DO UPDATE SET
                    version    = records.version + 1,
                    body       = excluded.body,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key.to_string())
            .bind(record.kind())
            .bind(project_id)
            .bind(funder)
            .bind(encode_body(record)?)
            .bind(updated_at)
            .execute(&mut *db)
            .await
            .map_err(classify)?;
        }

        for event in &tx.events {
            sqlx::query(
                r#"
                INSERT INTO events (event_type, project_id, work_id, body, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(event.as_str())
            .bind(event.project_id().map(|p| p as i64))
            .bind(event.work_id().map(|w| w as i64))
            .bind(encode_body(event)?)
            .bind(updated_at)
            .execute(&mut *db)
            .await
            .map_err(classify)?;
        }

        db.commit().await.map_err(classify)?;
        debug!(
            writes = tx.writes.len(),
            events = tx.events.len(),
            "sqlite transaction committed"
        );
        Ok(())
    }

    async fn scan(&self, filter: &ScanFilter) -> StoreResult<Vec<Record>> {
        let query = match filter {
            ScanFilter::Projects => sqlx::query_as::<Sqlite, (String,)>(
                "SELECT body FROM records WHERE kind = 'project'",
            ),
            ScanFilter::ContributionsByProject(id) => sqlx::query_as::<Sqlite, (String,)>(
                "SELECT body FROM records WHERE kind = 'contribution' AND project_id = ?1",
            )
            .bind(*id as i64),
            ScanFilter::ContributionsByFunder(funder) => sqlx::query_as::<Sqlite, (String,)>(
                "SELECT body FROM records WHERE kind = 'contribution' AND funder = ?1",
            )
            .bind(funder.to_string()),
            ScanFilter::Works => sqlx::query_as::<Sqlite, (String,)>(
                "SELECT body FROM records WHERE kind = 'work'",
            ),
        };
        let rows = query.fetch_all(&self.pool).await.map_err(classify)?;
        rows.iter().map(|(body,)| decode_body(body)).collect()
    }

    async fn events(&self, filter: &EventFilter) -> StoreResult<Vec<EventRecord>> {
        const COLUMNS: &str =
            "SELECT seq, event_type, project_id, work_id, body, timestamp FROM events";
        let rows = match filter {
            EventFilter::All => {
                sqlx::query_as::<Sqlite, EventRow>(&format!("{COLUMNS} ORDER BY seq ASC"))
                    .fetch_all(&self.pool)
                    .await
            }
            EventFilter::Project(id) => {
                sqlx::query_as::<Sqlite, EventRow>(&format!(
                    "{COLUMNS} WHERE project_id = ?1 ORDER BY seq ASC"
                ))
                .bind(*id as i64)
                .fetch_all(&self.pool)
                .await
            }
            EventFilter::Work(id) => {
                sqlx::query_as::<Sqlite, EventRow>(&format!(
                    "{COLUMNS} WHERE work_id = ?1 ORDER BY seq ASC"
                ))
                .bind(*id as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(classify)?;
        rows.into_iter().map(EventRecord::try_from).collect()
    }
}
