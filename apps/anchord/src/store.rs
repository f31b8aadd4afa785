//! Transactional persistence for anchors, anchor items and the retry log.
//!
//! Identities are uuids stored as TEXT; timestamps are unix milliseconds.
//! The `(digest, start_time, end_time)` unique index carries the
//! idempotency contract for anchor jobs, and `(anchor_id, position_in_merkle)`
//! makes item persistence safe to re-run after a partial write.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Pool, Row, Sqlite};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{AnchorItem, AnchorRecord, AnchorStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A new anchor item pending persistence.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub event_id: Option<Uuid>,
    pub event_hash: String,
    pub position: i64,
    pub proof_compact: Option<Vec<String>>,
}

/// Repository over the anchor tables.
#[derive(Debug, Clone)]
pub struct AnchorRepository {
    pool: Pool<Sqlite>,
}

impl AnchorRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anchors (
                id TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                method TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                item_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                iota_block_id TEXT,
                iota_network TEXT,
                explorer_url TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                posted_at INTEGER,
                confirmed_at INTEGER,
                UNIQUE (digest, start_time, end_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anchor_items (
                id TEXT PRIMARY KEY,
                anchor_id TEXT NOT NULL REFERENCES anchors(id) ON DELETE CASCADE,
                event_id TEXT,
                event_hash TEXT NOT NULL,
                position_in_merkle INTEGER NOT NULL,
                merkle_proof TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (anchor_id, position_in_merkle)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anchor_retry_log (
                id TEXT PRIMARY KEY,
                anchor_id TEXT NOT NULL REFERENCES anchors(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Event source table; written by the indexer, read-only here.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indexed_events (
                id TEXT PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                event_index INTEGER NOT NULL,
                pallet TEXT NOT NULL,
                event_name TEXT NOT NULL,
                event_hash TEXT NOT NULL,
                device_id TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_anchors_status ON anchors(status)",
            "CREATE INDEX IF NOT EXISTS idx_anchors_created_at ON anchors(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_anchor_items_anchor_id ON anchor_items(anchor_id)",
            "CREATE INDEX IF NOT EXISTS idx_anchor_items_event_hash ON anchor_items(event_hash)",
            "CREATE INDEX IF NOT EXISTS idx_anchor_retry_log_anchor_id ON anchor_retry_log(anchor_id)",
            "CREATE INDEX IF NOT EXISTS idx_indexed_events_created_at ON indexed_events(created_at)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Insert an anchor, or update the mutable fields of the existing row
    /// for the same `(digest, start_time, end_time)` window.
    ///
    /// Returns the persisted id and whether a new row was inserted. A
    /// returned id differing from `record.id` means a concurrent job won
    /// the window first.
    pub async fn upsert_anchor(&self, record: &AnchorRecord) -> Result<(Uuid, bool)> {
        let row = sqlx::query(
            r#"
            INSERT INTO anchors (
                id, digest, method, start_time, end_time, item_count,
                status, iota_block_id, iota_network, explorer_url,
                error_message, created_at, posted_at, confirmed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT (digest, start_time, end_time) DO UPDATE SET
                status = excluded.status,
                iota_block_id = excluded.iota_block_id,
                iota_network = excluded.iota_network,
                explorer_url = excluded.explorer_url,
                error_message = excluded.error_message,
                posted_at = excluded.posted_at,
                confirmed_at = excluded.confirmed_at
            RETURNING id
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.digest)
        .bind(&record.method)
        .bind(record.start_time.timestamp_millis())
        .bind(record.end_time.timestamp_millis())
        .bind(record.item_count)
        .bind(record.status.as_str())
        .bind(&record.block_id)
        .bind(&record.network)
        .bind(&record.explorer_url)
        .bind(&record.error_message)
        .bind(record.created_at.timestamp_millis())
        .bind(record.posted_at.map(|t| t.timestamp_millis()))
        .bind(record.confirmed_at.map(|t| t.timestamp_millis()))
        .fetch_one(&self.pool)
        .await?;

        let id = parse_uuid(&row.get::<String, _>(0))?;
        Ok((id, id == record.id))
    }

    pub async fn get_anchor(&self, id: Uuid) -> Result<Option<AnchorRecord>> {
        let row = sqlx::query(&format!("{ANCHOR_SELECT} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_anchor).transpose()
    }

    /// Look up the anchor covering exactly this digest and window.
    pub async fn find_anchor_by_window(
        &self,
        digest: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<AnchorRecord>> {
        let row = sqlx::query(&format!(
            "{ANCHOR_SELECT} WHERE digest = ?1 AND start_time = ?2 AND end_time = ?3"
        ))
        .bind(digest)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_anchor).transpose()
    }

    pub async fn list_anchors(
        &self,
        status: Option<AnchorStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnchorRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "{ANCHOR_SELECT} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ))
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "{ANCHOR_SELECT} ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_anchor).collect()
    }

    pub async fn count_anchors(&self, status: Option<AnchorStatus>) -> Result<i64> {
        let row = match status {
            Some(status) => {
                sqlx::query("SELECT COUNT(*) FROM anchors WHERE status = ?1")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) FROM anchors")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.get(0))
    }

    /// Atomically move an anchor to a new status, stamping `posted_at` on
    /// the transition to `posted` and `confirmed_at` on the transition to
    /// `confirmed`.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: AnchorStatus,
        block_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let id_text = id.to_string();

        let result = match status {
            AnchorStatus::Posted => {
                sqlx::query(
                    "UPDATE anchors SET status = ?1, \
                     iota_block_id = COALESCE(?2, iota_block_id), posted_at = ?3 \
                     WHERE id = ?4",
                )
                .bind(status.as_str())
                .bind(block_id)
                .bind(now)
                .bind(&id_text)
                .execute(&self.pool)
                .await?
            }
            AnchorStatus::Confirmed => {
                sqlx::query(
                    "UPDATE anchors SET status = ?1, \
                     iota_block_id = COALESCE(?2, iota_block_id), confirmed_at = ?3 \
                     WHERE id = ?4",
                )
                .bind(status.as_str())
                .bind(block_id)
                .bind(now)
                .bind(&id_text)
                .execute(&self.pool)
                .await?
            }
            AnchorStatus::Failed => {
                sqlx::query(
                    "UPDATE anchors SET status = ?1, \
                     error_message = COALESCE(?2, error_message) WHERE id = ?3",
                )
                .bind(status.as_str())
                .bind(error)
                .bind(&id_text)
                .execute(&self.pool)
                .await?
            }
            _ => {
                sqlx::query("UPDATE anchors SET status = ?1 WHERE id = ?2")
                    .bind(status.as_str())
                    .bind(&id_text)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("anchor {id}")));
        }
        Ok(())
    }

    /// Insert one anchor item if its `(anchor_id, position)` slot is still
    /// free. Returns whether a row was written.
    pub async fn save_item(&self, anchor_id: Uuid, item: &NewItem) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO anchor_items \
             (id, anchor_id, event_id, event_hash, position_in_merkle, merkle_proof, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(anchor_id.to_string())
        .bind(item.event_id.map(|id| id.to_string()))
        .bind(&item.event_hash)
        .bind(item.position)
        .bind(proof_json(item.proof_compact.as_deref()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a full item set in one transaction, committing once.
    /// Positions already written by an interrupted earlier run are skipped.
    pub async fn save_items(&self, anchor_id: Uuid, items: &[NewItem]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp_millis();
        let anchor_text = anchor_id.to_string();
        let mut written = 0u64;

        for item in items {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO anchor_items \
                 (id, anchor_id, event_id, event_hash, position_in_merkle, merkle_proof, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&anchor_text)
            .bind(item.event_id.map(|id| id.to_string()))
            .bind(&item.event_hash)
            .bind(item.position)
            .bind(proof_json(item.proof_compact.as_deref()))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Items of an anchor in ascending position, optionally filtered to a
    /// device (via the event the item references).
    pub async fn list_items(
        &self,
        anchor_id: Uuid,
        limit: i64,
        offset: i64,
        device_id: Option<&str>,
    ) -> Result<(Vec<AnchorItem>, i64)> {
        let anchor_text = anchor_id.to_string();

        let (rows, total) = match device_id {
            Some(device) => {
                let rows = sqlx::query(
                    "SELECT ai.id, ai.anchor_id, ai.event_id, ai.event_hash, \
                            ai.position_in_merkle, ai.merkle_proof, ai.created_at \
                     FROM anchor_items ai \
                     JOIN indexed_events e ON ai.event_id = e.id \
                     WHERE ai.anchor_id = ?1 AND e.device_id = ?2 \
                     ORDER BY ai.position_in_merkle \
                     LIMIT ?3 OFFSET ?4",
                )
                .bind(&anchor_text)
                .bind(device)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let count = sqlx::query(
                    "SELECT COUNT(*) FROM anchor_items ai \
                     JOIN indexed_events e ON ai.event_id = e.id \
                     WHERE ai.anchor_id = ?1 AND e.device_id = ?2",
                )
                .bind(&anchor_text)
                .bind(device)
                .fetch_one(&self.pool)
                .await?;
                (rows, count.get::<i64, _>(0))
            }
            None => {
                let rows = sqlx::query(
                    "SELECT id, anchor_id, event_id, event_hash, \
                            position_in_merkle, merkle_proof, created_at \
                     FROM anchor_items WHERE anchor_id = ?1 \
                     ORDER BY position_in_merkle LIMIT ?2 OFFSET ?3",
                )
                .bind(&anchor_text)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let count = sqlx::query("SELECT COUNT(*) FROM anchor_items WHERE anchor_id = ?1")
                    .bind(&anchor_text)
                    .fetch_one(&self.pool)
                    .await?;
                (rows, count.get::<i64, _>(0))
            }
        };

        let items = rows
            .into_iter()
            .map(row_to_item)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }

    /// First anchor item carrying this event hash, across all anchors.
    pub async fn find_item_by_hash(&self, event_hash: &str) -> Result<Option<AnchorItem>> {
        let row = sqlx::query(
            "SELECT id, anchor_id, event_id, event_hash, \
                    position_in_merkle, merkle_proof, created_at \
             FROM anchor_items WHERE event_hash = ?1 LIMIT 1",
        )
        .bind(event_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_item).transpose()
    }

    /// Item for this event hash inside one specific anchor.
    pub async fn find_item_in_anchor(
        &self,
        anchor_id: Uuid,
        event_hash: &str,
    ) -> Result<Option<AnchorItem>> {
        let row = sqlx::query(
            "SELECT id, anchor_id, event_id, event_hash, \
                    position_in_merkle, merkle_proof, created_at \
             FROM anchor_items WHERE anchor_id = ?1 AND event_hash = ?2 LIMIT 1",
        )
        .bind(anchor_id.to_string())
        .bind(event_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_item).transpose()
    }

    pub async fn record_retry(&self, anchor_id: Uuid, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO anchor_retry_log (id, anchor_id, created_at, error_message) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(anchor_id.to_string())
        .bind(Utc::now().timestamp_millis())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn retry_count(&self, anchor_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM anchor_retry_log WHERE anchor_id = ?1")
            .bind(anchor_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    pub async fn last_retry_at(&self, anchor_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT created_at FROM anchor_retry_log \
             WHERE anchor_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(anchor_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| ms_to_datetime(r.get(0))).transpose()
    }
}

const ANCHOR_SELECT: &str = "SELECT id, digest, method, start_time, end_time, item_count, \
     status, iota_block_id, iota_network, explorer_url, error_message, \
     created_at, posted_at, confirmed_at FROM anchors";

fn proof_json(proof: Option<&[String]>) -> Option<String> {
    proof.map(|p| serde_json::to_string(p).expect("string array serializes"))
}

pub(crate) fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|_| StoreError::Corrupt(format!("invalid uuid {text:?}")))
}

pub(crate) fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {ms}")))
}

fn row_to_anchor(row: sqlx::sqlite::SqliteRow) -> Result<AnchorRecord> {
    let status_text: String = row.get("status");
    let status = AnchorStatus::parse(&status_text)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status_text:?}")))?;

    Ok(AnchorRecord {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        digest: row.get("digest"),
        method: row.get("method"),
        start_time: ms_to_datetime(row.get("start_time"))?,
        end_time: ms_to_datetime(row.get("end_time"))?,
        item_count: row.get("item_count"),
        status,
        block_id: row.get("iota_block_id"),
        network: row.get("iota_network"),
        explorer_url: row.get("explorer_url"),
        error_message: row.get("error_message"),
        created_at: ms_to_datetime(row.get("created_at"))?,
        posted_at: row
            .get::<Option<i64>, _>("posted_at")
            .map(ms_to_datetime)
            .transpose()?,
        confirmed_at: row
            .get::<Option<i64>, _>("confirmed_at")
            .map(ms_to_datetime)
            .transpose()?,
    })
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<AnchorItem> {
    let proof_text: Option<String> = row.get("merkle_proof");
    let merkle_proof = proof_text
        .map(|text| {
            serde_json::from_str::<Vec<String>>(&text)
                .map_err(|e| StoreError::Corrupt(format!("invalid proof json: {e}")))
        })
        .transpose()?;

    Ok(AnchorItem {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        anchor_id: parse_uuid(&row.get::<String, _>("anchor_id"))?,
        event_id: row
            .get::<Option<String>, _>("event_id")
            .as_deref()
            .map(parse_uuid)
            .transpose()?,
        event_hash: row.get("event_hash"),
        position: row.get("position_in_merkle"),
        merkle_proof,
        created_at: ms_to_datetime(row.get("created_at"))?,
    })
}
