//! Read side of the anchoring pipeline: ordered event windows from the
//! indexer table, plus the watermark of the last successful anchor.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::store::{ms_to_datetime, parse_uuid, Result};

/// An indexed blockchain event as stored by the external indexer.
#[derive(Debug, Clone)]
pub struct IndexedEvent {
    pub id: Uuid,
    pub block_number: i64,
    pub block_hash: String,
    pub event_index: i64,
    pub pallet: String,
    pub event_name: String,
    pub event_hash: String,
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A half-open time window `[start, end)` of events, in anchoring order.
#[derive(Debug, Clone)]
pub struct EventWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub events: Vec<IndexedEvent>,
}

impl EventWindow {
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event hashes in leaf order.
    pub fn event_hashes(&self) -> Vec<String> {
        self.events.iter().map(|e| e.event_hash.clone()).collect()
    }
}

/// Reads indexed events; never writes them.
#[derive(Debug, Clone)]
pub struct EventConsumer {
    pool: Pool<Sqlite>,
}

const EVENT_SELECT: &str = "SELECT id, block_number, block_hash, event_index, \
     pallet, event_name, event_hash, device_id, created_at FROM indexed_events";

impl EventConsumer {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Events with `created_at ∈ [start, end)`, ordered by
    /// `(block_number, event_index)`, optionally restricted to a pallet set.
    pub async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pallets: Option<&[String]>,
    ) -> Result<EventWindow> {
        let rows = match pallets {
            Some(pallets) if !pallets.is_empty() => {
                let placeholders = (0..pallets.len())
                    .map(|i| format!("?{}", i + 3))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "{EVENT_SELECT} WHERE created_at >= ?1 AND created_at < ?2 \
                     AND pallet IN ({placeholders}) ORDER BY block_number, event_index"
                );

                let mut query = sqlx::query(&sql)
                    .bind(start.timestamp_millis())
                    .bind(end.timestamp_millis());
                for pallet in pallets {
                    query = query.bind(pallet);
                }
                query.fetch_all(&self.pool).await?
            }
            _ => {
                sqlx::query(&format!(
                    "{EVENT_SELECT} WHERE created_at >= ?1 AND created_at < ?2 \
                     ORDER BY block_number, event_index"
                ))
                .bind(start.timestamp_millis())
                .bind(end.timestamp_millis())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let events = rows
            .into_iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            count = events.len(),
            start = %start,
            end = %end,
            "fetched event window"
        );

        Ok(EventWindow {
            start_time: start,
            end_time: end,
            events,
        })
    }

    /// End of the most recent anchor in `posted` or `confirmed` status;
    /// the next window starts here.
    pub async fn last_anchor_end(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT end_time FROM anchors \
             WHERE status IN ('posted', 'confirmed') \
             ORDER BY end_time DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| ms_to_datetime(r.get(0))).transpose()
    }

    /// Number of events indexed since `since`.
    pub async fn event_count_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM indexed_events WHERE created_at >= ?1")
            .bind(since.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    /// Events whose hash does not yet appear in any anchor item.
    pub async fn fetch_unanchored(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<IndexedEvent>> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT e.id, e.block_number, e.block_hash, e.event_index, \
                            e.pallet, e.event_name, e.event_hash, e.device_id, e.created_at \
                     FROM indexed_events e \
                     LEFT JOIN anchor_items ai ON e.event_hash = ai.event_hash \
                     WHERE ai.id IS NULL AND e.created_at >= ?1 \
                     ORDER BY e.block_number, e.event_index LIMIT ?2",
                )
                .bind(since.timestamp_millis())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT e.id, e.block_number, e.block_hash, e.event_index, \
                            e.pallet, e.event_name, e.event_hash, e.device_id, e.created_at \
                     FROM indexed_events e \
                     LEFT JOIN anchor_items ai ON e.event_hash = ai.event_hash \
                     WHERE ai.id IS NULL \
                     ORDER BY e.block_number, e.event_index LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<IndexedEvent> {
    Ok(IndexedEvent {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        block_number: row.get("block_number"),
        block_hash: row.get("block_hash"),
        event_index: row.get("event_index"),
        pallet: row.get("pallet"),
        event_name: row.get("event_name"),
        event_hash: row.get("event_hash"),
        device_id: row.get("device_id"),
        timestamp: ms_to_datetime(row.get("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnchorRecord, AnchorStatus};
    use crate::store::{AnchorRepository, NewItem};
    use chrono::{Duration, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        AnchorRepository::new(pool.clone())
            .ensure_schema()
            .await
            .unwrap();
        pool
    }

    async fn insert_event(
        pool: &Pool<Sqlite>,
        block_number: i64,
        event_index: i64,
        pallet: &str,
        event_hash: &str,
        at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO indexed_events \
             (id, block_number, block_hash, event_index, pallet, event_name, \
              event_hash, device_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(id.to_string())
        .bind(block_number)
        .bind(format!("0xblock{block_number}"))
        .bind(event_index)
        .bind(pallet)
        .bind("Recorded")
        .bind(event_hash)
        .bind(Option::<String>::None)
        .bind(at.timestamp_millis())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    fn window_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn window_is_ordered_by_block_then_index() {
        let pool = test_pool().await;
        let consumer = EventConsumer::new(pool.clone());
        let start = window_start();

        // Inserted deliberately out of order.
        insert_event(&pool, 20, 0, "balances", &"cc".repeat(32), start + Duration::hours(3)).await;
        insert_event(&pool, 10, 1, "balances", &"bb".repeat(32), start + Duration::hours(2)).await;
        insert_event(&pool, 10, 0, "balances", &"aa".repeat(32), start + Duration::hours(1)).await;

        let window = consumer
            .fetch_window(start, start + Duration::days(1), None)
            .await
            .unwrap();

        let hashes = window.event_hashes();
        assert_eq!(hashes, vec!["aa".repeat(32), "bb".repeat(32), "cc".repeat(32)]);
        assert_eq!(window.event_count(), 3);
    }

    #[tokio::test]
    async fn window_bounds_are_half_open() {
        let pool = test_pool().await;
        let consumer = EventConsumer::new(pool.clone());
        let start = window_start();
        let end = start + Duration::days(1);

        insert_event(&pool, 1, 0, "balances", &"aa".repeat(32), start).await;
        insert_event(&pool, 2, 0, "balances", &"bb".repeat(32), end - Duration::milliseconds(1)).await;
        insert_event(&pool, 3, 0, "balances", &"cc".repeat(32), end).await;

        let window = consumer.fetch_window(start, end, None).await.unwrap();
        let hashes = window.event_hashes();

        // start inclusive, end exclusive
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains(&"aa".repeat(32)));
        assert!(!hashes.contains(&"cc".repeat(32)));
    }

    #[tokio::test]
    async fn pallet_filter_restricts_the_window() {
        let pool = test_pool().await;
        let consumer = EventConsumer::new(pool.clone());
        let start = window_start();

        insert_event(&pool, 1, 0, "balances", &"aa".repeat(32), start).await;
        insert_event(&pool, 1, 1, "system", &"bb".repeat(32), start).await;
        insert_event(&pool, 1, 2, "metering", &"cc".repeat(32), start).await;

        let window = consumer
            .fetch_window(
                start,
                start + Duration::days(1),
                Some(&["balances".to_string(), "metering".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(window.event_hashes(), vec!["aa".repeat(32), "cc".repeat(32)]);
    }

    #[tokio::test]
    async fn last_anchor_end_ignores_unposted_anchors() {
        let pool = test_pool().await;
        let repo = AnchorRepository::new(pool.clone());
        let consumer = EventConsumer::new(pool);
        let start = window_start();

        assert!(consumer.last_anchor_end().await.unwrap().is_none());

        let mut failed = AnchorRecord::new(&"aa".repeat(32), 1, start, start + Duration::days(2));
        failed.status = AnchorStatus::Failed;
        repo.upsert_anchor(&failed).await.unwrap();
        assert!(consumer.last_anchor_end().await.unwrap().is_none());

        let mut posted = AnchorRecord::new(&"bb".repeat(32), 1, start, start + Duration::days(1));
        posted.status = AnchorStatus::Posted;
        repo.upsert_anchor(&posted).await.unwrap();

        let watermark = consumer.last_anchor_end().await.unwrap().unwrap();
        assert_eq!(watermark, start + Duration::days(1));
    }

    #[tokio::test]
    async fn event_count_since_counts_from_the_bound() {
        let pool = test_pool().await;
        let consumer = EventConsumer::new(pool.clone());
        let start = window_start();

        insert_event(&pool, 1, 0, "balances", &"aa".repeat(32), start - Duration::hours(1)).await;
        insert_event(&pool, 2, 0, "balances", &"bb".repeat(32), start + Duration::hours(1)).await;

        assert_eq!(consumer.event_count_since(start).await.unwrap(), 1);
        assert_eq!(
            consumer
                .event_count_since(start - Duration::days(1))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn unanchored_events_exclude_already_anchored_hashes() {
        let pool = test_pool().await;
        let repo = AnchorRepository::new(pool.clone());
        let consumer = EventConsumer::new(pool.clone());
        let start = window_start();

        let anchored_hash = "aa".repeat(32);
        insert_event(&pool, 1, 0, "balances", &anchored_hash, start).await;
        insert_event(&pool, 2, 0, "balances", &"bb".repeat(32), start).await;

        let anchor = AnchorRecord::new(&"dd".repeat(32), 1, start, start + Duration::days(1));
        repo.upsert_anchor(&anchor).await.unwrap();
        repo.save_item(
            anchor.id,
            &NewItem {
                event_id: None,
                event_hash: anchored_hash,
                position: 0,
                proof_compact: None,
            },
        )
        .await
        .unwrap();

        let unanchored = consumer.fetch_unanchored(None, 100).await.unwrap();
        assert_eq!(unanchored.len(), 1);
        assert_eq!(unanchored[0].event_hash, "bb".repeat(32));
    }
}
