use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::time::Duration;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sensor_readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    system_timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    measurement_time REAL NOT NULL,
    value REAL NOT NULL
)
"#;

/// A persisted reading. Rows are append-only; `id` totally orders them and
/// breaks ties for "latest per topic".
#[derive(Debug, Clone, FromRow)]
pub struct StoredReading {
    pub id: i64,
    pub topic: String,
    pub system_timestamp: DateTime<Utc>,
    pub measurement_time: f64,
    pub value: f64,
}

/// A reading accepted by the ingestor but not yet assigned an `id`.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub topic: String,
    pub system_timestamp: DateTime<Utc>,
    pub measurement_time: f64,
    pub value: f64,
}

/// Append-only SQLite table of sensor readings. WAL mode lets reads run
/// concurrently with the single writer without ever observing a partial row.
#[derive(Clone)]
pub struct ReadingsStore {
    pool: SqlitePool,
}

impl ReadingsStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Appends one row and returns its assigned id.
    pub async fn append(&self, reading: &NewReading) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sensor_readings (topic, system_timestamp, measurement_time, value)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(&reading.topic)
        .bind(reading.system_timestamp)
        .bind(reading.measurement_time)
        .bind(reading.value)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// The highest-id row for each distinct topic, ordered by topic.
    pub async fn latest_per_topic(&self) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query_as::<_, StoredReading>(
            r#"
            SELECT r.id, r.topic, r.system_timestamp, r.measurement_time, r.value
            FROM sensor_readings r
            JOIN (
                SELECT topic, MAX(id) AS id FROM sensor_readings GROUP BY topic
            ) latest ON r.id = latest.id
            ORDER BY r.topic
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The `limit` highest-id rows, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query_as::<_, StoredReading>(
            r#"
            SELECT id, topic, system_timestamp, measurement_time, value
            FROM sensor_readings
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sensor_readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> ReadingsStore {
        ReadingsStore::open(&dir.path().join("readings.db"))
            .await
            .unwrap()
    }

    fn reading(topic: &str, value: f64) -> NewReading {
        NewReading {
            topic: topic.to_string(),
            system_timestamp: Utc::now(),
            measurement_time: 1700000000.0,
            value,
        }
    }

    #[tokio::test]
    async fn append_assigns_monotonic_ids() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let first = store.append(&reading("sensors/temperature", 21.0)).await.unwrap();
        let second = store.append(&reading("sensors/temperature", 22.0)).await.unwrap();
        let third = store.append(&reading("sensors/humidity", 55.0)).await.unwrap();
        assert!(first < second && second < third);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn latest_per_topic_picks_highest_id() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        // Topic A at ids 1 and 3, topic B at id 2.
        store.append(&reading("sensors/temperature", 21.0)).await.unwrap();
        store.append(&reading("sensors/humidity", 55.0)).await.unwrap();
        let latest_temp = store.append(&reading("sensors/temperature", 23.5)).await.unwrap();

        let latest = store.latest_per_topic().await.unwrap();
        assert_eq!(latest.len(), 2);
        let humidity = latest.iter().find(|r| r.topic == "sensors/humidity").unwrap();
        let temperature = latest
            .iter()
            .find(|r| r.topic == "sensors/temperature")
            .unwrap();
        assert_eq!(humidity.value, 55.0);
        assert_eq!(temperature.id, latest_temp);
        assert_eq!(temperature.value, 23.5);
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        for i in 0..5 {
            store
                .append(&reading("sensors/temperature", 20.0 + i as f64))
                .await
                .unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id > recent[1].id);
        assert_eq!(recent[0].value, 24.0);
        assert_eq!(recent[1].value, 23.0);
    }

    #[tokio::test]
    async fn duplicate_rows_are_both_kept() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let row = reading("sensors/temperature", 25.0);
        store.append(&row).await.unwrap();
        store.append(&row).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
