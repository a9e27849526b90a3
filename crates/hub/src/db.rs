use anyhow::{Context, Result};
use farming_common::{IrrigationLog, SensorLog};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// A `devices` row. `last_seen` is unix milliseconds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceRow {
    pub id: i64,
    pub device_code: String,
    pub pump_status: bool,
    pub duration: i64,
    pub last_seen: i64,
}

impl DeviceRow {
    pub fn last_seen_at(&self) -> OffsetDateTime {
        from_millis(self.last_seen)
    }
}

pub fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/farming/farming.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Every connection to ":memory:" is its own database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Devices
    // ----------------------------

    /// Create the device if it does not exist yet. An existing row keeps its
    /// pump state, duration and last-seen time.
    pub async fn provision_device(
        &self,
        device_code: &str,
        duration: i64,
        now: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_code, pump_status, duration, last_seen)
            VALUES (?, 0, ?, ?)
            ON CONFLICT(device_code) DO NOTHING
            "#,
        )
        .bind(device_code)
        .bind(duration)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .context("provision_device failed")?;
        Ok(())
    }

    pub async fn load_devices(&self) -> Result<Vec<DeviceRow>> {
        sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, device_code, pump_status, duration, last_seen
            FROM devices
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_devices failed")
    }

    pub async fn device_by_code(&self, device_code: &str) -> Result<Option<DeviceRow>> {
        sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, device_code, pump_status, duration, last_seen
            FROM devices
            WHERE device_code = ?
            "#,
        )
        .bind(device_code)
        .fetch_optional(&self.pool)
        .await
        .context("device_by_code failed")
    }

    /// Persist an accepted pump command. Turning the pump on stamps the cycle
    /// start into `last_seen` and appends an irrigation log; both writes
    /// commit or neither does. Turning it off leaves `last_seen` alone.
    pub async fn apply_command(
        &self,
        device_id: i64,
        pump_status: bool,
        duration: i64,
        now: OffsetDateTime,
    ) -> Result<()> {
        let at = to_millis(now);
        let mut tx = self.pool.begin().await.context("apply_command: begin failed")?;

        sqlx::query(
            r#"
            UPDATE devices
            SET pump_status = ?, duration = ?,
                last_seen = CASE WHEN ? THEN ? ELSE last_seen END
            WHERE id = ?
            "#,
        )
        .bind(pump_status)
        .bind(duration)
        .bind(pump_status)
        .bind(at)
        .bind(device_id)
        .execute(&mut *tx)
        .await
        .context("apply_command: device update failed")?;

        if pump_status {
            sqlx::query(
                r#"
                INSERT INTO irrigation_logs (device_id, duration, created_at)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(device_id)
            .bind(duration)
            .bind(at)
            .execute(&mut *tx)
            .await
            .context("apply_command: irrigation log insert failed")?;
        }

        tx.commit().await.context("apply_command: commit failed")?;
        Ok(())
    }

    /// The device reported its own pump state (typically OFF at cycle end).
    pub async fn record_pump_report(
        &self,
        device_id: i64,
        pump_status: bool,
        now: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE devices
            SET pump_status = ?, last_seen = ?
            WHERE id = ?
            "#,
        )
        .bind(pump_status)
        .bind(to_millis(now))
        .bind(device_id)
        .execute(&self.pool)
        .await
        .context("record_pump_report failed")?;
        Ok(())
    }

    /// Heartbeat. While a cycle runs `last_seen` holds the cycle start and is
    /// left alone. A cycle whose run time has elapsed is closed here, so a
    /// lost OFF report cannot keep the pump marked on.
    pub async fn heartbeat(&self, device_id: i64, now: OffsetDateTime) -> Result<bool> {
        let at = to_millis(now);
        let res = sqlx::query(
            r#"
            UPDATE devices
            SET last_seen = ?, pump_status = 0
            WHERE id = ?
              AND (pump_status = 0 OR last_seen + duration * 1000 <= ?)
            "#,
        )
        .bind(at)
        .bind(device_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("heartbeat failed")?;
        Ok(res.rows_affected() > 0)
    }

    // ----------------------------
    // Sensor logs
    // ----------------------------

    pub async fn insert_sensor_log(
        &self,
        device_id: i64,
        temperature: f64,
        humidity: f64,
        soil_moisture: f64,
        now: OffsetDateTime,
    ) -> Result<SensorLog> {
        let at = to_millis(now);
        sqlx::query(
            r#"
            INSERT INTO sensor_logs (device_id, temperature, humidity, soil_moisture, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(temperature)
        .bind(humidity)
        .bind(soil_moisture)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("insert_sensor_log failed")?;

        Ok(SensorLog {
            temperature,
            humidity,
            soil_moisture,
            created_at: from_millis(at),
        })
    }

    /// Newest first.
    pub async fn recent_sensor_logs(&self, device_id: i64, limit: i64) -> Result<Vec<SensorLog>> {
        let rows: Vec<(f64, f64, f64, i64)> = sqlx::query_as(
            r#"
            SELECT temperature, humidity, soil_moisture, created_at
            FROM sensor_logs
            WHERE device_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_sensor_logs failed")?;

        Ok(rows
            .into_iter()
            .map(|(temperature, humidity, soil_moisture, created_at)| SensorLog {
                temperature,
                humidity,
                soil_moisture,
                created_at: from_millis(created_at),
            })
            .collect())
    }

    // ----------------------------
    // Irrigation logs
    // ----------------------------

    /// Newest first.
    pub async fn recent_irrigation_logs(
        &self,
        device_id: i64,
        limit: i64,
    ) -> Result<Vec<IrrigationLog>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, duration, created_at
            FROM irrigation_logs
            WHERE device_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_irrigation_logs failed")?;

        Ok(rows
            .into_iter()
            .map(|(id, duration, created_at)| IrrigationLog {
                id,
                duration,
                created_at: from_millis(created_at),
            })
            .collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2025-06-01 12:00:00 UTC);

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.provision_device("FARM-001", 5, T0).await.unwrap();
        db
    }

    async fn farm(db: &Db) -> DeviceRow {
        db.device_by_code("FARM-001").await.unwrap().unwrap()
    }

    #[test]
    fn millis_conversion_keeps_precision() {
        let at = datetime!(2025-06-01 12:00:00.123 UTC);
        assert_eq!(from_millis(to_millis(at)), at);
    }

    #[tokio::test]
    async fn provision_creates_idle_device() {
        let db = test_db().await;
        let d = farm(&db).await;
        assert!(!d.pump_status);
        assert_eq!(d.duration, 5);
        assert_eq!(d.last_seen_at(), T0);
    }

    #[tokio::test]
    async fn provision_twice_keeps_existing_state() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        db.apply_command(id, true, 30, T0).await.unwrap();

        db.provision_device("FARM-001", 5, T0 + time::Duration::hours(1))
            .await
            .unwrap();

        let d = farm(&db).await;
        assert!(d.pump_status);
        assert_eq!(d.duration, 30);
        assert_eq!(db.load_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_device_is_none() {
        let db = test_db().await;
        assert!(db.device_by_code("FARM-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pump_on_command_appends_irrigation_log() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        let at = T0 + time::Duration::seconds(10);

        db.apply_command(id, true, 45, at).await.unwrap();

        let d = farm(&db).await;
        assert!(d.pump_status);
        assert_eq!(d.duration, 45);
        assert_eq!(d.last_seen_at(), at);

        let logs = db.recent_irrigation_logs(id, 20).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].duration, 45);
        assert_eq!(logs[0].created_at, at);
    }

    #[tokio::test]
    async fn pump_off_command_writes_no_log() {
        let db = test_db().await;
        let before = farm(&db).await;

        db.apply_command(before.id, false, 5, T0 + time::Duration::minutes(3))
            .await
            .unwrap();

        assert!(db.recent_irrigation_logs(before.id, 20).await.unwrap().is_empty());
        assert_eq!(farm(&db).await.last_seen_at(), before.last_seen_at());
    }

    #[tokio::test]
    async fn heartbeat_skips_running_pump() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        let start = T0 + time::Duration::seconds(5);
        db.apply_command(id, true, 60, start).await.unwrap();

        let touched = db
            .heartbeat(id, start + time::Duration::seconds(10))
            .await
            .unwrap();

        assert!(!touched);
        let d = farm(&db).await;
        assert!(d.pump_status);
        assert_eq!(d.last_seen_at(), start);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_idle_device() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        let later = T0 + time::Duration::seconds(30);

        assert!(db.heartbeat(id, later).await.unwrap());
        assert_eq!(farm(&db).await.last_seen_at(), later);
    }

    #[tokio::test]
    async fn heartbeat_closes_elapsed_cycle() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        db.apply_command(id, true, 30, T0).await.unwrap();

        // Exactly at the end of the run time counts as finished.
        let end = T0 + time::Duration::seconds(30);
        assert!(db.heartbeat(id, end).await.unwrap());

        let d = farm(&db).await;
        assert!(!d.pump_status);
        assert_eq!(d.last_seen_at(), end);
        assert_eq!(d.duration, 30);
    }

    #[tokio::test]
    async fn pump_report_ends_cycle() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        db.apply_command(id, true, 10, T0).await.unwrap();

        let end = T0 + time::Duration::seconds(10);
        db.record_pump_report(id, false, end).await.unwrap();

        let d = farm(&db).await;
        assert!(!d.pump_status);
        assert_eq!(d.last_seen_at(), end);
        assert_eq!(db.recent_irrigation_logs(id, 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sensor_logs_newest_first_and_limited() {
        let db = test_db().await;
        let id = farm(&db).await.id;
        for i in 0..12 {
            db.insert_sensor_log(id, 20.0 + i as f64, 50.0, 2000.0, T0 + time::Duration::seconds(i))
                .await
                .unwrap();
        }

        let logs = db.recent_sensor_logs(id, 10).await.unwrap();
        assert_eq!(logs.len(), 10);
        assert_eq!(logs[0].temperature, 31.0);
        assert_eq!(logs[9].temperature, 22.0);
    }
}
