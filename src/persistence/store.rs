//! SQLite-based persistence store

use crate::core::ExecutionStatus;
use crate::persistence::{BuildSummary, PersistenceBackend, StageRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const COLUMNS: &str = "build_id, execution_id, pipeline_name, status, started_at, completed_at, \
                       completed_stages, failed_stages, total_stages, stages";

/// SQLite build store
pub struct SqliteBuildStore {
    pool: SqlitePool,
}

impl SqliteBuildStore {
    /// Open (or create) the database at `db_path`; `:memory:` for a
    /// throwaway store
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = if db_path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };

        // A single connection keeps `:memory:` databases alive and shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("pyci");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::open(&db_dir.join("history.db")).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        Self::new(&path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS builds (
                build_id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                completed_stages INTEGER NOT NULL DEFAULT 0,
                failed_stages INTEGER NOT NULL DEFAULT 0,
                total_stages INTEGER NOT NULL DEFAULT 0,
                stages TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_pipeline_name ON builds(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_started_at ON builds(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<BuildSummary> {
        let status: String = row.get("status");
        let stages: String = row.get("stages");
        let stages: Vec<StageRecord> =
            serde_json::from_str(&stages).context("Corrupt stage list in history")?;

        Ok(BuildSummary {
            build_id: row.get("build_id"),
            execution_id: Uuid::parse_str(&row.get::<String, _>("execution_id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: ExecutionStatus::from_label(&status).unwrap_or(ExecutionStatus::Pending),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            completed_stages: row.get::<i64, _>("completed_stages") as usize,
            failed_stages: row.get::<i64, _>("failed_stages") as usize,
            total_stages: row.get::<i64, _>("total_stages") as usize,
            stages,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteBuildStore {
    async fn save_build(&self, build: &BuildSummary) -> Result<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO builds ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            COLUMNS
        ))
        .bind(&build.build_id)
        .bind(build.execution_id.to_string())
        .bind(&build.pipeline_name)
        .bind(format!("{:?}", build.status))
        .bind(Self::to_naive(build.started_at))
        .bind(build.completed_at.map(Self::to_naive))
        .bind(build.completed_stages as i64)
        .bind(build.failed_stages as i64)
        .bind(build.total_stages as i64)
        .bind(serde_json::to_string(&build.stages)?)
        .execute(&self.pool)
        .await
        .context("Failed to save build")?;

        Ok(())
    }

    async fn load_build(&self, build_id: &str) -> Result<Option<BuildSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM builds WHERE build_id = ?1", COLUMNS))
            .bind(build_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load build")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_builds(&self, pipeline_name: &str) -> Result<Vec<BuildSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM builds WHERE pipeline_name = ?1 ORDER BY started_at DESC, build_id DESC",
            COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list builds")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM builds
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }

    async fn prune(&self, pipeline_name: &str, keep: usize) -> Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM builds
            WHERE pipeline_name = ?1
              AND build_id NOT IN (
                SELECT build_id FROM builds
                WHERE pipeline_name = ?1
                ORDER BY started_at DESC, build_id DESC
                LIMIT ?2
              )
            "#,
        )
        .bind(pipeline_name)
        .bind((keep + 1) as i64)
        .execute(&self.pool)
        .await
        .context("Failed to prune history")?;

        Ok(result.rows_affected() as usize)
    }
}
