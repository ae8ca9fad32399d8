//! libSQL storage layer (local file, offline).
//!
//! The [`Storage`] struct wraps a libSQL database holding the on-disk
//! embedding cache and the history of ingestion runs.
//!
//! The cache is keyed by `(chunk_id, model)`. Concurrent pipeline runs
//! writing the same database may interleave; the last write for a key wins.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use rulevault_shared::{Result, RuleVaultError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn storage_err(e: impl std::fmt::Display) -> RuleVaultError {
    RuleVaultError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RuleVaultError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reads only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RuleVaultError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RuleVaultError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RuleVaultError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Embedding cache
    // -----------------------------------------------------------------------

    /// Cached vector for a chunk id under `model`.
    pub async fn get_embedding(&self, chunk_id: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT vector_json FROM embedding_cache WHERE chunk_id = ?1 AND model = ?2",
                params![chunk_id, model],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let json: String = row.get(0).map_err(storage_err)?;
                let vector = serde_json::from_str(&json)
                    .map_err(|e| RuleVaultError::Storage(format!("corrupt cached vector: {e}")))?;
                Ok(Some(vector))
            }
            None => Ok(None),
        }
    }

    /// Store (or replace) a vector for a chunk id under `model`.
    pub async fn put_embedding(&self, chunk_id: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.check_writable()?;
        let json = serde_json::to_string(vector).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO embedding_cache (chunk_id, model, dimension, vector_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chunk_id, model) DO UPDATE SET
                   dimension = excluded.dimension,
                   vector_json = excluded.vector_json,
                   created_at = excluded.created_at",
                params![chunk_id, model, vector.len() as i64, json.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Number of cached vectors, optionally only those for `model`.
    pub async fn count_embeddings(&self, model: Option<&str>) -> Result<u64> {
        let mut rows = match model {
            Some(model) => {
                self.conn
                    .query(
                        "SELECT COUNT(*) FROM embedding_cache WHERE model = ?1",
                        params![model],
                    )
                    .await
            }
            None => {
                self.conn
                    .query("SELECT COUNT(*) FROM embedding_cache", params![])
                    .await
            }
        }
        .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Delete cached vectors for `model`, or all of them. Returns rows removed.
    pub async fn clear_embeddings(&self, model: Option<&str>) -> Result<u64> {
        self.check_writable()?;
        let removed = match model {
            Some(model) => {
                self.conn
                    .execute("DELETE FROM embedding_cache WHERE model = ?1", params![model])
                    .await
            }
            None => {
                self.conn
                    .execute("DELETE FROM embedding_cache", params![])
                    .await
            }
        }
        .map_err(storage_err)?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Ingestion runs
    // -----------------------------------------------------------------------

    /// Record the start of an ingestion run. Returns the generated run id.
    pub async fn insert_ingest_run(
        &self,
        pdf_path: &str,
        game_system: &str,
        book_name: Option<&str>,
        version: Option<&str>,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingest_runs (id, pdf_path, game_system, book_name, version, started_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.as_str(),
                    pdf_path,
                    game_system,
                    book_name,
                    version,
                    now.as_str(),
                    RunStatus::Running.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a run completed and attach its report.
    pub async fn finish_ingest_run(&self, run_id: &str, report_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE ingest_runs SET finished_at = ?1, status = ?2, report_json = ?3 WHERE id = ?4",
                params![now.as_str(), RunStatus::Completed.as_str(), report_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run failed at `stage`.
    pub async fn fail_ingest_run(&self, run_id: &str, stage: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE ingest_runs SET finished_at = ?1, status = ?2, failed_stage = ?3 WHERE id = ?4",
                params![now.as_str(), RunStatus::Failed.as_str(), stage, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first, optionally for one game system.
    pub async fn list_ingest_runs(
        &self,
        game_system: Option<&str>,
        limit: u32,
    ) -> Result<Vec<IngestRun>> {
        let select = "SELECT id, pdf_path, game_system, book_name, version, started_at,
                             finished_at, status, failed_stage, report_json
                      FROM ingest_runs";
        let mut rows = match game_system {
            Some(system) => {
                self.conn
                    .query(
                        &format!("{select} WHERE game_system = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2"),
                        params![system, limit],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("{select} ORDER BY started_at DESC, id DESC LIMIT ?1"),
                        params![limit],
                    )
                    .await
            }
        }
        .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            runs.push(row_to_ingest_run(&row)?);
        }
        Ok(runs)
    }
}

/// Lifecycle state of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(RuleVaultError::Storage(format!("unknown run status '{other}'"))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRun {
    pub id: String,
    pub pdf_path: String,
    pub game_system: String,
    pub book_name: Option<String>,
    pub version: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub failed_stage: Option<String>,
    pub report_json: Option<String>,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RuleVaultError::Storage(format!("invalid date: {e}")))
}

fn row_to_ingest_run(row: &libsql::Row) -> Result<IngestRun> {
    let started: String = row.get(5).map_err(storage_err)?;
    let status: String = row.get(7).map_err(storage_err)?;
    let finished_at = match row.get::<String>(6).ok() {
        Some(s) => Some(parse_time(&s)?),
        None => None,
    };

    Ok(IngestRun {
        id: row.get(0).map_err(storage_err)?,
        pdf_path: row.get(1).map_err(storage_err)?,
        game_system: row.get(2).map_err(storage_err)?,
        book_name: row.get::<String>(3).ok(),
        version: row.get::<String>(4).ok(),
        started_at: parse_time(&started)?,
        finished_at,
        status: RunStatus::parse(&status)?,
        failed_stage: row.get::<String>(8).ok(),
        report_json: row.get::<String>(9).ok(),
    })
}
