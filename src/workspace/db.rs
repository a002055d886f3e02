use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter,
};

use super::models::*;
use crate::errors::StorageError;

/// Async-safe handle to the workspace database.
///
/// Wraps `WorkspaceDb` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool. The mutex also serializes metadata writes, so version
/// assignment never races inside one process.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<WorkspaceDb>>,
}

impl DbHandle {
    pub fn new(db: WorkspaceDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&WorkspaceDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| anyhow::Error::from(StorageError::LockPoisoned))?;
            f(&guard)
        })
        .await
        .context("Workspace DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup code and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, WorkspaceDb>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::Error::from(StorageError::LockPoisoned))
    }
}

/// Column list shared by every artifact query; order matches `read_artifact_row`.
const ARTIFACT_COLUMNS: &str = "artifact_id, artifact_type, status, creator, created_at, updated_at, updated_by, version, parent_id, execution_id, tags, checksum";

const EXECUTION_COLUMNS: &str = "execution_id, project_name, domain, status, quality_score, iteration_count, started_at, completed_at, error_message, input_digest";

/// Metadata for a new artifact row. Version is assigned on insert.
#[derive(Debug, Clone)]
pub struct ArtifactInsert {
    pub id: String,
    pub artifact_type: ArtifactType,
    pub status: ArtifactStatus,
    pub creator: String,
    pub execution_id: Option<String>,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub checksum: String,
    pub content_path: String,
    pub created_at: DateTime<Utc>,
}

pub struct WorkspaceDb {
    conn: Connection,
}

impl WorkspaceDb {
    /// Open (or create) the workspace database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open workspace database: {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS artifacts (
                    artifact_id TEXT PRIMARY KEY,
                    artifact_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'draft',
                    creator TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    updated_by TEXT,
                    version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
                    parent_id TEXT REFERENCES artifacts(artifact_id),
                    execution_id TEXT,
                    tags TEXT NOT NULL DEFAULT '[]',
                    checksum TEXT NOT NULL,
                    content_path TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS executions (
                    execution_id TEXT PRIMARY KEY,
                    project_name TEXT NOT NULL,
                    domain TEXT NOT NULL,
                    status TEXT NOT NULL,
                    quality_score REAL NOT NULL DEFAULT 0,
                    iteration_count INTEGER NOT NULL DEFAULT 0,
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    error_message TEXT,
                    input_digest TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_artifacts_type_execution ON artifacts(artifact_type, execution_id);
                CREATE INDEX IF NOT EXISTS idx_artifacts_created_at ON artifacts(created_at);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_artifacts_parent ON artifacts(parent_id) WHERE parent_id IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at);
                ",
            )
            .context("Failed to create workspace tables")?;
        Ok(())
    }

    // ── Artifacts ─────────────────────────────────────────────────────

    /// Insert artifact metadata, assigning its version from the parent.
    ///
    /// Runs inside an IMMEDIATE transaction: the parent lookup, the
    /// one-child-per-parent check and the insert see a consistent snapshot
    /// even when another process shares the database file.
    pub fn insert_artifact(&self, insert: ArtifactInsert) -> Result<ArtifactMetadata> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin artifact transaction")?;

        let version = match insert.parent_id.as_deref() {
            Some(parent_id) => {
                let parent_version: Option<u32> = tx
                    .query_row(
                        "SELECT version FROM artifacts WHERE artifact_id = ?1",
                        params![parent_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .context("Failed to look up parent artifact")?;
                let Some(parent_version) = parent_version else {
                    return Err(StorageError::ParentNotFound {
                        id: parent_id.to_string(),
                    }
                    .into());
                };
                let children: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM artifacts WHERE parent_id = ?1",
                        params![parent_id],
                        |row| row.get(0),
                    )
                    .context("Failed to count parent children")?;
                if children > 0 {
                    return Err(StorageError::VersionConflict {
                        parent_id: parent_id.to_string(),
                    }
                    .into());
                }
                parent_version + 1
            }
            None => 1,
        };

        let tags = serde_json::to_string(&insert.tags).context("Failed to encode tags")?;
        let created_at = format_timestamp(&insert.created_at);
        tx.execute(
            "INSERT INTO artifacts (artifact_id, artifact_type, status, creator, created_at, updated_at, version, parent_id, execution_id, tags, checksum, content_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                insert.id,
                insert.artifact_type.as_str(),
                insert.status.as_str(),
                insert.creator,
                created_at,
                version,
                insert.parent_id,
                insert.execution_id,
                tags,
                insert.checksum,
                insert.content_path,
            ],
        )
        .context("Failed to insert artifact")?;
        tx.commit().context("Failed to commit artifact insert")?;

        Ok(ArtifactMetadata {
            id: insert.id,
            artifact_type: insert.artifact_type,
            status: insert.status,
            creator: insert.creator,
            created_at: insert.created_at,
            updated_at: insert.created_at,
            updated_by: None,
            version,
            parent_id: insert.parent_id,
            execution_id: insert.execution_id,
            tags: insert.tags,
            checksum: insert.checksum,
        })
    }

    pub fn get_artifact(&self, id: &str) -> Result<Option<ArtifactMetadata>> {
        let sql = format!(
            "SELECT {} FROM artifacts WHERE artifact_id = ?1",
            ARTIFACT_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![id], read_artifact_row)
            .optional()
            .context("Failed to query artifact")?;
        row.map(ArtifactRow::into_metadata).transpose()
    }

    pub fn artifact_exists(&self, id: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE artifact_id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to check artifact existence")
    }

    /// Highest version of `artifact_type`, newest `created_at` on ties.
    /// With no execution id the search spans all executions.
    pub fn latest_artifact(
        &self,
        artifact_type: ArtifactType,
        execution_id: Option<&str>,
    ) -> Result<Option<ArtifactMetadata>> {
        let sql = format!(
            "SELECT {} FROM artifacts
             WHERE artifact_type = ?1 AND (?2 IS NULL OR execution_id = ?2)
             ORDER BY version DESC, created_at DESC, rowid DESC
             LIMIT 1",
            ARTIFACT_COLUMNS
        );
        let row = self
            .conn
            .query_row(
                &sql,
                params![artifact_type.as_str(), execution_id],
                read_artifact_row,
            )
            .optional()
            .context("Failed to query latest artifact")?;
        row.map(ArtifactRow::into_metadata).transpose()
    }

    /// List artifacts matching the filter, newest first.
    pub fn list_artifacts(&self, filter: &ArtifactFilter) -> Result<Vec<ArtifactMetadata>> {
        let mut sql = format!("SELECT {} FROM artifacts WHERE 1 = 1", ARTIFACT_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        let mut push = |column: &str, value: String| {
            values.push(value);
            sql.push_str(&format!(" AND {} = ?{}", column, values.len()));
        };
        if let Some(ty) = filter.artifact_type {
            push("artifact_type", ty.as_str().to_string());
        }
        if let Some(ref exec) = filter.execution_id {
            push("execution_id", exec.clone());
        }
        if let Some(ref creator) = filter.creator {
            push("creator", creator.clone());
        }
        if let Some(status) = filter.status {
            push("status", status.as_str().to_string());
        }

        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_artifacts")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), read_artifact_row)
            .context("Failed to query artifacts")?;
        let mut artifacts = Vec::new();
        for row in rows {
            let r = row.context("Failed to read artifact row")?;
            artifacts.push(r.into_metadata()?);
        }
        Ok(artifacts)
    }

    /// Every artifact of one execution, latest version first within each type.
    pub fn artifacts_for_execution(&self, execution_id: &str) -> Result<Vec<ArtifactMetadata>> {
        let sql = format!(
            "SELECT {} FROM artifacts WHERE execution_id = ?1
             ORDER BY artifact_type, version DESC, created_at DESC, rowid DESC",
            ARTIFACT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare artifacts_for_execution")?;
        let rows = stmt
            .query_map(params![execution_id], read_artifact_row)
            .context("Failed to query execution artifacts")?;
        let mut artifacts = Vec::new();
        for row in rows {
            let r = row.context("Failed to read artifact row")?;
            artifacts.push(r.into_metadata()?);
        }
        Ok(artifacts)
    }

    /// Rewrite checksum and audit fields after an in-place content update.
    /// Returns false when the artifact does not exist.
    pub fn update_artifact_content(
        &self,
        id: &str,
        checksum: &str,
        updated_by: &str,
        status: Option<ArtifactStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE artifacts
                 SET checksum = ?1, updated_by = ?2, updated_at = ?3, status = COALESCE(?4, status)
                 WHERE artifact_id = ?5",
                params![
                    checksum,
                    updated_by,
                    format_timestamp(&now),
                    status.map(|s| s.as_str()),
                    id
                ],
            )
            .context("Failed to update artifact")?;
        Ok(count > 0)
    }

    pub fn set_artifact_status(
        &self,
        id: &str,
        status: ArtifactStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE artifacts SET status = ?1, updated_at = ?2 WHERE artifact_id = ?3",
                params![status.as_str(), format_timestamp(&now), id],
            )
            .context("Failed to update artifact status")?;
        Ok(count > 0)
    }

    /// Mark every artifact of an execution as archived. Returns rows changed.
    pub fn archive_execution(&self, execution_id: &str, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE artifacts SET status = 'archived', updated_at = ?1
                 WHERE execution_id = ?2 AND status != 'archived'",
                params![format_timestamp(&now), execution_id],
            )
            .context("Failed to archive execution artifacts")
    }

    /// Physically delete an artifact row. Refuses while another artifact
    /// names it as parent.
    pub fn delete_artifact(&self, id: &str) -> Result<bool> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin delete transaction")?;
        let referenced: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE parent_id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to check artifact references")?;
        if referenced {
            return Err(StorageError::Referenced { id: id.to_string() }.into());
        }
        let count = tx
            .execute("DELETE FROM artifacts WHERE artifact_id = ?1", params![id])
            .context("Failed to delete artifact")?;
        tx.commit().context("Failed to commit artifact delete")?;
        Ok(count > 0)
    }

    /// Archived artifacts created before `cutoff`, children before parents.
    pub fn archived_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ArtifactMetadata>> {
        let sql = format!(
            "SELECT {} FROM artifacts WHERE status = 'archived' AND created_at < ?1
             ORDER BY version DESC, created_at DESC",
            ARTIFACT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare archived_before")?;
        let rows = stmt
            .query_map(params![format_timestamp(&cutoff)], read_artifact_row)
            .context("Failed to query archived artifacts")?;
        let mut artifacts = Vec::new();
        for row in rows {
            let r = row.context("Failed to read artifact row")?;
            artifacts.push(r.into_metadata()?);
        }
        Ok(artifacts)
    }

    pub fn artifact_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT artifact_id FROM artifacts")
            .context("Failed to prepare artifact_ids")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query artifact ids")?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row.context("Failed to read artifact id")?);
        }
        Ok(ids)
    }

    pub fn count_artifacts(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))
            .context("Failed to count artifacts")?;
        Ok(count as u64)
    }

    /// Artifact counts grouped by one of the fixed metadata columns.
    pub fn count_artifacts_by(&self, column: GroupColumn) -> Result<BTreeMap<String, u64>> {
        let sql = format!(
            "SELECT {col}, COUNT(*) FROM artifacts GROUP BY {col}",
            col = column.as_str()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare grouped count")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query grouped count")?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count) = row.context("Failed to read grouped count")?;
            counts.insert(key, count as u64);
        }
        Ok(counts)
    }

    // ── Execution ledger ──────────────────────────────────────────────

    /// Append a run record. Each execution id may be recorded once.
    pub fn insert_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin ledger transaction")?;
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM executions WHERE execution_id = ?1)",
                params![record.execution_id],
                |row| row.get(0),
            )
            .context("Failed to check execution existence")?;
        if exists {
            return Err(StorageError::DuplicateExecution {
                id: record.execution_id.clone(),
            }
            .into());
        }
        tx.execute(
            "INSERT INTO executions (execution_id, project_name, domain, status, quality_score, iteration_count, started_at, completed_at, error_message, input_digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.execution_id,
                record.project_name,
                record.domain,
                record.status.as_str(),
                record.quality_score,
                record.iteration_count,
                format_timestamp(&record.started_at),
                record.completed_at.as_ref().map(format_timestamp),
                record.error_message,
                record.input_digest,
            ],
        )
        .context("Failed to insert execution record")?;
        tx.commit().context("Failed to commit execution record")?;
        Ok(())
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let sql = format!(
            "SELECT {} FROM executions WHERE execution_id = ?1",
            EXECUTION_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![execution_id], read_execution_row)
            .optional()
            .context("Failed to query execution")?;
        row.map(ExecutionRow::into_record).transpose()
    }

    /// Most recent runs first.
    pub fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let sql = format!(
            "SELECT {} FROM executions ORDER BY started_at DESC, rowid DESC LIMIT {}",
            EXECUTION_COLUMNS, limit
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_executions")?;
        let rows = stmt
            .query_map([], read_execution_row)
            .context("Failed to query executions")?;
        let mut records = Vec::new();
        for row in rows {
            let r = row.context("Failed to read execution row")?;
            records.push(r.into_record()?);
        }
        Ok(records)
    }

    pub fn count_executions(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))
            .context("Failed to count executions")?;
        Ok(count as u64)
    }

    /// Newest completed run finished at or after `since` whose score meets
    /// `threshold`. When a digest is given only runs with the same inputs match.
    pub fn latest_successful_since(
        &self,
        since: DateTime<Utc>,
        threshold: f64,
        input_digest: Option<&str>,
    ) -> Result<Option<ExecutionRecord>> {
        let sql = format!(
            "SELECT {} FROM executions
             WHERE status = 'completed'
               AND completed_at IS NOT NULL AND completed_at >= ?1
               AND quality_score >= ?2
               AND (?3 IS NULL OR input_digest = ?3)
             ORDER BY completed_at DESC, rowid DESC
             LIMIT 1",
            EXECUTION_COLUMNS
        );
        let row = self
            .conn
            .query_row(
                &sql,
                params![format_timestamp(&since), threshold, input_digest],
                read_execution_row,
            )
            .optional()
            .context("Failed to query successful executions")?;
        row.map(ExecutionRow::into_record).transpose()
    }
}

/// Metadata columns that support grouped counts.
#[derive(Debug, Clone, Copy)]
pub enum GroupColumn {
    ArtifactType,
    Status,
    Creator,
}

impl GroupColumn {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactType => "artifact_type",
            Self::Status => "status",
            Self::Creator => "creator",
        }
    }
}

/// Intermediate row struct for reading artifacts from SQLite before
/// converting type / status / tags / timestamps into typed values.
struct ArtifactRow {
    id: String,
    artifact_type: String,
    status: String,
    creator: String,
    created_at: String,
    updated_at: String,
    updated_by: Option<String>,
    version: u32,
    parent_id: Option<String>,
    execution_id: Option<String>,
    tags: String,
    checksum: String,
}

fn read_artifact_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactRow> {
    Ok(ArtifactRow {
        id: row.get(0)?,
        artifact_type: row.get(1)?,
        status: row.get(2)?,
        creator: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        updated_by: row.get(6)?,
        version: row.get(7)?,
        parent_id: row.get(8)?,
        execution_id: row.get(9)?,
        tags: row.get(10)?,
        checksum: row.get(11)?,
    })
}

impl ArtifactRow {
    fn into_metadata(self) -> Result<ArtifactMetadata> {
        let artifact_type = ArtifactType::from_str(&self.artifact_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse artifact type")?;
        let status = ArtifactStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse artifact status")?;
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).context("Failed to parse artifact tags JSON")?;

        Ok(ArtifactMetadata {
            id: self.id,
            artifact_type,
            status,
            creator: self.creator,
            created_at: parse_timestamp(&self.created_at)
                .context("Failed to parse artifact created_at")?,
            updated_at: parse_timestamp(&self.updated_at)
                .context("Failed to parse artifact updated_at")?,
            updated_by: self.updated_by,
            version: self.version,
            parent_id: self.parent_id,
            execution_id: self.execution_id,
            tags,
            checksum: self.checksum,
        })
    }
}

/// Intermediate row struct for the executions table.
struct ExecutionRow {
    execution_id: String,
    project_name: String,
    domain: String,
    status: String,
    quality_score: f64,
    iteration_count: u32,
    started_at: String,
    completed_at: Option<String>,
    error_message: Option<String>,
    input_digest: Option<String>,
}

fn read_execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        execution_id: row.get(0)?,
        project_name: row.get(1)?,
        domain: row.get(2)?,
        status: row.get(3)?,
        quality_score: row.get(4)?,
        iteration_count: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        error_message: row.get(8)?,
        input_digest: row.get(9)?,
    })
}

impl ExecutionRow {
    fn into_record(self) -> Result<ExecutionRecord> {
        let status = RunStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse execution status")?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("Failed to parse execution completed_at")?;
        Ok(ExecutionRecord {
            execution_id: self.execution_id,
            project_name: self.project_name,
            domain: self.domain,
            status,
            quality_score: self.quality_score,
            iteration_count: self.iteration_count,
            started_at: parse_timestamp(&self.started_at)
                .context("Failed to parse execution started_at")?,
            completed_at,
            error_message: self.error_message,
            input_digest: self.input_digest,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
