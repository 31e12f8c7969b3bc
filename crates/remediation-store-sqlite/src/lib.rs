#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-store-sqlite** – SQLite-based durable store driver.
//!
//! Provides a reliable, portable [`DurableStore`] implementation backed by
//! SQLite via `sqlx`. Every table is declared `STRICT`; each entity is kept
//! as a single JSON column alongside the handful of scalar columns the
//! query surface actually filters on, so that adding a field to
//! `remediation-types` never requires a migration. The `signals` table is
//! additionally partitioned by calendar day (`received_on`) to keep the
//! common "recent signals" scan cheap as the table grows.
//!
//! Audit immutability is enforced twice: the `DurableStore` trait exposes no
//! update/delete method for audit rows, and this backend installs `BEFORE
//! UPDATE`/`BEFORE DELETE` triggers on `audit_entries` that raise regardless
//! of caller, so a bug that reaches the database directly still cannot erase
//! history.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};

use remediation_store_core::{DurableStore, IssueFilter, StoreError};
use remediation_types::{
    Action, ActionId, AuditEntry, CheckpointId, CheckpointRecord, Issue, IssueId, Pattern,
    PatternId, Signal, SignalId, Stage,
};

fn backend_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn ser<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// A persistent [`DurableStore`] backed by a SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a database file at `path`, running migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(backend_err)?;
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database. Useful for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(backend_err)?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations against it.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issues (
                id TEXT PRIMARY KEY,
                merchant TEXT NOT NULL,
                stage TEXT NOT NULL,
                resolution TEXT,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                issue_id TEXT,
                received_on TEXT NOT NULL,
                received_at TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                error_code TEXT NOT NULL,
                normalized_shape TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                issue_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                id TEXT PRIMARY KEY,
                issue_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                issue_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_merchant ON issues(merchant)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_stage ON issues(stage)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_day ON signals(received_on)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_issue ON signals(issue_id)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_patterns_fingerprint ON patterns(error_code, normalized_shape)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_status ON actions(status)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_issue_seq ON audit_entries(issue_id, seq)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
            BEFORE UPDATE ON audit_entries
            BEGIN
                SELECT RAISE(ABORT, 'audit entries are immutable');
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
            BEFORE DELETE ON audit_entries
            BEGIN
                SELECT RAISE(ABORT, 'audit entries are immutable');
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn create_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let data = ser(issue)?;
        sqlx::query(
            "INSERT OR REPLACE INTO issues (id, merchant, stage, resolution, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(issue.id.to_string())
        .bind(&issue.merchant.0)
        .bind(issue.stage.to_string())
        .bind(issue.resolution.map(|r| ser(&r)).transpose()?)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        let row = sqlx::query("SELECT data FROM issues WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()
    }

    async fn update_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let existing = self.get_issue(issue.id).await?;
        if existing.is_none() {
            return Err(StoreError::NotFound(format!("issue {}", issue.id)));
        }
        self.create_issue(issue).await
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError> {
        let rows = sqlx::query("SELECT data FROM issues")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            let issue: Issue = de(row.get::<String, _>("data").as_str())?;
            let matches = filter
                .merchant
                .as_ref()
                .map(|m| *m == issue.merchant)
                .unwrap_or(true)
                && filter.stage.map(|s| s == issue.stage).unwrap_or(true)
                && filter
                    .resolution
                    .map(|r| issue.resolution == Some(r))
                    .unwrap_or(true);
            if matches {
                out.push(issue);
            }
        }
        Ok(out)
    }

    async fn delete_issue(&self, id: IssueId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let id_str = id.to_string();
        sqlx::query("DELETE FROM issues WHERE id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM signals WHERE issue_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM actions WHERE issue_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM checkpoints WHERE issue_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        // audit_entries deliberately untouched (§3 ownership note).
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<(), StoreError> {
        let data = ser(signal)?;
        sqlx::query(
            "INSERT OR REPLACE INTO signals (id, issue_id, received_on, received_at, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(signal.id.to_string())
        .bind(signal.issue_id.map(|id| id.to_string()))
        .bind(signal.received_at.format("%Y-%m-%d").to_string())
        .bind(signal.received_at.to_rfc3339())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_signal(&self, id: SignalId) -> Result<Option<Signal>, StoreError> {
        let row = sqlx::query("SELECT data FROM signals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()
    }

    async fn list_signals_for_issue(&self, issue_id: IssueId) -> Result<Vec<Signal>, StoreError> {
        let rows = sqlx::query(
            "SELECT data FROM signals WHERE issue_id = ? ORDER BY received_at ASC",
        )
        .bind(issue_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.iter()
            .map(|r| de(r.get::<String, _>("data").as_str()))
            .collect()
    }

    async fn insert_pattern(&self, pattern: &Pattern) -> Result<(), StoreError> {
        let error_code = pattern
            .characteristics
            .get("error_code")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let normalized_shape = pattern
            .characteristics
            .get("normalized_shape")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let data = ser(pattern)?;
        sqlx::query(
            "INSERT OR REPLACE INTO patterns (id, error_code, normalized_shape, last_seen, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(pattern.id.to_string())
        .bind(error_code)
        .bind(normalized_shape)
        .bind(pattern.last_seen.to_rfc3339())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_pattern(&self, id: PatternId) -> Result<Option<Pattern>, StoreError> {
        let row = sqlx::query("SELECT data FROM patterns WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()
    }

    async fn find_recent_patterns(
        &self,
        error_code: &str,
        normalized_shape: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Pattern>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM patterns
            WHERE error_code = ? AND normalized_shape = ? AND last_seen >= ?
            ORDER BY last_seen DESC
            "#,
        )
        .bind(error_code)
        .bind(normalized_shape)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.iter()
            .map(|r| de(r.get::<String, _>("data").as_str()))
            .collect()
    }

    async fn create_action(&self, action: &Action) -> Result<(), StoreError> {
        let data = ser(action)?;
        sqlx::query(
            "INSERT OR REPLACE INTO actions (id, issue_id, status, data) VALUES (?, ?, ?, ?)",
        )
        .bind(action.id.to_string())
        .bind(action.issue_id.to_string())
        .bind(ser(&action.status)?)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>, StoreError> {
        let row = sqlx::query("SELECT data FROM actions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()
    }

    async fn update_action(&self, action: &Action) -> Result<(), StoreError> {
        let existing = self.get_action(action.id).await?;
        if existing.is_none() {
            return Err(StoreError::NotFound(format!("action {}", action.id)));
        }
        self.create_action(action).await
    }

    async fn list_in_progress_actions(&self) -> Result<Vec<Action>, StoreError> {
        use remediation_types::ActionStatus;
        let rows = sqlx::query("SELECT data FROM actions WHERE status = ?")
            .bind(ser(&ActionStatus::InProgress)?)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter()
            .map(|r| de(r.get::<String, _>("data").as_str()))
            .collect()
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let data = ser(entry)?;
        let next_seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq), -1) + 1 AS next_seq FROM audit_entries WHERE issue_id = ?",
        )
        .bind(entry.issue_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(backend_err)?
        .get("next_seq");

        sqlx::query(
            "INSERT INTO audit_entries (id, issue_id, seq, timestamp, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.issue_id.to_string())
        .bind(next_seq)
        .bind(entry.timestamp.to_rfc3339())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_audit_entries(&self, issue_id: IssueId) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT data FROM audit_entries WHERE issue_id = ? ORDER BY seq ASC",
        )
        .bind(issue_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.iter()
            .map(|r| de(r.get::<String, _>("data").as_str()))
            .collect()
    }

    async fn latest_audit_entry(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<AuditEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT data FROM audit_entries WHERE issue_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(issue_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        row.map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()
    }

    async fn save_checkpoint(
        &self,
        issue_id: IssueId,
        stage: Stage,
        blob: Vec<u8>,
    ) -> Result<CheckpointRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let now = chrono::Utc::now();

        let existing = sqlx::query("SELECT data FROM checkpoints WHERE issue_id = ?")
            .bind(issue_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;
        let previous: Option<CheckpointRecord> = existing
            .map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()?;

        let record = CheckpointRecord {
            id: CheckpointId::new(),
            issue_id,
            stage,
            state_blob: blob,
            parent_checkpoint_id: previous.as_ref().map(|p| p.id),
            error_count: previous.as_ref().map(|p| p.error_count).unwrap_or(0),
            last_error: previous.as_ref().and_then(|p| p.last_error.clone()),
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };

        sqlx::query("INSERT OR REPLACE INTO checkpoints (issue_id, data) VALUES (?, ?)")
            .bind(issue_id.to_string())
            .bind(ser(&record)?)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        let row = sqlx::query("SELECT data FROM issues WHERE id = ?")
            .bind(issue_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(format!("issue {issue_id}")));
        };
        let mut issue: Issue = de(row.get::<String, _>("data").as_str())?;
        issue.stage = stage;
        issue.updated_at = now;

        sqlx::query(
            "UPDATE issues SET stage = ?, resolution = ?, data = ? WHERE id = ?",
        )
        .bind(issue.stage.to_string())
        .bind(issue.resolution.map(|r| ser(&r)).transpose()?)
        .bind(ser(&issue)?)
        .bind(issue_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(record)
    }

    async fn get_checkpoint(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let row = sqlx::query("SELECT data FROM checkpoints WHERE issue_id = ?")
            .bind(issue_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| de(r.get::<String, _>("data").as_str()))
            .transpose()
    }

    async fn load_active_issues(&self) -> Result<Vec<IssueId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM issues WHERE stage != ?")
            .bind(Stage::Complete.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter()
            .map(|r| {
                let raw: String = r.get("id");
                uuid::Uuid::parse_str(&raw)
                    .map(IssueId::from)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }
}
