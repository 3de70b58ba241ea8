use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, params};

use crate::{
    DecisionVectorFilter, DecisionVectorRecord, LoadingPhase, ProcessingStatus,
    RepositoryLoadingJob, RepositoryPrAnalysisStatus, StoreBackend, StoreError, StoreSession,
    StoredEmbedding,
};

/// Local SQLite copy of the decision tables. The connector only ever opens
/// existing snapshots read-only; [`SqliteSnapshotStore::create`] builds new
/// ones.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSnapshotStore {
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Unreachable(format!(
                "snapshot not found at {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            StoreError::Unreachable(format!(
                "failed to open snapshot {}: {err}",
                path.display()
            ))
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn upsert_decision_vector(&self, record: &DecisionVectorRecord) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&record.metadata)?;
        self.lock()?.execute(
            r#"
            INSERT INTO decision_vectors (id, namespace, embedding, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id, namespace) DO UPDATE SET
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.id,
                record.namespace,
                record.embedding.to_text(),
                metadata,
                record.created_at.map(|value| value.to_rfc3339()),
                record.updated_at.map(|value| value.to_rfc3339()),
            ],
        )?;

        Ok(())
    }

    pub fn upsert_pr_analysis_status(
        &self,
        record: &RepositoryPrAnalysisStatus,
    ) -> Result<(), StoreError> {
        self.lock()?.execute(
            r#"
            INSERT INTO repository_pr_analysis_status (
                repository_slug, installation_id, pr_number, pr_title, pr_url, commit_sha,
                is_pseudo_pr, status, last_analyzed_at, analysis_error, extracted_decision_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(repository_slug, pr_number, installation_id) DO UPDATE SET
                pr_title = excluded.pr_title,
                pr_url = excluded.pr_url,
                commit_sha = excluded.commit_sha,
                is_pseudo_pr = excluded.is_pseudo_pr,
                status = excluded.status,
                last_analyzed_at = excluded.last_analyzed_at,
                analysis_error = excluded.analysis_error,
                extracted_decision_count = excluded.extracted_decision_count
            "#,
            params![
                record.repository_slug,
                record.installation_id,
                record.pr_number,
                record.pr_title,
                record.pr_url,
                record.commit_sha,
                record.is_pseudo_pr,
                record.status.as_str(),
                record.last_analyzed_at.map(|value| value.to_rfc3339()),
                record.analysis_error,
                record.extracted_decision_count,
            ],
        )?;

        Ok(())
    }

    pub fn upsert_loading_job(&self, record: &RepositoryLoadingJob) -> Result<(), StoreError> {
        self.lock()?.execute(
            r#"
            INSERT INTO repository_loading_jobs (
                repository_slug, installation_id, current_phase, next_page_to_process,
                is_completed, status, last_processed_at, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(repository_slug, installation_id) DO UPDATE SET
                current_phase = excluded.current_phase,
                next_page_to_process = excluded.next_page_to_process,
                is_completed = excluded.is_completed,
                status = excluded.status,
                last_processed_at = excluded.last_processed_at,
                error_message = excluded.error_message
            "#,
            params![
                record.repository_slug,
                record.installation_id,
                record.current_phase.as_str(),
                record.next_page_to_process,
                record.is_completed,
                record.status.as_str(),
                record.last_processed_at.map(|value| value.to_rfc3339()),
                record.error_message,
            ],
        )?;

        Ok(())
    }

    fn query_decision_vectors(
        &self,
        filter: &DecisionVectorFilter,
    ) -> Result<Vec<DecisionVectorRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, namespace, embedding, metadata, created_at, updated_at
            FROM decision_vectors
            WHERE namespace = ?1
              AND CAST(json_extract(metadata, ?2) AS TEXT) = ?3
            ORDER BY rowid ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![
                filter.namespace(),
                filter.sqlite_json_path(),
                filter.field_value()
            ],
            |row| {
                Ok(RawDecisionVectorRow {
                    id: row.get(0)?,
                    namespace: row.get(1)?,
                    embedding: row.get(2)?,
                    metadata: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )?;

        let raw_rows = rows.collect::<Result<Vec<_>, _>>()?;
        raw_rows
            .into_iter()
            .map(RawDecisionVectorRow::into_record)
            .collect()
    }

    fn query_pr_analysis_status(
        &self,
        repository_slug: &str,
        pr_number: &str,
    ) -> Result<Vec<RepositoryPrAnalysisStatus>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT repository_slug, installation_id, pr_number, pr_title, pr_url, commit_sha,
                   is_pseudo_pr, status, last_analyzed_at, analysis_error, extracted_decision_count
            FROM repository_pr_analysis_status
            WHERE repository_slug = ?1
              AND pr_number = ?2
            ORDER BY installation_id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![repository_slug, pr_number], |row| {
            let status: String = row.get(7)?;
            let last_analyzed_at: Option<String> = row.get(8)?;
            Ok(RepositoryPrAnalysisStatus {
                repository_slug: row.get(0)?,
                installation_id: row.get(1)?,
                pr_number: row.get(2)?,
                pr_title: row.get(3)?,
                pr_url: row.get(4)?,
                commit_sha: row.get(5)?,
                is_pseudo_pr: row.get(6)?,
                status: ProcessingStatus::from_db(&status),
                last_analyzed_at: parse_timestamp(last_analyzed_at.as_deref()),
                analysis_error: row.get(9)?,
                extracted_decision_count: row.get(10)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn query_loading_jobs(
        &self,
        repository_slug: &str,
    ) -> Result<Vec<RepositoryLoadingJob>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT repository_slug, installation_id, current_phase, next_page_to_process,
                   is_completed, status, last_processed_at, error_message
            FROM repository_loading_jobs
            WHERE repository_slug = ?1
            ORDER BY installation_id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![repository_slug], |row| {
            let phase: String = row.get(2)?;
            let status: String = row.get(5)?;
            let last_processed_at: Option<String> = row.get(6)?;
            Ok(RepositoryLoadingJob {
                repository_slug: row.get(0)?,
                installation_id: row.get(1)?,
                current_phase: LoadingPhase::from_db(&phase),
                next_page_to_process: row.get(3)?,
                is_completed: row.get(4)?,
                status: ProcessingStatus::from_db(&status),
                last_processed_at: parse_timestamp(last_processed_at.as_deref()),
                error_message: row.get(7)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))
    }
}

#[async_trait]
impl StoreSession for SqliteSnapshotStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn find_decision_vectors(
        &self,
        filter: &DecisionVectorFilter,
    ) -> Result<Vec<DecisionVectorRecord>, StoreError> {
        self.query_decision_vectors(filter)
    }

    async fn list_pr_analysis_status(
        &self,
        repository_slug: &str,
        pr_number: &str,
    ) -> Result<Vec<RepositoryPrAnalysisStatus>, StoreError> {
        self.query_pr_analysis_status(repository_slug, pr_number)
    }

    async fn list_loading_jobs(
        &self,
        repository_slug: &str,
    ) -> Result<Vec<RepositoryLoadingJob>, StoreError> {
        self.query_loading_jobs(repository_slug)
    }

    async fn close(self: Box<Self>) {
        let Self { conn, path } = *self;
        let conn = conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err((_, err)) = conn.close() {
            tracing::warn!(path = %path.display(), error = %err, "failed to close snapshot");
            return;
        }
        tracing::debug!(backend = "sqlite", path = %path.display(), "store session closed");
    }
}

struct RawDecisionVectorRow {
    id: String,
    namespace: String,
    embedding: Option<String>,
    metadata: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl RawDecisionVectorRow {
    fn into_record(self) -> Result<DecisionVectorRecord, StoreError> {
        Ok(DecisionVectorRecord {
            id: self.id,
            namespace: self.namespace,
            embedding: StoredEmbedding::from_text(self.embedding.as_deref()),
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: parse_timestamp(self.created_at.as_deref()),
            updated_at: parse_timestamp(self.updated_at.as_deref()),
        })
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS decision_vectors (
            id TEXT NOT NULL,
            namespace TEXT NOT NULL,
            embedding TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE (id, namespace)
        );

        CREATE INDEX IF NOT EXISTS idx_decision_vectors_namespace
            ON decision_vectors(namespace);

        CREATE TABLE IF NOT EXISTS repository_pr_analysis_status (
            repository_slug TEXT NOT NULL,
            installation_id INTEGER NOT NULL DEFAULT 0,
            pr_number TEXT NOT NULL,
            pr_title TEXT,
            pr_url TEXT,
            commit_sha TEXT,
            is_pseudo_pr INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            last_analyzed_at TEXT,
            analysis_error TEXT,
            extracted_decision_count INTEGER,
            UNIQUE (repository_slug, pr_number, installation_id)
        );

        CREATE TABLE IF NOT EXISTS repository_loading_jobs (
            repository_slug TEXT NOT NULL,
            installation_id INTEGER NOT NULL,
            current_phase TEXT NOT NULL DEFAULT 'prs',
            next_page_to_process INTEGER NOT NULL DEFAULT 1,
            is_completed INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            last_processed_at TEXT,
            error_message TEXT,
            UNIQUE (repository_slug, installation_id)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::find_by_namespace_and_field;

    fn record(id: &str, pr_number: serde_json::Value) -> DecisionVectorRecord {
        DecisionVectorRecord {
            id: id.to_owned(),
            namespace: "acme/repo".to_owned(),
            embedding: StoredEmbedding::Vector(vec![1.0, 0.5, -0.25]),
            metadata: json!({"pr_number": pr_number, "decision": "adopt WAL"}),
            created_at: Some(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single().expect("valid timestamp")),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips_records_and_matches_numeric_and_string_values() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("snapshots/prod.sqlite");

        let writer = SqliteSnapshotStore::create(&path).expect("create snapshot");
        writer
            .upsert_decision_vector(&record("d-1", json!(42)))
            .expect("insert numeric pr");
        writer
            .upsert_decision_vector(&record("d-2", json!("42")))
            .expect("insert string pr");
        writer
            .upsert_decision_vector(&record("d-3", json!("7")))
            .expect("insert other pr");
        Box::new(writer).close().await;

        let reader = SqliteSnapshotStore::open_existing(&path).expect("open snapshot");
        let found = find_by_namespace_and_field(&reader, "acme/repo", "pr_number", "42")
            .await
            .expect("lookup");

        let ids = found.iter().map(|row| row.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["d-1", "d-2"]);
        assert_eq!(found[0], record("d-1", json!(42)));

        let other_namespace = find_by_namespace_and_field(&reader, "acme/other", "pr_number", "42")
            .await
            .expect("lookup other namespace");
        assert!(other_namespace.is_empty());
    }

    #[test]
    fn upsert_replaces_record_with_same_id_and_namespace() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteSnapshotStore::create(temp.path().join("dev.sqlite")).expect("create");

        let mut first = record("d-1", json!("42"));
        store.upsert_decision_vector(&first).expect("insert");
        first.embedding = StoredEmbedding::Absent;
        first.metadata = json!({"pr_number": "42", "decision": "revert WAL"});
        store.upsert_decision_vector(&first).expect("update");

        let filter = DecisionVectorFilter::new("acme/repo", "pr_number", "42").expect("filter");
        let found = store.query_decision_vectors(&filter).expect("query");
        assert_eq!(found, vec![first]);
    }

    #[test]
    fn malformed_embedding_is_kept_as_malformed() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteSnapshotStore::create(temp.path().join("dev.sqlite")).expect("create");

        let mut broken = record("d-9", json!("42"));
        broken.embedding = StoredEmbedding::from_text(Some("{not a vector}"));
        store.upsert_decision_vector(&broken).expect("insert");

        let filter = DecisionVectorFilter::new("acme/repo", "pr_number", "42").expect("filter");
        let found = store.query_decision_vectors(&filter).expect("query");
        match &found[0].embedding {
            StoredEmbedding::Malformed { raw, .. } => assert_eq!(raw, "{not a vector}"),
            other => panic!("expected malformed embedding, got {other:?}"),
        }
    }

    #[test]
    fn context_tables_round_trip() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteSnapshotStore::create(temp.path().join("prod.sqlite")).expect("create");

        let status = RepositoryPrAnalysisStatus {
            repository_slug: "acme/repo".to_owned(),
            installation_id: 7,
            pr_number: "42".to_owned(),
            pr_title: Some("Switch to WAL".to_owned()),
            pr_url: None,
            commit_sha: Some("abc123".to_owned()),
            is_pseudo_pr: false,
            status: ProcessingStatus::Completed,
            last_analyzed_at: Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).single().expect("valid timestamp")),
            analysis_error: None,
            extracted_decision_count: Some(3),
        };
        store.upsert_pr_analysis_status(&status).expect("insert status");

        let job = RepositoryLoadingJob {
            repository_slug: "acme/repo".to_owned(),
            installation_id: 7,
            current_phase: LoadingPhase::Commits,
            next_page_to_process: 4,
            is_completed: false,
            status: ProcessingStatus::Other("paused".to_owned()),
            last_processed_at: None,
            error_message: Some("rate limited".to_owned()),
        };
        store.upsert_loading_job(&job).expect("insert job");

        assert_eq!(
            store
                .query_pr_analysis_status("acme/repo", "42")
                .expect("query status"),
            vec![status]
        );
        assert_eq!(
            store.query_loading_jobs("acme/repo").expect("query jobs"),
            vec![job]
        );
    }

    #[test]
    fn open_existing_is_read_only() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("prod.sqlite");
        SqliteSnapshotStore::create(&path).expect("create");

        let reader = SqliteSnapshotStore::open_existing(&path).expect("open");
        let result = reader.upsert_decision_vector(&record("d-1", json!("42")));
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }
}
