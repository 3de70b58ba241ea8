use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use vecdiff_config::Secret;

use crate::{
    DecisionVectorFilter, DecisionVectorRecord, LoadingPhase, ProcessingStatus,
    RepositoryLoadingJob, RepositoryPrAnalysisStatus, StoreBackend, StoreError, StoreSession,
    StoredEmbedding,
};

const MAX_CONNECTIONS: u32 = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Session backed by a small `sqlx` pool. Statements are not cached so the
/// session works behind transaction-mode poolers.
pub struct PostgresStoreSession {
    pool: PgPool,
}

impl PostgresStoreSession {
    pub async fn connect(connection_string: &Secret) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(connection_string.expose())
            .map_err(|err| {
                StoreError::Unreachable(format!("invalid postgres connection string: {err}"))
            })?
            .statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .max_lifetime(MAX_LIFETIME)
            .connect_with(options)
            .await
            .map_err(|err| StoreError::Unreachable(format!("failed to connect postgres: {err}")))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl StoreSession for PostgresStoreSession {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Postgres
    }

    async fn find_decision_vectors(
        &self,
        filter: &DecisionVectorFilter,
    ) -> Result<Vec<DecisionVectorRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionVectorRow>(
            r#"
            SELECT id, namespace, embedding::text AS embedding, metadata, created_at, updated_at
            FROM decision_vectors
            WHERE namespace = $1
              AND metadata ->> $2 = $3
            "#,
        )
        .persistent(false)
        .bind(filter.namespace())
        .bind(filter.field_name())
        .bind(filter.field_value())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DecisionVectorRecord::from).collect())
    }

    async fn list_pr_analysis_status(
        &self,
        repository_slug: &str,
        pr_number: &str,
    ) -> Result<Vec<RepositoryPrAnalysisStatus>, StoreError> {
        let rows = sqlx::query_as::<_, AnalysisStatusRow>(
            r#"
            SELECT repository_slug, installation_id, pr_number, pr_title, pr_url, commit_sha,
                   is_pseudo_pr, status, last_analyzed_at, analysis_error, extracted_decision_count
            FROM repository_pr_analysis_status
            WHERE repository_slug = $1
              AND pr_number = $2
            ORDER BY installation_id ASC
            "#,
        )
        .persistent(false)
        .bind(repository_slug)
        .bind(pr_number)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RepositoryPrAnalysisStatus::from).collect())
    }

    async fn list_loading_jobs(
        &self,
        repository_slug: &str,
    ) -> Result<Vec<RepositoryLoadingJob>, StoreError> {
        let rows = sqlx::query_as::<_, LoadingJobRow>(
            r#"
            SELECT repository_slug, installation_id, current_phase, next_page_to_process,
                   is_completed, status, last_processed_at, error_message
            FROM repository_loading_jobs
            WHERE repository_slug = $1
            ORDER BY installation_id ASC
            "#,
        )
        .persistent(false)
        .bind(repository_slug)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RepositoryLoadingJob::from).collect())
    }

    async fn close(self: Box<Self>) {
        self.pool.close().await;
        tracing::debug!(backend = "postgres", "store session closed");
    }
}

/// Raw `decision_vectors` columns; `embedding` arrives as pgvector text.
#[derive(Debug, FromRow)]
struct DecisionVectorRow {
    id: String,
    namespace: String,
    embedding: Option<String>,
    metadata: Value,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<DecisionVectorRow> for DecisionVectorRecord {
    fn from(row: DecisionVectorRow) -> Self {
        Self {
            embedding: StoredEmbedding::from_text(row.embedding.as_deref()),
            id: row.id,
            namespace: row.namespace,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AnalysisStatusRow {
    repository_slug: String,
    installation_id: i32,
    pr_number: String,
    pr_title: Option<String>,
    pr_url: Option<String>,
    commit_sha: Option<String>,
    is_pseudo_pr: bool,
    status: String,
    last_analyzed_at: Option<DateTime<Utc>>,
    analysis_error: Option<String>,
    extracted_decision_count: Option<i32>,
}

impl From<AnalysisStatusRow> for RepositoryPrAnalysisStatus {
    fn from(row: AnalysisStatusRow) -> Self {
        Self {
            status: ProcessingStatus::from_db(&row.status),
            repository_slug: row.repository_slug,
            installation_id: row.installation_id,
            pr_number: row.pr_number,
            pr_title: row.pr_title,
            pr_url: row.pr_url,
            commit_sha: row.commit_sha,
            is_pseudo_pr: row.is_pseudo_pr,
            last_analyzed_at: row.last_analyzed_at,
            analysis_error: row.analysis_error,
            extracted_decision_count: row.extracted_decision_count,
        }
    }
}

#[derive(Debug, FromRow)]
struct LoadingJobRow {
    repository_slug: String,
    installation_id: i32,
    current_phase: String,
    next_page_to_process: i32,
    is_completed: bool,
    status: String,
    last_processed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl From<LoadingJobRow> for RepositoryLoadingJob {
    fn from(row: LoadingJobRow) -> Self {
        Self {
            current_phase: LoadingPhase::from_db(&row.current_phase),
            status: ProcessingStatus::from_db(&row.status),
            repository_slug: row.repository_slug,
            installation_id: row.installation_id,
            next_page_to_process: row.next_page_to_process,
            is_completed: row.is_completed,
            last_processed_at: row.last_processed_at,
            error_message: row.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn decision_vector_row_decodes_pgvector_text() {
        let updated_at = Utc
            .with_ymd_and_hms(2025, 3, 4, 5, 6, 7)
            .single()
            .expect("valid timestamp");
        let record = DecisionVectorRecord::from(DecisionVectorRow {
            id: "d-7".to_owned(),
            namespace: "acme/repo".to_owned(),
            embedding: Some("[0.25,-1,3]".to_owned()),
            metadata: json!({"pr_number": "7"}),
            created_at: None,
            updated_at: Some(updated_at),
        });

        assert_eq!(record.id, "d-7");
        assert_eq!(record.embedding, StoredEmbedding::Vector(vec![0.25, -1.0, 3.0]));
        assert_eq!(record.metadata_text("pr_number").as_deref(), Some("7"));
        assert_eq!(record.last_touched_at(), Some(updated_at));
    }

    #[test]
    fn decision_vector_row_keeps_null_and_garbled_embeddings() {
        let row = |embedding: Option<&str>| DecisionVectorRow {
            id: "d-1".to_owned(),
            namespace: "acme/repo".to_owned(),
            embedding: embedding.map(str::to_owned),
            metadata: json!({}),
            created_at: None,
            updated_at: None,
        };

        assert_eq!(
            DecisionVectorRecord::from(row(None)).embedding,
            StoredEmbedding::Absent
        );
        match DecisionVectorRecord::from(row(Some("{1,2}"))).embedding {
            StoredEmbedding::Malformed { raw, .. } => assert_eq!(raw, "{1,2}"),
            other => panic!("expected malformed embedding, got {other:?}"),
        }
    }

    #[test]
    fn context_rows_map_status_and_phase_columns() {
        let status = RepositoryPrAnalysisStatus::from(AnalysisStatusRow {
            repository_slug: "acme/repo".to_owned(),
            installation_id: 3,
            pr_number: "42".to_owned(),
            pr_title: Some("Adopt WAL".to_owned()),
            pr_url: None,
            commit_sha: Some("abc123".to_owned()),
            is_pseudo_pr: false,
            status: "failed".to_owned(),
            last_analyzed_at: None,
            analysis_error: Some("rate limited".to_owned()),
            extracted_decision_count: Some(2),
        });
        assert_eq!(status.status, ProcessingStatus::Failed);
        assert_eq!(status.pr_title.as_deref(), Some("Adopt WAL"));
        assert_eq!(status.extracted_decision_count, Some(2));

        let job = RepositoryLoadingJob::from(LoadingJobRow {
            repository_slug: "acme/repo".to_owned(),
            installation_id: 3,
            current_phase: "commits".to_owned(),
            next_page_to_process: 5,
            is_completed: false,
            status: "in_progress".to_owned(),
            last_processed_at: None,
            error_message: None,
        });
        assert_eq!(job.current_phase, LoadingPhase::Commits);
        assert_eq!(job.status, ProcessingStatus::Processing);
        assert_eq!(job.next_page_to_process, 5);
    }
}
