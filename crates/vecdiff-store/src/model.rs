use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Embedding column as read from a store. A value that cannot be decoded is
/// kept so the comparison can report why similarity is unavailable.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredEmbedding {
    Absent,
    Vector(Vec<f32>),
    Malformed { raw: String, reason: String },
}

impl StoredEmbedding {
    /// Decodes pgvector's text form (`[0.1,0.2,...]`), which is also how
    /// snapshots store the column.
    pub fn from_text(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Absent;
        };

        match serde_json::from_str::<Vec<f32>>(raw.trim()) {
            Ok(values) => Self::Vector(values),
            Err(err) => Self::Malformed {
                raw: raw.to_owned(),
                reason: format!("cannot decode embedding literal: {err}"),
            },
        }
    }

    /// Inverse of [`StoredEmbedding::from_text`].
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Absent => None,
            Self::Vector(values) => Some(format!(
                "[{}]",
                values
                    .iter()
                    .map(f32::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            )),
            Self::Malformed { raw, .. } => Some(raw.clone()),
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Self::Vector(values) => Some(values.as_slice()),
            Self::Absent | Self::Malformed { .. } => None,
        }
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.as_vector().map(<[f32]>::len)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionVectorRecord {
    pub id: String,
    pub namespace: String,
    pub embedding: StoredEmbedding,
    pub metadata: Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DecisionVectorRecord {
    /// Textual form of a top-level metadata field, the same form Postgres
    /// yields for `metadata ->> key`.
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        metadata_value_as_text(self.metadata.get(key)?)
    }

    pub fn last_touched_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

pub fn metadata_value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Some(value.to_string())
        }
    }
}

/// Lifecycle status shared by `repository_pr_analysis_status` and
/// `repository_loading_jobs`. Unknown values are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl ProcessingStatus {
    pub fn from_db(value: &str) -> Self {
        match value.trim() {
            "pending" => Self::Pending,
            "processing" | "in_progress" => Self::Processing,
            "completed" | "complete" => Self::Completed,
            "failed" | "error" => Self::Failed,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(value) => value.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingPhase {
    Prs,
    Commits,
    Other(String),
}

impl LoadingPhase {
    pub fn from_db(value: &str) -> Self {
        match value.trim() {
            "prs" => Self::Prs,
            "commits" => Self::Commits,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Prs => "prs",
            Self::Commits => "commits",
            Self::Other(value) => value.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPrAnalysisStatus {
    pub repository_slug: String,
    pub installation_id: i32,
    pub pr_number: String,
    pub pr_title: Option<String>,
    pub pr_url: Option<String>,
    pub commit_sha: Option<String>,
    pub is_pseudo_pr: bool,
    pub status: ProcessingStatus,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub analysis_error: Option<String>,
    pub extracted_decision_count: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLoadingJob {
    pub repository_slug: String,
    pub installation_id: i32,
    pub current_phase: LoadingPhase,
    pub next_page_to_process: i32,
    pub is_completed: bool,
    pub status: ProcessingStatus,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stored_embedding_decodes_pgvector_literal() {
        let embedding = StoredEmbedding::from_text(Some(" [0.5,-1,2.5e-1] "));
        assert_eq!(embedding, StoredEmbedding::Vector(vec![0.5, -1.0, 0.25]));
        assert_eq!(embedding.dimensions(), Some(3));

        assert_eq!(StoredEmbedding::from_text(None), StoredEmbedding::Absent);
        assert!(matches!(
            StoredEmbedding::from_text(Some("(1,2)")),
            StoredEmbedding::Malformed { .. }
        ));
    }

    #[test]
    fn metadata_text_matches_postgres_text_extraction() {
        let record = DecisionVectorRecord {
            id: "d-1".to_owned(),
            namespace: "acme/repo".to_owned(),
            embedding: StoredEmbedding::Absent,
            metadata: json!({"pr_number": 42, "title": "Use WAL", "draft": false, "gone": null}),
            created_at: None,
            updated_at: None,
        };

        assert_eq!(record.metadata_text("pr_number").as_deref(), Some("42"));
        assert_eq!(record.metadata_text("title").as_deref(), Some("Use WAL"));
        assert_eq!(record.metadata_text("draft").as_deref(), Some("false"));
        assert_eq!(record.metadata_text("gone"), None);
        assert_eq!(record.metadata_text("missing"), None);
    }

    #[test]
    fn processing_status_preserves_unknown_values() {
        assert_eq!(ProcessingStatus::from_db("completed"), ProcessingStatus::Completed);
        let other = ProcessingStatus::from_db("rate_limited");
        assert_eq!(other.as_str(), "rate_limited");
        assert_eq!(LoadingPhase::from_db("commits").as_str(), "commits");
    }
}
