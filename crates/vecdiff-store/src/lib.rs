use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use vecdiff_config::Secret;

mod model;
mod postgres;
mod repository;
mod sqlite;

pub use model::{
    DecisionVectorRecord, LoadingPhase, ProcessingStatus, RepositoryLoadingJob,
    RepositoryPrAnalysisStatus, StoredEmbedding, metadata_value_as_text,
};
pub use postgres::PostgresStoreSession;
pub use repository::{DecisionVectorFilter, find_by_namespace_and_field};
pub use sqlite::SqliteSnapshotStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error(
        "unsupported connection string scheme '{0}', expected postgres://, postgresql:// or sqlite://"
    )]
    UnsupportedScheme(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to lock shared resource: {0}")]
    LockPoisoned(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Where a connection string points, without the credentials it may carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Postgres,
    Sqlite(PathBuf),
}

impl StoreTarget {
    pub fn parse(connection_string: &str) -> Result<Self, StoreError> {
        let value = connection_string.trim();
        if value.starts_with("postgres://") || value.starts_with("postgresql://") {
            return Ok(Self::Postgres);
        }
        if let Some(path) = value
            .strip_prefix("sqlite://")
            .or_else(|| value.strip_prefix("sqlite:"))
        {
            if path.trim().is_empty() {
                return Err(StoreError::InvalidInput(
                    "sqlite connection string has no path".to_owned(),
                ));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }

        let scheme = value.split_once("://").map(|(scheme, _)| scheme).unwrap_or("");
        Err(StoreError::UnsupportedScheme(scheme.to_owned()))
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Postgres => StoreBackend::Postgres,
            Self::Sqlite(_) => StoreBackend::Sqlite,
        }
    }
}

/// An open, exclusively owned session against one store.
#[async_trait]
pub trait StoreSession: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn find_decision_vectors(
        &self,
        filter: &DecisionVectorFilter,
    ) -> Result<Vec<DecisionVectorRecord>, StoreError>;

    async fn list_pr_analysis_status(
        &self,
        repository_slug: &str,
        pr_number: &str,
    ) -> Result<Vec<RepositoryPrAnalysisStatus>, StoreError>;

    async fn list_loading_jobs(
        &self,
        repository_slug: &str,
    ) -> Result<Vec<RepositoryLoadingJob>, StoreError>;

    /// Releases the session. Consumes it, so a session is closed at most
    /// once; failures while closing are logged, never returned.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self, connection_string: &Secret) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// Picks the backend from the connection string scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionStringConnector;

#[async_trait]
impl StoreConnector for ConnectionStringConnector {
    async fn open(&self, connection_string: &Secret) -> Result<Box<dyn StoreSession>, StoreError> {
        match StoreTarget::parse(connection_string.expose())? {
            StoreTarget::Postgres => {
                let session = PostgresStoreSession::connect(connection_string).await?;
                Ok(Box::new(session))
            }
            StoreTarget::Sqlite(path) => {
                let session = SqliteSnapshotStore::open_existing(&path)?;
                Ok(Box::new(session))
            }
        }
    }
}
