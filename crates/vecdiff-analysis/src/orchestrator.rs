use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use vecdiff_config::{ComparisonSettings, Secret};
use vecdiff_infer::TextGenerator;
use vecdiff_store::{
    DecisionVectorRecord, StoreConnector, StoreError, StoreSession, StoredEmbedding,
    find_by_namespace_and_field,
};

use crate::StoreLabel;
use crate::narrative::describe_difference;
use crate::report::{
    ComparisonReport, ReportWriter, SelectedSummary, SimilarityOutcome, StoreSummary,
    UpstreamContext,
};
use crate::selection::{SelectedRecord, select_record};
use crate::similarity::{cosine_similarity, similarity_percent};

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store {store} unreachable: {source}")]
    StoreUnreachable { store: StoreLabel, source: StoreError },
    #[error("lookup in store {store} failed: {source}")]
    Lookup { store: StoreLabel, source: StoreError },
    #[error("{count} records matched in store {store} under the reject-ambiguous policy")]
    AmbiguousMatch { store: StoreLabel, count: usize },
    #[error("failed to write report to {}: {source}", .path.display())]
    ReportWrite { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRequest {
    pub namespace: String,
    pub identifier: String,
}

impl ComparisonRequest {
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }
}

/// Terminal state of one comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonState {
    ReportedEmpty,
    ReportedError,
    ReportedComplete,
}

impl ComparisonState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReportedEmpty => "reported-empty",
            Self::ReportedError => "reported-error",
            Self::ReportedComplete => "reported-complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub state: ComparisonState,
    pub report: ComparisonReport,
    pub report_path: PathBuf,
}

type OpenSessions = (Box<dyn StoreSession>, Box<dyn StoreSession>);

/// Drives one comparison: open both stores, look up the record on each side,
/// score, narrate, write the report, close both stores.
pub struct ComparisonOrchestrator {
    settings: ComparisonSettings,
    connector: Arc<dyn StoreConnector>,
    generator: Arc<dyn TextGenerator>,
    writer: Arc<dyn ReportWriter>,
}

impl ComparisonOrchestrator {
    pub fn new(
        settings: ComparisonSettings,
        connector: Arc<dyn StoreConnector>,
        generator: Arc<dyn TextGenerator>,
        writer: Arc<dyn ReportWriter>,
    ) -> Self {
        Self {
            settings,
            connector,
            generator,
            writer,
        }
    }

    pub async fn run(&self, request: &ComparisonRequest) -> Result<ComparisonOutcome, CompareError> {
        let namespace = required("namespace", &request.namespace)?;
        let identifier = required("identifier", &request.identifier)?;
        let field_name = required("match field", &self.settings.match_field)?;

        tracing::info!(
            namespace = %namespace,
            field = %field_name,
            identifier = %identifier,
            policy = self.settings.match_policy.as_str(),
            "starting comparison"
        );

        let (prod, dev) = self.open_sessions().await?;
        let result = self
            .compare(prod.as_ref(), dev.as_ref(), &namespace, &field_name, &identifier)
            .await;

        tokio::join!(prod.close(), dev.close());

        let outcome = result?;
        tracing::info!(
            state = outcome.state.as_str(),
            path = %outcome.report_path.display(),
            "comparison finished"
        );
        Ok(outcome)
    }

    async fn open_sessions(&self) -> Result<OpenSessions, CompareError> {
        let (prod, dev) = tokio::join!(
            self.open_store(StoreLabel::Prod, &self.settings.prod_connection_string),
            self.open_store(StoreLabel::Dev, &self.settings.dev_connection_string),
        );

        match (prod, dev) {
            (Ok(prod), Ok(dev)) => Ok((prod, dev)),
            (Ok(prod), Err(err)) => {
                prod.close().await;
                Err(err)
            }
            (Err(err), Ok(dev)) => {
                dev.close().await;
                Err(err)
            }
            (Err(err), Err(_)) => Err(err),
        }
    }

    async fn open_store(
        &self,
        store: StoreLabel,
        connection_string: &Secret,
    ) -> Result<Box<dyn StoreSession>, CompareError> {
        match self.connector.open(connection_string).await {
            Ok(session) => {
                tracing::info!(
                    store = %store,
                    backend = session.backend().as_str(),
                    "store session opened"
                );
                Ok(session)
            }
            Err(source) => {
                tracing::error!(store = %store, error = %source, "store unreachable");
                Err(CompareError::StoreUnreachable { store, source })
            }
        }
    }

    async fn compare(
        &self,
        prod: &dyn StoreSession,
        dev: &dyn StoreSession,
        namespace: &str,
        field_name: &str,
        identifier: &str,
    ) -> Result<ComparisonOutcome, CompareError> {
        let (prod_lookup, dev_lookup) = tokio::join!(
            find_by_namespace_and_field(prod, namespace, field_name, identifier),
            find_by_namespace_and_field(dev, namespace, field_name, identifier),
        );
        let prod_selected = self.select(StoreLabel::Prod, prod_lookup)?;
        let dev_selected = self.select(StoreLabel::Dev, dev_lookup)?;

        let (prod_upstream, dev_upstream) = tokio::join!(
            load_upstream(StoreLabel::Prod, prod, namespace, identifier),
            load_upstream(StoreLabel::Dev, dev, namespace, identifier),
        );

        let (state, similarity, narrative) = match (&prod_selected, &dev_selected) {
            (Some(prod_record), Some(dev_record)) => {
                let similarity = score_records(&prod_record.record, &dev_record.record);
                let narrative = describe_difference(
                    self.generator.as_ref(),
                    &self.settings,
                    &prod_record.record.metadata,
                    &dev_record.record.metadata,
                )
                .await;
                let state = match similarity {
                    SimilarityOutcome::Score(_) => ComparisonState::ReportedComplete,
                    SimilarityOutcome::Unavailable { .. } | SimilarityOutcome::NotComputed => {
                        ComparisonState::ReportedError
                    }
                };
                (state, similarity, Some(narrative))
            }
            _ => {
                tracing::warn!(
                    prod_found = prod_selected.is_some(),
                    dev_found = dev_selected.is_some(),
                    "record missing from at least one store, skipping similarity and narrative"
                );
                (ComparisonState::ReportedEmpty, SimilarityOutcome::NotComputed, None)
            }
        };

        let report = ComparisonReport {
            namespace: namespace.to_owned(),
            field_name: field_name.to_owned(),
            identifier: identifier.to_owned(),
            match_policy: self.settings.match_policy,
            generated_at: Utc::now(),
            stores: vec![
                store_summary(StoreLabel::Prod, prod, prod_selected.as_ref(), prod_upstream),
                store_summary(StoreLabel::Dev, dev, dev_selected.as_ref(), dev_upstream),
            ],
            similarity,
            narrative,
        };

        let report_path = self.settings.report_path.clone();
        self.writer
            .write_report(&report_path, &report.render_markdown())
            .map_err(|source| CompareError::ReportWrite {
                path: report_path.clone(),
                source,
            })?;
        tracing::info!(path = %report_path.display(), "report written");

        Ok(ComparisonOutcome {
            state,
            report,
            report_path,
        })
    }

    fn select(
        &self,
        store: StoreLabel,
        lookup: Result<Vec<DecisionVectorRecord>, StoreError>,
    ) -> Result<Option<SelectedRecord>, CompareError> {
        let records = lookup.map_err(|source| CompareError::Lookup { store, source })?;
        tracing::info!(store = %store, matches = records.len(), "decision vectors matched");

        let selected = select_record(records, self.settings.match_policy).map_err(|err| {
            CompareError::AmbiguousMatch {
                store,
                count: err.count,
            }
        })?;
        if let Some(selected) = &selected
            && selected.is_ambiguous()
        {
            tracing::warn!(
                store = %store,
                matches = selected.match_count,
                selected = %selected.record.id,
                policy = selected.policy.as_str(),
                "multiple records matched, one selected by policy"
            );
        }
        Ok(selected)
    }
}

fn required(label: &str, value: &str) -> Result<String, CompareError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CompareError::InvalidInput(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_owned())
}

fn score_records(prod: &DecisionVectorRecord, dev: &DecisionVectorRecord) -> SimilarityOutcome {
    let vectors = embedding_vector(StoreLabel::Prod, prod)
        .and_then(|left| embedding_vector(StoreLabel::Dev, dev).map(|right| (left, right)));

    let outcome = match vectors {
        Ok((left, right)) => match cosine_similarity(left, right) {
            Ok(score) => SimilarityOutcome::Score(score),
            Err(err) => SimilarityOutcome::Unavailable {
                reason: err.to_string(),
            },
        },
        Err(reason) => SimilarityOutcome::Unavailable { reason },
    };

    match &outcome {
        SimilarityOutcome::Score(score) => {
            tracing::info!(similarity = %similarity_percent(*score), "similarity computed");
        }
        SimilarityOutcome::Unavailable { reason } => {
            tracing::warn!(reason = %reason, "similarity unavailable");
        }
        SimilarityOutcome::NotComputed => {}
    }
    outcome
}

fn embedding_vector(store: StoreLabel, record: &DecisionVectorRecord) -> Result<&[f32], String> {
    match &record.embedding {
        StoredEmbedding::Vector(values) => Ok(values.as_slice()),
        StoredEmbedding::Absent => Err(format!(
            "record `{}` in store {store} has no embedding",
            record.id
        )),
        StoredEmbedding::Malformed { reason, .. } => Err(format!(
            "record `{}` in store {store} has a malformed embedding: {reason}",
            record.id
        )),
    }
}

/// Context tables are optional; any failure is reported, never raised.
async fn load_upstream(
    store: StoreLabel,
    session: &dyn StoreSession,
    repository_slug: &str,
    pr_number: &str,
) -> UpstreamContext {
    let statuses = session.list_pr_analysis_status(repository_slug, pr_number).await;
    let jobs = session.list_loading_jobs(repository_slug).await;

    match (statuses, jobs) {
        (Ok(statuses), Ok(jobs)) => UpstreamContext::Available { statuses, jobs },
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(store = %store, error = %err, "upstream analysis context unavailable");
            UpstreamContext::Unavailable {
                reason: err.to_string(),
            }
        }
    }
}

fn store_summary(
    label: StoreLabel,
    session: &dyn StoreSession,
    selected: Option<&SelectedRecord>,
    upstream: UpstreamContext,
) -> StoreSummary {
    StoreSummary {
        label,
        backend: session.backend(),
        match_count: selected.map_or(0, |selected| selected.match_count),
        selected: selected.map(|selected| SelectedSummary {
            id: selected.record.id.clone(),
            last_touched_at: selected.record.last_touched_at(),
            dimensions: selected.record.embedding.dimensions(),
        }),
        upstream,
    }
}
