use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use vecdiff_config::MatchPolicy;
use vecdiff_store::{RepositoryLoadingJob, RepositoryPrAnalysisStatus, StoreBackend};

use crate::narrative::NarrativeOutcome;
use crate::similarity::similarity_percent;
use crate::StoreLabel;

pub const REPORT_HEADING: &str = "# Comparison Description";

/// Persists a rendered report. Each write replaces the previous artifact.
pub trait ReportWriter: Send + Sync {
    fn write_report(&self, path: &Path, contents: &str) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileReportWriter;

impl ReportWriter for FileReportWriter {
    fn write_report(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSummary {
    pub label: StoreLabel,
    pub backend: StoreBackend,
    pub match_count: usize,
    pub selected: Option<SelectedSummary>,
    pub upstream: UpstreamContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSummary {
    pub id: String,
    pub last_touched_at: Option<DateTime<Utc>>,
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityOutcome {
    Score(f64),
    Unavailable { reason: String },
    NotComputed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamContext {
    Available {
        statuses: Vec<RepositoryPrAnalysisStatus>,
        jobs: Vec<RepositoryLoadingJob>,
    },
    Unavailable {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub namespace: String,
    pub field_name: String,
    pub identifier: String,
    pub match_policy: MatchPolicy,
    pub generated_at: DateTime<Utc>,
    pub stores: Vec<StoreSummary>,
    pub similarity: SimilarityOutcome,
    pub narrative: Option<NarrativeOutcome>,
}

impl ComparisonReport {
    pub fn missing_stores(&self) -> Vec<StoreLabel> {
        self.stores
            .iter()
            .filter(|store| store.selected.is_none())
            .map(|store| store.label)
            .collect()
    }

    pub fn render_markdown(&self) -> String {
        let mut lines = vec![
            REPORT_HEADING.to_owned(),
            String::new(),
            format!("- Namespace: `{}`", self.namespace),
            format!("- Match: `{}` = `{}`", self.field_name, self.identifier),
            format!("- Match policy: {}", self.match_policy.as_str()),
            format!("- Generated at: {}", format_timestamp(self.generated_at)),
        ];

        self.push_stores(&mut lines);
        self.push_similarity(&mut lines);
        self.push_narrative(&mut lines);
        self.push_upstream(&mut lines);

        let mut markdown = lines.join("\n");
        markdown.push('\n');
        markdown
    }

    fn push_stores(&self, lines: &mut Vec<String>) {
        lines.push(String::new());
        lines.push("## Stores".to_owned());
        lines.push(String::new());
        lines.push(
            "| Store | Backend | Matches | Selected record | Last updated | Dimensions |".to_owned(),
        );
        lines.push("|---|---|---|---|---|---|".to_owned());
        for store in &self.stores {
            let (id, touched, dimensions) = match &store.selected {
                Some(selected) => (
                    format!("`{}`", selected.id),
                    selected
                        .last_touched_at
                        .map(format_timestamp)
                        .unwrap_or_else(|| "-".to_owned()),
                    selected
                        .dimensions
                        .map(|count| count.to_string())
                        .unwrap_or_else(|| "-".to_owned()),
                ),
                None => ("-".to_owned(), "-".to_owned(), "-".to_owned()),
            };
            lines.push(format!(
                "| {} | {} | {} | {id} | {touched} | {dimensions} |",
                store.label,
                store.backend.as_str(),
                store.match_count
            ));
        }

        for store in &self.stores {
            match &store.selected {
                None => {
                    lines.push(String::new());
                    lines.push(format!("No matching record in store `{}`.", store.label));
                }
                Some(selected) if store.match_count > 1 => {
                    lines.push(String::new());
                    lines.push(format!(
                        "{} records matched in store `{}`; `{}` was selected by the {} policy.",
                        store.match_count,
                        store.label,
                        selected.id,
                        self.match_policy.as_str()
                    ));
                }
                Some(_) => {}
            }
        }
    }

    fn push_similarity(&self, lines: &mut Vec<String>) {
        lines.push(String::new());
        lines.push("## Similarity".to_owned());
        lines.push(String::new());
        lines.push(match &self.similarity {
            SimilarityOutcome::Score(score) => format!("Similarity: {}", similarity_percent(*score)),
            SimilarityOutcome::Unavailable { reason } => format!("Similarity unavailable: {reason}"),
            SimilarityOutcome::NotComputed => {
                "Not computed: a record is missing from at least one store.".to_owned()
            }
        });
    }

    fn push_narrative(&self, lines: &mut Vec<String>) {
        lines.push(String::new());
        lines.push("## Differences".to_owned());
        lines.push(String::new());
        lines.push(match &self.narrative {
            Some(narrative) => narrative.display_text(),
            None => "Not generated: nothing to compare.".to_owned(),
        });
    }

    fn push_upstream(&self, lines: &mut Vec<String>) {
        lines.push(String::new());
        lines.push("## Upstream analysis".to_owned());
        for store in &self.stores {
            lines.push(String::new());
            lines.push(format!("### {}", store.label));
            lines.push(String::new());
            match &store.upstream {
                UpstreamContext::Unavailable { reason } => {
                    lines.push(format!("Context unavailable: {reason}"));
                }
                UpstreamContext::Available { statuses, jobs }
                    if statuses.is_empty() && jobs.is_empty() =>
                {
                    lines.push("No analysis status or loading job recorded.".to_owned());
                }
                UpstreamContext::Available { statuses, jobs } => {
                    lines.extend(statuses.iter().map(status_line));
                    lines.extend(jobs.iter().map(job_line));
                }
            }
        }
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn status_line(status: &RepositoryPrAnalysisStatus) -> String {
    let kind = if status.is_pseudo_pr { "Pseudo PR" } else { "PR" };
    let title = status
        .pr_title
        .as_deref()
        .map(|title| format!(" \"{title}\""))
        .unwrap_or_default();

    let mut line = format!(
        "- {kind} #{}{title} (installation {}): {}",
        status.pr_number,
        status.installation_id,
        status.status.as_str()
    );
    if let Some(count) = status.extracted_decision_count {
        line.push_str(&format!(", {count} decisions extracted"));
    }
    if let Some(at) = status.last_analyzed_at {
        line.push_str(&format!(", last analyzed {}", format_timestamp(at)));
    }
    if let Some(sha) = &status.commit_sha {
        line.push_str(&format!(", commit `{sha}`"));
    }
    if let Some(error) = &status.analysis_error {
        line.push_str(&format!(", error: {error}"));
    }
    line
}

fn job_line(job: &RepositoryLoadingJob) -> String {
    let progress = if job.is_completed {
        "completed".to_owned()
    } else {
        format!("next page {}", job.next_page_to_process)
    };

    let mut line = format!(
        "- Loading job (installation {}): phase {}, {progress}, status {}",
        job.installation_id,
        job.current_phase.as_str(),
        job.status.as_str()
    );
    if let Some(error) = &job.error_message {
        line.push_str(&format!(", error: {error}"));
    }
    line
}
