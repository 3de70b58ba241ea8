use std::fmt;

mod narrative;
mod orchestrator;
mod report;
mod selection;
mod similarity;

pub use narrative::{
    NARRATIVE_INSTRUCTION, NarrativeOutcome, build_comparison_prompt, describe_difference,
};
pub use orchestrator::{
    CompareError, ComparisonOrchestrator, ComparisonOutcome, ComparisonRequest, ComparisonState,
};
pub use report::{
    ComparisonReport, FileReportWriter, REPORT_HEADING, ReportWriter, SelectedSummary,
    SimilarityOutcome, StoreSummary, UpstreamContext,
};
pub use selection::{AmbiguousMatch, SelectedRecord, select_record};
pub use similarity::{SimilarityError, cosine_similarity, similarity_percent};

/// The two environments being compared. `Prod` is store A, `Dev` store B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreLabel {
    Prod,
    Dev,
}

impl StoreLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
        }
    }
}

impl fmt::Display for StoreLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
