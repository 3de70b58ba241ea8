use serde_json::Value;
use vecdiff_config::ComparisonSettings;
use vecdiff_infer::{GenerationRequest, TextGenerator};

pub const NARRATIVE_INSTRUCTION: &str =
    "Compare the following two descriptions and provide a summary of the differences:";

const EMPTY_RESPONSE_REASON: &str = "empty response from model";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrativeOutcome {
    Generated(String),
    Degraded { reason: String },
}

impl NarrativeOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }

    /// Text as it appears in the report.
    pub fn display_text(&self) -> String {
        match self {
            Self::Generated(text) => text.clone(),
            Self::Degraded { reason } => format!("Analysis generation failed: {reason}"),
        }
    }
}

pub fn build_comparison_prompt(left: &Value, right: &Value) -> String {
    format!(
        "{NARRATIVE_INSTRUCTION} {} vs {}",
        pretty_sorted(left),
        pretty_sorted(right)
    )
}

/// Asks the generator for a prose diff of two metadata documents. Failures
/// never escape; they come back as [`NarrativeOutcome::Degraded`].
pub async fn describe_difference(
    generator: &dyn TextGenerator,
    settings: &ComparisonSettings,
    left: &Value,
    right: &Value,
) -> NarrativeOutcome {
    let request = GenerationRequest {
        prompt: build_comparison_prompt(left, right),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    };

    match generator.generate(&request).await {
        Ok(text) if text.trim().is_empty() => {
            tracing::warn!(model = %settings.model_id, "narrative generation returned no text");
            NarrativeOutcome::Degraded {
                reason: EMPTY_RESPONSE_REASON.to_owned(),
            }
        }
        Ok(text) => NarrativeOutcome::Generated(text.trim().to_owned()),
        Err(err) => {
            tracing::warn!(
                model = %settings.model_id,
                error = %err,
                "narrative generation failed"
            );
            NarrativeOutcome::Degraded {
                reason: err.to_string(),
            }
        }
    }
}

fn pretty_sorted(value: &Value) -> String {
    let canonical = sort_keys(value);
    serde_json::to_string_pretty(&canonical).unwrap_or_else(|_| canonical.to_string())
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
