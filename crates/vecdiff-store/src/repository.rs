use crate::{DecisionVectorRecord, StoreError, StoreSession};

/// `namespace = ? AND metadata ->> field_name = field_value`, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionVectorFilter {
    namespace: String,
    field_name: String,
    field_value: String,
}

impl DecisionVectorFilter {
    pub fn new(
        namespace: &str,
        field_name: &str,
        field_value: &str,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            namespace: required("namespace", namespace)?,
            field_name: required("field name", field_name)?,
            field_value: required("field value", field_value)?,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn field_value(&self) -> &str {
        &self.field_value
    }

    /// JSON path addressing the field as a single top-level key, quoted so
    /// keys containing dots are not split.
    pub(crate) fn sqlite_json_path(&self) -> String {
        let escaped = self.field_name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("$.\"{escaped}\"")
    }
}

pub async fn find_by_namespace_and_field(
    session: &dyn StoreSession,
    namespace: &str,
    field_name: &str,
    field_value: &str,
) -> Result<Vec<DecisionVectorRecord>, StoreError> {
    let filter = DecisionVectorFilter::new(namespace, field_name, field_value)?;
    let records = session.find_decision_vectors(&filter).await?;

    tracing::debug!(
        backend = session.backend().as_str(),
        namespace = filter.namespace(),
        field = filter.field_name(),
        value = filter.field_value(),
        matches = records.len(),
        "decision vector lookup finished"
    );

    Ok(records)
}

fn required(label: &str, value: &str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidInput(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_owned())
}
