use thiserror::Error;
use vecdiff_config::MatchPolicy;
use vecdiff_store::DecisionVectorRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRecord {
    pub record: DecisionVectorRecord,
    pub match_count: usize,
    pub policy: MatchPolicy,
}

impl SelectedRecord {
    pub fn is_ambiguous(&self) -> bool {
        self.match_count > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{count} records matched under the reject-ambiguous policy")]
pub struct AmbiguousMatch {
    pub count: usize,
}

/// Picks one record out of a lookup result. `Ok(None)` means nothing matched.
pub fn select_record(
    records: Vec<DecisionVectorRecord>,
    policy: MatchPolicy,
) -> Result<Option<SelectedRecord>, AmbiguousMatch> {
    let match_count = records.len();
    if match_count > 1 && policy == MatchPolicy::RejectAmbiguous {
        return Err(AmbiguousMatch { count: match_count });
    }

    let index = match policy {
        MatchPolicy::MostRecentlyUpdated => most_recent_index(&records),
        MatchPolicy::First | MatchPolicy::RejectAmbiguous => 0,
    };

    Ok(records
        .into_iter()
        .nth(index)
        .map(|record| SelectedRecord {
            record,
            match_count,
            policy,
        }))
}

/// Newest `updated_at`, falling back to `created_at`. Undated records lose to
/// dated ones and ties keep store order.
fn most_recent_index(records: &[DecisionVectorRecord]) -> usize {
    let mut best = 0;
    for (index, record) in records.iter().enumerate().skip(1) {
        if record.last_touched_at() > records[best].last_touched_at() {
            best = index;
        }
    }
    best
}
