use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::PlanError;
use crate::payload::{not_distinct, value_text, ColumnMap};
use crate::types::{
    EarlyFeedback, MergeMode, PlanContext, SourceRecord, SourceRow, TargetRecord,
};

/// Row access needed by the planner: one full source read, one scoped target
/// read. Implementations run queries or filter in-memory snapshots
/// (see `memory::MemoryScan`).
pub trait RelationScan {
    fn scan_source(&self) -> Result<Vec<SourceRecord>, PlanError>;

    fn scan_target(&self, filter: &TargetFilter) -> Result<Vec<TargetRecord>, PlanError>;
}

/// Which target rows a planning call needs. Stage boundaries are data: a
/// storage-backed scan can translate selectors into SARG filters or semi-joins,
/// an in-memory scan just evaluates them.
#[derive(Debug, Clone)]
pub enum TargetFilter {
    /// Entity-deleting modes must see the whole relation.
    All,
    /// Any row matching any selector belongs to an entity named in the source.
    Entities(Vec<KeySelector>),
}

impl TargetFilter {
    pub fn admits(&self, columns: &ColumnMap) -> bool {
        match self {
            Self::All => true,
            Self::Entities(selectors) => selectors.iter().any(|s| s.matches(columns)),
        }
    }
}

/// Distinct source value tuples over one key column set, matched null-safely
/// (`IS NOT DISTINCT FROM` semantics, so partially NULL keys still join).
#[derive(Debug, Clone)]
pub struct KeySelector {
    pub columns: Vec<String>,
    pub tuples: Vec<Vec<Value>>,
}

impl KeySelector {
    pub fn matches(&self, columns: &ColumnMap) -> bool {
        self.tuples.iter().any(|tuple| {
            self.columns.iter().zip(tuple).all(|(col, want)| {
                let have = columns.get(col).cloned().unwrap_or(Value::Null);
                not_distinct(&have, want)
            })
        })
    }
}

/// Build the target scoping filter from the prepared source batch.
pub fn build_target_filter(
    ctx: &PlanContext,
    sources: &[(SourceRow, Option<EarlyFeedback>)],
) -> TargetFilter {
    let needs_full_scan = matches!(
        ctx.mode,
        MergeMode::MergeEntityPatch | MergeMode::MergeEntityReplace
    ) && ctx.delete_mode.deletes_entities();
    if needs_full_scan {
        return TargetFilter::All;
    }

    let mut selectors: Vec<KeySelector> = Vec::new();

    for key_set in &ctx.lookup_key_sets {
        let selector = collect_tuples(key_set, sources, |row, col| {
            row.lookup_keys
                .get(col)
                .or_else(|| row.identity_keys.get(col))
                .cloned()
                .unwrap_or(Value::Null)
        });
        if !selector.tuples.is_empty() {
            selectors.push(selector);
        }
    }

    if !ctx.identity_columns.is_empty() {
        let selector = collect_tuples(&ctx.identity_columns, sources, |row, col| {
            row.identity_keys.get(col).cloned().unwrap_or(Value::Null)
        });
        if !selector.tuples.is_empty() {
            selectors.push(selector);
        }
    }

    TargetFilter::Entities(selectors)
}

fn collect_tuples(
    columns: &[String],
    sources: &[(SourceRow, Option<EarlyFeedback>)],
    get: impl Fn(&SourceRow, &str) -> Value,
) -> KeySelector {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut tuples: Vec<Vec<Value>> = Vec::new();

    for (row, _) in sources {
        let tuple: Vec<Value> = columns.iter().map(|col| get(row, col)).collect();
        if tuple.iter().all(Value::is_null) {
            continue;
        }
        let key = tuple.iter().map(value_text).collect::<Vec<_>>().join("\u{1f}");
        if seen.insert(key) {
            tuples.push(tuple);
        }
    }

    KeySelector {
        columns: columns.to_vec(),
        tuples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selector() -> KeySelector {
        KeySelector {
            columns: vec!["email".into(), "nr".into()],
            tuples: vec![vec![json!("x"), Value::Null], vec![json!("y"), json!(2)]],
        }
    }

    fn row(email: Value, nr: Value) -> ColumnMap {
        let mut m = ColumnMap::new();
        m.insert("email".into(), email);
        m.insert("nr".into(), nr);
        m
    }

    #[test]
    fn matching_is_null_safe() {
        let s = selector();
        assert!(s.matches(&row(json!("x"), Value::Null)));
        assert!(s.matches(&row(json!("y"), json!(2))));
        assert!(!s.matches(&row(json!("x"), json!(2))));
        assert!(!s.matches(&row(Value::Null, Value::Null)));
    }

    #[test]
    fn missing_columns_compare_as_null() {
        let s = selector();
        let mut m = ColumnMap::new();
        m.insert("email".into(), json!("x"));
        assert!(s.matches(&m));
    }
}
