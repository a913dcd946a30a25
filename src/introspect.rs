use std::collections::BTreeSet;

use crate::error::PlanError;
use crate::range::RangeSubtype;
use crate::types::{EraMeta, IdentityStrategy, MergeConfig, PlanContext};

/// Catalog access needed by the planner. Implementations introspect a live
/// catalog or serve static metadata (see `memory::MemoryCatalog`).
pub trait RelationIntrospector {
    /// Era metadata for a relation; a missing era is fatal.
    fn lookup_era(&self, relation: &str, era_name: &str) -> Result<EraMeta, PlanError>;

    /// All column names of a relation, temporal columns included.
    fn relation_columns(&self, relation: &str) -> Result<Vec<String>, PlanError>;

    /// Primary key column names of a relation.
    fn primary_key_columns(&self, relation: &str) -> Result<Vec<String>, PlanError>;
}

/// Resolve and validate all metadata for one planning call.
///
/// Every fatal precondition lives here so the downstream pipeline can assume
/// a coherent column classification.
pub fn build_plan_context(
    introspector: &dyn RelationIntrospector,
    config: &MergeConfig,
) -> Result<PlanContext, PlanError> {
    let era = introspector.lookup_era(&config.target_relation, &config.era_name)?;

    if let Some(ref mirror) = era.valid_to_col {
        if era.subtype == RangeSubtype::Continuous {
            return Err(PlanError::MirrorOnContinuousRange {
                column: mirror.clone(),
            });
        }
    }

    let identity_columns = config.identity_columns.clone();
    let lookup_key_sets: Vec<Vec<String>> = config
        .lookup_keys
        .iter()
        .filter(|set| !set.is_empty())
        .cloned()
        .collect();

    let strategy = match (!identity_columns.is_empty(), !lookup_key_sets.is_empty()) {
        (true, true) => IdentityStrategy::Hybrid,
        (true, false) => IdentityStrategy::IdentityOnly,
        (false, true) => IdentityStrategy::LookupOnly,
        (false, false) => return Err(PlanError::NoEntityKey),
    };

    let all_lookup_cols: Vec<String> = lookup_key_sets
        .iter()
        .flatten()
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();

    let mut temporal_cols = vec![era.valid_from_col.clone()];
    if let Some(ref vt) = era.valid_to_col {
        temporal_cols.push(vt.clone());
    }
    temporal_cols.push(era.valid_until_col.clone());

    let source_cols = introspector.relation_columns(&config.source_relation)?;
    let target_cols = introspector.relation_columns(&config.target_relation)?;

    if !source_cols.contains(&config.row_id_column) {
        return Err(PlanError::RowIdColumnMissing {
            relation: config.source_relation.clone(),
            column: config.row_id_column.clone(),
        });
    }

    if let Some(ref founding) = config.founding_id_column {
        if !source_cols.contains(founding) {
            return Err(PlanError::FoundingColumnMissing {
                relation: config.source_relation.clone(),
                column: founding.clone(),
            });
        }
        if all_lookup_cols.contains(founding) {
            return Err(PlanError::FoundingColumnIsLookupKey {
                column: founding.clone(),
            });
        }
    }

    if !source_cols.contains(&era.valid_from_col) {
        return Err(PlanError::SourceTemporalMissing {
            relation: config.source_relation.clone(),
            column: era.valid_from_col.clone(),
        });
    }
    let source_has_until = source_cols.contains(&era.valid_until_col);
    let source_has_to = era
        .valid_to_col
        .as_ref()
        .map(|c| source_cols.contains(c))
        .unwrap_or(false);
    if !source_has_until && !source_has_to {
        return Err(PlanError::SourceEndBoundMissing {
            relation: config.source_relation.clone(),
            valid_until: era.valid_until_col.clone(),
            valid_to: era
                .valid_to_col
                .clone()
                .unwrap_or_else(|| "(no mirror column)".to_string()),
        });
    }

    for col in &identity_columns {
        if !target_cols.contains(col) {
            return Err(PlanError::ColumnMissing {
                relation: config.target_relation.clone(),
                column: col.clone(),
            });
        }
    }
    for col in &all_lookup_cols {
        if !target_cols.contains(col) {
            return Err(PlanError::ColumnMissing {
                relation: config.target_relation.clone(),
                column: col.clone(),
            });
        }
        if !source_cols.contains(col) {
            return Err(PlanError::ColumnMissing {
                relation: config.source_relation.clone(),
                column: col.clone(),
            });
        }
    }

    let mut ephemeral_columns: Vec<String> = config.ephemeral_columns.clone();
    ephemeral_columns.sort();
    ephemeral_columns.dedup();
    for col in &ephemeral_columns {
        if temporal_cols.contains(col) {
            return Err(PlanError::EphemeralTemporalColumn { column: col.clone() });
        }
    }

    let pk_cols = introspector.primary_key_columns(&config.target_relation)?;
    let stable_pk_cols: Vec<String> = pk_cols
        .iter()
        .filter(|c| {
            !identity_columns.contains(c)
                && !all_lookup_cols.contains(c)
                && !temporal_cols.contains(c)
        })
        .cloned()
        .collect();

    let segment_key_cols: Vec<String> = identity_columns
        .iter()
        .chain(all_lookup_cols.iter())
        .chain(pk_cols.iter())
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();
    let entity_key_cols: Vec<String> = segment_key_cols
        .iter()
        .filter(|c| !temporal_cols.contains(c))
        .cloned()
        .collect();

    let is_bookkeeping = |col: &String| {
        *col == config.row_id_column
            || config.founding_id_column.as_deref() == Some(col.as_str())
    };
    let source_data_cols: Vec<String> = source_cols
        .iter()
        .filter(|c| {
            !segment_key_cols.contains(c)
                && !temporal_cols.contains(c)
                && !ephemeral_columns.contains(c)
                && !is_bookkeeping(c)
        })
        .cloned()
        .collect();
    let target_data_cols: Vec<String> = target_cols
        .iter()
        .filter(|c| {
            !segment_key_cols.contains(c)
                && !temporal_cols.contains(c)
                && !ephemeral_columns.contains(c)
        })
        .cloned()
        .collect();

    let ephemeral_in_source: Vec<String> = ephemeral_columns
        .iter()
        .filter(|c| source_cols.contains(*c))
        .cloned()
        .collect();
    let ephemeral_in_target: Vec<String> = ephemeral_columns
        .iter()
        .filter(|c| target_cols.contains(*c))
        .cloned()
        .collect();

    Ok(PlanContext {
        mode: config.mode,
        delete_mode: config.delete_mode,
        era,
        identity_columns,
        lookup_key_sets,
        all_lookup_cols,
        entity_key_cols,
        segment_key_cols,
        stable_pk_cols,
        temporal_cols,
        ephemeral_columns,
        strategy,
        row_id_column: config.row_id_column.clone(),
        founding_id_column: config.founding_id_column.clone(),
        source_data_cols,
        target_data_cols,
        ephemeral_in_source,
        ephemeral_in_target,
        log_trace: config.log_trace,
    })
}
