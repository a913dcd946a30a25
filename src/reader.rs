use std::collections::BTreeMap;

use crate::payload::{map_key, value_text, ColumnMap};
use crate::range::TimePoint;
use crate::types::{
    EarlyFeedback, PlanContext, SourceRecord, SourceRow, TargetRecord, TargetRow,
};

/// Materialize scanned source records into prepared rows.
///
/// Rows with unusable temporal bounds are not dropped: they come back with an
/// `ERROR` early feedback and are withdrawn from the planning pipeline while
/// still being accounted for in the output.
pub fn prepare_source(
    records: Vec<SourceRecord>,
    ctx: &PlanContext,
) -> Vec<(SourceRow, Option<EarlyFeedback>)> {
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let row_id = record
            .columns
            .get(&ctx.row_id_column)
            .and_then(|v| v.as_i64());
        let mut feedback = row_id.is_none().then(|| {
            EarlyFeedback::error(format!(
                "Source row has no usable integer value in {:?}",
                ctx.row_id_column
            ))
        });
        let row_id = row_id.unwrap_or(0);

        let causal_id = ctx
            .founding_id_column
            .as_ref()
            .and_then(|col| record.columns.get(col))
            .filter(|v| !v.is_null())
            .map(value_text)
            .unwrap_or_else(|| row_id.to_string());

        let (valid_from, valid_until) = match normalize_bounds(&record, ctx) {
            Ok(bounds) => bounds,
            Err(message) => {
                if feedback.is_none() {
                    feedback = Some(EarlyFeedback::error(message));
                }
                (TimePoint::NegInfinity, TimePoint::Infinity)
            }
        };

        let (identity_keys, lookup_keys, data, ephemeral, stable_pk) =
            split_source_columns(&record.columns, ctx);

        let is_identifiable = ctx
            .identity_columns
            .iter()
            .any(|c| identity_keys.get(c).map_or(false, |v| !v.is_null()));
        let lookup_keys_all_null = ctx
            .all_lookup_cols
            .iter()
            .all(|c| lookup_keys.get(c).map_or(true, |v| v.is_null()));

        rows.push((
            SourceRow {
                row_id,
                causal_id,
                valid_from,
                valid_until,
                identity_keys,
                lookup_keys,
                data,
                ephemeral,
                stable_pk,
                is_identifiable,
                lookup_keys_all_null,
            },
            feedback,
        ));
    }

    rows.sort_by_key(|(row, _)| row.row_id);
    rows
}

/// Resolve the end bound from whichever of `valid_until` / `valid_to` the row
/// carries, and apply the temporal consistency predicate: when both are
/// present they must satisfy `valid_until == successor(valid_to)`; a NULL on
/// either side is consistent by convention.
fn normalize_bounds(
    record: &SourceRecord,
    ctx: &PlanContext,
) -> Result<(TimePoint, TimePoint), String> {
    let from = record.valid_from.ok_or_else(|| {
        format!(
            "Source row has NULL {:?}",
            ctx.era.valid_from_col
        )
    })?;

    let until = match (record.valid_until, record.valid_to) {
        (Some(until), Some(to)) => {
            let expected = to.successor().map_err(|e| e.to_string())?;
            if until != expected {
                return Err(format!(
                    "Source row is temporally inconsistent: {:?} = {} disagrees with {:?} = {}",
                    ctx.era.valid_until_col,
                    until,
                    ctx.era.valid_to_col.as_deref().unwrap_or("valid_to"),
                    to,
                ));
            }
            until
        }
        (Some(until), None) => until,
        (None, Some(to)) => to.successor().map_err(|e| e.to_string())?,
        (None, None) => {
            return Err(format!(
                "Source row has no end bound: both {:?} and the mirror column are NULL",
                ctx.era.valid_until_col
            ))
        }
    };

    if from >= until {
        return Err(format!(
            "Source row has an empty validity interval: [{from},{until})"
        ));
    }

    Ok((from, until))
}

fn split_source_columns(
    columns: &ColumnMap,
    ctx: &PlanContext,
) -> (ColumnMap, ColumnMap, ColumnMap, ColumnMap, ColumnMap) {
    let mut identity = ColumnMap::new();
    let mut stable_pk = ColumnMap::new();
    let mut lookup = ColumnMap::new();
    let mut data = ColumnMap::new();
    let mut ephemeral = ColumnMap::new();

    for col in &ctx.identity_columns {
        match columns.get(col) {
            Some(v) => {
                identity.insert(col.clone(), v.clone());
                stable_pk.insert(col.clone(), v.clone());
            }
            None => {
                stable_pk.insert(col.clone(), serde_json::Value::Null);
            }
        }
    }
    for col in &ctx.all_lookup_cols {
        if let Some(v) = columns.get(col) {
            lookup.insert(col.clone(), v.clone());
        }
    }
    for col in &ctx.source_data_cols {
        if let Some(v) = columns.get(col) {
            data.insert(col.clone(), v.clone());
        }
    }
    for col in &ctx.ephemeral_in_source {
        if let Some(v) = columns.get(col) {
            ephemeral.insert(col.clone(), v.clone());
        }
    }

    (identity, lookup, data, ephemeral, stable_pk)
}

/// Materialize scanned target records, deduplicated on `(identity, valid_from)`
/// and deterministically ordered.
pub fn prepare_target(records: Vec<TargetRecord>, ctx: &PlanContext) -> Vec<TargetRow> {
    let mut deduped: BTreeMap<(String, TimePoint), TargetRow> = BTreeMap::new();

    for record in records {
        let mut identity = ColumnMap::new();
        let mut lookup = ColumnMap::new();
        let mut data = ColumnMap::new();
        let mut ephemeral = ColumnMap::new();
        let mut stable_pk = ColumnMap::new();

        for col in &ctx.identity_columns {
            if let Some(v) = record.columns.get(col) {
                identity.insert(col.clone(), v.clone());
            }
        }
        for col in &ctx.all_lookup_cols {
            if let Some(v) = record.columns.get(col) {
                lookup.insert(col.clone(), v.clone());
            }
        }
        for col in &ctx.target_data_cols {
            if let Some(v) = record.columns.get(col) {
                data.insert(col.clone(), v.clone());
            }
        }
        for col in &ctx.ephemeral_in_target {
            if let Some(v) = record.columns.get(col) {
                ephemeral.insert(col.clone(), v.clone());
            }
        }
        for col in &ctx.stable_pk_cols {
            if let Some(v) = record.columns.get(col) {
                stable_pk.insert(col.clone(), v.clone());
            }
        }

        let tag = if ctx.identity_columns.is_empty() {
            map_key(&lookup)
        } else {
            map_key(&identity)
        };

        deduped.entry((tag, record.valid_from)).or_insert(TargetRow {
            valid_from: record.valid_from,
            valid_until: record.valid_until,
            identity_keys: identity,
            lookup_keys: lookup,
            data,
            ephemeral,
            stable_pk,
        });
    }

    deduped.into_values().collect()
}
