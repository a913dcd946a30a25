use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{json, Value};

use crate::payload::{maps_equal_ignoring_nulls, merge_all, ColumnMap};
use crate::range::{AllenRelation, Interval, TimePoint};
use crate::sweep::EntityGroup;
use crate::types::{
    CoalescedSegment, DiffRow, EarlyFeedback, MatchedSourceRow, PlanAction, PlanContext, PlanOp,
    UpdateEffect,
};

/// Full outer join of coalesced segments against the original target rows on
/// `(grouping_key, ancestor_valid_from == target.valid_from)`. Original rows
/// no segment derives from become deletions.
pub fn compute_diff(
    coalesced: Vec<CoalescedSegment>,
    group: &EntityGroup,
    tombstoned: &BTreeMap<TimePoint, Vec<i64>>,
) -> Vec<DiffRow> {
    let target_by_from: HashMap<TimePoint, &crate::types::TargetRow> = group
        .target_rows
        .iter()
        .map(|tr| (tr.valid_from, tr))
        .collect();

    let mut matched_froms: BTreeSet<TimePoint> = BTreeSet::new();
    let mut diffs = Vec::with_capacity(coalesced.len() + group.target_rows.len());

    for cs in coalesced {
        let target = cs
            .ancestor_valid_from
            .and_then(|from| target_by_from.get(&from).copied());

        if let Some(tr) = target {
            matched_froms.insert(tr.valid_from);
            diffs.push(DiffRow {
                grouping_key: cs.grouping_key,
                is_new_entity: cs.is_new_entity,
                identity_keys: cs.identity_keys,
                causal_id: cs.causal_id,
                row_ids: cs.row_ids,
                final_valid: Some(cs.valid),
                final_data: cs.data,
                ephemeral: cs.ephemeral,
                target_valid: Some(tr.validity()),
                target_data: Some(tr.data.clone()),
                target_ephemeral: Some(tr.ephemeral.clone()),
                target_lookup_keys: Some(tr.lookup_keys.clone()),
                target_stable_pk: Some(tr.stable_pk.clone()),
                has_source_coverage: cs.has_source_coverage,
                s_t_relation: cs.s_t_relation,
            });
        } else {
            diffs.push(DiffRow {
                grouping_key: cs.grouping_key,
                is_new_entity: cs.is_new_entity,
                identity_keys: cs.identity_keys,
                causal_id: cs.causal_id,
                row_ids: cs.row_ids,
                final_valid: Some(cs.valid),
                final_data: cs.data,
                ephemeral: cs.ephemeral,
                target_valid: None,
                target_data: None,
                target_ephemeral: None,
                target_lookup_keys: None,
                target_stable_pk: None,
                has_source_coverage: cs.has_source_coverage,
                s_t_relation: cs.s_t_relation,
            });
        }
    }

    for tr in &group.target_rows {
        if matched_froms.contains(&tr.valid_from) {
            continue;
        }
        diffs.push(DiffRow {
            grouping_key: group.grouping_key.clone(),
            is_new_entity: false,
            identity_keys: tr.identity_keys.clone(),
            causal_id: None,
            row_ids: tombstoned.get(&tr.valid_from).cloned().unwrap_or_default(),
            final_valid: None,
            final_data: None,
            ephemeral: None,
            target_valid: Some(tr.validity()),
            target_data: Some(tr.data.clone()),
            target_ephemeral: Some(tr.ephemeral.clone()),
            target_lookup_keys: Some(tr.lookup_keys.clone()),
            target_stable_pk: Some(tr.stable_pk.clone()),
            has_source_coverage: false,
            s_t_relation: None,
        });
    }

    diffs
}

/// Turn diff rows into plan operations: elect one UPDATE per split original
/// row, classify the rest, and assemble the output records.
pub fn classify_operations(
    diffs: Vec<DiffRow>,
    group: &EntityGroup,
    ctx: &PlanContext,
) -> Vec<PlanOp> {
    let group_lookup = group_lookup_value(group, ctx);
    let update_ranks = elect_updates(&diffs);
    let mut ops = Vec::with_capacity(diffs.len());

    for (i, d) in diffs.iter().enumerate() {
        let rank = update_ranks.get(&i).copied();
        let (operation, update_effect) = classify_single_diff(d, rank);

        // Original rows untouched by any source row are not part of the plan.
        if operation == PlanAction::SkipIdentical && !d.has_source_coverage {
            continue;
        }

        let b_a_relation = match (d.target_valid, d.final_valid) {
            (Some(tv), Some(fv)) => Some(AllenRelation::of(&tv, &fv)),
            _ => None,
        };

        let entity_keys = {
            let mut ek = d.identity_keys.clone();
            if let Some(Value::Object(ref lk)) = group_lookup {
                for (k, v) in lk {
                    ek.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            if let Some(ref pk) = d.target_stable_pk {
                for (k, v) in pk {
                    ek.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            (!ek.is_empty()).then(|| Value::Object(ek))
        };
        let identity_keys =
            (!d.identity_keys.is_empty()).then(|| Value::Object(d.identity_keys.clone()));

        let trace = ctx.log_trace.then(|| {
            json!({
                "s_t_relation": d.s_t_relation.map(|r| r.as_str()),
                "b_a_relation": b_a_relation.map(|r| r.as_str()),
                "update_rank": rank,
                "has_source_coverage": d.has_source_coverage,
            })
        });

        if operation == PlanAction::Delete {
            ops.push(PlanOp {
                plan_op_seq: 0,
                row_ids: d.row_ids.clone(),
                operation,
                update_effect: None,
                is_new_entity: d.is_new_entity,
                entity_keys,
                identity_keys,
                lookup_keys: group_lookup.clone(),
                causal_id: None,
                old_valid_from: d.target_valid.map(|t| t.from),
                old_valid_until: d.target_valid.map(|t| t.until),
                new_valid_from: None,
                new_valid_until: None,
                data: None,
                feedback: None,
                trace,
                grouping_key: d.grouping_key.clone(),
            });
            continue;
        }

        // The replaced interval is only meaningful for the elected UPDATE
        // (and for identical skips); split-off INSERTs carry none.
        let carries_old = matches!(operation, PlanAction::Update | PlanAction::SkipIdentical);

        let data = d.final_data.clone().map(|mut payload| {
            if let Some(ref eph) = d.ephemeral {
                merge_all(&mut payload, eph);
            }
            // The mirrored inclusive end is recomputed after coalescing so it
            // can never perturb change detection.
            if let Some(ref mirror_col) = ctx.era.valid_to_col {
                if let Some(fv) = d.final_valid {
                    if let Ok(mirror) = fv.until.predecessor() {
                        payload.insert(mirror_col.clone(), mirror.to_json());
                    }
                }
            }
            Value::Object(payload)
        });

        ops.push(PlanOp {
            plan_op_seq: 0,
            row_ids: d.row_ids.clone(),
            operation,
            update_effect,
            is_new_entity: d.is_new_entity,
            entity_keys,
            identity_keys,
            lookup_keys: group_lookup.clone(),
            causal_id: d.causal_id.clone(),
            old_valid_from: carries_old.then(|| d.target_valid.map(|t| t.from)).flatten(),
            old_valid_until: carries_old.then(|| d.target_valid.map(|t| t.until)).flatten(),
            new_valid_from: d.final_valid.map(|f| f.from),
            new_valid_until: d.final_valid.map(|f| f.until),
            data,
            feedback: None,
            trace,
            grouping_key: d.grouping_key.clone(),
        });
    }

    ops
}

/// Rank candidates per original target row: the rank-1 candidate becomes the
/// UPDATE, the rest INSERTs. Preference order: keeps the original
/// `valid_from`, then keeps the original payload, then earliest/shortest.
fn elect_updates(diffs: &[DiffRow]) -> HashMap<usize, usize> {
    let mut by_target: BTreeMap<TimePoint, Vec<usize>> = BTreeMap::new();
    for (i, d) in diffs.iter().enumerate() {
        if let (Some(tv), Some(_)) = (d.target_valid, d.final_valid) {
            by_target.entry(tv.from).or_default().push(i);
        }
    }

    let mut ranks = HashMap::new();
    for indices in by_target.values() {
        let mut sorted = indices.clone();
        sorted.sort_by(|&a, &b| {
            let da = &diffs[a];
            let db = &diffs[b];
            let starts = |d: &DiffRow| d.final_valid.map(|f| f.from) == d.target_valid.map(|t| t.from);
            let same_payload = |d: &DiffRow| match (&d.final_data, &d.target_data) {
                (Some(f), Some(t)) => maps_equal_ignoring_nulls(f, t),
                (None, None) => true,
                _ => false,
            };
            starts(db)
                .cmp(&starts(da))
                .then_with(|| same_payload(db).cmp(&same_payload(da)))
                .then_with(|| da.final_valid.map(|f| f.from).cmp(&db.final_valid.map(|f| f.from)))
                .then_with(|| da.final_valid.map(|f| f.until).cmp(&db.final_valid.map(|f| f.until)))
        });
        for (rank, &idx) in sorted.iter().enumerate() {
            ranks.insert(idx, rank + 1);
        }
    }
    ranks
}

fn classify_single_diff(d: &DiffRow, rank: Option<usize>) -> (PlanAction, Option<UpdateEffect>) {
    match (d.target_valid, d.final_valid) {
        (None, Some(_)) => (PlanAction::Insert, None),
        (Some(_), None) => (PlanAction::Delete, None),
        (Some(tv), Some(fv)) => {
            let payload_identical = {
                let f = merge_data_ephemeral(&d.final_data, &d.ephemeral);
                let t = merge_data_ephemeral(&d.target_data, &d.target_ephemeral);
                match (f, t) {
                    (Some(f), Some(t)) => maps_equal_ignoring_nulls(&f, &t),
                    (None, None) => true,
                    _ => false,
                }
            };
            if tv == fv && payload_identical {
                (PlanAction::SkipIdentical, None)
            } else {
                match rank {
                    Some(r) if r > 1 => (PlanAction::Insert, None),
                    _ => (PlanAction::Update, Some(compute_update_effect(&tv, &fv))),
                }
            }
        }
        (None, None) => (PlanAction::Error, None),
    }
}

fn merge_data_ephemeral(
    data: &Option<ColumnMap>,
    ephemeral: &Option<ColumnMap>,
) -> Option<ColumnMap> {
    match (data, ephemeral) {
        (Some(d), Some(e)) => {
            let mut merged = d.clone();
            merge_all(&mut merged, e);
            Some(merged)
        }
        (Some(d), None) => Some(d.clone()),
        (None, Some(e)) => Some(e.clone()),
        (None, None) => None,
    }
}

fn compute_update_effect(old: &Interval, new: &Interval) -> UpdateEffect {
    if old == new {
        UpdateEffect::None
    } else if old.contains(new) {
        UpdateEffect::Shrink
    } else if new.contains(old) {
        UpdateEffect::Grow
    } else {
        UpdateEffect::Move
    }
}

// ── Feedback operations (errors and skips) ──

pub fn feedback_op(m: &MatchedSourceRow, fb: &EarlyFeedback, ctx: &PlanContext) -> PlanOp {
    let feedback = match fb.action {
        PlanAction::Error => json!({ "error": fb.message.as_deref().unwrap_or("") }),
        PlanAction::SkipEclipsed => json!({
            "info": fb.message.as_deref().unwrap_or("Source row is fully covered by later source rows"),
            "eclipsed_by": fb.eclipsed_by,
        }),
        _ => json!({
            "info": "Source row was correctly filtered by the mode's logic and did not result in a DML operation."
        }),
    };

    // Only eclipse skips reference the row's validity; errors and mode skips
    // never reached timeline construction.
    let emit_temporal = fb.action == PlanAction::SkipEclipsed;

    let grouping_key = if m.is_new_entity
        && m.source.lookup_keys.is_empty()
        && ctx.all_lookup_cols.is_empty()
    {
        format!("new_entity__{}", m.source.causal_id)
    } else {
        m.grouping_key.clone()
    };

    let mut identity = m.source.identity_keys.clone();
    if let Some(ref discovered) = m.discovered_identity {
        for (k, v) in discovered {
            let missing = identity.get(k).map_or(true, |sv| sv.is_null());
            if missing {
                identity.insert(k.clone(), v.clone());
            }
        }
    }

    let mut entity = identity.clone();
    for (k, v) in &m.source.lookup_keys {
        entity.entry(k.clone()).or_insert_with(|| v.clone());
    }

    PlanOp {
        plan_op_seq: 0,
        row_ids: vec![m.source.row_id],
        operation: fb.action,
        update_effect: None,
        is_new_entity: m.is_new_entity,
        entity_keys: (!entity.is_empty()).then(|| Value::Object(entity)),
        identity_keys: (!identity.is_empty()).then(|| Value::Object(identity)),
        lookup_keys: Some(Value::Object(m.source.lookup_keys.clone())),
        causal_id: Some(m.source.causal_id.clone()),
        old_valid_from: None,
        old_valid_until: None,
        new_valid_from: emit_temporal.then_some(m.source.valid_from),
        new_valid_until: emit_temporal.then_some(m.source.valid_until),
        data: None,
        feedback: Some(feedback),
        trace: None,
        grouping_key,
    }
}

fn group_lookup_value(group: &EntityGroup, ctx: &PlanContext) -> Option<Value> {
    if ctx.all_lookup_cols.is_empty() {
        return Some(Value::Object(ColumnMap::new()));
    }

    let first_source = group.source_rows.first();
    let first_target = group.target_rows.first();

    match first_source {
        Some(m) => {
            let mut lk = ColumnMap::new();
            for col in &ctx.all_lookup_cols {
                // The canonical key carries values joined in from sibling
                // rows of the same founding group.
                let mut val = m
                    .canonical_lookup
                    .as_ref()
                    .and_then(|c| c.get(col))
                    .or_else(|| m.source.identity_keys.get(col))
                    .or_else(|| m.source.lookup_keys.get(col))
                    .or_else(|| m.source.data.get(col))
                    .cloned()
                    .unwrap_or(Value::Null);
                // Existing entities resolve NULL source keys from the target.
                if val.is_null() && !group.is_new_entity {
                    if let Some(tr) = first_target {
                        if let Some(tv) = tr
                            .lookup_keys
                            .get(col)
                            .or_else(|| tr.identity_keys.get(col))
                        {
                            val = tv.clone();
                        }
                    }
                }
                lk.insert(col.clone(), val);
            }
            Some(Value::Object(lk))
        }
        None => first_target.map(|tr| {
            let mut lk = ColumnMap::new();
            for col in &ctx.all_lookup_cols {
                let val = tr
                    .lookup_keys
                    .get(col)
                    .or_else(|| tr.identity_keys.get(col))
                    .cloned()
                    .unwrap_or(Value::Null);
                lk.insert(col.clone(), val);
            }
            Value::Object(lk)
        }),
    }
}
