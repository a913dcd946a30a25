use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::coalesce;
use crate::diff;
use crate::order;
use crate::payload::{
    map_key, merge_all, merge_patch, payload_hash, strip_nulls, value_text, ColumnMap,
};
use crate::range::{AllenRelation, Interval, TimePoint};
use crate::types::{
    AtomicSegment, EarlyFeedback, MatchedSourceRow, MergeMode, PlanAction, PlanContext, PlanOp,
    ResolvedSegment, SourceRow, TargetRow,
};

/// All rows belonging to one entity grouping for the sweep.
#[derive(Debug)]
pub struct EntityGroup {
    pub grouping_key: String,
    pub is_new_entity: bool,
    pub identity_keys: ColumnMap,
    pub source_rows: Vec<MatchedSourceRow>,
    pub target_rows: Vec<TargetRow>,
}

/// Plan the merge of prepared source rows against prepared target rows.
///
/// This is the in-memory core: entity resolution, eclipse detection, endpoint
/// sweep, payload resolution, coalescing, diffing and ordering. Inputs are
/// treated as immutable snapshots; the output is totally ordered and
/// deterministic for identical inputs.
pub fn plan_rows(
    sources: Vec<(SourceRow, Option<EarlyFeedback>)>,
    targets: Vec<TargetRow>,
    ctx: &PlanContext,
) -> Vec<PlanOp> {
    let matched = correlate_entities(sources, &targets, ctx);
    let matched = canonicalize_new_entity_keys(matched, ctx);
    let matched = detect_eclipsed(matched);
    let groups = group_by_entity(matched, &targets, ctx);
    tracing::debug!(entities = groups.len(), "resolved entity groupings");

    let mut ops: Vec<PlanOp> = Vec::new();

    for group in groups.values() {
        for m in &group.source_rows {
            if let Some(ref fb) = m.early_feedback {
                ops.push(diff::feedback_op(m, fb, ctx));
            }
        }

        let active: Vec<&MatchedSourceRow> =
            group.source_rows.iter().filter(|m| m.is_active()).collect();
        let filtered = filter_by_mode(&active, ctx);

        for m in &active {
            let kept = filtered.iter().any(|f| f.source.row_id == m.source.row_id);
            if !kept {
                // New entities rejected by *_FOR_PORTION_OF have no target to
                // address; existing entities rejected by INSERT_NEW_ENTITIES
                // are filtered.
                let action = if m.is_new_entity {
                    PlanAction::SkipNoTarget
                } else {
                    PlanAction::SkipFiltered
                };
                ops.push(diff::feedback_op(m, &EarlyFeedback::skip(action), ctx));
            }
        }

        let active = filtered;
        if active.is_empty() && group.target_rows.is_empty() {
            continue;
        }

        let destructive = (!active.is_empty() && ctx.delete_mode.deletes_timeline())
            || (active.is_empty() && ctx.delete_mode.deletes_entities());

        let segments = build_atomic_segments(group, &active);
        let (resolved, tombstoned) =
            resolve_payloads(segments, &active, &group.target_rows, destructive, ctx);
        let coalesced = coalesce::coalesce_segments(resolved);
        let diffs = diff::compute_diff(coalesced, group, &tombstoned);
        ops.extend(diff::classify_operations(diffs, group, ctx));
    }

    account_unmentioned_rows(&mut ops, &groups, ctx);
    order::sequence(&mut ops);
    ops
}

// ── Entity correlation ──

fn correlate_entities(
    sources: Vec<(SourceRow, Option<EarlyFeedback>)>,
    targets: &[TargetRow],
    ctx: &PlanContext,
) -> Vec<MatchedSourceRow> {
    // One lookup index per natural key set; matching succeeds on ANY set,
    // and all sets are probed to surface cross-set ambiguity.
    let mut indexes_per_key_set: Vec<HashMap<String, Vec<usize>>> =
        Vec::with_capacity(ctx.lookup_key_sets.len());
    for key_set in &ctx.lookup_key_sets {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, tr) in targets.iter().enumerate() {
            let key = key_for_cols(&tr.lookup_keys, Some(&tr.identity_keys), key_set);
            if !key.is_empty() {
                index.entry(key).or_default().push(i);
            }
        }
        indexes_per_key_set.push(index);
    }

    let mut target_by_id: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, tr) in targets.iter().enumerate() {
        let id_key = map_key(&tr.identity_keys);
        if !id_key.is_empty() {
            target_by_id.entry(id_key).or_default().push(i);
        }
    }

    let mut matched = Vec::with_capacity(sources.len());
    for (source, prior_feedback) in sources {
        let mut is_new = true;
        let mut discovered_identity: Option<ColumnMap> = None;
        let mut discovered_lookup: Option<ColumnMap> = None;
        let mut canonical_lookup: Option<ColumnMap> = None;
        let mut early_feedback = prior_feedback;

        if source.is_identifiable {
            let id_key = map_key(&source.identity_keys);
            if let Some(hits) = target_by_id.get(&id_key) {
                if let Some(&first) = hits.first() {
                    is_new = false;
                    discovered_identity = Some(source.identity_keys.clone());
                    discovered_lookup = Some(targets[first].lookup_keys.clone());
                }
            }
        }

        if is_new && !source.lookup_keys_all_null {
            let mut matched_tags: BTreeSet<String> = BTreeSet::new();
            let mut matched_identities: Vec<ColumnMap> = Vec::new();
            let mut first_hit: Option<usize> = None;

            for (ks_idx, key_set) in ctx.lookup_key_sets.iter().enumerate() {
                let nk_key = key_for_cols(&source.lookup_keys, Some(&source.identity_keys), key_set);
                if nk_key.is_empty() {
                    continue;
                }
                if let Some(hits) = indexes_per_key_set[ks_idx].get(&nk_key) {
                    for &i in hits {
                        let tag = entity_tag(&targets[i], ctx);
                        if matched_tags.insert(tag) {
                            matched_identities.push(targets[i].identity_keys.clone());
                        }
                    }
                    if first_hit.is_none() {
                        first_hit = hits.first().copied();
                    }
                }
            }

            if matched_tags.len() > 1 {
                // The row points at several distinct target entities through
                // different key sets.
                is_new = false;
                if let Some(i) = first_hit {
                    discovered_identity = Some(targets[i].identity_keys.clone());
                    discovered_lookup = Some(targets[i].lookup_keys.clone());
                }
                if early_feedback.is_none() {
                    let conflicting: Vec<String> = matched_identities
                        .iter()
                        .map(crate::payload::object_text)
                        .collect();
                    early_feedback = Some(EarlyFeedback::error(format!(
                        "Source row is ambiguous. It matches multiple distinct target entities: [{}]",
                        conflicting.join(", ")
                    )));
                }
            } else if matched_tags.len() == 1 {
                is_new = false;
                if let Some(i) = first_hit {
                    discovered_identity = Some(targets[i].identity_keys.clone());
                    discovered_lookup = Some(targets[i].lookup_keys.clone());
                }
                canonical_lookup = Some(strip_nulls(&source.lookup_keys));
            }
        }

        // A founding batch and an identity-only constellation are always
        // identifiable: a NULL surrogate key is a valid founding INSERT.
        if is_new
            && !source.is_identifiable
            && source.lookup_keys_all_null
            && !ctx.is_founding_mode()
            && ctx.strategy != crate::types::IdentityStrategy::IdentityOnly
            && early_feedback.is_none()
        {
            let id_cols = format!("{{{}}}", ctx.identity_columns.join(", "));
            let key_sets = format!(
                "[{}]",
                ctx.lookup_key_sets
                    .iter()
                    .map(|ks| format!("[{}]", ks.join(", ")))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            early_feedback = Some(EarlyFeedback::error(format!(
                "Source row is unidentifiable. It has NULL for all stable identity columns {id_cols} and all natural keys {key_sets}"
            )));
        }

        let grouping_key = build_grouping_key(
            &source,
            is_new,
            &discovered_identity,
            &discovered_lookup,
            &canonical_lookup,
            ctx,
        );

        matched.push(MatchedSourceRow {
            source,
            is_new_entity: is_new,
            grouping_key,
            discovered_identity,
            discovered_lookup,
            canonical_lookup,
            early_feedback,
            is_eclipsed: false,
        });
    }

    matched
}

/// Key over `cols` taking values from `primary`, falling back to `fallback`
/// (a lookup column can double as an identity column). Null values are
/// excluded; empty when every column is null.
fn key_for_cols(primary: &ColumnMap, fallback: Option<&ColumnMap>, cols: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for col in cols {
        let v = primary
            .get(col)
            .or_else(|| fallback.and_then(|f| f.get(col)));
        if let Some(v) = v {
            if !v.is_null() {
                parts.push(format!("{}={}", col, value_text(v)));
            }
        }
    }
    parts.join("__")
}

/// Stable tag distinguishing existing target entities. Identity columns when
/// the constellation has them, lookup values otherwise.
fn entity_tag(tr: &TargetRow, ctx: &PlanContext) -> String {
    if ctx.identity_columns.is_empty() {
        joined_values(&tr.lookup_keys, &ctx.all_lookup_cols)
    } else {
        joined_values(&tr.identity_keys, &ctx.identity_columns)
    }
}

fn joined_values(map: &ColumnMap, cols: &[String]) -> String {
    cols.iter()
        .map(|c| map.get(c).map(value_text).unwrap_or_else(|| "_NULL_".to_string()))
        .collect::<Vec<_>>()
        .join("__")
}

fn build_grouping_key(
    source: &SourceRow,
    is_new: bool,
    discovered_identity: &Option<ColumnMap>,
    discovered_lookup: &Option<ColumnMap>,
    canonical_lookup: &Option<ColumnMap>,
    ctx: &PlanContext,
) -> String {
    if !is_new {
        let tag = if ctx.identity_columns.is_empty() {
            let lookup = discovered_lookup.as_ref().unwrap_or(&source.lookup_keys);
            joined_values(lookup, &ctx.all_lookup_cols)
        } else {
            let id_map = discovered_identity.as_ref().unwrap_or(&source.identity_keys);
            joined_values(id_map, &ctx.identity_columns)
        };
        return format!("existing_entity__{tag}");
    }

    if ctx.is_founding_mode() {
        return format!("new_entity__{}", source.causal_id);
    }

    let lookup = canonical_lookup
        .as_ref()
        .or(Some(&source.lookup_keys))
        .filter(|m| !m.is_empty());
    match lookup {
        Some(nk) => format!("new_entity__{}", joined_values(nk, &ctx.all_lookup_cols)),
        None => {
            if source.is_identifiable {
                format!(
                    "new_entity__{}",
                    joined_values(&source.identity_keys, &ctx.identity_columns)
                )
            } else {
                format!("new_entity__{}", source.causal_id)
            }
        }
    }
}

// ── Canonical natural-key resolution ──

/// Join fragmented founding rows into one new-entity grouping: rows whose
/// natural keys agree on any key set share the most informative key of their
/// connected component.
fn canonicalize_new_entity_keys(
    mut matched: Vec<MatchedSourceRow>,
    ctx: &PlanContext,
) -> Vec<MatchedSourceRow> {
    if ctx.lookup_key_sets.is_empty() {
        return matched;
    }

    let new_indices: Vec<usize> = matched
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_new_entity && m.early_feedback.is_none())
        .map(|(i, _)| i)
        .collect();
    if new_indices.is_empty() {
        return matched;
    }

    let nk_maps: Vec<ColumnMap> = new_indices
        .iter()
        .map(|&i| strip_nulls(&matched[i].source.lookup_keys))
        .collect();

    let n = new_indices.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            parent[i] = find(parent, parent[i]);
        }
        parent[i]
    }
    fn union(parent: &mut Vec<usize>, a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[rb] = ra;
        }
    }

    for key_set in &ctx.lookup_key_sets {
        let mut by_value: HashMap<String, Vec<usize>> = HashMap::new();
        for (local, nk) in nk_maps.iter().enumerate() {
            let key = key_for_cols(nk, None, key_set);
            if !key.is_empty() {
                by_value.entry(key).or_default().push(local);
            }
        }
        for indices in by_value.values() {
            for window in indices.windows(2) {
                union(&mut parent, window[0], window[1]);
            }
        }
    }

    // The canonical key of a component is the union of its non-null keys.
    let mut canonical_by_root: HashMap<usize, ColumnMap> = HashMap::new();
    for local in 0..n {
        let root = find(&mut parent, local);
        let entry = canonical_by_root.entry(root).or_default();
        for (k, v) in &nk_maps[local] {
            entry.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    for (local, &global) in new_indices.iter().enumerate() {
        let root = find(&mut parent, local);
        let canonical = &canonical_by_root[&root];
        if *canonical != nk_maps[local] {
            matched[global].canonical_lookup = Some(canonical.clone());
        }
        if matched[global].canonical_lookup.is_some() {
            matched[global].grouping_key = build_grouping_key(
                &matched[global].source,
                true,
                &matched[global].discovered_identity,
                &matched[global].discovered_lookup,
                &matched[global].canonical_lookup,
                ctx,
            );
        }
    }

    matched
}

// ── Eclipse detection ──

/// A row is eclipsed when the union of later rows for the same entity
/// identity covers its interval without gaps. The producers reported back are
/// accumulated newest-first until coverage closes.
fn detect_eclipsed(mut matched: Vec<MatchedSourceRow>) -> Vec<MatchedSourceRow> {
    // The resolved grouping key IS the entity identity at this point; rows
    // without any identity information carry a causal-id grouping of their
    // own and can never eclipse each other.
    let mut by_partition: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, m) in matched.iter().enumerate() {
        by_partition.entry(m.grouping_key.clone()).or_default().push(i);
    }

    for indices in by_partition.values() {
        if indices.len() <= 1 {
            continue;
        }
        let mut newest_first = indices.clone();
        newest_first.sort_by(|&a, &b| matched[b].source.row_id.cmp(&matched[a].source.row_id));

        let mut covered = crate::range::Multirange::new();
        let mut seen: Vec<(i64, Interval)> = Vec::new();

        for &idx in &newest_first {
            if matched[idx].early_feedback.is_some() {
                continue;
            }
            let validity = matched[idx].source.validity();
            if covered.covers(&validity) {
                matched[idx].is_eclipsed = true;
                matched[idx].early_feedback = Some(EarlyFeedback {
                    action: PlanAction::SkipEclipsed,
                    message: Some("Source row is fully covered by later source rows".to_string()),
                    eclipsed_by: eclipse_producers(&seen, &validity),
                });
            }
            covered.add(validity);
            seen.push((matched[idx].source.row_id, validity));
        }
    }

    matched
}

/// Newer rows that close coverage of `validity`, accumulated newest-first.
fn eclipse_producers(newer: &[(i64, Interval)], validity: &Interval) -> Vec<i64> {
    let mut producers = Vec::new();
    let mut acc = crate::range::Multirange::new();
    for (row_id, interval) in newer {
        if !interval.overlaps(validity) {
            continue;
        }
        producers.push(*row_id);
        acc.add(*interval);
        if acc.covers(validity) {
            break;
        }
    }
    producers.sort_unstable();
    producers
}

// ── Grouping ──

fn group_by_entity(
    matched: Vec<MatchedSourceRow>,
    targets: &[TargetRow],
    ctx: &PlanContext,
) -> BTreeMap<String, EntityGroup> {
    let mut groups: BTreeMap<String, EntityGroup> = BTreeMap::new();

    for m in matched {
        let group = groups.entry(m.grouping_key.clone()).or_insert_with(|| EntityGroup {
            grouping_key: m.grouping_key.clone(),
            is_new_entity: m.is_new_entity,
            identity_keys: m
                .discovered_identity
                .clone()
                .unwrap_or_else(|| m.source.identity_keys.clone()),
            source_rows: Vec::new(),
            target_rows: Vec::new(),
        });
        group.source_rows.push(m);
    }

    // Unified stable pk for new-entity groupings: the first row with any
    // non-null identity value, ordered by (causal_id, row_id).
    for group in groups.values_mut() {
        if !group.is_new_entity {
            continue;
        }
        let mut rows: Vec<&MatchedSourceRow> = group.source_rows.iter().collect();
        rows.sort_by(|a, b| {
            a.source
                .causal_id
                .cmp(&b.source.causal_id)
                .then(a.source.row_id.cmp(&b.source.row_id))
        });
        if let Some(first) = rows.iter().find(|m| {
            m.source.identity_keys.values().any(|v| !v.is_null())
        }) {
            group.identity_keys = first.source.identity_keys.clone();
        }
    }

    for tr in targets {
        let grouping_key = format!("existing_entity__{}", entity_tag(tr, ctx));
        if let Some(group) = groups.get_mut(&grouping_key) {
            group.target_rows.push(tr.clone());
        } else if ctx.delete_mode.deletes_entities() {
            // Entity absent from the source batch; kept in play so its
            // timeline can be deleted.
            groups.insert(
                grouping_key.clone(),
                EntityGroup {
                    grouping_key,
                    is_new_entity: false,
                    identity_keys: tr.identity_keys.clone(),
                    source_rows: Vec::new(),
                    target_rows: vec![tr.clone()],
                },
            );
        }
    }

    groups
}

// ── Mode scope filtering ──

fn filter_by_mode<'a>(
    active: &[&'a MatchedSourceRow],
    ctx: &PlanContext,
) -> Vec<&'a MatchedSourceRow> {
    match ctx.mode {
        MergeMode::InsertNewEntities => {
            active.iter().filter(|m| m.is_new_entity).copied().collect()
        }
        mode if mode.is_for_portion_of() => {
            active.iter().filter(|m| !m.is_new_entity).copied().collect()
        }
        _ => active.to_vec(),
    }
}

// ── Atomic segmentation ──

fn build_atomic_segments(group: &EntityGroup, active: &[&MatchedSourceRow]) -> Vec<AtomicSegment> {
    let mut boundaries: BTreeSet<TimePoint> = BTreeSet::new();
    for m in active {
        boundaries.insert(m.source.valid_from);
        boundaries.insert(m.source.valid_until);
    }
    for tr in &group.target_rows {
        boundaries.insert(tr.valid_from);
        boundaries.insert(tr.valid_until);
    }

    // The grouping's unified causal id is its minimum non-null causal id.
    let unified_causal: Option<String> = active.iter().map(|m| m.source.causal_id.clone()).min();

    let points: Vec<TimePoint> = boundaries.into_iter().collect();
    points
        .windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| AtomicSegment {
            grouping_key: group.grouping_key.clone(),
            valid: Interval::new(w[0], w[1]),
            is_new_entity: group.is_new_entity,
            identity_keys: group.identity_keys.clone(),
            causal_id: unified_causal.clone(),
        })
        .collect()
}

// ── Payload resolution ──

type TombstonedRows = BTreeMap<TimePoint, Vec<i64>>;

fn resolve_payloads(
    segments: Vec<AtomicSegment>,
    active: &[&MatchedSourceRow],
    targets: &[TargetRow],
    destructive: bool,
    ctx: &PlanContext,
) -> (Vec<ResolvedSegment>, TombstonedRows) {
    let mut resolved = Vec::with_capacity(segments.len());
    let mut tombstoned: TombstonedRows = BTreeMap::new();

    for seg in segments {
        let mut covering: Vec<&MatchedSourceRow> = active
            .iter()
            .filter(|m| m.source.validity().contains(&seg.valid))
            .copied()
            .collect();
        covering.sort_by_key(|m| m.source.row_id);

        let target = targets.iter().find(|t| t.validity().contains(&seg.valid));
        let has_source = !covering.is_empty();
        let has_target = target.is_some();
        if !has_source && !has_target {
            continue;
        }

        // Tombstoned portions are withdrawn; the surrounding target-only
        // segments elect the residual UPDATE/INSERTs and fully swallowed
        // original rows fall out of the diff as DELETEs.
        if ctx.mode == MergeMode::DeleteForPortionOf && has_source {
            if let Some(t) = target {
                tombstoned
                    .entry(t.valid_from)
                    .or_default()
                    .extend(covering.iter().map(|m| m.source.row_id));
            }
            continue;
        }

        // Timeline not present in the source is being deleted.
        if destructive && !has_source {
            continue;
        }

        // *_FOR_PORTION_OF only affects the portion of the target that
        // already exists; segments extending past it are withdrawn.
        if ctx.mode.is_for_portion_of() && has_source && !has_target {
            continue;
        }

        let (data, mut row_ids) = resolve_segment_payload(&covering, target, ctx);

        let mut source_valid: Option<Interval> = match (covering.first(), covering.last()) {
            (Some(first), Some(last)) => Some(Interval::new(
                first.source.valid_from,
                last.source.valid_until,
            )),
            _ => None,
        };
        let target_valid = target.map(|t| t.validity());

        // Target-only segments inside an entity that has source activity are
        // attributed to the causally nearest source row.
        if !has_source && !active.is_empty() {
            let causal = active
                .iter()
                .find(|m| {
                    m.source.valid_from == seg.valid.until || m.source.valid_until == seg.valid.from
                })
                .or_else(|| active.first());
            if let Some(m) = causal {
                row_ids = vec![m.source.row_id];
                let sv = m.source.validity();
                // Only propagate the relation within the same target row.
                source_valid = Some(sv);
                if let Some(tv) = target_valid {
                    if !sv.overlaps(&tv) {
                        source_valid = None;
                    }
                }
            }
        }

        let s_t_relation = match (source_valid, target_valid) {
            (Some(sv), Some(tv)) => Some(AllenRelation::of(&sv, &tv)),
            _ => None,
        };

        let ephemeral = if has_source {
            let mut merged = target.map(|t| t.ephemeral.clone()).unwrap_or_default();
            if let Some(last) = covering.last() {
                if ctx.mode.is_patch() {
                    merge_patch(&mut merged, &last.source.ephemeral);
                } else {
                    merge_all(&mut merged, &last.source.ephemeral);
                }
            }
            Some(merged)
        } else {
            target.map(|t| t.ephemeral.clone())
        };

        let data_hash = data.as_ref().map(payload_hash);

        resolved.push(ResolvedSegment {
            grouping_key: seg.grouping_key,
            valid: seg.valid,
            is_new_entity: seg.is_new_entity,
            identity_keys: seg.identity_keys,
            causal_id: seg.causal_id,
            row_ids,
            target_valid,
            data,
            ephemeral,
            data_hash,
            has_source_coverage: has_source,
            has_target_coverage: has_target,
            s_t_relation,
        });
    }

    (resolved, tombstoned)
}

/// Final data payload of one atomic segment under the mode's semantics.
fn resolve_segment_payload(
    covering: &[&MatchedSourceRow],
    target: Option<&TargetRow>,
    ctx: &PlanContext,
) -> (Option<ColumnMap>, Vec<i64>) {
    if covering.is_empty() {
        return (target.map(|t| t.data.clone()), Vec::new());
    }

    let data = if ctx.mode.is_replace() {
        // Last writer wins; the target payload does not participate.
        covering.last().map(|m| m.source.data.clone())
    } else {
        let mut merged = target.map(|t| t.data.clone()).unwrap_or_default();
        for m in covering {
            if ctx.mode.is_patch() {
                merge_patch(&mut merged, &m.source.data);
            } else {
                merge_all(&mut merged, &m.source.data);
            }
        }
        Some(merged)
    };

    let row_ids = if ctx.mode.is_last_writer_wins() {
        covering.last().map(|m| vec![m.source.row_id]).unwrap_or_default()
    } else {
        let mut ids: Vec<i64> = covering.iter().map(|m| m.source.row_id).collect();
        ids.dedup();
        ids
    };

    (data, row_ids)
}

// ── Source accounting ──

/// Every source row must surface in at least one operation. Active rows whose
/// effect was entirely withdrawn (e.g. a portion entirely outside the target
/// timeline) get a terminal SKIP_NO_TARGET.
fn account_unmentioned_rows(
    ops: &mut Vec<PlanOp>,
    groups: &BTreeMap<String, EntityGroup>,
    ctx: &PlanContext,
) {
    let mentioned: BTreeSet<i64> = ops.iter().flat_map(|op| op.row_ids.iter().copied()).collect();

    for group in groups.values() {
        for m in &group.source_rows {
            if m.is_active() && !mentioned.contains(&m.source.row_id) {
                ops.push(diff::feedback_op(
                    m,
                    &EarlyFeedback::skip(PlanAction::SkipNoTarget),
                    ctx,
                ));
            }
        }
    }
}
