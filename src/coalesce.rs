use crate::types::{CoalescedSegment, ResolvedSegment};

/// Merge adjacent atomic segments with identical non-ephemeral payloads
/// (gaps and islands). A segment starts a new island when it does not meet
/// its predecessor or when the payload hash differs; segments without a
/// payload never merge.
///
/// Input arrives ordered by `valid_from` within one entity grouping.
pub fn coalesce_segments(resolved: Vec<ResolvedSegment>) -> Vec<CoalescedSegment> {
    let mut coalesced: Vec<CoalescedSegment> = Vec::new();
    let mut current: Option<CoalescedSegment> = None;

    for seg in resolved {
        let can_merge = current.as_ref().map_or(false, |c| {
            c.grouping_key == seg.grouping_key
                && c.valid.until == seg.valid.from
                && c.data_hash.is_some()
                && c.data_hash == seg.data_hash
        });

        if can_merge {
            let c = current.as_mut().expect("island in progress");
            c.valid.until = seg.valid.until;
            c.row_ids.extend(seg.row_ids.iter());
            if seg.ephemeral.is_some() {
                c.ephemeral = seg.ephemeral;
            }
            c.has_source_coverage = c.has_source_coverage || seg.has_source_coverage;
            c.has_target_coverage = c.has_target_coverage || seg.has_target_coverage;
            // The ancestor is the first target row touched by the island.
            if c.ancestor_valid_from.is_none() {
                c.ancestor_valid_from = seg.target_valid.map(|t| t.from);
            }
            if c.s_t_relation.is_none() {
                c.s_t_relation = seg.s_t_relation;
            }
        } else {
            if let Some(done) = current.take() {
                coalesced.push(done);
            }
            current = Some(CoalescedSegment {
                grouping_key: seg.grouping_key,
                valid: seg.valid,
                is_new_entity: seg.is_new_entity,
                identity_keys: seg.identity_keys,
                causal_id: seg.causal_id,
                row_ids: seg.row_ids,
                data: seg.data,
                ephemeral: seg.ephemeral,
                ancestor_valid_from: seg.target_valid.map(|t| t.from),
                data_hash: seg.data_hash,
                has_source_coverage: seg.has_source_coverage,
                has_target_coverage: seg.has_target_coverage,
                s_t_relation: seg.s_t_relation,
            });
        }
    }
    if let Some(done) = current.take() {
        coalesced.push(done);
    }

    for seg in &mut coalesced {
        seg.row_ids.sort_unstable();
        seg.row_ids.dedup();
    }

    coalesced
}
