use crate::payload::map_key;
use crate::range::TimePoint;
use crate::types::{PlanAction, PlanOp};

/// Total output order. Within an entity, INSERTs come first so re-linked
/// timelines never dangle, growing UPDATEs precede shrinking ones so coverage
/// never passes through a transient gap, and DELETEs remove superseded rows
/// last. SKIPs and ERRORs trail as pure feedback.
fn kind_rank(action: PlanAction) -> u8 {
    match action {
        PlanAction::Insert => 1,
        PlanAction::Update => 2,
        PlanAction::Delete => 3,
        _ => 4,
    }
}

/// Sort the plan into its final deterministic sequence and assign the dense
/// 1-based `plan_op_seq`.
pub fn sequence(ops: &mut [PlanOp]) {
    ops.sort_by(|a, b| {
        a.grouping_key
            .cmp(&b.grouping_key)
            .then_with(|| entity_sort_key(a).cmp(&entity_sort_key(b)))
            .then_with(|| kind_rank(a.operation).cmp(&kind_rank(b.operation)))
            // Option ordering puts effect-less ops first, then the
            // NONE < GROW < SHRINK < MOVE declaration order.
            .then_with(|| a.update_effect.cmp(&b.update_effect))
            .then_with(|| anchor_from(a).cmp(&anchor_from(b)))
            .then_with(|| produced_from(a).cmp(&produced_from(b)))
            .then_with(|| first_row_id(a).cmp(&first_row_id(b)))
    });

    for (i, op) in ops.iter_mut().enumerate() {
        op.plan_op_seq = (i + 1) as i64;
    }
}

fn entity_sort_key(op: &PlanOp) -> String {
    op.entity_keys
        .as_ref()
        .and_then(|v| v.as_object())
        .map(map_key)
        .unwrap_or_default()
}

fn anchor_from(op: &PlanOp) -> Option<TimePoint> {
    op.old_valid_from.or(op.new_valid_from)
}

fn produced_from(op: &PlanOp) -> Option<TimePoint> {
    op.new_valid_from.or(op.old_valid_from)
}

fn first_row_id(op: &PlanOp) -> i64 {
    op.row_ids.first().copied().unwrap_or(0)
}
