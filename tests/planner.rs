use serde_json::{json, Value};
use temporal_merge::{
    plan, ColumnMap, EraMeta, MemoryCatalog, MemoryRelation, MemoryScan, MergeConfig, MergeMode,
    PlanAction, PlanOp, RangeSubtype, SourceRecord, TargetRecord, TimePoint, UpdateEffect,
};

fn d(y: i32, m: u32, day: u32) -> TimePoint {
    TimePoint::date(y, m, day)
}

fn era(valid_to: bool) -> EraMeta {
    EraMeta {
        era_name: "validity".into(),
        valid_from_col: "valid_from".into(),
        valid_until_col: "valid_until".into(),
        valid_to_col: valid_to.then(|| "valid_to".to_string()),
        subtype: RangeSubtype::Discrete,
    }
}

fn catalog(target_cols: &[&str], source_cols: &[&str], pk: &[&str], valid_to: bool) -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    catalog.add_relation(
        "positions",
        MemoryRelation::new(target_cols.iter().copied(), pk.iter().copied()).with_era(era(valid_to)),
    );
    catalog.add_relation(
        "positions_src",
        MemoryRelation::new(source_cols.iter().copied(), ["row_id"]),
    );
    catalog
}

fn columns(pairs: &[(&str, Value)]) -> ColumnMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn src(pairs: &[(&str, Value)], from: TimePoint, until: TimePoint) -> SourceRecord {
    SourceRecord {
        columns: columns(pairs),
        valid_from: Some(from),
        valid_until: Some(until),
        valid_to: None,
    }
}

fn tgt(pairs: &[(&str, Value)], from: TimePoint, until: TimePoint) -> TargetRecord {
    TargetRecord {
        columns: columns(pairs),
        valid_from: from,
        valid_until: until,
    }
}

fn config(mode: MergeMode) -> MergeConfig {
    let mut config = MergeConfig::new("positions", "positions_src", "validity", mode);
    config.identity_columns = vec!["id".into()];
    config
}

fn data_field<'a>(op: &'a PlanOp, key: &str) -> &'a Value {
    op.data.as_ref().unwrap().get(key).unwrap()
}

/// Every source row id must appear in at least one operation.
fn assert_source_accounting(ops: &[PlanOp], row_ids: &[i64]) {
    for row_id in row_ids {
        assert!(
            ops.iter().any(|op| op.row_ids.contains(row_id)),
            "source row {row_id} is unaccounted for in {ops:#?}"
        );
    }
}

/// Produced intervals of one entity never overlap.
fn assert_non_overlap(ops: &[PlanOp]) {
    let produced: Vec<(&str, TimePoint, TimePoint)> = ops
        .iter()
        .filter(|op| matches!(op.operation, PlanAction::Insert | PlanAction::Update))
        .map(|op| {
            (
                op.grouping_key.as_str(),
                op.new_valid_from.unwrap(),
                op.new_valid_until.unwrap(),
            )
        })
        .collect();
    for (i, a) in produced.iter().enumerate() {
        for b in produced.iter().skip(i + 1) {
            if a.0 == b.0 {
                assert!(
                    a.2 <= b.1 || b.2 <= a.1,
                    "overlapping output intervals {a:?} and {b:?}"
                );
            }
        }
    }
}

/// Within each entity, INSERT positions precede UPDATE positions precede
/// DELETE positions.
fn assert_ordering_safety(ops: &[PlanOp]) {
    let rank = |op: &PlanOp| match op.operation {
        PlanAction::Insert => 1,
        PlanAction::Update => 2,
        PlanAction::Delete => 3,
        _ => 4,
    };
    for (i, a) in ops.iter().enumerate() {
        for b in ops.iter().skip(i + 1) {
            if a.grouping_key == b.grouping_key {
                assert!(rank(a) <= rank(b), "out-of-order ops {a:#?} then {b:#?}");
            }
        }
    }
}

// ── S1: patch split of one target row ──

fn s1_plan() -> Vec<PlanOp> {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(10)), ("id", json!(1)), ("name", json!("B"))],
            d(2023, 1, 1),
            d(2023, 6, 1),
        )],
        vec![tgt(
            &[("id", json!(1)), ("name", json!("A"))],
            d(2022, 1, 1),
            d(2024, 1, 1),
        )],
    );
    plan(&catalog, &scan, &config(MergeMode::PatchForPortionOf)).unwrap()
}

#[test]
fn s1_patch_split() {
    let ops = s1_plan();
    assert_eq!(ops.len(), 3, "{ops:#?}");

    // INSERTs first, ordered by produced interval, then the elected UPDATE.
    assert_eq!(ops[0].operation, PlanAction::Insert);
    assert_eq!(ops[0].new_valid_from, Some(d(2023, 1, 1)));
    assert_eq!(ops[0].new_valid_until, Some(d(2023, 6, 1)));
    assert_eq!(data_field(&ops[0], "name"), &json!("B"));
    assert_eq!(ops[0].old_valid_from, None);

    assert_eq!(ops[1].operation, PlanAction::Insert);
    assert_eq!(ops[1].new_valid_from, Some(d(2023, 6, 1)));
    assert_eq!(ops[1].new_valid_until, Some(d(2024, 1, 1)));
    assert_eq!(data_field(&ops[1], "name"), &json!("A"));

    assert_eq!(ops[2].operation, PlanAction::Update);
    assert_eq!(ops[2].update_effect, Some(UpdateEffect::Shrink));
    assert_eq!(ops[2].old_valid_from, Some(d(2022, 1, 1)));
    assert_eq!(ops[2].old_valid_until, Some(d(2024, 1, 1)));
    assert_eq!(ops[2].new_valid_from, Some(d(2022, 1, 1)));
    assert_eq!(ops[2].new_valid_until, Some(d(2023, 1, 1)));
    assert_eq!(data_field(&ops[2], "name"), &json!("A"));

    for op in &ops {
        assert_eq!(op.grouping_key, "existing_entity__1");
        assert_eq!(op.row_ids, vec![10]);
        assert!(!op.is_new_entity);
    }
    assert_eq!(ops.iter().map(|o| o.plan_op_seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_non_overlap(&ops);
    assert_ordering_safety(&ops);
}

// ── S2: two source rows found one new entity via a lookup key ──

#[test]
fn s2_new_entity_founding() {
    let catalog = catalog(
        &["id", "employee_nr", "name", "valid_from", "valid_until"],
        &["row_id", "id", "employee_nr", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![
            src(
                &[("row_id", json!(1)), ("employee_nr", json!("E104")), ("name", json!("A1"))],
                d(2022, 1, 1),
                d(2023, 1, 1),
            ),
            src(
                &[("row_id", json!(2)), ("employee_nr", json!("E104")), ("name", json!("A2"))],
                d(2023, 1, 1),
                d(2024, 1, 1),
            ),
        ],
        Vec::new(),
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.lookup_keys = vec![vec!["employee_nr".into()]];

    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 2, "{ops:#?}");
    for op in &ops {
        assert_eq!(op.operation, PlanAction::Insert);
        assert_eq!(op.grouping_key, "new_entity__E104");
        assert!(op.is_new_entity);
        // One founding group shares the minimum causal id.
        assert_eq!(op.causal_id.as_deref(), Some("1"));
        assert_eq!(
            op.entity_keys,
            Some(json!({ "employee_nr": "E104" })),
        );
    }
    assert_eq!(ops[0].row_ids, vec![1]);
    assert_eq!(ops[1].row_ids, vec![2]);
    assert_source_accounting(&ops, &[1, 2]);
}

// ── S3: one source row matching two distinct entities is ambiguous ──

#[test]
fn s3_ambiguous_row() {
    let catalog = catalog(
        &["id", "email", "employee_nr", "name", "valid_from", "valid_until"],
        &["row_id", "id", "email", "employee_nr", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[
                ("row_id", json!(1)),
                ("email", json!("x")),
                ("employee_nr", json!("x")),
                ("name", json!("N")),
            ],
            d(2021, 1, 1),
            d(2022, 1, 1),
        )],
        vec![
            tgt(
                &[("id", json!(1)), ("email", json!("x")), ("employee_nr", json!("E1")), ("name", json!("P"))],
                d(2020, 1, 1),
                d(2030, 1, 1),
            ),
            tgt(
                &[("id", json!(2)), ("email", json!("y")), ("employee_nr", json!("x")), ("name", json!("Q"))],
                d(2020, 1, 1),
                d(2030, 1, 1),
            ),
        ],
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.lookup_keys = vec![vec!["email".into()], vec!["employee_nr".into()]];

    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    let op = &ops[0];
    assert_eq!(op.operation, PlanAction::Error);
    assert_eq!(op.row_ids, vec![1]);
    let message = op.feedback.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(message.contains("ambiguous"), "{message}");
    assert!(message.contains("\"id\": 1") && message.contains("\"id\": 2"), "{message}");
}

// ── S4: eclipse detection with producer feedback ──

fn s4_plan() -> Vec<PlanOp> {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![
            src(
                &[("row_id", json!(1)), ("id", json!(7)), ("name", json!("X"))],
                d(2024, 6, 1),
                d(2024, 12, 1),
            ),
            src(
                &[("row_id", json!(2)), ("id", json!(7)), ("name", json!("Y"))],
                d(2024, 2, 1),
                d(2024, 8, 1),
            ),
            src(
                &[("row_id", json!(3)), ("id", json!(7)), ("name", json!("Z"))],
                d(2024, 6, 1),
                d(2024, 12, 1),
            ),
        ],
        Vec::new(),
    );
    plan(&catalog, &scan, &config(MergeMode::MergeEntityReplace)).unwrap()
}

#[test]
fn s4_eclipsed_row_names_its_producers() {
    let ops = s4_plan();
    let eclipsed: Vec<&PlanOp> = ops
        .iter()
        .filter(|op| op.operation == PlanAction::SkipEclipsed)
        .collect();
    assert_eq!(eclipsed.len(), 1, "{ops:#?}");
    assert_eq!(eclipsed[0].row_ids, vec![1]);
    assert_eq!(eclipsed[0].feedback.as_ref().unwrap()["eclipsed_by"], json!([3]));
    assert_eq!(eclipsed[0].new_valid_from, Some(d(2024, 6, 1)));

    let inserts: Vec<&PlanOp> = ops
        .iter()
        .filter(|op| op.operation == PlanAction::Insert)
        .collect();
    assert_eq!(inserts.len(), 2);
    assert_eq!(data_field(inserts[0], "name"), &json!("Y"));
    assert_eq!(inserts[0].new_valid_until, Some(d(2024, 6, 1)));
    assert_eq!(data_field(inserts[1], "name"), &json!("Z"));
    assert_eq!(inserts[1].new_valid_from, Some(d(2024, 6, 1)));
    assert_eq!(inserts[1].new_valid_until, Some(d(2024, 12, 1)));

    assert_eq!(ops.len(), 3);
    assert_source_accounting(&ops, &[1, 2, 3]);
    assert_non_overlap(&ops);
}

// ── S5: delete a portion out of an open-ended row ──

#[test]
fn s5_delete_for_portion_of() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(50)), ("id", json!(9))],
            d(2022, 1, 1),
            d(2023, 1, 1),
        )],
        vec![tgt(
            &[("id", json!(9)), ("name", json!("P"))],
            d(2020, 1, 1),
            TimePoint::Infinity,
        )],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::DeleteForPortionOf)).unwrap();

    assert_eq!(ops.len(), 2, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::Insert);
    assert_eq!(ops[0].new_valid_from, Some(d(2023, 1, 1)));
    assert_eq!(ops[0].new_valid_until, Some(TimePoint::Infinity));
    assert_eq!(data_field(&ops[0], "name"), &json!("P"));

    assert_eq!(ops[1].operation, PlanAction::Update);
    assert_eq!(ops[1].update_effect, Some(UpdateEffect::Shrink));
    assert_eq!(ops[1].old_valid_until, Some(TimePoint::Infinity));
    assert_eq!(ops[1].new_valid_from, Some(d(2020, 1, 1)));
    assert_eq!(ops[1].new_valid_until, Some(d(2022, 1, 1)));

    assert_source_accounting(&ops, &[50]);
    assert_ordering_safety(&ops);
    assert_non_overlap(&ops);
}

#[test]
fn s5_tombstone_swallowing_a_whole_row_deletes_it() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(50)), ("id", json!(9))],
            d(2020, 1, 1),
            TimePoint::Infinity,
        )],
        vec![tgt(
            &[("id", json!(9)), ("name", json!("P"))],
            d(2020, 1, 1),
            TimePoint::Infinity,
        )],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::DeleteForPortionOf)).unwrap();

    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::Delete);
    // The tombstoning row is not a pure target deletion; it is accounted.
    assert_eq!(ops[0].row_ids, vec![50]);
    assert_eq!(ops[0].old_valid_from, Some(d(2020, 1, 1)));
    assert_eq!(ops[0].data, None);
}

// ── S6: destructive timeline replacement ──

fn s6_plan() -> Vec<PlanOp> {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(77)), ("id", json!(3)), ("name", json!("P3"))],
            d(2021, 1, 1),
            d(2024, 1, 1),
        )],
        vec![
            tgt(&[("id", json!(3)), ("name", json!("P1"))], d(2020, 1, 1), d(2023, 1, 1)),
            tgt(&[("id", json!(3)), ("name", json!("P2"))], d(2023, 1, 1), d(2025, 1, 1)),
        ],
    );
    let mut config = config(MergeMode::MergeEntityReplace);
    config.delete_mode = temporal_merge::DeleteMode::DeleteMissingTimeline;
    plan(&catalog, &scan, &config).unwrap()
}

#[test]
fn s6_destructive_timeline() {
    let ops = s6_plan();
    assert_eq!(ops.len(), 2, "{ops:#?}");

    assert_eq!(ops[0].operation, PlanAction::Update);
    assert_eq!(ops[0].update_effect, Some(UpdateEffect::Move));
    assert_eq!(ops[0].old_valid_from, Some(d(2020, 1, 1)));
    assert_eq!(ops[0].old_valid_until, Some(d(2023, 1, 1)));
    assert_eq!(ops[0].new_valid_from, Some(d(2021, 1, 1)));
    assert_eq!(ops[0].new_valid_until, Some(d(2024, 1, 1)));
    assert_eq!(data_field(&ops[0], "name"), &json!("P3"));
    assert_eq!(ops[0].row_ids, vec![77]);

    assert_eq!(ops[1].operation, PlanAction::Delete);
    assert_eq!(ops[1].old_valid_from, Some(d(2023, 1, 1)));
    assert_eq!(ops[1].old_valid_until, Some(d(2025, 1, 1)));
    assert!(ops[1].row_ids.is_empty());

    assert_ordering_safety(&ops);
    assert_non_overlap(&ops);
}

// ── Delete modes: entities absent from the source ──

#[test]
fn delete_missing_entities_scans_and_deletes_orphans() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("A2"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
        vec![
            tgt(&[("id", json!(1)), ("name", json!("A"))], d(2020, 1, 1), d(2025, 1, 1)),
            tgt(&[("id", json!(2)), ("name", json!("B"))], d(2020, 1, 1), d(2025, 1, 1)),
        ],
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.delete_mode = temporal_merge::DeleteMode::DeleteMissingEntities;

    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 2, "{ops:#?}");

    assert_eq!(ops[0].grouping_key, "existing_entity__1");
    assert_eq!(ops[0].operation, PlanAction::Update);
    assert_eq!(ops[0].update_effect, Some(UpdateEffect::None));
    assert_eq!(data_field(&ops[0], "name"), &json!("A2"));

    assert_eq!(ops[1].grouping_key, "existing_entity__2");
    assert_eq!(ops[1].operation, PlanAction::Delete);
    assert!(ops[1].row_ids.is_empty());
}

// ── Mode scope respect (P6) ──

#[test]
fn insert_new_entities_skips_existing() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![
            src(
                &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("A2"))],
                d(2020, 1, 1),
                d(2025, 1, 1),
            ),
            src(&[("row_id", json!(2)), ("name", json!("N"))], d(2020, 1, 1), d(2025, 1, 1)),
        ],
        vec![tgt(&[("id", json!(1)), ("name", json!("A"))], d(2020, 1, 1), d(2025, 1, 1))],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::InsertNewEntities)).unwrap();
    assert_eq!(ops.len(), 2, "{ops:#?}");

    let filtered = ops.iter().find(|op| op.operation == PlanAction::SkipFiltered).unwrap();
    assert_eq!(filtered.row_ids, vec![1]);
    assert!(!filtered.is_new_entity);

    let insert = ops.iter().find(|op| op.operation == PlanAction::Insert).unwrap();
    assert_eq!(insert.row_ids, vec![2]);
    assert!(insert.is_new_entity);
    assert_eq!(data_field(insert, "name"), &json!("N"));

    // No UPDATE or DELETE ever touches the existing entity.
    assert!(ops.iter().all(|op| !matches!(op.operation, PlanAction::Update | PlanAction::Delete)));
}

#[test]
fn for_portion_of_never_creates_entities() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("id", json!(99)), ("name", json!("N"))],
            d(2020, 1, 1),
            d(2021, 1, 1),
        )],
        Vec::new(),
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::PatchForPortionOf)).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::SkipNoTarget);
    assert_eq!(ops[0].row_ids, vec![1]);
}

#[test]
fn for_portion_of_outside_timeline_is_accounted() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(4)), ("id", json!(1)), ("name", json!("N"))],
            d(2025, 1, 1),
            d(2026, 1, 1),
        )],
        vec![tgt(&[("id", json!(1)), ("name", json!("A"))], d(2020, 1, 1), d(2021, 1, 1))],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::PatchForPortionOf)).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::SkipNoTarget);
    assert_eq!(ops[0].row_ids, vec![4]);
}

// ── Payload semantics ──

#[test]
fn patch_preserves_columns_null_in_source_while_upsert_overwrites() {
    let catalog = catalog(
        &["id", "name", "dept", "valid_from", "valid_until"],
        &["row_id", "id", "name", "dept", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let target = vec![tgt(
        &[("id", json!(1)), ("name", json!("A")), ("dept", json!("D"))],
        d(2020, 1, 1),
        d(2025, 1, 1),
    )];
    let source = vec![src(
        &[("row_id", json!(1)), ("id", json!(1)), ("name", Value::Null), ("dept", json!("E"))],
        d(2020, 1, 1),
        d(2025, 1, 1),
    )];

    let scan = MemoryScan::new(source.clone(), target.clone());
    let ops = plan(&catalog, &scan, &config(MergeMode::MergeEntityPatch)).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, PlanAction::Update);
    assert_eq!(data_field(&ops[0], "name"), &json!("A"));
    assert_eq!(data_field(&ops[0], "dept"), &json!("E"));

    let scan = MemoryScan::new(source, target);
    let ops = plan(&catalog, &scan, &config(MergeMode::MergeEntityUpsert)).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, PlanAction::Update);
    assert_eq!(data_field(&ops[0], "name"), &Value::Null);
    assert_eq!(data_field(&ops[0], "dept"), &json!("E"));
}

#[test]
fn replace_discards_target_payload() {
    let catalog = catalog(
        &["id", "name", "dept", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("B"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
        vec![tgt(
            &[("id", json!(1)), ("name", json!("A")), ("dept", json!("D"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::MergeEntityReplace)).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, PlanAction::Update);
    let data = ops[0].data.as_ref().unwrap().as_object().unwrap();
    assert_eq!(data.get("name"), Some(&json!("B")));
    assert!(data.get("dept").is_none(), "replace must not inherit target columns");
}

#[test]
fn ephemeral_columns_flow_through_without_driving_change_detection() {
    let catalog = catalog(
        &["id", "name", "edited_at", "valid_from", "valid_until"],
        &["row_id", "id", "name", "edited_at", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.ephemeral_columns = vec!["edited_at".into()];

    // Same data, new ephemeral value: the op is an interval-preserving UPDATE
    // that carries the fresh ephemeral.
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("A")), ("edited_at", json!("t2"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
        vec![tgt(
            &[("id", json!(1)), ("name", json!("A")), ("edited_at", json!("t1"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
    );
    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::Update);
    assert_eq!(ops[0].update_effect, Some(UpdateEffect::None));
    assert_eq!(data_field(&ops[0], "edited_at"), &json!("t2"));

    // A partial overlay with identical data coalesces back into one segment:
    // the timeline is never split over an ephemeral difference.
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("A")), ("edited_at", json!("t2"))],
            d(2020, 1, 1),
            d(2022, 1, 1),
        )],
        vec![tgt(
            &[("id", json!(1)), ("name", json!("A")), ("edited_at", json!("t1"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
    );
    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::SkipIdentical);
}

// ── Mirror column synchronization ──

#[test]
fn mirror_column_is_recomputed_from_valid_until() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_to", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_to", "valid_until"],
        &["id", "valid_from"],
        true,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(10)), ("id", json!(1)), ("name", json!("B"))],
            d(2023, 1, 1),
            d(2023, 6, 1),
        )],
        vec![tgt(
            &[("id", json!(1)), ("name", json!("A"))],
            d(2022, 1, 1),
            d(2024, 1, 1),
        )],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::PatchForPortionOf)).unwrap();
    assert_eq!(ops.len(), 3, "{ops:#?}");
    assert_eq!(data_field(&ops[0], "valid_to"), &json!("2023-05-31"));
    assert_eq!(data_field(&ops[1], "valid_to"), &json!("2023-12-31"));
    assert_eq!(data_field(&ops[2], "valid_to"), &json!("2022-12-31"));
}

#[test]
fn disagreeing_mirror_bound_is_a_row_error() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_to", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_to", "valid_until"],
        &["id", "valid_from"],
        true,
    );
    let mut record = src(
        &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("B"))],
        d(2023, 1, 1),
        d(2024, 1, 1),
    );
    record.valid_to = Some(d(2023, 6, 30));
    let scan = MemoryScan::new(vec![record], Vec::new());

    let ops = plan(&catalog, &scan, &config(MergeMode::MergeEntityPatch)).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::Error);
    let message = ops[0].feedback.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(message.contains("temporally inconsistent"), "{message}");
}

// ── Identity handling ──

#[test]
fn unidentifiable_row_is_an_error_under_hybrid_keys() {
    let catalog = catalog(
        &["id", "email", "name", "valid_from", "valid_until"],
        &["row_id", "id", "email", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("email", Value::Null), ("name", json!("N"))],
            d(2020, 1, 1),
            d(2021, 1, 1),
        )],
        Vec::new(),
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.lookup_keys = vec![vec!["email".into()]];

    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 1, "{ops:#?}");
    assert_eq!(ops[0].operation, PlanAction::Error);
    let message = ops[0].feedback.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(message.contains("unidentifiable"), "{message}");
}

#[test]
fn founding_id_groups_rows_into_one_new_entity() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "founding_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![
            src(
                &[("row_id", json!(1)), ("founding_id", json!("F1")), ("name", json!("A"))],
                d(2020, 1, 1),
                d(2021, 1, 1),
            ),
            src(
                &[("row_id", json!(2)), ("founding_id", json!("F1")), ("name", json!("B"))],
                d(2021, 1, 1),
                d(2022, 1, 1),
            ),
        ],
        Vec::new(),
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.founding_id_column = Some("founding_id".into());

    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 2, "{ops:#?}");
    for op in &ops {
        assert_eq!(op.operation, PlanAction::Insert);
        assert_eq!(op.grouping_key, "new_entity__F1");
        assert_eq!(op.causal_id.as_deref(), Some("F1"));
        assert!(op.is_new_entity);
    }
}

#[test]
fn fragmented_natural_keys_canonicalize_into_one_entity() {
    let catalog = catalog(
        &["id", "email", "employee_nr", "name", "valid_from", "valid_until"],
        &["row_id", "id", "email", "employee_nr", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    // Row 1 knows only the email, row 2 both keys, row 3 only the number.
    let scan = MemoryScan::new(
        vec![
            src(
                &[("row_id", json!(1)), ("email", json!("a@x")), ("name", json!("P1"))],
                d(2020, 1, 1),
                d(2021, 1, 1),
            ),
            src(
                &[
                    ("row_id", json!(2)),
                    ("email", json!("a@x")),
                    ("employee_nr", json!("E1")),
                    ("name", json!("P2")),
                ],
                d(2021, 1, 1),
                d(2022, 1, 1),
            ),
            src(
                &[("row_id", json!(3)), ("employee_nr", json!("E1")), ("name", json!("P3"))],
                d(2022, 1, 1),
                d(2023, 1, 1),
            ),
        ],
        Vec::new(),
    );
    let mut config = config(MergeMode::MergeEntityPatch);
    config.lookup_keys = vec![vec!["email".into()], vec!["employee_nr".into()]];

    let ops = plan(&catalog, &scan, &config).unwrap();
    assert_eq!(ops.len(), 3, "{ops:#?}");
    let keys: Vec<&str> = ops.iter().map(|op| op.grouping_key.as_str()).collect();
    assert!(keys.iter().all(|k| *k == keys[0]), "one grouping expected: {keys:?}");
    assert!(keys[0].starts_with("new_entity__"));
    assert_source_accounting(&ops, &[1, 2, 3]);
}

#[test]
fn stable_pk_columns_flow_into_entity_keys() {
    let catalog = catalog(
        &["position_id", "id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["position_id", "valid_from"],
        false,
    );
    let scan = MemoryScan::new(
        vec![src(
            &[("row_id", json!(1)), ("id", json!(1)), ("name", json!("B"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
        vec![tgt(
            &[("position_id", json!(99)), ("id", json!(1)), ("name", json!("A"))],
            d(2020, 1, 1),
            d(2025, 1, 1),
        )],
    );
    let ops = plan(&catalog, &scan, &config(MergeMode::MergeEntityPatch)).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].entity_keys, Some(json!({ "id": 1, "position_id": 99 })));
    assert_eq!(ops[0].identity_keys, Some(json!({ "id": 1 })));
}

// ── Determinism (P7) ──

#[test]
fn planning_is_deterministic() {
    assert_eq!(s1_plan(), s1_plan());
    assert_eq!(s4_plan(), s4_plan());
    assert_eq!(s6_plan(), s6_plan());
}

// ── Idempotence (P8) ──

fn apply(ops: &[PlanOp], target: &mut Vec<TargetRecord>) {
    for op in ops {
        match op.operation {
            PlanAction::Insert => {
                let mut columns = ColumnMap::new();
                if let Some(Value::Object(ref keys)) = op.entity_keys {
                    for (k, v) in keys {
                        columns.insert(k.clone(), v.clone());
                    }
                }
                if let Some(Value::Object(ref data)) = op.data {
                    for (k, v) in data {
                        columns.insert(k.clone(), v.clone());
                    }
                }
                target.push(TargetRecord {
                    columns,
                    valid_from: op.new_valid_from.unwrap(),
                    valid_until: op.new_valid_until.unwrap(),
                });
            }
            PlanAction::Update => {
                let row = target
                    .iter_mut()
                    .find(|r| Some(r.valid_from) == op.old_valid_from)
                    .expect("updated row exists");
                row.valid_from = op.new_valid_from.unwrap();
                row.valid_until = op.new_valid_until.unwrap();
                if let Some(Value::Object(ref data)) = op.data {
                    for (k, v) in data {
                        row.columns.insert(k.clone(), v.clone());
                    }
                }
            }
            PlanAction::Delete => {
                target.retain(|r| Some(r.valid_from) != op.old_valid_from);
            }
            _ => {}
        }
    }
}

#[test]
fn replanning_an_applied_plan_only_skips() {
    let catalog = catalog(
        &["id", "name", "valid_from", "valid_until"],
        &["row_id", "id", "name", "valid_from", "valid_until"],
        &["id", "valid_from"],
        false,
    );
    let source = vec![src(
        &[("row_id", json!(10)), ("id", json!(1)), ("name", json!("B"))],
        d(2023, 1, 1),
        d(2023, 6, 1),
    )];
    let mut target = vec![tgt(
        &[("id", json!(1)), ("name", json!("A"))],
        d(2022, 1, 1),
        d(2024, 1, 1),
    )];

    let cfg = config(MergeMode::PatchForPortionOf);
    let scan = MemoryScan::new(source.clone(), target.clone());
    let ops = plan(&catalog, &scan, &cfg).unwrap();
    apply(&ops, &mut target);
    assert_eq!(target.len(), 3);

    let scan = MemoryScan::new(source, target);
    let replayed = plan(&catalog, &scan, &cfg).unwrap();
    assert!(!replayed.is_empty());
    assert!(
        replayed.iter().all(|op| matches!(
            op.operation,
            PlanAction::SkipIdentical | PlanAction::SkipFiltered | PlanAction::SkipNoTarget
        )),
        "{replayed:#?}"
    );
}
