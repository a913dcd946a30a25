//! Set-based temporal merge planning over relations whose rows carry a
//! validity interval `[valid_from, valid_until)`.
//!
//! Given a target history relation, a source batch, a merge mode and identity
//! metadata, [`plan`] deterministically computes a minimal, ordered set of
//! DML operations (INSERT / UPDATE / DELETE / SKIP) that transforms the
//! target into the semantically correct post-merge history while preserving
//! timeline coverage.
//!
//! The planner is a pure in-process computation: it reads two immutable
//! relation snapshots through the [`RelationIntrospector`] and
//! [`RelationScan`] collaborator traits, and it never mutates storage.
//! Applying the produced plan is the caller's business.
//!
//! ```
//! use temporal_merge::{
//!     plan, ColumnMap, EraMeta, MemoryCatalog, MemoryRelation, MemoryScan, MergeConfig,
//!     MergeMode, PlanAction, RangeSubtype, SourceRecord, TimePoint,
//! };
//!
//! let mut catalog = MemoryCatalog::new();
//! catalog.add_relation(
//!     "positions",
//!     MemoryRelation::new(["id", "name", "valid_from", "valid_until"], ["id", "valid_from"])
//!         .with_era(EraMeta {
//!             era_name: "validity".into(),
//!             valid_from_col: "valid_from".into(),
//!             valid_until_col: "valid_until".into(),
//!             valid_to_col: None,
//!             subtype: RangeSubtype::Discrete,
//!         }),
//! );
//! catalog.add_relation(
//!     "positions_src",
//!     MemoryRelation::new(["row_id", "id", "name", "valid_from", "valid_until"], ["row_id"]),
//! );
//!
//! let mut columns = ColumnMap::new();
//! columns.insert("row_id".into(), 1i64.into());
//! columns.insert("id".into(), 7i64.into());
//! columns.insert("name".into(), "Alice".into());
//! let scan = MemoryScan::new(
//!     vec![SourceRecord {
//!         columns,
//!         valid_from: Some(TimePoint::date(2024, 1, 1)),
//!         valid_until: Some(TimePoint::date(2025, 1, 1)),
//!         valid_to: None,
//!     }],
//!     Vec::new(),
//! );
//!
//! let mut config = MergeConfig::new("positions", "positions_src", "validity", MergeMode::MergeEntityPatch);
//! config.identity_columns = vec!["id".into()];
//!
//! let ops = plan(&catalog, &scan, &config).unwrap();
//! assert_eq!(ops.len(), 1);
//! assert_eq!(ops[0].operation, PlanAction::Insert);
//! ```

pub mod coalesce;
pub mod diff;
pub mod error;
pub mod introspect;
pub mod memory;
pub mod order;
pub mod payload;
pub mod range;
pub mod reader;
pub mod scope;
pub mod sweep;
pub mod types;

pub use error::PlanError;
pub use introspect::{build_plan_context, RelationIntrospector};
pub use memory::{MemoryCatalog, MemoryRelation, MemoryScan};
pub use payload::ColumnMap;
pub use range::{covers_without_gaps, AllenRelation, Interval, Multirange, RangeSubtype, TimePoint};
pub use scope::{build_target_filter, KeySelector, RelationScan, TargetFilter};
pub use types::{
    DeleteMode, EraMeta, MergeConfig, MergeMode, PlanAction, PlanContext, PlanOp, SourceRecord,
    SourceRow, TargetRecord, TargetRow, UpdateEffect,
};

/// Plan the merge of `config.source_relation` into `config.target_relation`.
///
/// Resolves metadata through the introspector, prepares and scopes both row
/// sets, then runs the in-memory sweep. The returned operations are totally
/// ordered and deterministic for identical inputs; fatal metadata problems
/// return a [`PlanError`], while row-level problems surface as `ERROR` /
/// `SKIP_*` operations inside the plan.
pub fn plan(
    introspector: &dyn RelationIntrospector,
    scan: &dyn RelationScan,
    config: &MergeConfig,
) -> Result<Vec<PlanOp>, PlanError> {
    let ctx = build_plan_context(introspector, config)?;

    let source_records = scan.scan_source()?;
    let sources = reader::prepare_source(source_records, &ctx);
    tracing::debug!(rows = sources.len(), "prepared source batch");

    let filter = build_target_filter(&ctx, &sources);
    let target_records = scan.scan_target(&filter)?;
    let targets = reader::prepare_target(target_records, &ctx);
    tracing::debug!(rows = targets.len(), "scoped target history");

    let ops = sweep::plan_rows(sources, targets, &ctx);
    tracing::debug!(ops = ops.len(), "merge planned");
    Ok(ops)
}
