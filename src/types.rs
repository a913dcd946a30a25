use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::payload::ColumnMap;
use crate::range::{Interval, RangeSubtype, TimePoint};

// ── Merge mode ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeMode {
    MergeEntityUpsert,
    UpdateForPortionOf,
    MergeEntityPatch,
    PatchForPortionOf,
    MergeEntityReplace,
    ReplaceForPortionOf,
    InsertNewEntities,
    DeleteForPortionOf,
}

impl MergeMode {
    pub fn is_patch(&self) -> bool {
        matches!(self, Self::MergeEntityPatch | Self::PatchForPortionOf)
    }

    pub fn is_replace(&self) -> bool {
        matches!(
            self,
            Self::MergeEntityReplace | Self::ReplaceForPortionOf | Self::InsertNewEntities
        )
    }

    /// REPLACE-family modes are last-writer-wins: only the highest
    /// `source_row_id` contributes per atomic segment. PATCH/UPSERT fold all.
    pub fn is_last_writer_wins(&self) -> bool {
        matches!(
            self,
            Self::MergeEntityReplace
                | Self::ReplaceForPortionOf
                | Self::InsertNewEntities
                | Self::DeleteForPortionOf
        )
    }

    pub fn is_for_portion_of(&self) -> bool {
        matches!(
            self,
            Self::UpdateForPortionOf
                | Self::PatchForPortionOf
                | Self::ReplaceForPortionOf
                | Self::DeleteForPortionOf
        )
    }

    pub fn is_entity_scope(&self) -> bool {
        matches!(
            self,
            Self::MergeEntityUpsert
                | Self::MergeEntityPatch
                | Self::MergeEntityReplace
                | Self::InsertNewEntities
        )
    }
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MERGE_ENTITY_UPSERT" => Ok(Self::MergeEntityUpsert),
            "UPDATE_FOR_PORTION_OF" => Ok(Self::UpdateForPortionOf),
            "MERGE_ENTITY_PATCH" => Ok(Self::MergeEntityPatch),
            "PATCH_FOR_PORTION_OF" => Ok(Self::PatchForPortionOf),
            "MERGE_ENTITY_REPLACE" => Ok(Self::MergeEntityReplace),
            "REPLACE_FOR_PORTION_OF" => Ok(Self::ReplaceForPortionOf),
            "INSERT_NEW_ENTITIES" => Ok(Self::InsertNewEntities),
            "DELETE_FOR_PORTION_OF" => Ok(Self::DeleteForPortionOf),
            other => Err(format!("invalid merge mode: {other}")),
        }
    }
}

// ── Delete mode ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteMode {
    None,
    DeleteMissingTimeline,
    DeleteMissingEntities,
    DeleteMissingTimelineAndEntities,
}

impl DeleteMode {
    pub fn deletes_entities(&self) -> bool {
        matches!(
            self,
            Self::DeleteMissingEntities | Self::DeleteMissingTimelineAndEntities
        )
    }

    pub fn deletes_timeline(&self) -> bool {
        matches!(
            self,
            Self::DeleteMissingTimeline | Self::DeleteMissingTimelineAndEntities
        )
    }
}

impl FromStr for DeleteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "DELETE_MISSING_TIMELINE" => Ok(Self::DeleteMissingTimeline),
            "DELETE_MISSING_ENTITIES" => Ok(Self::DeleteMissingEntities),
            "DELETE_MISSING_TIMELINE_AND_ENTITIES" => Ok(Self::DeleteMissingTimelineAndEntities),
            other => Err(format!("invalid delete mode: {other}")),
        }
    }
}

// ── Plan action ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanAction {
    Insert,
    Update,
    Delete,
    SkipIdentical,
    SkipFiltered,
    SkipNoTarget,
    SkipEclipsed,
    Error,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::SkipIdentical => "SKIP_IDENTICAL",
            Self::SkipFiltered => "SKIP_FILTERED",
            Self::SkipNoTarget => "SKIP_NO_TARGET",
            Self::SkipEclipsed => "SKIP_ECLIPSED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_dml(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::SkipIdentical | Self::SkipFiltered | Self::SkipNoTarget | Self::SkipEclipsed
        )
    }
}

// ── Update effect ──

/// Geometric classification of an UPDATE. Declaration order is the output
/// ranking order: growth applies before shrinkage so re-linked timelines
/// never pass through a transient gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateEffect {
    None,
    Grow,
    Shrink,
    Move,
}

impl UpdateEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Grow => "GROW",
            Self::Shrink => "SHRINK",
            Self::Move => "MOVE",
        }
    }
}

// ── Identity constellation ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// Both identity columns and lookup keys.
    Hybrid,
    /// Only identity columns; rows with NULL identity found new entities.
    IdentityOnly,
    /// Only lookup keys.
    LookupOnly,
    /// Neither; rejected at context construction.
    Undefined,
}

// ── Era metadata ──

/// Declared temporal schema of a relation: the validity columns and the
/// range subtype. Supplied by a `RelationIntrospector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraMeta {
    pub era_name: String,
    pub valid_from_col: String,
    pub valid_until_col: String,
    /// Mirrored inclusive end, `predecessor(valid_until)`. Discrete only.
    pub valid_to_col: Option<String>,
    pub subtype: RangeSubtype,
}

// ── Planner configuration ──

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub target_relation: String,
    pub source_relation: String,
    pub era_name: String,
    pub mode: MergeMode,
    pub delete_mode: DeleteMode,
    pub identity_columns: Vec<String>,
    /// Natural key sets; a source row matches a target entity if it agrees
    /// on any one complete set.
    pub lookup_keys: Vec<Vec<String>>,
    pub row_id_column: String,
    pub founding_id_column: Option<String>,
    pub ephemeral_columns: Vec<String>,
    pub log_trace: bool,
}

impl MergeConfig {
    pub fn new(
        target_relation: impl Into<String>,
        source_relation: impl Into<String>,
        era_name: impl Into<String>,
        mode: MergeMode,
    ) -> Self {
        Self {
            target_relation: target_relation.into(),
            source_relation: source_relation.into(),
            era_name: era_name.into(),
            mode,
            delete_mode: DeleteMode::None,
            identity_columns: Vec::new(),
            lookup_keys: Vec::new(),
            row_id_column: "row_id".to_string(),
            founding_id_column: None,
            ephemeral_columns: Vec::new(),
            log_trace: false,
        }
    }
}

// ── Scanned records (raw rows handed over by RelationScan) ──

/// One raw source row. Temporal bounds are carried typed; every other column
/// (including the row id and founding id) sits in `columns` under its name.
#[derive(Debug, Clone, Default)]
pub struct SourceRecord {
    pub columns: ColumnMap,
    pub valid_from: Option<TimePoint>,
    pub valid_until: Option<TimePoint>,
    pub valid_to: Option<TimePoint>,
}

/// One raw target row; target history is well-formed, so bounds are mandatory.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    pub columns: ColumnMap,
    pub valid_from: TimePoint,
    pub valid_until: TimePoint,
}

// ── Prepared rows (after normalization and payload decomposition) ──

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub row_id: i64,
    /// Groups rows that jointly found one new entity; founding id when
    /// provided, else the row id.
    pub causal_id: String,
    pub valid_from: TimePoint,
    pub valid_until: TimePoint,
    pub identity_keys: ColumnMap,
    pub lookup_keys: ColumnMap,
    pub data: ColumnMap,
    pub ephemeral: ColumnMap,
    /// Identity columns as provided (nulls included) for new-entity echo.
    pub stable_pk: ColumnMap,
    pub is_identifiable: bool,
    pub lookup_keys_all_null: bool,
}

impl SourceRow {
    pub fn validity(&self) -> Interval {
        Interval::new(self.valid_from, self.valid_until)
    }
}

#[derive(Debug, Clone)]
pub struct TargetRow {
    pub valid_from: TimePoint,
    pub valid_until: TimePoint,
    pub identity_keys: ColumnMap,
    pub lookup_keys: ColumnMap,
    pub data: ColumnMap,
    pub ephemeral: ColumnMap,
    /// Primary-key-only columns (not identity/lookup/temporal), echoed into
    /// `entity_keys` so an executor can address the row.
    pub stable_pk: ColumnMap,
}

impl TargetRow {
    pub fn validity(&self) -> Interval {
        Interval::new(self.valid_from, self.valid_until)
    }
}

// ── Early feedback and matched source rows ──

#[derive(Debug, Clone)]
pub struct EarlyFeedback {
    pub action: PlanAction,
    pub message: Option<String>,
    /// Newer source rows whose combined coverage eclipsed this one.
    pub eclipsed_by: Vec<i64>,
}

impl EarlyFeedback {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            action: PlanAction::Error,
            message: Some(message.into()),
            eclipsed_by: Vec::new(),
        }
    }

    pub fn skip(action: PlanAction) -> Self {
        Self {
            action,
            message: None,
            eclipsed_by: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchedSourceRow {
    pub source: SourceRow,
    pub is_new_entity: bool,
    pub grouping_key: String,
    /// Identity discovered from the matched target (None for new entities).
    pub discovered_identity: Option<ColumnMap>,
    /// Lookup values of the matched target; grouping tag for lookup-only
    /// constellations.
    pub discovered_lookup: Option<ColumnMap>,
    /// Canonical natural key after resolution.
    pub canonical_lookup: Option<ColumnMap>,
    pub early_feedback: Option<EarlyFeedback>,
    pub is_eclipsed: bool,
}

impl MatchedSourceRow {
    pub fn is_active(&self) -> bool {
        self.early_feedback.is_none() && !self.is_eclipsed
    }
}

// ── Derived segments ──

/// Half-open slice between consecutive distinct time points of one entity.
#[derive(Debug, Clone)]
pub struct AtomicSegment {
    pub grouping_key: String,
    pub valid: Interval,
    pub is_new_entity: bool,
    pub identity_keys: ColumnMap,
    pub causal_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedSegment {
    pub grouping_key: String,
    pub valid: Interval,
    pub is_new_entity: bool,
    pub identity_keys: ColumnMap,
    pub causal_id: Option<String>,
    pub row_ids: Vec<i64>,
    pub target_valid: Option<Interval>,
    pub data: Option<ColumnMap>,
    pub ephemeral: Option<ColumnMap>,
    pub data_hash: Option<u64>,
    pub has_source_coverage: bool,
    pub has_target_coverage: bool,
    /// Allen relation between the covering source row and target row ranges.
    pub s_t_relation: Option<crate::range::AllenRelation>,
}

#[derive(Debug, Clone)]
pub struct CoalescedSegment {
    pub grouping_key: String,
    pub valid: Interval,
    pub is_new_entity: bool,
    pub identity_keys: ColumnMap,
    pub causal_id: Option<String>,
    pub row_ids: Vec<i64>,
    pub data: Option<ColumnMap>,
    pub ephemeral: Option<ColumnMap>,
    /// `valid_from` of the original target row this island derives from.
    pub ancestor_valid_from: Option<TimePoint>,
    pub data_hash: Option<u64>,
    pub has_source_coverage: bool,
    pub has_target_coverage: bool,
    pub s_t_relation: Option<crate::range::AllenRelation>,
}

/// One tuple of the full outer join between coalesced segments and original
/// target rows.
#[derive(Debug, Clone)]
pub struct DiffRow {
    pub grouping_key: String,
    pub is_new_entity: bool,
    pub identity_keys: ColumnMap,
    pub causal_id: Option<String>,
    pub row_ids: Vec<i64>,
    pub final_valid: Option<Interval>,
    pub final_data: Option<ColumnMap>,
    pub ephemeral: Option<ColumnMap>,
    pub target_valid: Option<Interval>,
    pub target_data: Option<ColumnMap>,
    pub target_ephemeral: Option<ColumnMap>,
    pub target_lookup_keys: Option<ColumnMap>,
    pub target_stable_pk: Option<ColumnMap>,
    pub has_source_coverage: bool,
    pub s_t_relation: Option<crate::range::AllenRelation>,
}

// ── Plan output ──

/// One operation of the computed merge plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOp {
    /// Dense 1-based rank, unique within the planning call.
    pub plan_op_seq: i64,
    /// Source rows that contributed; empty for pure target deletions.
    pub row_ids: Vec<i64>,
    pub operation: PlanAction,
    pub update_effect: Option<UpdateEffect>,
    pub is_new_entity: bool,
    /// Canonical identifier exposed for feedback: identity, lookup and
    /// stable-pk values merged.
    pub entity_keys: Option<Value>,
    pub identity_keys: Option<Value>,
    pub lookup_keys: Option<Value>,
    pub causal_id: Option<String>,
    pub old_valid_from: Option<TimePoint>,
    pub old_valid_until: Option<TimePoint>,
    pub new_valid_from: Option<TimePoint>,
    pub new_valid_until: Option<TimePoint>,
    /// Final payload (data plus ephemeral, mirror column included).
    pub data: Option<Value>,
    pub feedback: Option<Value>,
    /// Populated only when tracing is enabled on the planning call.
    pub trace: Option<Value>,
    pub grouping_key: String,
}

// ── Plan context (normalized metadata for one planning call) ──

#[derive(Debug, Clone)]
pub struct PlanContext {
    pub mode: MergeMode,
    pub delete_mode: DeleteMode,
    pub era: EraMeta,
    pub identity_columns: Vec<String>,
    /// Individual natural key sets; matching succeeds on any one set.
    pub lookup_key_sets: Vec<Vec<String>>,
    /// Sorted union of all lookup key columns.
    pub all_lookup_cols: Vec<String>,
    pub entity_key_cols: Vec<String>,
    pub segment_key_cols: Vec<String>,
    pub stable_pk_cols: Vec<String>,
    pub temporal_cols: Vec<String>,
    pub ephemeral_columns: Vec<String>,
    pub strategy: IdentityStrategy,
    pub row_id_column: String,
    pub founding_id_column: Option<String>,
    /// Opaque data columns of each side (everything that is not a key,
    /// temporal, ephemeral or bookkeeping column).
    pub source_data_cols: Vec<String>,
    pub target_data_cols: Vec<String>,
    pub ephemeral_in_source: Vec<String>,
    pub ephemeral_in_target: Vec<String>,
    pub log_trace: bool,
}

impl PlanContext {
    pub fn is_founding_mode(&self) -> bool {
        self.founding_id_column.is_some()
    }
}
