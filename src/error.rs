use thiserror::Error;

/// Fatal planning errors. Anything recoverable at row granularity is surfaced
/// as an `ERROR` or `SKIP_*` plan operation instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unknown relation {relation:?}")]
    RelationUnknown { relation: String },

    #[error("no era named {era:?} is registered for relation {relation:?}")]
    EraNotFound { relation: String, era: String },

    #[error("relation {relation:?} has no column {column:?}")]
    ColumnMissing { relation: String, column: String },

    #[error("source relation {relation:?} has no row identifier column {column:?}")]
    RowIdColumnMissing { relation: String, column: String },

    #[error("founding id column {column:?} does not exist in source relation {relation:?}")]
    FoundingColumnMissing { relation: String, column: String },

    #[error("founding id column {column:?} cannot also be a lookup key column")]
    FoundingColumnIsLookupKey { column: String },

    #[error("source relation {relation:?} must expose the temporal column {column:?}")]
    SourceTemporalMissing { relation: String, column: String },

    #[error("source relation {relation:?} has neither {valid_until:?} nor {valid_to}")]
    SourceEndBoundMissing {
        relation: String,
        valid_until: String,
        valid_to: String,
    },

    #[error("mirror column {column:?} requires a discrete range subtype")]
    MirrorOnContinuousRange { column: String },

    #[error("{point} has no successor: the range subtype is continuous")]
    ContinuousSuccessor { point: String },

    #[error("temporal column {column:?} cannot be listed as ephemeral")]
    EphemeralTemporalColumn { column: String },

    #[error("at least one of identity columns or lookup keys must be provided")]
    NoEntityKey,
}
