use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;

use crate::error::PlanError;

/// Whether an era's temporal domain has a successor function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeSubtype {
    /// A successor is defined: dates step by one day, integers by one.
    /// The mirrored inclusive end (`valid_to`) is only meaningful here.
    Discrete,
    /// Only the half-open `[from, until)` interval is meaningful.
    Continuous,
}

/// One temporal boundary value. All finite points of an era share a single
/// variant; the ordering across variants only matters for the infinities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimePoint {
    NegInfinity,
    Integer(i64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Infinity,
}

impl TimePoint {
    /// Convenience constructor for date points; panics on an invalid date,
    /// which is acceptable for literals in embedding code and tests.
    pub fn date(year: i32, month: u32, day: u32) -> Self {
        Self::Date(NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date"))
    }

    pub fn is_finite(&self) -> bool {
        !matches!(self, Self::NegInfinity | Self::Infinity)
    }

    /// Subtype of a finite point; infinities adapt to either domain.
    pub fn subtype(&self) -> Option<RangeSubtype> {
        match self {
            Self::Integer(_) | Self::Date(_) => Some(RangeSubtype::Discrete),
            Self::Timestamp(_) => Some(RangeSubtype::Continuous),
            Self::NegInfinity | Self::Infinity => None,
        }
    }

    /// Next representable point (discrete subtypes only). Infinities are
    /// fixed points, matching how unbounded mirror values behave.
    pub fn successor(&self) -> Result<Self, PlanError> {
        match self {
            Self::Integer(v) => Ok(Self::Integer(v.saturating_add(1))),
            Self::Date(d) => d.succ_opt().map(Self::Date).ok_or(PlanError::ContinuousSuccessor {
                point: d.to_string(),
            }),
            Self::Timestamp(ts) => Err(PlanError::ContinuousSuccessor {
                point: ts.to_string(),
            }),
            Self::NegInfinity => Ok(Self::NegInfinity),
            Self::Infinity => Ok(Self::Infinity),
        }
    }

    /// Previous representable point (discrete subtypes only); used to derive
    /// the mirrored inclusive end from an exclusive `valid_until`.
    pub fn predecessor(&self) -> Result<Self, PlanError> {
        match self {
            Self::Integer(v) => Ok(Self::Integer(v.saturating_sub(1))),
            Self::Date(d) => d.pred_opt().map(Self::Date).ok_or(PlanError::ContinuousSuccessor {
                point: d.to_string(),
            }),
            Self::Timestamp(ts) => Err(PlanError::ContinuousSuccessor {
                point: ts.to_string(),
            }),
            Self::NegInfinity => Ok(Self::NegInfinity),
            Self::Infinity => Ok(Self::Infinity),
        }
    }

    /// JSON rendering used for payload columns and plan output.
    pub fn to_json(&self) -> Value {
        match self {
            Self::NegInfinity => Value::String("-infinity".into()),
            Self::Infinity => Value::String("infinity".into()),
            Self::Integer(v) => Value::from(*v),
            Self::Date(d) => Value::String(d.to_string()),
            Self::Timestamp(ts) => Value::String(ts.to_string()),
        }
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegInfinity => f.write_str("-infinity"),
            Self::Infinity => f.write_str("infinity"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Timestamp(ts) => write!(f, "{ts}"),
        }
    }
}

impl Serialize for TimePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(v) => serializer.serialize_i64(*v),
            other => serializer.collect_str(other),
        }
    }
}

/// Canonical half-open validity interval `[from, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub from: TimePoint,
    pub until: TimePoint,
}

impl Interval {
    pub fn new(from: TimePoint, until: TimePoint) -> Self {
        Self { from, until }
    }

    pub fn is_valid(&self) -> bool {
        self.from < self.until
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.from <= other.from && other.until <= self.until
    }

    pub fn contains_point(&self, point: &TimePoint) -> bool {
        self.from <= *point && *point < self.until
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.from < other.until && other.from < self.until
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.from, self.until)
    }
}

/// One of Allen's thirteen relations between two half-open intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllenRelation {
    Precedes,
    Meets,
    Overlaps,
    Starts,
    During,
    Finishes,
    Equals,
    PrecededBy,
    MetBy,
    OverlappedBy,
    StartedBy,
    Contains,
    FinishedBy,
}

impl AllenRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precedes => "precedes",
            Self::Meets => "meets",
            Self::Overlaps => "overlaps",
            Self::Starts => "starts",
            Self::During => "during",
            Self::Finishes => "finishes",
            Self::Equals => "equals",
            Self::PrecededBy => "preceded_by",
            Self::MetBy => "met_by",
            Self::OverlappedBy => "overlapped_by",
            Self::StartedBy => "started_by",
            Self::Contains => "contains",
            Self::FinishedBy => "finished_by",
        }
    }

    /// Relation of `a` to `b`. Total for valid (non-empty) intervals.
    pub fn of(a: &Interval, b: &Interval) -> Self {
        use std::cmp::Ordering::*;
        if a.until < b.from {
            return Self::Precedes;
        }
        if a.until == b.from {
            return Self::Meets;
        }
        if b.until < a.from {
            return Self::PrecededBy;
        }
        if b.until == a.from {
            return Self::MetBy;
        }
        match (a.from.cmp(&b.from), a.until.cmp(&b.until)) {
            (Equal, Equal) => Self::Equals,
            (Equal, Less) => Self::Starts,
            (Equal, Greater) => Self::StartedBy,
            (Less, Equal) => Self::FinishedBy,
            (Greater, Equal) => Self::Finishes,
            (Less, Less) => Self::Overlaps,
            (Greater, Greater) => Self::OverlappedBy,
            (Less, Greater) => Self::Contains,
            (Greater, Less) => Self::During,
        }
    }
}

impl fmt::Display for AllenRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sorted set of disjoint intervals; overlapping or adjacent additions are
/// merged into maximal contiguous blocks.
#[derive(Debug, Clone, Default)]
pub struct Multirange(Vec<Interval>);

impl Multirange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, interval: Interval) {
        if !interval.is_valid() {
            return;
        }
        self.0.push(interval);
        self.0.sort_by(|a, b| a.from.cmp(&b.from).then(a.until.cmp(&b.until)));
        let mut merged: Vec<Interval> = Vec::with_capacity(self.0.len());
        for iv in self.0.drain(..) {
            match merged.last_mut() {
                Some(last) if iv.from <= last.until => {
                    if iv.until > last.until {
                        last.until = iv.until;
                    }
                }
                _ => merged.push(iv),
            }
        }
        self.0 = merged;
    }

    /// A merged multirange covers an interval iff one contiguous block does.
    pub fn covers(&self, interval: &Interval) -> bool {
        self.0.iter().any(|block| block.contains(interval))
    }

    pub fn blocks(&self) -> &[Interval] {
        &self.0
    }
}

/// True iff the union of `intervals` contains `target` with no gap.
/// Input order is irrelevant.
pub fn covers_without_gaps(intervals: &[Interval], target: &Interval) -> bool {
    let mut mr = Multirange::new();
    for iv in intervals {
        mr.add(*iv);
    }
    mr.covers(target)
}
