use std::collections::BTreeMap;

use crate::error::PlanError;
use crate::introspect::RelationIntrospector;
use crate::scope::{RelationScan, TargetFilter};
use crate::types::{EraMeta, SourceRecord, TargetRecord};

/// Static catalog over in-memory relation metadata. The embedding story for
/// datasets that never touch a database, and the fixture for tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    relations: BTreeMap<String, MemoryRelation>,
}

#[derive(Debug, Clone)]
pub struct MemoryRelation {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub eras: BTreeMap<String, EraMeta>,
}

impl MemoryRelation {
    pub fn new<C, P, S, T>(columns: C, primary_key: P) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
        P: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            eras: BTreeMap::new(),
        }
    }

    pub fn with_era(mut self, era: EraMeta) -> Self {
        self.eras.insert(era.era_name.clone(), era);
        self
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_relation(&mut self, name: impl Into<String>, relation: MemoryRelation) {
        self.relations.insert(name.into(), relation);
    }

    fn relation(&self, name: &str) -> Result<&MemoryRelation, PlanError> {
        self.relations.get(name).ok_or_else(|| PlanError::RelationUnknown {
            relation: name.to_string(),
        })
    }
}

impl RelationIntrospector for MemoryCatalog {
    fn lookup_era(&self, relation: &str, era_name: &str) -> Result<EraMeta, PlanError> {
        self.relation(relation)?
            .eras
            .get(era_name)
            .cloned()
            .ok_or_else(|| PlanError::EraNotFound {
                relation: relation.to_string(),
                era: era_name.to_string(),
            })
    }

    fn relation_columns(&self, relation: &str) -> Result<Vec<String>, PlanError> {
        Ok(self.relation(relation)?.columns.clone())
    }

    fn primary_key_columns(&self, relation: &str) -> Result<Vec<String>, PlanError> {
        Ok(self.relation(relation)?.primary_key.clone())
    }
}

/// In-memory snapshots of the two relations a planning call reads.
#[derive(Debug, Default)]
pub struct MemoryScan {
    pub source: Vec<SourceRecord>,
    pub target: Vec<TargetRecord>,
}

impl MemoryScan {
    pub fn new(source: Vec<SourceRecord>, target: Vec<TargetRecord>) -> Self {
        Self { source, target }
    }
}

impl RelationScan for MemoryScan {
    fn scan_source(&self) -> Result<Vec<SourceRecord>, PlanError> {
        Ok(self.source.clone())
    }

    fn scan_target(&self, filter: &TargetFilter) -> Result<Vec<TargetRecord>, PlanError> {
        Ok(self
            .target
            .iter()
            .filter(|record| filter.admits(&record.columns))
            .cloned()
            .collect())
    }
}
