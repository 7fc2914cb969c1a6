//! Diff - Compare a synthesized document with recorded state
//!
//! Literal attributes are compared directly. Deferred attributes are resolved
//! against the attributes recorded in state; when that is not possible yet the
//! resource is reported as `Unknown` rather than changed.

use std::collections::BTreeSet;
use std::fmt;

use strata_core::synth::Document;
use strata_core::value::resolve;

use crate::state::StateFile;

/// How one resource would change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Not in state -> needs creation
    Create,
    /// In state with differing attributes -> needs update
    Update { changed_attributes: Vec<String> },
    /// Only deferred attributes could differ and they cannot be resolved yet
    Unknown { deferred_attributes: Vec<String> },
    NoChange,
    /// In state but no longer declared -> needs deletion
    Delete,
}

impl Change {
    pub fn is_change(&self) -> bool {
        !matches!(self, Change::NoChange)
    }

    fn symbol(&self) -> &'static str {
        match self {
            Change::Create => "+",
            Change::Update { .. } => "~",
            Change::Unknown { .. } => "?",
            Change::NoChange => " ",
            Change::Delete => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub path: String,
    /// Absent for deletions, whose type is no longer declared
    pub resource_type: Option<String>,
    pub change: Change,
}

impl fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.change.symbol(), self.path)?;
        if let Some(resource_type) = &self.resource_type {
            write!(f, " ({})", resource_type)?;
        }
        match &self.change {
            Change::Update { changed_attributes } => {
                write!(f, ": {}", changed_attributes.join(", "))
            }
            Change::Unknown {
                deferred_attributes,
            } => write!(f, ": known after apply: {}", deferred_attributes.join(", ")),
            _ => Ok(()),
        }
    }
}

/// Changes in document order, followed by deletions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePlan {
    changes: Vec<PlannedChange>,
}

impl StatePlan {
    pub fn changes(&self) -> &[PlannedChange] {
        &self.changes
    }

    /// Whether applying would change nothing that is known now
    pub fn is_empty(&self) -> bool {
        self.changes
            .iter()
            .all(|c| matches!(c.change, Change::NoChange | Change::Unknown { .. }))
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for planned in &self.changes {
            match planned.change {
                Change::Create => summary.create += 1,
                Change::Update { .. } => summary.update += 1,
                Change::Unknown { .. } => summary.unknown += 1,
                Change::NoChange => summary.unchanged += 1,
                Change::Delete => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unknown: usize,
    pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to delete, {} known after apply",
            self.create, self.update, self.delete, self.unknown
        )
    }
}

/// Compare `document` with the recorded `state`
pub fn diff(document: &Document, state: Option<&StateFile>) -> StatePlan {
    let outputs = state.map(StateFile::to_outputs).unwrap_or_default();
    let mut changes = Vec::with_capacity(document.resources.len());

    for record in &document.resources {
        let change = match state.and_then(|s| s.get_resource(&record.path)) {
            None => Change::Create,
            Some(recorded) => {
                let mut changed_attributes = Vec::new();
                let mut deferred_attributes = Vec::new();
                for (name, value) in &record.attributes {
                    match resolve(value, &outputs) {
                        Ok(resolved) if recorded.get(name) == Some(&resolved) => {}
                        Ok(_) => changed_attributes.push(name.clone()),
                        Err(_) => deferred_attributes.push(name.clone()),
                    }
                }
                classify(changed_attributes, deferred_attributes)
            }
        };
        changes.push(PlannedChange {
            path: record.path.clone(),
            resource_type: Some(record.resource_type.clone()),
            change,
        });
    }

    if let Some(state) = state {
        let declared: BTreeSet<&str> = document.paths().into_iter().collect();
        // Dependents sort after their parents within a scope, so reverse order
        // tends to remove them first
        let removed: Vec<&str> = state
            .paths()
            .filter(|path| !declared.contains(path))
            .collect();
        for path in removed.into_iter().rev() {
            changes.push(PlannedChange {
                path: path.to_string(),
                resource_type: None,
                change: Change::Delete,
            });
        }
    }

    StatePlan { changes }
}

fn classify(changed_attributes: Vec<String>, deferred_attributes: Vec<String>) -> Change {
    if !changed_attributes.is_empty() {
        Change::Update { changed_attributes }
    } else if !deferred_attributes.is_empty() {
        Change::Unknown {
            deferred_attributes,
        }
    } else {
        Change::NoChange
    }
}
