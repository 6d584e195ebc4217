//! Outcome reports for provisioning and teardown

use crate::state::ResourceSlot;

/// What happened to one slot during provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Created { id: String },
    AlreadyExists { id: String },
}

/// Result of a provisioning pass
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    pub slots: Vec<(ResourceSlot, SlotOutcome)>,
}

impl ProvisionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_created(&mut self, slot: ResourceSlot, id: impl Into<String>) {
        self.slots.push((slot, SlotOutcome::Created { id: id.into() }));
    }

    pub fn add_existing(&mut self, slot: ResourceSlot, id: impl Into<String>) {
        self.slots
            .push((slot, SlotOutcome::AlreadyExists { id: id.into() }));
    }

    /// Slots created in this pass
    pub fn created(&self) -> Vec<ResourceSlot> {
        self.slots
            .iter()
            .filter(|(_, o)| matches!(o, SlotOutcome::Created { .. }))
            .map(|(s, _)| *s)
            .collect()
    }
}

/// A slot that could not be deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub slot: ResourceSlot,
    pub id: String,
    pub error: String,
}

/// Result of a teardown pass. Every slot is attempted.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub deleted: Vec<(ResourceSlot, String)>,
    pub failed: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, slot: ResourceSlot, id: impl Into<String>) {
        self.deleted.push((slot, id.into()));
    }

    pub fn add_failure(&mut self, slot: ResourceSlot, id: impl Into<String>, error: impl Into<String>) {
        self.failed.push(TeardownFailure {
            slot,
            id: id.into(),
            error: error.into(),
        });
    }

    /// One line per failure, e.g. "Security group sg-1: DependencyViolation"
    pub fn failure_lines(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|f| format!("{} {}: {}", f.slot, f.id, f.error))
            .collect()
    }
}
