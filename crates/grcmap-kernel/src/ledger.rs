//! Evidence↔subcontrol association store and plan execution.
//!
//! [`AssociationSink`] is the seam an API client implements. The in-memory
//! [`AssociationLedger`] implements it offline over the two exports, with
//! the same idempotent upsert semantics the service has: linking an existing
//! pair is a no-op.

use crate::model::{Control, Evidence};
use crate::plan::{AssociationBatch, AssociationPlan};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Errors raised by a sink while linking one batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("subcontrol not found: {0}")]
    SubcontrolNotFound(String),

    #[error("evidence not found: {0}")]
    EvidenceNotFound(String),

    #[error("association rejected for {subcontrol_id}: {reason}")]
    Rejected {
        subcontrol_id: String,
        reason: String,
    },
}

/// Destination for association batches.
pub trait AssociationSink {
    /// Link every evidence id to the subcontrol. Returns how many links are
    /// new. A batch either applies whole or fails whole.
    fn associate(
        &mut self,
        subcontrol_id: &str,
        evidence_ids: &[String],
    ) -> Result<usize, LedgerError>;
}

/// Many-to-many evidence↔subcontrol links over known ids.
#[derive(Debug, Clone, Default)]
pub struct AssociationLedger {
    links: BTreeMap<String, BTreeSet<String>>,
    evidence_ids: BTreeSet<String>,
    subcontrol_ids: BTreeSet<String>,
}

impl AssociationLedger {
    /// Seed the ledger with the ids and links present in the exports.
    pub fn from_exports(evidence: &[Evidence], controls: &[Control]) -> Self {
        let mut ledger = Self::default();
        for control in controls {
            for subcontrol in &control.subcontrols {
                ledger.subcontrol_ids.insert(subcontrol.id.clone());
            }
        }
        for item in evidence {
            ledger.evidence_ids.insert(item.id.clone());
            let linked = ledger.links.entry(item.id.clone()).or_default();
            linked.extend(item.associations.iter().map(str::to_string));
        }
        ledger
    }

    /// Link one pair. `Ok(false)` when it was already linked.
    pub fn link(&mut self, evidence_id: &str, subcontrol_id: &str) -> Result<bool, LedgerError> {
        self.check_known(evidence_id, subcontrol_id)?;
        Ok(self
            .links
            .entry(evidence_id.to_string())
            .or_default()
            .insert(subcontrol_id.to_string()))
    }

    pub fn is_linked(&self, evidence_id: &str, subcontrol_id: &str) -> bool {
        self.links
            .get(evidence_id)
            .is_some_and(|linked| linked.contains(subcontrol_id))
    }

    pub fn subcontrols_of(&self, evidence_id: &str) -> impl Iterator<Item = &str> {
        self.links
            .get(evidence_id)
            .into_iter()
            .flat_map(|linked| linked.iter().map(String::as_str))
    }

    /// Total number of links.
    pub fn len(&self) -> usize {
        self.links.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the ledger's links back onto evidence records.
    pub fn apply_to(&self, evidence: &mut [Evidence]) {
        for item in evidence {
            if let Some(linked) = self.links.get(&item.id) {
                for subcontrol_id in linked {
                    item.associations.insert(subcontrol_id.as_str());
                }
            }
        }
    }

    fn check_known(&self, evidence_id: &str, subcontrol_id: &str) -> Result<(), LedgerError> {
        if !self.subcontrol_ids.contains(subcontrol_id) {
            return Err(LedgerError::SubcontrolNotFound(subcontrol_id.to_string()));
        }
        if !self.evidence_ids.contains(evidence_id) {
            return Err(LedgerError::EvidenceNotFound(evidence_id.to_string()));
        }
        Ok(())
    }
}

impl AssociationSink for AssociationLedger {
    fn associate(
        &mut self,
        subcontrol_id: &str,
        evidence_ids: &[String],
    ) -> Result<usize, LedgerError> {
        for evidence_id in evidence_ids {
            self.check_known(evidence_id, subcontrol_id)?;
        }
        let mut added = 0;
        for evidence_id in evidence_ids {
            if self.link(evidence_id, subcontrol_id)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

/// A batch the sink refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub subcontrol_id: String,
    pub evidence_ids: Vec<String>,
    pub message: String,
}

/// Outcome of executing a plan against a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub batches_attempted: usize,
    pub batches_succeeded: usize,
    pub batches_failed: usize,
    pub links_requested: usize,
    pub links_added: usize,
    /// Requested links that already existed in the sink.
    pub links_unchanged: usize,
    pub failures: Vec<BatchFailure>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.batches_failed == 0
    }
}

/// Send every batch of the plan to the sink. A failed batch is recorded and
/// the run continues with the next one.
pub fn execute_plan(plan: &AssociationPlan, sink: &mut dyn AssociationSink) -> RunSummary {
    execute_batches(&plan.batches(), sink)
}

pub fn execute_batches(batches: &[AssociationBatch], sink: &mut dyn AssociationSink) -> RunSummary {
    let mut summary = RunSummary::default();
    for batch in batches {
        summary.batches_attempted += 1;
        summary.links_requested += batch.evidence_ids.len();
        match sink.associate(&batch.subcontrol_id, &batch.evidence_ids) {
            Ok(added) => {
                summary.batches_succeeded += 1;
                summary.links_added += added;
                summary.links_unchanged += batch.evidence_ids.len().saturating_sub(added);
            }
            Err(err) => {
                tracing::warn!(
                    subcontrol = %batch.subcontrol_id,
                    evidence = batch.evidence_ids.len(),
                    error = %err,
                    "association batch failed"
                );
                summary.batches_failed += 1;
                summary.failures.push(BatchFailure {
                    subcontrol_id: batch.subcontrol_id.clone(),
                    evidence_ids: batch.evidence_ids.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
    summary
}
