//! Association planning: which evidence should link to which subcontrols.
//!
//! The plan is a dry run. It classifies every evidence record, resolves the
//! family's subcontrols with the record's keywords, and lists the links that
//! do not exist yet. Executing it is the job of an
//! [`AssociationSink`](crate::ledger::AssociationSink).

use crate::classify::locate;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::mapping::FamilyMappingTable;
use crate::model::{Control, Evidence, FamilyTag};
use crate::resolve::{MatchPolicy, ResolveOutcome, resolve_subcontrols};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub const ASSOCIATION_PLAN_SCHEMA: u32 = 1;
pub const ASSOCIATION_PLAN_KIND: &str = "grcmap.association_plan.v1";

/// One evidence→subcontrol link the plan proposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAssociation {
    pub evidence_id: String,
    pub evidence_name: String,
    pub subcontrol_id: String,
    pub control_ref: String,
    pub family_tag: FamilyTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    #[serde(default)]
    pub fallback: bool,
}

/// Evidence ids to attach to one subcontrol in a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationBatch {
    pub subcontrol_id: String,
    pub evidence_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub evidence_total: usize,
    pub classified: usize,
    pub unclassified: usize,
    pub planned: usize,
    pub already_associated: usize,
    pub fallbacks: usize,
    pub no_matching_controls: usize,
    pub no_pattern_match: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationPlan {
    pub schema: u32,
    pub plan_kind: String,
    /// `p1_` + sha256 over the planned pairs, in plan order.
    pub plan_digest: String,
    pub strict_match: bool,
    pub entries: Vec<PlannedAssociation>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: PlanStats,
}

impl AssociationPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Planned links grouped by subcontrol, subcontrols in first-seen order,
    /// evidence ids in plan order.
    pub fn batches(&self) -> Vec<AssociationBatch> {
        let mut order: Vec<&str> = Vec::new();
        let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for entry in &self.entries {
            let ids = grouped.entry(entry.subcontrol_id.as_str()).or_default();
            if ids.is_empty() {
                order.push(entry.subcontrol_id.as_str());
            }
            ids.push(entry.evidence_id.clone());
        }
        order
            .into_iter()
            .map(|subcontrol_id| AssociationBatch {
                subcontrol_id: subcontrol_id.to_string(),
                evidence_ids: grouped.remove(subcontrol_id).unwrap_or_default(),
            })
            .collect()
    }

    /// Planned link count per family.
    pub fn family_counts(&self) -> BTreeMap<FamilyTag, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.family_tag.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Build the association plan for an evidence export against a controls
/// export. Pure: nothing is linked, and input order fixes output order.
pub fn plan_associations(
    evidence: &[Evidence],
    controls: &[Control],
    table: &FamilyMappingTable,
    policy: MatchPolicy,
) -> AssociationPlan {
    let mut entries: Vec<PlannedAssociation> = Vec::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut stats = PlanStats {
        evidence_total: evidence.len(),
        ..PlanStats::default()
    };
    let mut planned_pairs: BTreeSet<(String, String)> = BTreeSet::new();

    for item in evidence {
        let Some((token, rule)) = locate(&item.name, table) else {
            tracing::warn!(evidence = %item.id, name = %item.name, "unclassifiable evidence");
            stats.unclassified += 1;
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::UnclassifiableEvidence,
                item.id.clone(),
                format!(
                    "evidence name {:?} has no {}<number> token inside the table ranges",
                    item.name, table.evidence_prefix
                ),
            ));
            continue;
        };
        stats.classified += 1;

        let patterns = rule.patterns_for(token.number);
        let resolution = resolve_subcontrols(controls, rule, patterns, policy);
        match resolution.outcome {
            ResolveOutcome::NoMatchingControls => {
                tracing::warn!(
                    evidence = %item.id,
                    family = %rule.family_tag,
                    "no controls found for family"
                );
                stats.no_matching_controls += 1;
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::NoMatchingControls,
                    item.id.clone(),
                    format!("no control in the export belongs to {}", rule.family_tag),
                ));
                continue;
            }
            ResolveOutcome::NoPatternMatch => {
                tracing::warn!(
                    evidence = %item.id,
                    family = %rule.family_tag,
                    "no subcontrol description matched"
                );
                stats.no_pattern_match += 1;
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::NoPatternMatch,
                    item.id.clone(),
                    format!(
                        "no {} subcontrol description contains any of {:?}",
                        rule.family_tag, patterns
                    ),
                ));
                continue;
            }
            ResolveOutcome::Fallback => stats.fallbacks += 1,
            ResolveOutcome::Matched => {}
        }

        for hit in resolution.matches {
            let subcontrol_id = hit.subcontrol.id.as_str();
            if item.is_associated_with(subcontrol_id) {
                stats.already_associated += 1;
                continue;
            }
            if !planned_pairs.insert((item.id.clone(), subcontrol_id.to_string())) {
                tracing::debug!(
                    evidence = %item.id,
                    subcontrol = %subcontrol_id,
                    "duplicate association collapsed"
                );
                stats.conflicts += 1;
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::AssociationConflict,
                    item.id.clone(),
                    format!("association with {subcontrol_id} already planned"),
                ));
                continue;
            }
            entries.push(PlannedAssociation {
                evidence_id: item.id.clone(),
                evidence_name: item.name.clone(),
                subcontrol_id: subcontrol_id.to_string(),
                control_ref: hit.control.ref_code.clone(),
                family_tag: rule.family_tag.clone(),
                matched_pattern: hit.matched_pattern,
                fallback: hit.fallback,
            });
        }
    }

    stats.planned = entries.len();
    tracing::debug!(
        planned = stats.planned,
        unclassified = stats.unclassified,
        already_associated = stats.already_associated,
        "association plan built"
    );
    AssociationPlan {
        schema: ASSOCIATION_PLAN_SCHEMA,
        plan_kind: ASSOCIATION_PLAN_KIND.to_string(),
        plan_digest: plan_digest(&entries),
        strict_match: policy.strict_match,
        entries,
        diagnostics,
        stats,
    }
}

fn plan_digest(entries: &[PlannedAssociation]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.evidence_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.subcontrol_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.family_tag.as_str().as_bytes());
        hasher.update(b"\n");
    }
    let mut rendered = String::from("p1_");
    for byte in hasher.finalize() {
        rendered.push_str(&format!("{byte:02x}"));
    }
    rendered
}
