//! Suggest completion percentages from associated evidence.
//!
//! A subcontrol with no evidence suggests 0, one whose evidence text carries
//! a completion indicator suggests 100, anything else suggests 50. The
//! suggestion is a [`SubcontrolUpdate`], so it can only move the stored
//! percentage; the status follows from it.

use crate::error::{Diagnostic, DiagnosticKind};
use crate::mapping::FamilyMappingTable;
use crate::model::{Control, Evidence, EvidenceIndex, FamilyTag, Subcontrol};
use crate::status::{ImplementationStatus, SubcontrolUpdate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const ASSESSMENT_REPORT_KIND: &str = "grcmap.assessment.v1";

/// What the associated evidence says about a subcontrol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSignal {
    NoEvidence,
    EvidencePresent,
    CompletionIndicated,
}

impl EvidenceSignal {
    pub fn suggested_percentage(self) -> u8 {
        match self {
            Self::NoEvidence => 0,
            Self::EvidencePresent => 50,
            Self::CompletionIndicated => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubcontrolAssessment {
    pub subcontrol_id: String,
    pub control_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_tag: Option<FamilyTag>,
    pub signal: EvidenceSignal,
    pub evidence_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_indicator: Option<String>,
    pub current_status: ImplementationStatus,
    pub suggested_status: ImplementationStatus,
    /// Present only when the suggestion raises the stored percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<SubcontrolUpdate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentCounts {
    pub assessed: usize,
    pub not_applicable: usize,
    pub no_evidence: usize,
    pub evidence_present: usize,
    pub completion_indicated: usize,
    pub updates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub report_kind: String,
    pub assessments: Vec<SubcontrolAssessment>,
    pub counts: AssessmentCounts,
    pub diagnostics: Vec<Diagnostic>,
}

impl Assessment {
    pub fn updates(&self) -> impl Iterator<Item = (&str, &SubcontrolUpdate)> {
        self.assessments.iter().filter_map(|assessment| {
            assessment
                .update
                .as_ref()
                .map(|update| (assessment.subcontrol_id.as_str(), update))
        })
    }
}

fn negation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\b(?:not|never)\s+|n't\s+|\bun-?)$")
            .expect("negation regex must compile")
    })
}

/// Completion indicators compiled for case-insensitive whole-word search.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    patterns: Vec<(String, Regex)>,
}

impl IndicatorSet {
    pub fn new(indicators: &[String]) -> Self {
        let patterns = indicators
            .iter()
            .map(|indicator| indicator.trim())
            .filter(|indicator| !indicator.is_empty())
            .filter_map(|indicator| {
                let words: Vec<String> = indicator
                    .split_whitespace()
                    .map(regex::escape)
                    .collect();
                let open = if indicator.starts_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
                let close = if indicator.ends_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
                let pattern = format!(r"(?i){open}{}{close}", words.join(r"\s+"));
                Regex::new(&pattern)
                    .ok()
                    .map(|re| (indicator.to_string(), re))
            })
            .collect();
        Self { patterns }
    }

    /// First indicator, in table order, stated without negation in the
    /// evidence's description or content. "not implemented", "never
    /// established" and "un-implemented" do not count.
    pub fn find(&self, evidence: &Evidence) -> Option<&str> {
        let texts: Vec<&str> = [evidence.description.as_deref(), evidence.content.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        self.patterns.iter().find_map(|(indicator, re)| {
            texts
                .iter()
                .any(|text| affirmed(text, re))
                .then_some(indicator.as_str())
        })
    }
}

fn affirmed(text: &str, re: &Regex) -> bool {
    re.find_iter(text)
        .any(|hit| !negation_re().is_match(&text[..hit.start()]))
}

/// [`IndicatorSet::find`] over a one-off set.
pub fn completion_indicator(evidence: &Evidence, indicators: &[String]) -> Option<String> {
    IndicatorSet::new(indicators)
        .find(evidence)
        .map(str::to_string)
}

/// Assess every applicable subcontrol against its associated evidence.
///
/// Suggestions never lower a stored percentage. Not-applicable subcontrols,
/// including those inheriting a not-applicable control, are counted and left
/// alone; invalid stored percentages are reported.
pub fn assess_subcontrols(
    controls: &[Control],
    evidence: &[Evidence],
    table: &FamilyMappingTable,
) -> Assessment {
    let index = EvidenceIndex::build(evidence);
    let indicators = IndicatorSet::new(&table.completion_indicators);
    let mut assessments = Vec::new();
    let mut counts = AssessmentCounts::default();
    let mut diagnostics = Vec::new();

    for control in controls {
        let family = table.family_for_ref_code(&control.ref_code);
        for subcontrol in &control.subcontrols {
            let current_status = match control.subcontrol_status(subcontrol) {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(subcontrol = %subcontrol.id, "cannot assess invalid percentage");
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::InvalidPercentage,
                        subcontrol.id.clone(),
                        err.to_string(),
                    ));
                    continue;
                }
            };
            if current_status == ImplementationStatus::NotApplicable {
                counts.not_applicable += 1;
                continue;
            }

            let linked = index.evidence_for(&subcontrol.id);
            let indicator = linked
                .iter()
                .find_map(|item| indicators.find(item).map(|indicator| (*item, indicator)));
            let signal = match (linked.is_empty(), indicator) {
                (true, _) => EvidenceSignal::NoEvidence,
                (false, Some(_)) => EvidenceSignal::CompletionIndicated,
                (false, None) => EvidenceSignal::EvidencePresent,
            };
            let update = suggest_update(subcontrol, signal, indicator);

            counts.assessed += 1;
            match signal {
                EvidenceSignal::NoEvidence => counts.no_evidence += 1,
                EvidenceSignal::EvidencePresent => counts.evidence_present += 1,
                EvidenceSignal::CompletionIndicated => counts.completion_indicated += 1,
            }
            let suggested_status = match &update {
                Some(update) => update.projected_status(subcontrol).unwrap_or(current_status),
                None => current_status,
            };
            if update.is_some() {
                counts.updates += 1;
            }
            assessments.push(SubcontrolAssessment {
                subcontrol_id: subcontrol.id.clone(),
                control_ref: control.ref_code.clone(),
                family_tag: family.cloned(),
                signal,
                evidence_ids: linked.iter().map(|item| item.id.clone()).collect(),
                matched_indicator: indicator.map(|(_, indicator)| indicator.to_string()),
                current_status,
                suggested_status,
                update,
            });
        }
    }

    Assessment {
        report_kind: ASSESSMENT_REPORT_KIND.to_string(),
        assessments,
        counts,
        diagnostics,
    }
}

fn suggest_update(
    subcontrol: &Subcontrol,
    signal: EvidenceSignal,
    indicator: Option<(&Evidence, &str)>,
) -> Option<SubcontrolUpdate> {
    let suggested = signal.suggested_percentage();
    let current = subcontrol.implemented.whole()?;
    if current >= i64::from(suggested) {
        return None;
    }
    let update = SubcontrolUpdate::new()
        .implemented(i64::from(suggested))
        .ok()?;
    Some(match indicator {
        Some((item, indicator)) => {
            update.context(format!("based on evidence {}: {indicator}", item.name))
        }
        None => update.context("evidence associated; no completion indicator"),
    })
}
