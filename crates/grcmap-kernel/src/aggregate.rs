//! Completion roll-ups per family and overall.

use crate::error::{Diagnostic, DiagnosticKind};
use crate::mapping::FamilyMappingTable;
use crate::model::{Control, Evidence, EvidenceIndex, FamilyTag, Subcontrol};
use crate::status::ImplementationStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status tallies for one group of subcontrols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub total: usize,
    pub not_applicable: usize,
    pub not_implemented: usize,
    pub partially_implemented: usize,
    pub fully_implemented: usize,
    /// Subcontrols with at least one associated evidence record.
    pub with_evidence: usize,
    pub completion_percentage: u32,
}

impl Counts {
    pub fn record(&mut self, status: ImplementationStatus, has_evidence: bool) {
        self.total += 1;
        match status {
            ImplementationStatus::NotApplicable => self.not_applicable += 1,
            ImplementationStatus::NotImplemented => self.not_implemented += 1,
            ImplementationStatus::PartiallyImplemented => self.partially_implemented += 1,
            ImplementationStatus::FullyImplemented => self.fully_implemented += 1,
        }
        if has_evidence {
            self.with_evidence += 1;
        }
        self.completion_percentage =
            completion_percentage(self.fully_implemented, self.total - self.not_applicable);
    }

    /// Subcontrols that count towards completion.
    pub fn applicable(&self) -> usize {
        self.total - self.not_applicable
    }
}

/// `round(fully / applicable * 100)`, half away from zero; 0 when nothing
/// is applicable.
pub fn completion_percentage(fully_implemented: usize, applicable: usize) -> u32 {
    if applicable == 0 {
        return 0;
    }
    let scaled = (fully_implemented as u128 * 200 + applicable as u128) / (applicable as u128 * 2);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// One subcontrol as seen by the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct AggregateEntry<'a> {
    pub family: Option<&'a FamilyTag>,
    pub subcontrol: &'a Subcontrol,
    /// The owning control's applicability, used when the subcontrol has none.
    pub control_applicable: Option<bool>,
    pub evidence_count: usize,
}

/// Statement of Applicability decisions across controls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicabilitySummary {
    pub total: usize,
    pub applicable: usize,
    pub not_applicable: usize,
    /// Controls with no decision recorded yet.
    pub pending: usize,
}

pub fn applicability_summary(controls: &[Control]) -> ApplicabilitySummary {
    let mut summary = ApplicabilitySummary::default();
    for control in controls {
        summary.total += 1;
        match control.is_applicable {
            Some(true) => summary.applicable += 1,
            Some(false) => summary.not_applicable += 1,
            None => summary.pending += 1,
        }
    }
    summary
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    /// Keyed by family tag; serializes in lexicographic order.
    pub by_family: BTreeMap<FamilyTag, Counts>,
    pub overall: Counts,
    /// Subcontrols whose control belongs to no family. Also in `overall`.
    pub unmapped: Counts,
    /// Subcontrols left out of every count because their status could not
    /// be derived.
    pub skipped: Vec<Diagnostic>,
    /// Control-level decisions; empty when rolled up from bare entries.
    #[serde(default)]
    pub applicability: ApplicabilitySummary,
}

/// Roll up entries. Bad records are skipped and reported, never fatal.
pub fn aggregate_entries<'a, I>(entries: I) -> Aggregation
where
    I: IntoIterator<Item = AggregateEntry<'a>>,
{
    let mut aggregation = Aggregation::default();
    for entry in entries {
        let status = match entry.subcontrol.status_within(entry.control_applicable) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(
                    subcontrol = %entry.subcontrol.id,
                    implemented = %entry.subcontrol.implemented,
                    "skipping subcontrol with invalid percentage"
                );
                aggregation.skipped.push(Diagnostic::new(
                    DiagnosticKind::InvalidPercentage,
                    entry.subcontrol.id.clone(),
                    err.to_string(),
                ));
                continue;
            }
        };
        let has_evidence = entry.evidence_count > 0;
        aggregation.overall.record(status, has_evidence);
        match entry.family {
            Some(family) => aggregation
                .by_family
                .entry(family.clone())
                .or_default()
                .record(status, has_evidence),
            None => aggregation.unmapped.record(status, has_evidence),
        }
    }
    aggregation
}

/// Roll up every subcontrol of every control, grouped by the control's
/// family under `table`, counting evidence from the evidence export.
/// Subcontrols without their own applicability flag take the control's.
pub fn aggregate(
    controls: &[Control],
    evidence: &[Evidence],
    table: &FamilyMappingTable,
) -> Aggregation {
    let index = EvidenceIndex::build(evidence);
    let entries = controls.iter().flat_map(|control| {
        let family = table.family_for_ref_code(&control.ref_code);
        let index = &index;
        control
            .subcontrols
            .iter()
            .map(move |subcontrol| AggregateEntry {
                family,
                subcontrol,
                control_applicable: control.is_applicable,
                evidence_count: index.count_for(&subcontrol.id),
            })
    });
    let mut aggregation = aggregate_entries(entries);
    aggregation.applicability = applicability_summary(controls);
    aggregation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::reference_table;

    fn sub(id: &str, implemented: i64, applicable: bool) -> Subcontrol {
        Subcontrol {
            id: id.to_string(),
            ref_code: None,
            name: None,
            description: None,
            implemented: implemented.into(),
            is_applicable: Some(applicable),
        }
    }

    fn ten_subcontrols() -> Vec<Subcontrol> {
        vec![
            sub("na1", 0, false),
            sub("na2", 100, false),
            sub("na3", 40, false),
            sub("ni1", 0, true),
            sub("ni2", 0, true),
            sub("pi1", 10, true),
            sub("pi2", 99, true),
            sub("fi1", 100, true),
            sub("fi2", 100, true),
            sub("fi3", 100, true),
        ]
    }

    #[test]
    fn ten_subcontrol_mix_rounds_to_forty_three() {
        let subs = ten_subcontrols();
        let cc1 = FamilyTag::new("CC1");
        let aggregation = aggregate_entries(subs.iter().map(|subcontrol| AggregateEntry {
            family: Some(&cc1),
            subcontrol,
            control_applicable: None,
            evidence_count: 0,
        }));
        let expected = Counts {
            total: 10,
            not_applicable: 3,
            not_implemented: 2,
            partially_implemented: 2,
            fully_implemented: 3,
            with_evidence: 0,
            completion_percentage: 43,
        };
        assert_eq!(aggregation.overall, expected);
        assert_eq!(aggregation.by_family[&cc1], expected);
    }

    #[test]
    fn empty_and_all_not_applicable_yield_zero() {
        let empty = aggregate_entries(Vec::new());
        assert_eq!(empty.overall.completion_percentage, 0);
        assert!(empty.by_family.is_empty());

        let subs = vec![sub("a", 100, false), sub("b", 0, false)];
        let aggregation = aggregate_entries(subs.iter().map(|subcontrol| AggregateEntry {
            family: None,
            subcontrol,
            control_applicable: None,
            evidence_count: 0,
        }));
        assert_eq!(aggregation.overall.completion_percentage, 0);
        assert_eq!(aggregation.unmapped.not_applicable, 2);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(completion_percentage(1, 2), 50);
        assert_eq!(completion_percentage(1, 8), 13);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(3, 3), 100);
        assert_eq!(completion_percentage(0, 0), 0);
    }

    #[test]
    fn invalid_percentages_are_skipped_not_fatal() {
        let subs = vec![sub("ok", 100, true), sub("bad", 140, true), sub("neg", -1, true)];
        let aggregation = aggregate_entries(subs.iter().map(|subcontrol| AggregateEntry {
            family: None,
            subcontrol,
            control_applicable: None,
            evidence_count: 1,
        }));
        assert_eq!(aggregation.overall.total, 1);
        assert_eq!(aggregation.overall.completion_percentage, 100);
        let skipped: Vec<&str> = aggregation
            .skipped
            .iter()
            .map(|d| d.subject.as_str())
            .collect();
        assert_eq!(skipped, vec!["bad", "neg"]);
        assert!(
            aggregation
                .skipped
                .iter()
                .all(|d| d.kind == DiagnosticKind::InvalidPercentage)
        );
    }

    #[test]
    fn controls_group_by_family_in_sorted_order() {
        let controls = vec![
            Control::new("c-pi", "pi1.1").with_subcontrols(vec![sub("p1", 100, true)]),
            Control::new("c-cc", "cc1.1")
                .with_subcontrols(vec![sub("s1", 100, true), sub("s2", 0, true)]),
            Control::new("c-x", "p1.1").with_subcontrols(vec![sub("x1", 50, true)]),
        ];
        let evidence = vec![Evidence::new("e1", "CN01").with_association("s1")];
        let aggregation = aggregate(&controls, &evidence, reference_table());

        let keys: Vec<&str> = aggregation.by_family.keys().map(FamilyTag::as_str).collect();
        assert_eq!(keys, vec!["CC1", "PI1"]);
        assert_eq!(aggregation.by_family[&FamilyTag::new("CC1")].completion_percentage, 50);
        assert_eq!(aggregation.by_family[&FamilyTag::new("CC1")].with_evidence, 1);
        assert_eq!(aggregation.unmapped.partially_implemented, 1);
        assert_eq!(aggregation.overall.total, 4);
        assert_eq!(aggregation.overall.completion_percentage, 50);
    }

    #[test]
    fn not_applicable_control_excludes_inheriting_subcontrols() {
        let inherit = |id: &str, implemented: i64| Subcontrol {
            is_applicable: None,
            ..sub(id, implemented, true)
        };
        let controls = vec![
            Control::new("c-p1", "p1.1")
                .with_applicability(false)
                .with_subcontrols(vec![inherit("p-0", 0)]),
            Control::new("c-cc", "cc1.1").with_subcontrols(vec![inherit("cc-100", 100)]),
        ];
        let aggregation = aggregate(&controls, &[], reference_table());
        assert_eq!(aggregation.overall.total, 2);
        assert_eq!(aggregation.overall.not_applicable, 1);
        assert_eq!(aggregation.overall.completion_percentage, 100);
        assert_eq!(
            aggregation.applicability,
            ApplicabilitySummary {
                total: 2,
                applicable: 0,
                not_applicable: 1,
                pending: 1,
            }
        );
    }

    #[test]
    fn subcontrol_flag_overrides_control_flag() {
        let own = sub("own", 0, true);
        let aggregation = aggregate_entries([AggregateEntry {
            family: None,
            subcontrol: &own,
            control_applicable: Some(false),
            evidence_count: 0,
        }]);
        assert_eq!(aggregation.overall.not_implemented, 1);
        assert_eq!(aggregation.overall.not_applicable, 0);
    }

    #[test]
    fn malformed_percentage_rows_do_not_sink_the_export() {
        let controls = crate::model::parse_controls_export(serde_json::json!([{
            "id": "c1",
            "ref_code": "cc1.1",
            "subcontrols": [
                {"id": "ok", "implemented": 100},
                {"id": "half", "implemented": 50.5},
                {"id": "zero", "implemented": 0}
            ]
        }]))
        .unwrap();
        let aggregation = aggregate(&controls, &[], reference_table());
        assert_eq!(aggregation.overall.total, 2);
        assert_eq!(aggregation.overall.completion_percentage, 50);
        assert_eq!(aggregation.skipped.len(), 1);
        assert_eq!(aggregation.skipped[0].subject, "half");
        assert_eq!(aggregation.skipped[0].kind, DiagnosticKind::InvalidPercentage);
    }

    #[test]
    fn aggregation_does_not_mutate_input() {
        let subs = ten_subcontrols();
        let before = subs.clone();
        let _ = aggregate_entries(subs.iter().map(|subcontrol| AggregateEntry {
            family: None,
            subcontrol,
            control_applicable: None,
            evidence_count: 0,
        }));
        assert_eq!(subs, before);
    }
}
