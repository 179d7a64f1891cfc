//! Evidence number coverage over the table's ranges.

use crate::aggregate::completion_percentage;
use crate::classify::locate;
use crate::mapping::FamilyMappingTable;
use crate::model::{Evidence, FamilyTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const COVERAGE_REPORT_KIND: &str = "grcmap.coverage_report.v1";

/// Evidence filed under one number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageEntry {
    pub number: u32,
    pub label: String,
    pub family_tag: FamilyTag,
    pub evidence_ids: Vec<String>,
}

impl CoverageEntry {
    pub fn is_covered(&self) -> bool {
        !self.evidence_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub report_kind: String,
    /// One entry per number inside any table range, ascending.
    pub entries: Vec<CoverageEntry>,
    pub expected: usize,
    pub covered: usize,
    /// Labels of numbers with no evidence, e.g. `CN13`.
    pub missing: Vec<String>,
    pub coverage_percentage: u32,
    /// Evidence ids that carry no classifiable token.
    pub unclassified: Vec<String>,
}

pub fn coverage_report(evidence: &[Evidence], table: &FamilyMappingTable) -> CoverageReport {
    let mut by_number: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    let mut unclassified = Vec::new();
    for item in evidence {
        match locate(&item.name, table) {
            Some((token, _)) => by_number
                .entry(token.number)
                .or_default()
                .push(item.id.clone()),
            None => unclassified.push(item.id.clone()),
        }
    }

    let mut entries = Vec::new();
    for rule in &table.families {
        for number in rule.range_start..=rule.range_end {
            entries.push(CoverageEntry {
                number,
                label: table.evidence_label(number),
                family_tag: rule.family_tag.clone(),
                evidence_ids: by_number.remove(&number).unwrap_or_default(),
            });
        }
    }
    entries.sort_by_key(|entry| entry.number);

    let expected = entries.len();
    let covered = entries.iter().filter(|entry| entry.is_covered()).count();
    let missing = entries
        .iter()
        .filter(|entry| !entry.is_covered())
        .map(|entry| entry.label.clone())
        .collect();
    CoverageReport {
        report_kind: COVERAGE_REPORT_KIND.to_string(),
        entries,
        expected,
        covered,
        missing,
        coverage_percentage: completion_percentage(covered, expected),
        unclassified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::reference_table;

    #[test]
    fn reference_table_expects_seventy_two_numbers() {
        let report = coverage_report(&[], reference_table());
        assert_eq!(report.expected, 72);
        assert_eq!(report.covered, 0);
        assert_eq!(report.missing.first().map(String::as_str), Some("CN01"));
        assert_eq!(report.missing.last().map(String::as_str), Some("CN72"));
        assert_eq!(report.coverage_percentage, 0);
    }

    #[test]
    fn covered_numbers_collect_their_evidence() {
        let evidence = vec![
            Evidence::new("e1", "CN07 - Incident Management"),
            Evidence::new("e2", "CN7 - Escalation"),
            Evidence::new("e3", "CN60 - ISP Redundancy"),
            Evidence::new("e4", "Vendor SOC report"),
        ];
        let report = coverage_report(&evidence, reference_table());
        assert_eq!(report.covered, 2);
        assert_eq!(report.missing.len(), 70);
        assert_eq!(report.coverage_percentage, 3);
        assert_eq!(report.unclassified, vec!["e4"]);

        let cn07 = &report.entries[6];
        assert_eq!(cn07.label, "CN07");
        assert_eq!(cn07.family_tag, "CC1");
        assert_eq!(cn07.evidence_ids, vec!["e1", "e2"]);
        assert!(!report.missing.contains(&"CN60".to_string()));
    }
}
