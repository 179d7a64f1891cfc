//! Family mapping table: evidence number ranges -> control families.
//!
//! The table is the one piece of configuration the kernel needs. It is
//! loaded once, validated before use, and never mutated afterwards. A table
//! row says: evidence numbered `range_start..=range_end` belongs to
//! `family_tag`, whose controls are recognised by `ref_prefix` and/or the
//! explicit `ref_codes`, and whose subcontrols are matched by `patterns`
//! (optionally overridden per evidence number).

use crate::error::GrcMapError;
use crate::model::FamilyTag;
use crate::resolve::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

pub const FAMILY_MAPPING_SCHEMA: u32 = 1;
pub const FAMILY_MAPPING_KIND: &str = "grcmap.family_mapping.v1";
pub const DEFAULT_EVIDENCE_PREFIX: &str = "CN";
/// Widest range a family may span. Coverage reports enumerate every number.
pub const MAX_RANGE_WIDTH: u32 = 10_000;

/// The SOC 2 reference table: CN01–CN72 across CC1..CC9, A1, C1, PI1.
const REFERENCE_TABLE_TOML: &str = include_str!("../data/soc2_reference.toml");

pub mod failure_class {
    pub const SCHEMA_MISMATCH: &str = "table_schema_mismatch";
    pub const KIND_MISMATCH: &str = "table_kind_mismatch";
    pub const PREFIX_INVALID: &str = "table_prefix_invalid";
    pub const TABLE_EMPTY: &str = "table_empty";
    pub const RANGE_INVERTED: &str = "range_inverted";
    pub const RANGE_TOO_WIDE: &str = "range_too_wide";
    pub const RANGE_UNSORTED: &str = "range_unsorted";
    pub const RANGE_OVERLAP: &str = "range_overlap";
    pub const FAMILY_TAG_EMPTY: &str = "family_tag_empty";
    pub const FAMILY_TAG_DUPLICATE: &str = "family_tag_duplicate";
    pub const FAMILY_UNBOUND: &str = "family_unbound";
    pub const REF_CODE_AMBIGUOUS: &str = "ref_code_ambiguous";
    pub const PATTERN_EMPTY: &str = "pattern_empty";
    pub const EVIDENCE_PATTERN_KEY_INVALID: &str = "evidence_pattern_key_invalid";
    pub const EVIDENCE_PATTERN_OUT_OF_RANGE: &str = "evidence_pattern_out_of_range";
}

/// One contiguous range of evidence numbers and the family it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyRule {
    pub range_start: u32,
    pub range_end: u32,
    pub family_tag: FamilyTag,
    /// Controls whose `ref_code` starts with this prefix belong to the family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_prefix: Option<String>,
    /// Controls whose `ref_code` is listed here belong to the family.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ref_codes: Vec<String>,
    /// Keywords matched against subcontrol descriptions.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Per-number keyword overrides, keyed by the decimal evidence number.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence_patterns: BTreeMap<String, Vec<String>>,
}

impl FamilyRule {
    pub fn contains(&self, number: u32) -> bool {
        (self.range_start..=self.range_end).contains(&number)
    }

    /// Whether a control with this `ref_code` belongs to the family.
    ///
    /// Prefix matching requires the prefix to end at a non-digit boundary so
    /// that `cc1` claims `cc1.4` but not `cc10.1`.
    pub fn claims_ref_code(&self, ref_code: &str) -> bool {
        let code = ref_code.trim().to_ascii_lowercase();
        if code.is_empty() {
            return false;
        }
        if self
            .ref_codes
            .iter()
            .any(|listed| listed.trim().eq_ignore_ascii_case(&code))
        {
            return true;
        }
        let Some(prefix) = self.ref_prefix.as_deref().map(str::trim) else {
            return false;
        };
        if prefix.is_empty() {
            return false;
        }
        let prefix = prefix.to_ascii_lowercase();
        code.strip_prefix(&prefix)
            .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_digit()))
    }

    /// Patterns for one evidence number: its override if present, otherwise
    /// the family-wide list.
    pub fn patterns_for(&self, number: u32) -> &[String] {
        self.evidence_patterns
            .get(&number.to_string())
            .map_or(self.patterns.as_slice(), Vec::as_slice)
    }
}

/// The validated family mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMappingTable {
    pub schema: u32,
    pub table_kind: String,
    #[serde(default = "default_evidence_prefix")]
    pub evidence_prefix: String,
    #[serde(default = "default_strict_match")]
    pub strict_match: bool,
    /// Phrases in evidence text that indicate a control operates effectively.
    #[serde(default)]
    pub completion_indicators: Vec<String>,
    pub families: Vec<FamilyRule>,
}

fn default_evidence_prefix() -> String {
    DEFAULT_EVIDENCE_PREFIX.to_string()
}

fn default_strict_match() -> bool {
    true
}

impl FamilyMappingTable {
    /// Parse and validate a table from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, GrcMapError> {
        Self::parse_toml(text, "<inline>")
    }

    /// Load and validate a table from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GrcMapError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| GrcMapError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_toml(&text, &path.display().to_string())
    }

    fn parse_toml(text: &str, origin: &str) -> Result<Self, GrcMapError> {
        let table: Self = toml::from_str(text).map_err(|source| GrcMapError::ParseToml {
            path: origin.to_string(),
            source,
        })?;
        table.validated()
    }

    /// Reject the table unless [`validate_family_table`] accepts it.
    pub fn validated(self) -> Result<Self, GrcMapError> {
        let report = validate_family_table(&self);
        if report.is_accepted() {
            tracing::debug!(
                families = self.families.len(),
                prefix = %self.evidence_prefix,
                "family mapping table accepted"
            );
            Ok(self)
        } else {
            Err(GrcMapError::InvalidTable(report))
        }
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            strict_match: self.strict_match,
        }
    }

    pub fn rule_for_number(&self, number: u32) -> Option<&FamilyRule> {
        self.families.iter().find(|rule| rule.contains(number))
    }

    pub fn rule(&self, family_tag: &str) -> Option<&FamilyRule> {
        self.families
            .iter()
            .find(|rule| rule.family_tag.as_str().eq_ignore_ascii_case(family_tag))
    }

    /// Invert the table: which family does a control belong to?
    pub fn family_for_ref_code(&self, ref_code: &str) -> Option<&FamilyTag> {
        self.families
            .iter()
            .find(|rule| rule.claims_ref_code(ref_code))
            .map(|rule| &rule.family_tag)
    }

    /// Lowest and highest evidence number the table covers.
    pub fn span(&self) -> Option<(u32, u32)> {
        let start = self.families.iter().map(|rule| rule.range_start).min()?;
        let end = self.families.iter().map(|rule| rule.range_end).max()?;
        Some((start, end))
    }

    /// Numbers inside [`Self::span`] that no range covers, as inclusive runs.
    pub fn gaps(&self) -> Vec<(u32, u32)> {
        let mut gaps = Vec::new();
        for pair in self.families.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.range_start > prev.range_end.saturating_add(1) {
                gaps.push((prev.range_end + 1, next.range_start - 1));
            }
        }
        gaps
    }

    /// Format an evidence label such as `CN07` for a number.
    pub fn evidence_label(&self, number: u32) -> String {
        format!("{}{number:02}", self.evidence_prefix)
    }
}

/// The embedded SOC 2 reference table, parsed and validated once per process.
pub fn reference_table() -> &'static FamilyMappingTable {
    static TABLE: OnceLock<FamilyMappingTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        FamilyMappingTable::from_toml_str(REFERENCE_TABLE_TOML)
            .expect("embedded reference table must validate")
    })
}

/// Raw TOML of the embedded reference table.
pub fn reference_table_source() -> &'static str {
    REFERENCE_TABLE_TOML
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub failure_class: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub result: String,
    pub failure_classes: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(mut issues: Vec<ValidationIssue>) -> Self {
        issues.sort_by(|a, b| {
            (&a.path, &a.failure_class, &a.message).cmp(&(&b.path, &b.failure_class, &b.message))
        });
        let failure_classes: Vec<String> = issues
            .iter()
            .map(|issue| issue.failure_class.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            result: if issues.is_empty() {
                "accepted".to_string()
            } else {
                "rejected".to_string()
            },
            failure_classes,
            issues,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == "accepted"
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("accepted");
        }
        let rendered: Vec<String> = self
            .issues
            .iter()
            .map(|issue| format!("{} [{}]: {}", issue.path, issue.failure_class, issue.message))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

fn push_issue(
    issues: &mut Vec<ValidationIssue>,
    failure_class: &str,
    path: String,
    message: String,
) {
    issues.push(ValidationIssue {
        failure_class: failure_class.to_string(),
        path,
        message,
    });
}

/// Check a table for structural problems without rejecting it.
///
/// Ranges must be well-formed, sorted, and non-overlapping; every family
/// must be bound to controls by prefix or explicit list; no control
/// `ref_code` may be claimed by two families; patterns must be non-empty.
pub fn validate_family_table(table: &FamilyMappingTable) -> ValidationReport {
    let mut issues = Vec::new();

    if table.schema != FAMILY_MAPPING_SCHEMA {
        push_issue(
            &mut issues,
            failure_class::SCHEMA_MISMATCH,
            "schema".to_string(),
            format!(
                "schema must equal {FAMILY_MAPPING_SCHEMA}, got {}",
                table.schema
            ),
        );
    }
    if table.table_kind != FAMILY_MAPPING_KIND {
        push_issue(
            &mut issues,
            failure_class::KIND_MISMATCH,
            "table_kind".to_string(),
            format!("table_kind must equal {FAMILY_MAPPING_KIND:?}"),
        );
    }
    let prefix = table.evidence_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        push_issue(
            &mut issues,
            failure_class::PREFIX_INVALID,
            "evidence_prefix".to_string(),
            format!(
                "evidence_prefix must be non-empty ASCII letters, got {:?}",
                table.evidence_prefix
            ),
        );
    }
    if table.families.is_empty() {
        push_issue(
            &mut issues,
            failure_class::TABLE_EMPTY,
            "families".to_string(),
            "families must be a non-empty list".to_string(),
        );
    }

    let mut seen_tags: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, rule) in table.families.iter().enumerate() {
        let path = format!("families[{idx}]");
        validate_rule(rule, &path, &mut issues);

        let tag = rule.family_tag.as_str().trim().to_ascii_uppercase();
        if !tag.is_empty()
            && let Some(first) = seen_tags.insert(tag.clone(), idx)
        {
            push_issue(
                &mut issues,
                failure_class::FAMILY_TAG_DUPLICATE,
                format!("{path}.family_tag"),
                format!("family_tag {tag} already defined at families[{first}]"),
            );
        }
    }

    for (idx, pair) in table.families.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        let path = format!("families[{}]", idx + 1);
        if next.range_start < prev.range_start {
            push_issue(
                &mut issues,
                failure_class::RANGE_UNSORTED,
                format!("{path}.range_start"),
                format!(
                    "ranges must be sorted: {} starts before previous range start {}",
                    next.range_start, prev.range_start
                ),
            );
        } else if next.range_start <= prev.range_end {
            push_issue(
                &mut issues,
                failure_class::RANGE_OVERLAP,
                format!("{path}.range_start"),
                format!(
                    "range {}..={} overlaps previous range {}..={}",
                    next.range_start, next.range_end, prev.range_start, prev.range_end
                ),
            );
        }
    }

    validate_ref_code_ownership(table, &mut issues);
    ValidationReport::from_issues(issues)
}

fn validate_rule(rule: &FamilyRule, path: &str, issues: &mut Vec<ValidationIssue>) {
    if rule.range_start > rule.range_end {
        push_issue(
            issues,
            failure_class::RANGE_INVERTED,
            format!("{path}.range_start"),
            format!(
                "range_start {} must not exceed range_end {}",
                rule.range_start, rule.range_end
            ),
        );
    } else if rule.range_end - rule.range_start >= MAX_RANGE_WIDTH {
        push_issue(
            issues,
            failure_class::RANGE_TOO_WIDE,
            format!("{path}.range_end"),
            format!(
                "range {}..={} spans more than {MAX_RANGE_WIDTH} numbers",
                rule.range_start, rule.range_end
            ),
        );
    }
    if rule.family_tag.as_str().trim().is_empty() {
        push_issue(
            issues,
            failure_class::FAMILY_TAG_EMPTY,
            format!("{path}.family_tag"),
            "family_tag must be a non-empty string".to_string(),
        );
    }
    let has_prefix = rule
        .ref_prefix
        .as_deref()
        .is_some_and(|prefix| !prefix.trim().is_empty());
    let has_codes = rule.ref_codes.iter().any(|code| !code.trim().is_empty());
    if !has_prefix && !has_codes {
        push_issue(
            issues,
            failure_class::FAMILY_UNBOUND,
            path.to_string(),
            "family must declare ref_prefix or ref_codes".to_string(),
        );
    }
    for (pidx, pattern) in rule.patterns.iter().enumerate() {
        if pattern.trim().is_empty() {
            push_issue(
                issues,
                failure_class::PATTERN_EMPTY,
                format!("{path}.patterns[{pidx}]"),
                "patterns must be non-empty strings".to_string(),
            );
        }
    }
    for (key, patterns) in &rule.evidence_patterns {
        let key_path = format!("{path}.evidence_patterns.{key}");
        match key.trim().parse::<u32>() {
            Ok(number) if !rule.contains(number) => push_issue(
                issues,
                failure_class::EVIDENCE_PATTERN_OUT_OF_RANGE,
                key_path.clone(),
                format!(
                    "evidence number {number} is outside {}..={}",
                    rule.range_start, rule.range_end
                ),
            ),
            Ok(number) if number.to_string() != *key => push_issue(
                issues,
                failure_class::EVIDENCE_PATTERN_KEY_INVALID,
                key_path.clone(),
                format!("key must be written as {number}"),
            ),
            Ok(_) => {}
            Err(_) => push_issue(
                issues,
                failure_class::EVIDENCE_PATTERN_KEY_INVALID,
                key_path.clone(),
                "key must be a decimal evidence number".to_string(),
            ),
        }
        if patterns.is_empty() || patterns.iter().any(|p| p.trim().is_empty()) {
            push_issue(
                issues,
                failure_class::PATTERN_EMPTY,
                key_path,
                "override must list non-empty patterns".to_string(),
            );
        }
    }
}

fn validate_ref_code_ownership(table: &FamilyMappingTable, issues: &mut Vec<ValidationIssue>) {
    for (idx, rule) in table.families.iter().enumerate() {
        for code in &rule.ref_codes {
            for (other_idx, other) in table.families.iter().enumerate() {
                if other_idx != idx && other.claims_ref_code(code) {
                    push_issue(
                        issues,
                        failure_class::REF_CODE_AMBIGUOUS,
                        format!("families[{idx}].ref_codes"),
                        format!(
                            "ref_code {code} is also claimed by {}",
                            other.family_tag
                        ),
                    );
                }
            }
        }
        let Some(prefix) = rule.ref_prefix.as_deref().map(str::trim) else {
            continue;
        };
        for (other_idx, other) in table.families.iter().enumerate().skip(idx + 1) {
            let clash = other
                .ref_prefix
                .as_deref()
                .is_some_and(|theirs| theirs.trim().eq_ignore_ascii_case(prefix));
            if clash && !prefix.is_empty() {
                push_issue(
                    issues,
                    failure_class::REF_CODE_AMBIGUOUS,
                    format!("families[{other_idx}].ref_prefix"),
                    format!(
                        "ref_prefix {prefix} is shared with {}",
                        rule.family_tag
                    ),
                );
            }
        }
    }
}
