//! Control-family resolution: family + keywords -> candidate subcontrols.

use crate::mapping::FamilyRule;
use crate::model::{Control, Subcontrol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What to do when a family's controls exist but no keyword matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPolicy {
    /// `true`: report [`ResolveOutcome::NoPatternMatch`].
    /// `false`: fall back to the first subcontrol of the first matching
    /// control that has any.
    pub strict_match: bool,
}

impl MatchPolicy {
    pub const STRICT: Self = Self { strict_match: true };
    pub const BEST_EFFORT: Self = Self {
        strict_match: false,
    };
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::STRICT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// At least one keyword matched.
    Matched,
    /// Nothing matched; the best-effort fallback supplied one subcontrol.
    Fallback,
    /// Family controls exist but no keyword matched (strict policy, or no
    /// subcontrol to fall back to).
    NoPatternMatch,
    /// No control in the input belongs to the family.
    NoMatchingControls,
}

/// One selected subcontrol and why it was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcontrolMatch<'a> {
    pub control: &'a Control,
    pub subcontrol: &'a Subcontrol,
    /// First keyword, in pattern order, found in the description.
    pub matched_pattern: Option<String>,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub outcome: ResolveOutcome,
    /// Number of controls that belong to the family.
    pub matched_controls: usize,
    pub matches: Vec<SubcontrolMatch<'a>>,
}

impl<'a> Resolution<'a> {
    pub fn subcontrols(&self) -> Vec<&'a Subcontrol> {
        self.matches.iter().map(|m| m.subcontrol).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Controls that belong to the family, in input order.
pub fn family_controls<'a>(controls: &'a [Control], family: &FamilyRule) -> Vec<&'a Control> {
    controls
        .iter()
        .filter(|control| family.claims_ref_code(&control.ref_code))
        .collect()
}

/// Select the family's subcontrols whose descriptions contain any keyword.
///
/// Matching is a case-insensitive substring test. Results follow control
/// order, then subcontrol order; a subcontrol hit by several keywords (or
/// listed twice) appears once. Never fails: an empty result carries an
/// outcome saying why.
pub fn resolve_subcontrols<'a>(
    controls: &'a [Control],
    family: &FamilyRule,
    patterns: &[String],
    policy: MatchPolicy,
) -> Resolution<'a> {
    let members = family_controls(controls, family);
    if members.is_empty() {
        return Resolution {
            outcome: ResolveOutcome::NoMatchingControls,
            matched_controls: 0,
            matches: Vec::new(),
        };
    }

    let needles: Vec<(String, &str)> = patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| (pattern.to_lowercase(), pattern))
        .collect();

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut matches = Vec::new();
    for &control in &members {
        for subcontrol in &control.subcontrols {
            let haystack = subcontrol.description().to_lowercase();
            let Some((_, pattern)) = needles
                .iter()
                .find(|(needle, _)| haystack.contains(needle.as_str()))
            else {
                continue;
            };
            if !seen.insert(subcontrol.id.as_str()) {
                continue;
            }
            matches.push(SubcontrolMatch {
                control,
                subcontrol,
                matched_pattern: Some((*pattern).to_string()),
                fallback: false,
            });
        }
    }

    if !matches.is_empty() {
        return Resolution {
            outcome: ResolveOutcome::Matched,
            matched_controls: members.len(),
            matches,
        };
    }

    if !policy.strict_match
        && let Some((control, subcontrol)) = members
            .iter()
            .find_map(|control| control.subcontrols.first().map(|sub| (*control, sub)))
    {
        tracing::debug!(
            family = %family.family_tag,
            control = %control.ref_code,
            subcontrol = %subcontrol.id,
            "no keyword matched; falling back to first subcontrol"
        );
        return Resolution {
            outcome: ResolveOutcome::Fallback,
            matched_controls: members.len(),
            matches: vec![SubcontrolMatch {
                control,
                subcontrol,
                matched_pattern: None,
                fallback: true,
            }],
        };
    }

    Resolution {
        outcome: ResolveOutcome::NoPatternMatch,
        matched_controls: members.len(),
        matches: Vec::new(),
    }
}
