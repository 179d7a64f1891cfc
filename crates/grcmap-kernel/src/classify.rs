//! Evidence classification by naming convention.
//!
//! Evidence names open with a token like `CN07`: an alphabetic prefix and a
//! zero-padded number. The number selects a range in the mapping table,
//! and the range names the family.

use crate::mapping::{FamilyMappingTable, FamilyRule};
use crate::model::FamilyTag;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// The leading `<PREFIX><digits>` token of an evidence name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceToken {
    pub prefix: String,
    pub number: u32,
}

fn evidence_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)([0-9]+)").expect("evidence token regex must compile")
    })
}

/// Parse the token at the very start of the name. `None` when absent,
/// preceded by anything (whitespace included), or the number overflows `u32`.
pub fn parse_evidence_token(name: &str) -> Option<EvidenceToken> {
    let caps = evidence_token_re().captures(name)?;
    let number = caps.get(2)?.as_str().parse::<u32>().ok()?;
    Some(EvidenceToken {
        prefix: caps.get(1)?.as_str().to_string(),
        number,
    })
}

/// Parse the token and find the table row it falls in.
///
/// The prefix must equal the table's `evidence_prefix`, ignoring case.
pub fn locate<'t>(
    name: &str,
    table: &'t FamilyMappingTable,
) -> Option<(EvidenceToken, &'t FamilyRule)> {
    let token = parse_evidence_token(name)?;
    if !token
        .prefix
        .eq_ignore_ascii_case(table.evidence_prefix.trim())
    {
        return None;
    }
    let rule = table.rule_for_number(token.number)?;
    Some((token, rule))
}

/// Classify an evidence name into its family, or `None` for unclassified.
///
/// Total: never panics, whatever the input.
pub fn classify(name: &str, table: &FamilyMappingTable) -> Option<FamilyTag> {
    locate(name, table).map(|(_, rule)| rule.family_tag.clone())
}
