//! GRC export records: controls, subcontrols, and evidence.
//!
//! These mirror the JSON the GRC service returns from its `controls` and
//! `evidence` listings. Deserialization is lenient about the shapes the
//! service is known to emit (null lists, association objects vs bare ids,
//! wrapped vs bare arrays); everything downstream sees one canonical form.

use crate::error::GrcMapError;
use crate::status::{ImplementationStatus, derive_status};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Trust Service Criteria family code (`CC1`..`CC9`, `A1`, `C1`, `PI1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FamilyTag(String);

impl FamilyTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FamilyTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl PartialEq<str> for FamilyTag {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for FamilyTag {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A compliance requirement grouping with ordered subcontrols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ref_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Statement of Applicability decision; `None` is still pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_applicable: Option<bool>,
    /// Order matters: the best-effort fallback picks the first one.
    #[serde(default, deserialize_with = "null_as_default")]
    pub subcontrols: Vec<Subcontrol>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Control {
    pub fn new(id: impl Into<String>, ref_code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ref_code: ref_code.into(),
            name: None,
            category: None,
            is_applicable: None,
            subcontrols: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_subcontrols(mut self, subcontrols: Vec<Subcontrol>) -> Self {
        self.subcontrols = subcontrols;
        self
    }

    pub fn with_applicability(mut self, applicable: bool) -> Self {
        self.is_applicable = Some(applicable);
        self
    }

    /// Status of one of this control's subcontrols. A subcontrol without its
    /// own applicability flag inherits the control's.
    pub fn subcontrol_status(
        &self,
        subcontrol: &Subcontrol,
    ) -> Result<ImplementationStatus, GrcMapError> {
        subcontrol.status_within(self.is_applicable)
    }
}

/// The `implemented` value exactly as the export carried it.
///
/// Whole numbers are kept as-is, out-of-range ones included; [`derive_status`]
/// decides which are valid. Anything else (fractions, strings, objects) is
/// kept raw and reported per subcontrol instead of failing the whole export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredPercentage {
    Whole(i64),
    Malformed(Value),
}

impl StoredPercentage {
    pub fn whole(&self) -> Option<i64> {
        match self {
            Self::Whole(value) => Some(*value),
            Self::Malformed(_) => None,
        }
    }
}

impl Default for StoredPercentage {
    fn default() -> Self {
        Self::Whole(0)
    }
}

impl From<i64> for StoredPercentage {
    fn from(value: i64) -> Self {
        Self::Whole(value)
    }
}

impl fmt::Display for StoredPercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(value) => write!(f, "{value}"),
            Self::Malformed(raw) => write!(f, "{raw}"),
        }
    }
}

/// The atomic unit of compliance assessment.
///
/// `implemented` is the single source of truth; the status label is always
/// derived from it and `is_applicable`, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcontrol {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub implemented: StoredPercentage,
    /// Absent means inherit from the control, then the platform default,
    /// which is applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_applicable: Option<bool>,
}

impl Subcontrol {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    pub fn applicable(&self) -> bool {
        self.applicable_within(None)
    }

    pub fn applicable_within(&self, control_applicable: Option<bool>) -> bool {
        self.is_applicable.or(control_applicable).unwrap_or(true)
    }

    /// Current implementation status, derived on every call.
    pub fn status(&self) -> Result<ImplementationStatus, GrcMapError> {
        self.status_within(None)
    }

    /// Status with `control_applicable` as the fallback applicability.
    pub fn status_within(
        &self,
        control_applicable: Option<bool>,
    ) -> Result<ImplementationStatus, GrcMapError> {
        let applicable = self.applicable_within(control_applicable);
        match &self.implemented {
            StoredPercentage::Whole(value) => derive_status(*value, applicable),
            StoredPercentage::Malformed(_) if !applicable => Ok(ImplementationStatus::NotApplicable),
            StoredPercentage::Malformed(raw) => Err(GrcMapError::MalformedPercentage {
                raw: raw.to_string(),
            }),
        }
    }
}

/// A named artifact offered in support of one or more subcontrols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Subcontrols this evidence is linked to.
    #[serde(default, deserialize_with = "null_as_default")]
    pub associations: Associations,
    /// Fields the service returns that grcmap does not interpret; kept so a
    /// rewritten export loses nothing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Evidence {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            content: None,
            associations: Associations::default(),
            extra: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_association(mut self, subcontrol_id: impl Into<String>) -> Self {
        self.associations.insert(subcontrol_id.into());
        self
    }

    pub fn is_associated_with(&self, subcontrol_id: &str) -> bool {
        self.associations.contains(subcontrol_id)
    }
}

/// Association list of one evidence record.
///
/// The service returns either bare subcontrol ids or records carrying
/// `subcontrol_id`/`control_id` plus fields of their own. The records are
/// kept verbatim and written back as read; the ids are indexed alongside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Associations {
    records: Vec<Value>,
    ids: BTreeSet<String>,
}

impl Associations {
    pub fn contains(&self, subcontrol_id: &str) -> bool {
        self.ids.contains(subcontrol_id)
    }

    /// Linked subcontrol ids, sorted and deduplicated.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    /// Add a link. New records follow the list's existing shape: a bare id
    /// when every record so far is one, otherwise a `control_id` record.
    pub fn insert(&mut self, subcontrol_id: impl Into<String>) -> bool {
        let subcontrol_id = subcontrol_id.into();
        if self.ids.contains(&subcontrol_id) {
            return false;
        }
        let bare = !self.records.is_empty() && self.records.iter().all(Value::is_string);
        let record = if bare {
            Value::String(subcontrol_id.clone())
        } else {
            let mut record = Map::new();
            record.insert("control_id".to_string(), Value::String(subcontrol_id.clone()));
            Value::Object(record)
        };
        self.records.push(record);
        self.ids.insert(subcontrol_id)
    }

    fn from_records(records: Vec<Value>) -> Self {
        let ids = records.iter().filter_map(association_id).collect();
        Self { records, ids }
    }
}

fn association_id(record: &Value) -> Option<String> {
    let raw = match record {
        Value::String(id) => Some(id.as_str()),
        Value::Object(fields) => ["subcontrol_id", "control_id"]
            .into_iter()
            .find_map(|key| fields.get(key).and_then(Value::as_str)),
        _ => None,
    };
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

impl Serialize for Associations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Associations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Value>::deserialize(deserializer).map(Self::from_records)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A parsed export plus the object that wrapped its rows, if any.
///
/// Rewriting an export puts the rows back under the same key and keeps the
/// envelope's other fields (`total`, paging, ...) as they were.
#[derive(Debug, Clone, PartialEq)]
pub struct Export<T> {
    pub rows: Vec<T>,
    envelope: Option<Envelope>,
}

#[derive(Debug, Clone, PartialEq)]
struct Envelope {
    key: String,
    fields: Map<String, Value>,
}

impl<T> Export<T> {
    pub fn is_wrapped(&self) -> bool {
        self.envelope.is_some()
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

impl<T: DeserializeOwned> Export<T> {
    /// Accept a bare array, or an object wrapping it under `key` or `data`.
    pub fn parse(raw: Value, key: &str) -> Result<Self, serde_json::Error> {
        let (rows, envelope) = match raw {
            Value::Object(mut fields) => {
                let found = [key, "data"]
                    .into_iter()
                    .find(|candidate| fields.contains_key(*candidate));
                match found.and_then(|found| Some((found, fields.remove(found)?))) {
                    Some((found, rows)) => {
                        let envelope = Envelope {
                            key: found.to_string(),
                            fields,
                        };
                        (rows, Some(envelope))
                    }
                    None => (Value::Object(fields), None),
                }
            }
            other => (other, None),
        };
        Ok(Self {
            rows: serde_json::from_value(rows)?,
            envelope,
        })
    }
}

impl<T: Serialize> Export<T> {
    /// The export in the shape it was read in.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let rows = serde_json::to_value(&self.rows)?;
        Ok(match &self.envelope {
            Some(envelope) => {
                let mut fields = envelope.fields.clone();
                fields.insert(envelope.key.clone(), rows);
                Value::Object(fields)
            }
            None => rows,
        })
    }
}

/// Parse a `controls` export: a bare array, or an object wrapping it under
/// `controls` or `data`.
pub fn parse_controls_export(raw: Value) -> Result<Vec<Control>, serde_json::Error> {
    Export::parse(raw, "controls").map(Export::into_rows)
}

/// Parse an `evidence` export: a bare array, or an object wrapping it under
/// `evidence` or `data`.
pub fn parse_evidence_export(raw: Value) -> Result<Vec<Evidence>, serde_json::Error> {
    Export::parse(raw, "evidence").map(Export::into_rows)
}

/// Read and parse a controls export file.
pub fn load_controls_export(path: impl AsRef<Path>) -> Result<Vec<Control>, GrcMapError> {
    load_export(path.as_ref(), "controls").map(Export::into_rows)
}

/// Read and parse an evidence export file.
pub fn load_evidence_export(path: impl AsRef<Path>) -> Result<Vec<Evidence>, GrcMapError> {
    load_evidence_document(path).map(Export::into_rows)
}

/// Read an evidence export file, keeping its envelope for a rewrite.
pub fn load_evidence_document(path: impl AsRef<Path>) -> Result<Export<Evidence>, GrcMapError> {
    load_export(path.as_ref(), "evidence")
}

fn load_export<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Export<T>, GrcMapError> {
    Export::parse(read_json(path)?, key).map_err(|source| GrcMapError::ParseJson {
        path: path.display().to_string(),
        source,
    })
}

fn read_json(path: &Path) -> Result<Value, GrcMapError> {
    let bytes = std::fs::read(path).map_err(|source| GrcMapError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| GrcMapError::ParseJson {
        path: path.display().to_string(),
        source,
    })
}

/// Evidence grouped by the subcontrols it is associated with.
#[derive(Debug, Default)]
pub struct EvidenceIndex<'a> {
    by_subcontrol: BTreeMap<&'a str, Vec<&'a Evidence>>,
}

impl<'a> EvidenceIndex<'a> {
    pub fn build(evidence: &'a [Evidence]) -> Self {
        let mut by_subcontrol: BTreeMap<&'a str, Vec<&'a Evidence>> = BTreeMap::new();
        for item in evidence {
            for subcontrol_id in item.associations.iter() {
                by_subcontrol
                    .entry(subcontrol_id)
                    .or_default()
                    .push(item);
            }
        }
        Self { by_subcontrol }
    }

    pub fn evidence_for(&self, subcontrol_id: &str) -> &[&'a Evidence] {
        self.by_subcontrol
            .get(subcontrol_id)
            .map_or(&[], Vec::as_slice)
    }

    pub fn count_for(&self, subcontrol_id: &str) -> usize {
        self.evidence_for(subcontrol_id).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subcontrol_defaults_to_applicable_and_zero() {
        let sub: Subcontrol = serde_json::from_value(json!({
            "id": "sc1",
            "description": "Establishes Reporting Lines",
            "implemented": null
        }))
        .unwrap();
        assert_eq!(sub.implemented, StoredPercentage::Whole(0));
        assert!(sub.applicable());
        assert_eq!(sub.status().unwrap(), ImplementationStatus::NotImplemented);
    }

    #[test]
    fn status_tracks_percentage_changes() {
        let mut sub: Subcontrol = serde_json::from_value(json!({
            "id": "sc1",
            "implemented": 100,
            "is_applicable": true
        }))
        .unwrap();
        assert_eq!(sub.status().unwrap(), ImplementationStatus::FullyImplemented);
        sub.implemented = 0.into();
        assert_eq!(sub.status().unwrap(), ImplementationStatus::NotImplemented);
    }

    #[test]
    fn associations_accept_ids_and_records() {
        let ev: Evidence = serde_json::from_value(json!({
            "id": "ev1",
            "name": "CN07 - Incident Management Policy",
            "associations": [
                "sc1",
                {"control_id": "sc2"},
                {"subcontrol_id": "sc3", "control_id": "ignored"},
                {"control_id": "sc1"},
                {"other": 1}
            ],
            "tenant_id": "t1"
        }))
        .unwrap();
        let ids: Vec<&str> = ev.associations.iter().collect();
        assert_eq!(ids, vec!["sc1", "sc2", "sc3"]);
        assert_eq!(ev.associations.records().len(), 5);
        assert_eq!(ev.extra.get("tenant_id"), Some(&json!("t1")));
    }

    #[test]
    fn association_records_survive_a_rewrite() {
        let mut ev: Evidence = serde_json::from_value(json!({
            "id": "ev1",
            "name": "CN07",
            "associations": [{"control_id": "sc1", "id": "assoc-1", "created_by": "u1"}]
        }))
        .unwrap();
        assert!(ev.associations.insert("sc2"));
        assert!(!ev.associations.insert("sc1"));

        let written = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            written["associations"],
            json!([
                {"control_id": "sc1", "id": "assoc-1", "created_by": "u1"},
                {"control_id": "sc2"}
            ])
        );
    }

    #[test]
    fn new_links_follow_the_list_shape() {
        let mut bare = Evidence::new("e1", "CN01");
        bare.associations = serde_json::from_value(json!(["sc1"])).unwrap();
        bare.associations.insert("sc2");
        assert_eq!(bare.associations.records(), &[json!("sc1"), json!("sc2")]);

        let mut empty = Evidence::new("e2", "CN02");
        empty.associations.insert("sc3");
        assert_eq!(empty.associations.records(), &[json!({"control_id": "sc3"})]);
    }

    #[test]
    fn malformed_percentage_fails_only_its_subcontrol() {
        let controls = parse_controls_export(json!([{
            "id": "c1",
            "ref_code": "cc1.1",
            "subcontrols": [
                {"id": "ok", "implemented": 100},
                {"id": "half", "implemented": 50.5},
                {"id": "text", "implemented": "done"},
                {"id": "na", "implemented": "n/a", "is_applicable": false}
            ]
        }]))
        .unwrap();
        let subs = &controls[0].subcontrols;
        assert_eq!(subs[0].status().unwrap(), ImplementationStatus::FullyImplemented);
        assert!(matches!(
            subs[1].status(),
            Err(GrcMapError::MalformedPercentage { ref raw }) if raw == "50.5"
        ));
        assert!(subs[2].status().is_err());
        assert_eq!(subs[3].status().unwrap(), ImplementationStatus::NotApplicable);
        assert_eq!(serde_json::to_value(&subs[1]).unwrap()["implemented"], json!(50.5));
    }

    #[test]
    fn subcontrols_inherit_control_applicability() {
        let control: Control = serde_json::from_value(json!({
            "id": "c-p1",
            "ref_code": "p1.1",
            "is_applicable": false,
            "owner": "privacy",
            "subcontrols": [
                {"id": "inherit", "implemented": 0},
                {"id": "own", "implemented": 100, "is_applicable": true}
            ]
        }))
        .unwrap();
        assert_eq!(control.is_applicable, Some(false));
        assert_eq!(control.extra.get("owner"), Some(&json!("privacy")));
        let statuses: Vec<ImplementationStatus> = control
            .subcontrols
            .iter()
            .map(|sub| control.subcontrol_status(sub).unwrap())
            .collect();
        assert_eq!(
            statuses,
            vec![
                ImplementationStatus::NotApplicable,
                ImplementationStatus::FullyImplemented
            ]
        );
        assert_eq!(
            control.subcontrols[0].status().unwrap(),
            ImplementationStatus::NotImplemented
        );
    }

    #[test]
    fn null_collections_read_as_empty() {
        let control: Control = serde_json::from_value(json!({
            "id": "c1",
            "ref_code": "cc1.1",
            "subcontrols": null
        }))
        .unwrap();
        assert!(control.subcontrols.is_empty());

        let ev: Evidence =
            serde_json::from_value(json!({"id": "ev1", "name": null, "associations": null}))
                .unwrap();
        assert!(ev.name.is_empty());
        assert!(ev.associations.is_empty());
    }

    #[test]
    fn exports_unwrap_known_envelopes() {
        let bare = parse_controls_export(json!([{"id": "c1", "ref_code": "cc1.1"}])).unwrap();
        assert_eq!(bare.len(), 1);

        let wrapped =
            parse_evidence_export(json!({"evidence": [{"id": "e1", "name": "CN01"}]})).unwrap();
        assert_eq!(wrapped[0].name, "CN01");

        let data = parse_controls_export(json!({"data": [{"id": "c2"}]})).unwrap();
        assert_eq!(data[0].id, "c2");
    }

    #[test]
    fn wrapped_export_keeps_its_envelope() {
        let raw = json!({
            "evidence": [{"id": "e1", "name": "CN07", "associations": []}],
            "total": 1,
            "page": {"size": 50}
        });
        let mut export = Export::<Evidence>::parse(raw, "evidence").unwrap();
        assert!(export.is_wrapped());
        export.rows[0].associations.insert("sc1");

        let written = export.to_value().unwrap();
        assert_eq!(written["total"], json!(1));
        assert_eq!(written["page"], json!({"size": 50}));
        assert_eq!(
            written["evidence"][0]["associations"],
            json!([{"control_id": "sc1"}])
        );

        let bare = Export::<Evidence>::parse(json!([{"id": "e1"}]), "evidence").unwrap();
        assert!(!bare.is_wrapped());
        assert!(bare.to_value().unwrap().is_array());
    }

    #[test]
    fn loaders_report_path_on_failure() {
        let missing = std::env::temp_dir().join("grcmap-missing-export.json");
        let err = load_controls_export(&missing).unwrap_err();
        assert!(matches!(err, GrcMapError::ReadFile { ref path, .. } if path.ends_with("grcmap-missing-export.json")));

        let path = std::env::temp_dir().join(format!("grcmap-bad-export-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_evidence_export(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, GrcMapError::ParseJson { .. }));
    }

    #[test]
    fn index_groups_evidence_by_subcontrol() {
        let evidence = vec![
            Evidence::new("e1", "CN01").with_association("sc1"),
            Evidence::new("e2", "CN02")
                .with_association("sc1")
                .with_association("sc2"),
        ];
        let index = EvidenceIndex::build(&evidence);
        assert_eq!(index.count_for("sc1"), 2);
        assert_eq!(index.count_for("sc2"), 1);
        assert_eq!(index.count_for("sc9"), 0);
    }
}
