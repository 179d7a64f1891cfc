//! Implementation status derivation.
//!
//! The GRC service labels each subcontrol with an implementation status, but
//! the label is a projection of two stored fields: the `implemented`
//! percentage and the applicability flag. This module owns that projection.
//! There is no way to set a status directly; updates go through
//! [`SubcontrolUpdate`], which only carries the underlying fields.

use crate::error::GrcMapError;
use crate::model::Subcontrol;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Categorical implementation status of a subcontrol.
///
/// Every state is reachable from every other in one update; none is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    NotApplicable,
    NotImplemented,
    PartiallyImplemented,
    FullyImplemented,
}

impl ImplementationStatus {
    pub const ALL: [Self; 4] = [
        Self::NotApplicable,
        Self::NotImplemented,
        Self::PartiallyImplemented,
        Self::FullyImplemented,
    ];

    /// The label the GRC service shows for this status.
    pub fn label(self) -> &'static str {
        match self {
            Self::NotApplicable => "not applicable",
            Self::NotImplemented => "not implemented",
            Self::PartiallyImplemented => "partially implemented",
            Self::FullyImplemented => "fully implemented",
        }
    }

    /// A percentage that derives to this status, for building updates.
    ///
    /// `None` for [`Self::NotApplicable`], which is set through applicability.
    pub fn representative_percentage(self) -> Option<u8> {
        match self {
            Self::NotApplicable => None,
            Self::NotImplemented => Some(0),
            Self::PartiallyImplemented => Some(50),
            Self::FullyImplemented => Some(100),
        }
    }
}

impl fmt::Display for ImplementationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ImplementationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        Self::ALL
            .into_iter()
            .find(|status| status.label() == normalized)
            .ok_or_else(|| format!("unknown implementation status: {s}"))
    }
}

/// Derive the status from the completion percentage and applicability.
///
/// Not applicable wins over any percentage. Otherwise 0 is not implemented,
/// 1..=99 partially, 100 fully. Anything outside `0..=100` is rejected.
pub fn derive_status(
    implemented: i64,
    is_applicable: bool,
) -> Result<ImplementationStatus, GrcMapError> {
    if !is_applicable {
        return Ok(ImplementationStatus::NotApplicable);
    }
    match implemented {
        0 => Ok(ImplementationStatus::NotImplemented),
        1..=99 => Ok(ImplementationStatus::PartiallyImplemented),
        100 => Ok(ImplementationStatus::FullyImplemented),
        value => Err(GrcMapError::InvalidPercentage { value }),
    }
}

/// Payload for the service's subcontrol update call.
///
/// Only the stored fields are expressible; the status follows from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcontrolUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    implemented: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    applicable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner_id: Option<String>,
}

impl SubcontrolUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the completion percentage, rejecting values outside `0..=100`.
    pub fn implemented(mut self, value: i64) -> Result<Self, GrcMapError> {
        let pct = u8::try_from(value)
            .ok()
            .filter(|pct| *pct <= 100)
            .ok_or(GrcMapError::InvalidPercentage { value })?;
        self.implemented = Some(pct);
        Ok(self)
    }

    pub fn applicable(mut self, applicable: bool) -> Self {
        self.applicable = Some(applicable);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn implemented_value(&self) -> Option<u8> {
        self.implemented
    }

    pub fn applicable_value(&self) -> Option<bool> {
        self.applicable
    }

    pub fn notes_value(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the stored-field changes to a local subcontrol record.
    pub fn apply_to(&self, subcontrol: &mut Subcontrol) {
        if let Some(pct) = self.implemented {
            subcontrol.implemented = i64::from(pct).into();
        }
        if let Some(applicable) = self.applicable {
            subcontrol.is_applicable = Some(applicable);
        }
    }

    /// Status the subcontrol would have after this update.
    pub fn projected_status(
        &self,
        subcontrol: &Subcontrol,
    ) -> Result<ImplementationStatus, GrcMapError> {
        let mut projected = subcontrol.clone();
        self.apply_to(&mut projected);
        projected.status()
    }
}
