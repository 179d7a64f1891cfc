//! # grcmap Kernel
//!
//! Evidence-to-control mapping for SOC 2 compliance data: classify evidence by
//! its naming convention, resolve the subcontrols it supports, derive each
//! subcontrol's implementation status, and roll completion up per family.
//!
//! Everything here is synchronous and pure over borrowed exports. Talking to
//! the GRC service is the caller's business; the [`AssociationSink`] trait is
//! where a client plugs in.
//!
//! ## Architecture
//!
//! ```text
//! FamilyMappingTable    ← CN ranges → family tags, ref-code conventions, keywords
//!     │
//! classify              ← "CN07 - ..." → CC1
//!     │
//! resolve_subcontrols   ← family + keywords → matching subcontrols
//!     │
//! plan_associations     ← evidence × controls → AssociationPlan
//!     │
//! AssociationSink       ← executes plan batches (AssociationLedger offline)
//!
//! derive_status         ← (implemented, applicable) → ImplementationStatus
//!     │
//! aggregate             ← per-family and overall completion
//! coverage_report       ← which CN numbers have evidence
//! assess_subcontrols    ← evidence → suggested SubcontrolUpdate
//! ```

pub mod aggregate;
pub mod assess;
pub mod classify;
pub mod coverage;
pub mod error;
pub mod ledger;
pub mod mapping;
pub mod model;
pub mod plan;
pub mod resolve;
pub mod status;

pub use aggregate::{
    Aggregation, ApplicabilitySummary, Counts, aggregate, applicability_summary,
    completion_percentage,
};
pub use assess::{
    Assessment, EvidenceSignal, IndicatorSet, SubcontrolAssessment, assess_subcontrols,
};
pub use classify::{EvidenceToken, classify, parse_evidence_token};
pub use coverage::{CoverageEntry, CoverageReport, coverage_report};
pub use error::{Diagnostic, DiagnosticKind, GrcMapError, Severity};
pub use ledger::{AssociationLedger, AssociationSink, LedgerError, RunSummary, execute_plan};
pub use mapping::{
    FamilyMappingTable, FamilyRule, ValidationIssue, ValidationReport, reference_table,
    validate_family_table,
};
pub use model::{
    Associations, Control, Evidence, EvidenceIndex, Export, FamilyTag, StoredPercentage,
    Subcontrol, load_controls_export, load_evidence_document, load_evidence_export,
    parse_controls_export, parse_evidence_export,
};
pub use plan::{AssociationBatch, AssociationPlan, PlannedAssociation, plan_associations};
pub use resolve::{MatchPolicy, Resolution, ResolveOutcome, resolve_subcontrols};
pub use status::{ImplementationStatus, SubcontrolUpdate, derive_status};
