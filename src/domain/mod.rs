//! Domain types: runs, stage results, artefacts, extracted records and the
//! payloads the stages exchange.

pub mod artefact;
pub mod record;
pub mod report;
pub mod run;

pub use artefact::{ArtefactFormat, ArtefactRef, ArtefactRole};
pub use record::{DocumentKind, ExtractedRecord, LineItem};
pub use report::{
    Assessment, CleanLineItem, CleanSummary, CleanedBundle, Clause, ComparisonReport, ComplianceStatus, Discrepancy,
    DiscrepancyKind, MatchedItem,
};
pub use run::{FailureReason, Run, RunFailure, RunStatus, StageResult, StageStatus};
