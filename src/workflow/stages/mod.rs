//! The four built-in stages, in execution order

mod clean;
mod compare;
mod risk_brief;
mod translate;

use std::sync::Arc;

use crate::domain::ArtefactRole;

use super::stage::StageDescriptor;

pub use clean::{CleanStage, collapse_whitespace, description_key, normalize_currency, normalize_record, normalize_unit};
pub use compare::{CompareStage, PRICE_TOLERANCE, RawAssessment, reconcile, validate_assessments};
pub use risk_brief::{RiskBriefStage, SECTIONS, missing_sections};
pub use translate::TranslateStage;

pub const CLEAN: &str = "clean";
pub const COMPARE: &str = "compare";
pub const RISK_BRIEF: &str = "risk-brief";
pub const TRANSLATE: &str = "translate";

/// clean -> compare -> risk-brief -> translate
pub fn default_stages() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new(
            CLEAN,
            vec![ArtefactRole::ContractRecord, ArtefactRole::InvoiceRecord],
            ArtefactRole::CleanYaml,
            Arc::new(CleanStage),
        ),
        StageDescriptor::new(
            COMPARE,
            vec![ArtefactRole::CleanYaml],
            ArtefactRole::Comparison,
            Arc::new(CompareStage),
        ),
        StageDescriptor::new(
            RISK_BRIEF,
            vec![ArtefactRole::Comparison, ArtefactRole::CleanYaml],
            ArtefactRole::RiskBrief,
            Arc::new(RiskBriefStage),
        ),
        StageDescriptor::new(
            TRANSLATE,
            vec![ArtefactRole::RiskBrief],
            ArtefactRole::Translation,
            Arc::new(TranslateStage),
        ),
    ]
}
