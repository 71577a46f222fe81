//! risk-brief: markdown narrative over the comparison and the contract terms

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{ArtefactRole, CleanedBundle, ComparisonReport};
use crate::error::Result;
use crate::llm::GenerateRequest;
use crate::workflow::markdown::strip_outer_fence;
use crate::workflow::stage::{StageContext, StageHandler};

pub const SECTIONS: [&str; 3] = ["Compliance Overview", "Line Item Review", "Risks & Follow-up"];

pub struct RiskBriefStage;

#[async_trait]
impl StageHandler for RiskBriefStage {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Vec<u8>> {
        let comparison: ComparisonReport = ctx.read_yaml(ArtefactRole::Comparison)?;
        let bundle: CleanedBundle = ctx.read_yaml(ArtefactRole::CleanYaml)?;

        let (system, prompt) = ctx.render(&json!({
            "contract_file": bundle.contract.source_file,
            "invoice_file": bundle.invoice.source_file,
            "comparison": serde_yaml::to_string(&comparison)?,
            "contract": serde_yaml::to_string(&bundle.contract)?,
        }))?;
        let response = ctx
            .generate(GenerateRequest::new(ctx.stage, prompt).with_system(system))
            .await?;

        let brief = strip_outer_fence(&response.content);
        if brief.is_empty() {
            return Err(ctx.invalid_response("risk brief is empty"));
        }

        let missing = missing_sections(brief);
        if !missing.is_empty() {
            log::warn!("risk brief for run {} lacks sections: {}", ctx.run_id, missing.join(", "));
        }

        Ok(format!("{}\n", brief).into_bytes())
    }
}

/// Expected section headings not present in `brief`
pub fn missing_sections(brief: &str) -> Vec<&'static str> {
    let headings: Vec<String> = brief
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_lowercase())
        .collect();
    SECTIONS
        .iter()
        .copied()
        .filter(|section| !headings.iter().any(|h| h.contains(&section.to_lowercase())))
        .collect()
}
