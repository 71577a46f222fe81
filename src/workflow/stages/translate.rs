//! translate: the risk brief in the run's target language

use async_trait::async_trait;
use serde_json::json;

use crate::domain::ArtefactRole;
use crate::error::Result;
use crate::llm::GenerateRequest;
use crate::workflow::markdown::{outline, strip_outer_fence};
use crate::workflow::stage::{StageContext, StageHandler};

pub struct TranslateStage;

#[async_trait]
impl StageHandler for TranslateStage {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Vec<u8>> {
        let source = ctx.read_text(ArtefactRole::RiskBrief)?;
        if source.trim().is_empty() {
            return Err(ctx.input_error("risk brief is empty"));
        }

        let (system, prompt) = ctx.render(&json!({
            "language": ctx.target_language,
            "document": source.trim(),
        }))?;
        let response = ctx
            .generate(GenerateRequest::new(ctx.stage, prompt).with_system(system))
            .await?;

        let translated = strip_outer_fence(&response.content);
        if translated.is_empty() {
            return Err(ctx.invalid_response("translation is empty"));
        }

        if ctx.settings.preserve_structure {
            if let Some(detail) = structure_mismatch(&source, translated) {
                return Err(ctx.invalid_response(detail));
            }
        }

        Ok(format!("{}\n", translated).into_bytes())
    }
}

/// Describe how the translation's outline differs from the source, if it does
fn structure_mismatch(source: &str, translated: &str) -> Option<String> {
    let expected = outline(source);
    let actual = outline(translated);
    if expected.headings != actual.headings {
        return Some(format!(
            "translation has {} headings, source has {}",
            actual.headings, expected.headings
        ));
    }
    if expected.bullets != actual.bullets {
        return Some(format!(
            "translation has {} bullet points, source has {}",
            actual.bullets, expected.bullets
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRIEF: &str = "## Compliance Overview\nTwo issues.\n\n## Risks & Follow-up\n- overbilled hours\n- missing PO\n";

    #[test]
    fn test_same_structure_accepted() {
        let translated = "## Überblick\nZwei Probleme.\n\n## Risiken\n- zu viele Stunden\n- fehlende Bestellung\n";
        assert_eq!(structure_mismatch(BRIEF, translated), None);
    }

    #[test]
    fn test_dropped_heading_rejected() {
        let translated = "## Überblick\nZwei Probleme.\n- zu viele Stunden\n- fehlende Bestellung\n";
        let detail = structure_mismatch(BRIEF, translated).unwrap();
        assert!(detail.contains("1 headings"));
    }

    #[test]
    fn test_merged_bullets_rejected() {
        let translated = "## Überblick\nZwei Probleme.\n\n## Risiken\n- zu viele Stunden, fehlende Bestellung\n";
        let detail = structure_mismatch(BRIEF, translated).unwrap();
        assert!(detail.contains("bullet points"));
    }
}
