//! clean: normalize both extracted records, then pull a clause digest out of
//! the contract text with a structured model call.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::{ArtefactRole, CleanLineItem, CleanSummary, CleanedBundle, Clause, ExtractedRecord, LineItem};
use crate::error::Result;
use crate::llm::{GenerateRequest, OutputShape};
use crate::workflow::stage::{StageContext, StageHandler};

/// Contract text segments offered to the model
const MAX_SEGMENTS: usize = 60;

pub struct CleanStage;

#[derive(Debug, Deserialize)]
struct ClauseDigest {
    #[serde(default)]
    clauses: Vec<Clause>,
}

#[async_trait]
impl StageHandler for CleanStage {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Vec<u8>> {
        let contract: ExtractedRecord = ctx.read_yaml(ArtefactRole::ContractRecord)?;
        let invoice: ExtractedRecord = ctx.read_yaml(ArtefactRole::InvoiceRecord)?;

        let mut bundle = CleanedBundle {
            contract: normalize_record(&contract),
            invoice: normalize_record(&invoice),
        };
        log::debug!(
            "clean: contract {} items ({} duplicates), invoice {} items ({} duplicates)",
            bundle.contract.line_items.len(),
            bundle.contract.duplicates_removed,
            bundle.invoice.line_items.len(),
            bundle.invoice.duplicates_removed
        );

        let segments: Vec<String> = contract
            .text
            .iter()
            .map(|s| collapse_whitespace(s))
            .filter(|s| !s.is_empty())
            .take(MAX_SEGMENTS)
            .collect();

        if !segments.is_empty() {
            let (system, prompt) = ctx.render(&json!({
                "source_file": bundle.contract.source_file,
                "currency": bundle.contract.currency,
                "segments": segments,
            }))?;
            let request = GenerateRequest::new(ctx.stage, prompt)
                .with_system(system)
                .with_shape(clause_shape());
            let response = ctx.generate(request).await?;
            let structured = response
                .structured
                .ok_or_else(|| ctx.invalid_response("clause digest missing structured output"))?;
            let digest: ClauseDigest = serde_json::from_value(structured)
                .map_err(|e| ctx.invalid_response(format!("clause digest has the wrong shape: {}", e)))?;

            bundle.contract.clauses = digest
                .clauses
                .into_iter()
                .map(|c| Clause {
                    reference: collapse_whitespace(&c.reference),
                    text: collapse_whitespace(&c.text),
                })
                .filter(|c| !c.text.is_empty())
                .collect();
        }

        Ok(serde_yaml::to_string(&bundle)?.into_bytes())
    }
}

fn clause_shape() -> OutputShape {
    OutputShape::new(
        "clause_digest",
        json!({
            "type": "object",
            "properties": {
                "clauses": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "reference": {"type": "string"},
                            "text": {"type": "string"}
                        },
                        "required": ["reference", "text"]
                    }
                }
            },
            "required": ["clauses"]
        }),
    )
}

/// Deterministic canonical form of one record
pub fn normalize_record(record: &ExtractedRecord) -> CleanSummary {
    let document_currency = record.metadata.get("currency").and_then(|c| normalize_currency(c));

    let mut items: Vec<CleanLineItem> = Vec::with_capacity(record.line_items.len());
    let mut duplicates_removed = 0;

    for item in &record.line_items {
        let Some(mut cleaned) = normalize_item(item, document_currency.as_deref()) else {
            continue;
        };
        if items.iter().any(|existing| same_content(existing, &cleaned)) {
            duplicates_removed += 1;
            continue;
        }
        cleaned.key = unique_key(&items, &cleaned.key);
        items.push(cleaned);
    }

    let currency = document_currency.or_else(|| uniform_currency(&items));

    CleanSummary {
        source_file: record.source_file.clone(),
        currency,
        line_items: items,
        duplicates_removed,
        clauses: Vec::new(),
    }
}

fn normalize_item(item: &LineItem, fallback_currency: Option<&str>) -> Option<CleanLineItem> {
    let description = collapse_whitespace(&item.description);
    let key = description_key(&description);
    if key.is_empty() {
        return None;
    }

    let currency = item
        .currency
        .as_deref()
        .and_then(normalize_currency)
        .or_else(|| fallback_currency.map(str::to_string));

    Some(CleanLineItem {
        key,
        description,
        quantity: item.quantity.filter(|q| q.is_finite()),
        unit: item.unit.as_deref().and_then(normalize_unit),
        unit_price: item.unit_price.filter(|p| p.is_finite()),
        currency,
        reference: item
            .reference
            .as_deref()
            .map(collapse_whitespace)
            .filter(|r| !r.is_empty()),
    })
}

fn same_content(a: &CleanLineItem, b: &CleanLineItem) -> bool {
    a.description.to_lowercase() == b.description.to_lowercase()
        && a.quantity == b.quantity
        && a.unit == b.unit
        && a.unit_price == b.unit_price
        && a.currency == b.currency
        && a.reference == b.reference
}

/// Keys stay unique within one summary: `travel`, `travel-2`, ...
fn unique_key(existing: &[CleanLineItem], key: &str) -> String {
    if !existing.iter().any(|i| i.key == key) {
        return key.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", key, n))
        .find(|candidate| !existing.iter().any(|i| &i.key == candidate))
        .unwrap_or_else(|| key.to_string())
}

fn uniform_currency(items: &[CleanLineItem]) -> Option<String> {
    let mut currencies = items.iter().filter_map(|i| i.currency.as_deref());
    let first = currencies.next()?;
    currencies.all(|c| c == first).then(|| first.to_string())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-case alphanumeric words joined by single spaces
pub fn description_key(description: &str) -> String {
    description
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// ISO code, upper-case; common symbols mapped to their code
pub fn normalize_currency(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let code = match trimmed {
        "" => return None,
        "$" | "US$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        "¥" => "JPY",
        other => return Some(other.to_uppercase()),
    };
    Some(code.to_string())
}

/// Lower-case unit with common spellings folded together
pub fn normalize_unit(raw: &str) -> Option<String> {
    let lowered = collapse_whitespace(raw).to_lowercase();
    let canonical = match lowered.trim_end_matches('.') {
        "" => return None,
        "pc" | "pcs" | "piece" | "pieces" | "ea" | "each" | "unit" | "units" | "stk" | "stück" => "unit",
        "h" | "hr" | "hrs" | "hour" | "hours" | "std" => "hour",
        "d" | "day" | "days" | "pt" | "person day" | "person days" | "man day" | "man days" => "day",
        "mo" | "month" | "months" | "monthly" => "month",
        "yr" | "year" | "years" | "annual" => "year",
        "kg" | "kgs" | "kilogram" | "kilograms" => "kg",
        "flat" | "lump sum" | "lumpsum" => "lump sum",
        other => return Some(other.to_string()),
    };
    Some(canonical.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentKind;

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(" eur ").as_deref(), Some("EUR"));
        assert_eq!(normalize_currency("€").as_deref(), Some("EUR"));
        assert_eq!(normalize_currency("$").as_deref(), Some("USD"));
        assert_eq!(normalize_currency("£").as_deref(), Some("GBP"));
        assert_eq!(normalize_currency("   "), None);
    }

    #[test]
    fn test_normalize_unit() {
        assert_eq!(normalize_unit("Hrs").as_deref(), Some("hour"));
        assert_eq!(normalize_unit("pcs.").as_deref(), Some("unit"));
        assert_eq!(normalize_unit("Person  Days").as_deref(), Some("day"));
        assert_eq!(normalize_unit("Licence").as_deref(), Some("licence"));
        assert_eq!(normalize_unit(""), None);
    }

    #[test]
    fn test_description_key() {
        assert_eq!(description_key("  Consulting -  Senior (on-site) "), "consulting senior on site");
    }

    #[test]
    fn test_normalize_record_dedupes_and_fills_currency() {
        let record = ExtractedRecord::new(DocumentKind::Invoice, "invoice.xlsx")
            .with_metadata("currency", "€")
            .with_item(LineItem::new("Consulting  services").with_quantity(10.0, "hrs"))
            .with_item(LineItem::new("consulting services").with_quantity(10.0, "hours"))
            .with_item(LineItem::new("Travel").with_price(80.0, "usd"));

        let summary = normalize_record(&record);
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.line_items.len(), 2);
        assert_eq!(summary.currency.as_deref(), Some("EUR"));

        let consulting = &summary.line_items[0];
        assert_eq!(consulting.key, "consulting services");
        assert_eq!(consulting.description, "Consulting services");
        assert_eq!(consulting.unit.as_deref(), Some("hour"));
        assert_eq!(consulting.currency.as_deref(), Some("EUR"));
        assert_eq!(summary.line_items[1].currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_same_description_different_values_get_unique_keys() {
        let record = ExtractedRecord::new(DocumentKind::Invoice, "invoice.xlsx")
            .with_item(LineItem::new("Travel").with_price(80.0, "EUR"))
            .with_item(LineItem::new("Travel").with_price(95.0, "EUR"));
        let summary = normalize_record(&record);
        let keys: Vec<_> = summary.line_items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["travel", "travel-2"]);
        assert_eq!(summary.duplicates_removed, 0);
        assert_eq!(summary.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_blank_descriptions_dropped() {
        let record = ExtractedRecord::new(DocumentKind::Contract, "c.pdf").with_item(LineItem::new(" -- "));
        assert!(normalize_record(&record).line_items.is_empty());
    }
}
