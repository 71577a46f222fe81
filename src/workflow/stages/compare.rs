//! compare: reconcile the cleaned contract and invoice, then have the model
//! assess every compared key.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{
    ArtefactRole, Assessment, CleanLineItem, CleanSummary, CleanedBundle, ComparisonReport, ComplianceStatus,
    Discrepancy, DiscrepancyKind, MatchedItem,
};
use crate::error::Result;
use crate::llm::{GenerateRequest, OutputShape};
use crate::workflow::stage::{StageContext, StageHandler};

/// Unit prices closer than this are equal
pub const PRICE_TOLERANCE: f64 = 0.005;

const QUANTITY_EPSILON: f64 = 1e-9;

/// Prefix for an invoice-only key that collides with a contract key.
/// Description keys never contain ':'.
const INVOICE_KEY_PREFIX: &str = "invoice:";

pub struct CompareStage;

#[derive(Debug, Deserialize)]
struct AssessmentReply {
    #[serde(default)]
    assessments: Vec<RawAssessment>,
}

/// Model-side assessment before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawAssessment {
    pub key: String,
    pub status: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Serialize)]
struct Reconciliation<'a> {
    matched: &'a [MatchedItem],
    discrepancies: &'a [Discrepancy],
}

#[async_trait]
impl StageHandler for CompareStage {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Vec<u8>> {
        let bundle: CleanedBundle = ctx.read_yaml(ArtefactRole::CleanYaml)?;
        let mut report = reconcile(&bundle.contract, &bundle.invoice);
        log::debug!(
            "compare: {} matched, {} discrepancies",
            report.matched.len(),
            report.discrepancies.len()
        );

        let keys: Vec<String> = report.keys().into_iter().map(str::to_string).collect();
        if !keys.is_empty() {
            let reconciliation = serde_yaml::to_string(&Reconciliation {
                matched: &report.matched,
                discrepancies: &report.discrepancies,
            })?;
            let (system, prompt) = ctx.render(&json!({
                "keys": keys,
                "reconciliation": reconciliation,
                "clauses": bundle.contract.clauses,
            }))?;
            let request = GenerateRequest::new(ctx.stage, prompt)
                .with_system(system)
                .with_shape(assessment_shape());
            let response = ctx.generate(request).await?;
            let structured = response
                .structured
                .ok_or_else(|| ctx.invalid_response("assessments missing structured output"))?;
            let reply: AssessmentReply = serde_json::from_value(structured)
                .map_err(|e| ctx.invalid_response(format!("assessments have the wrong shape: {}", e)))?;

            report.assessments = validate_assessments(&keys, reply.assessments, ctx.settings.strict_compare)
                .map_err(|detail| ctx.invalid_response(detail))?;
        }

        Ok(serde_yaml::to_string(&report)?.into_bytes())
    }
}

fn assessment_shape() -> OutputShape {
    OutputShape::new(
        "line_item_assessments",
        json!({
            "type": "object",
            "properties": {
                "assessments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "key": {"type": "string"},
                            "status": {"type": "string", "enum": ["compliant", "non_compliant", "needs_review"]},
                            "rationale": {"type": "string"},
                            "confidence": {"type": "number"}
                        },
                        "required": ["key", "status"]
                    }
                }
            },
            "required": ["assessments"]
        }),
    )
}

/// Deterministic reconciliation. Contract items are paired with invoice items
/// by shared reference first, then by description key.
pub fn reconcile(contract: &CleanSummary, invoice: &CleanSummary) -> ComparisonReport {
    let mut report = ComparisonReport::default();
    let mut used = vec![false; invoice.line_items.len()];

    for c in &contract.line_items {
        let by_reference = c.reference.as_ref().and_then(|reference| {
            invoice
                .line_items
                .iter()
                .enumerate()
                .find(|(i, inv)| !used[*i] && inv.reference.as_ref() == Some(reference))
                .map(|(i, _)| i)
        });
        let partner = by_reference.or_else(|| {
            invoice
                .line_items
                .iter()
                .enumerate()
                .find(|(i, inv)| !used[*i] && inv.key == c.key)
                .map(|(i, _)| i)
        });

        let Some(index) = partner else {
            report.discrepancies.push(Discrepancy {
                key: c.key.clone(),
                kind: DiscrepancyKind::MissingOnInvoice,
                description: c.description.clone(),
                contract: Some(c.clone()),
                invoice: None,
                detail: "contracted item not billed on the invoice".to_string(),
            });
            continue;
        };
        used[index] = true;
        let inv = &invoice.line_items[index];

        let found = item_discrepancies(c, inv);
        if found.is_empty() {
            report.matched.push(MatchedItem {
                key: c.key.clone(),
                description: c.description.clone(),
                quantity: inv.quantity.or(c.quantity),
                unit_price: inv.unit_price.or(c.unit_price),
                currency: inv.currency.clone().or_else(|| c.currency.clone()),
            });
        } else {
            report.discrepancies.extend(found);
        }
    }

    // A reference pairing can leave an invoice item whose description key is
    // already taken by a contract item; every assessed key must stay distinct.
    let taken: HashSet<String> = contract.line_items.iter().map(|c| c.key.clone()).collect();
    for (inv, _) in invoice.line_items.iter().zip(used).filter(|(_, used)| !used) {
        let key = if taken.contains(&inv.key) {
            format!("{}{}", INVOICE_KEY_PREFIX, inv.key)
        } else {
            inv.key.clone()
        };
        report.discrepancies.push(Discrepancy {
            key,
            kind: DiscrepancyKind::MissingInContract,
            description: inv.description.clone(),
            contract: None,
            invoice: Some(inv.clone()),
            detail: "billed item has no contract counterpart".to_string(),
        });
    }

    report
}

fn item_discrepancies(c: &CleanLineItem, inv: &CleanLineItem) -> Vec<Discrepancy> {
    let mut found = Vec::new();
    let mut push = |kind: DiscrepancyKind, detail: String| {
        found.push(Discrepancy {
            key: c.key.clone(),
            kind,
            description: c.description.clone(),
            contract: Some(c.clone()),
            invoice: Some(inv.clone()),
            detail,
        });
    };

    let units_differ = matches!((&c.unit, &inv.unit), (Some(a), Some(b)) if a != b);
    if let (Some(cq), Some(iq)) = (c.quantity, inv.quantity) {
        if units_differ {
            push(
                DiscrepancyKind::QuantityMismatch,
                format!(
                    "contract {} {} vs invoice {} {}",
                    cq,
                    c.unit.as_deref().unwrap_or(""),
                    iq,
                    inv.unit.as_deref().unwrap_or("")
                ),
            );
        } else if (cq - iq).abs() > QUANTITY_EPSILON {
            push(
                DiscrepancyKind::QuantityMismatch,
                format!("contract quantity {} vs invoice quantity {}", cq, iq),
            );
        }
    }

    let currency_mismatch = matches!((&c.currency, &inv.currency), (Some(a), Some(b)) if a != b);
    if currency_mismatch {
        push(
            DiscrepancyKind::CurrencyMismatch,
            format!(
                "contract currency {} vs invoice currency {}",
                c.currency.as_deref().unwrap_or(""),
                inv.currency.as_deref().unwrap_or("")
            ),
        );
    } else if let (Some(cp), Some(ip)) = (c.unit_price, inv.unit_price) {
        if (cp - ip).abs() > PRICE_TOLERANCE {
            push(
                DiscrepancyKind::PriceMismatch,
                format!("contract unit price {:.2} vs invoice unit price {:.2}", cp, ip),
            );
        }
    }

    found
}

fn parse_status(raw: &str) -> Option<ComplianceStatus> {
    let normalized: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect();
    match normalized.as_str() {
        "compliant" => Some(ComplianceStatus::Compliant),
        "non_compliant" | "noncompliant" => Some(ComplianceStatus::NonCompliant),
        "needs_review" => Some(ComplianceStatus::NeedsReview),
        _ => None,
    }
}

/// Check the model's assessments against the compared keys.
///
/// Strict: every key assessed exactly once, no unknown keys, known statuses,
/// confidence within 0..=1. Lenient: unknown keys and repeats are dropped,
/// unknown statuses and unassessed keys become `needs_review`, confidence is
/// clamped. The result follows `keys` order.
pub fn validate_assessments(
    keys: &[String],
    raw: Vec<RawAssessment>,
    strict: bool,
) -> std::result::Result<Vec<Assessment>, String> {
    let known: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let mut seen: Vec<Assessment> = Vec::with_capacity(keys.len());

    for item in raw {
        let key = item.key.trim().to_string();
        if !known.contains(key.as_str()) {
            if strict {
                return Err(format!("assessment for unknown key '{}'", key));
            }
            log::warn!("dropping assessment for unknown key '{}'", key);
            continue;
        }
        if seen.iter().any(|a| a.key == key) {
            if strict {
                return Err(format!("key '{}' assessed more than once", key));
            }
            continue;
        }

        let status = match parse_status(&item.status) {
            Some(status) => status,
            None if strict => return Err(format!("unknown status '{}' for key '{}'", item.status, key)),
            None => ComplianceStatus::NeedsReview,
        };
        let confidence = match item.confidence {
            Some(c) if !(0.0..=1.0).contains(&c) && strict => {
                return Err(format!("confidence {} for key '{}' is outside 0..=1", c, key));
            }
            Some(c) => Some(c.clamp(0.0, 1.0)),
            None => None,
        };

        seen.push(Assessment {
            key,
            status,
            rationale: item.rationale.trim().to_string(),
            confidence,
        });
    }

    let mut ordered = Vec::with_capacity(keys.len());
    for key in keys {
        match seen.iter().position(|a| &a.key == key) {
            Some(index) => ordered.push(seen.swap_remove(index)),
            None if strict => return Err(format!("key '{}' was not assessed", key)),
            None => ordered.push(Assessment {
                key: key.clone(),
                status: ComplianceStatus::NeedsReview,
                rationale: "not assessed by the model".to_string(),
                confidence: None,
            }),
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, quantity: f64, price: f64) -> CleanLineItem {
        CleanLineItem {
            key: key.to_string(),
            description: key.to_string(),
            quantity: Some(quantity),
            unit: Some("hour".to_string()),
            unit_price: Some(price),
            currency: Some("EUR".to_string()),
            reference: None,
        }
    }

    fn summary(items: Vec<CleanLineItem>) -> CleanSummary {
        CleanSummary {
            source_file: "f".to_string(),
            currency: Some("EUR".to_string()),
            line_items: items,
            duplicates_removed: 0,
            clauses: Vec::new(),
        }
    }

    fn raw(key: &str, status: &str) -> RawAssessment {
        RawAssessment {
            key: key.to_string(),
            status: status.to_string(),
            rationale: String::new(),
            confidence: Some(0.8),
        }
    }

    #[test]
    fn test_reference_pairing_keeps_keys_distinct() {
        let mut consulting = item("consulting", 10.0, 120.0);
        consulting.reference = Some("L1".to_string());
        let mut advisory = item("advisory", 10.0, 120.0);
        advisory.reference = Some("L1".to_string());
        let extra = item("consulting", 5.0, 120.0);

        let report = reconcile(&summary(vec![consulting]), &summary(vec![advisory, extra]));

        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.matched[0].key, "consulting");
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::MissingInContract);
        assert_eq!(report.discrepancies[0].key, "invoice:consulting");
        assert_eq!(report.discrepancies[0].invoice.as_ref().unwrap().key, "consulting");
        assert_eq!(report.keys(), vec!["consulting", "invoice:consulting"]);
    }

    #[test]
    fn test_unpaired_invoice_key_kept_when_free() {
        let report = reconcile(
            &summary(vec![item("consulting", 1.0, 120.0)]),
            &summary(vec![item("consulting", 1.0, 120.0), item("travel", 1.0, 80.0)]),
        );
        assert_eq!(report.keys(), vec!["consulting", "travel"]);
    }

    #[test]
    fn test_single_quantity_mismatch_is_one_discrepancy() {
        let contract = summary(vec![item("consulting", 10.0, 120.0), item("travel", 1.0, 80.0)]);
        let invoice = summary(vec![item("consulting", 12.0, 120.0), item("travel", 1.0, 80.0)]);
        let report = reconcile(&contract, &invoice);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].key, "consulting");
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::QuantityMismatch);
        assert_eq!(report.matched.len(), 1);
    }

    #[test]
    fn test_price_within_tolerance_matches() {
        let contract = summary(vec![item("licence", 1.0, 99.999)]);
        let invoice = summary(vec![item("licence", 1.0, 100.0)]);
        assert!(reconcile(&contract, &invoice).is_clean());

        let invoice = summary(vec![item("licence", 1.0, 100.01)]);
        let report = reconcile(&contract, &invoice);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::PriceMismatch);
    }

    #[test]
    fn test_currency_mismatch_suppresses_price_check() {
        let contract = summary(vec![item("licence", 1.0, 100.0)]);
        let mut other = item("licence", 1.0, 110.0);
        other.currency = Some("USD".to_string());
        let report = reconcile(&contract, &summary(vec![other]));
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::CurrencyMismatch);
    }

    #[test]
    fn test_missing_on_either_side() {
        let contract = summary(vec![item("support", 1.0, 500.0)]);
        let invoice = summary(vec![item("hardware", 2.0, 300.0)]);
        let report = reconcile(&contract, &invoice);
        let kinds: Vec<_> = report.discrepancies.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiscrepancyKind::MissingOnInvoice, DiscrepancyKind::MissingInContract]
        );
        assert_eq!(report.keys(), vec!["support", "hardware"]);
    }

    #[test]
    fn test_reference_pairs_before_description() {
        let mut c = item("consulting senior", 10.0, 120.0);
        c.reference = Some("L1".to_string());
        let mut i = item("sr consulting", 10.0, 120.0);
        i.reference = Some("L1".to_string());
        let report = reconcile(&summary(vec![c]), &summary(vec![i]));
        assert!(report.is_clean());
        assert_eq!(report.matched[0].key, "consulting senior");
    }

    #[test]
    fn test_unit_mismatch_flags_quantity() {
        let contract = summary(vec![item("consulting", 8.0, 120.0)]);
        let mut inv = item("consulting", 1.0, 120.0);
        inv.unit = Some("day".to_string());
        let report = reconcile(&contract, &summary(vec![inv]));
        assert_eq!(report.discrepancies.len(), 1);
        assert!(report.discrepancies[0].detail.contains("day"));
    }

    #[test]
    fn test_strict_validation_accepts_complete_set() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let result = validate_assessments(&keys, vec![raw("b", "Non-compliant"), raw("a", "compliant")], true).unwrap();
        assert_eq!(result[0].key, "a");
        assert_eq!(result[1].status, ComplianceStatus::NonCompliant);
    }

    #[test]
    fn test_strict_validation_rejects_unknown_key() {
        let keys = vec!["a".to_string()];
        let err = validate_assessments(&keys, vec![raw("a", "compliant"), raw("zzz", "compliant")], true).unwrap_err();
        assert!(err.contains("zzz"));
    }

    #[test]
    fn test_strict_validation_rejects_missing_key() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert!(validate_assessments(&keys, vec![raw("a", "compliant")], true).is_err());
    }

    #[test]
    fn test_strict_validation_rejects_bad_status_and_confidence() {
        let keys = vec!["a".to_string()];
        assert!(validate_assessments(&keys, vec![raw("a", "probably fine")], true).is_err());
        let mut over = raw("a", "compliant");
        over.confidence = Some(1.5);
        assert!(validate_assessments(&keys, vec![over], true).is_err());
    }

    #[test]
    fn test_lenient_validation_repairs() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let mut over = raw("a", "weird");
        over.confidence = Some(3.0);
        let result = validate_assessments(&keys, vec![over, raw("ghost", "compliant"), raw("a", "compliant")], false).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].status, ComplianceStatus::NeedsReview);
        assert_eq!(result[0].confidence, Some(1.0));
        assert_eq!(result[1].key, "b");
        assert_eq!(result[1].status, ComplianceStatus::NeedsReview);
    }
}
