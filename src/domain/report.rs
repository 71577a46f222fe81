//! Stage payloads: cleaned summaries and the discrepancy report

use serde::{Deserialize, Serialize};

/// A normalized line item. `key` is what the comparison matches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanLineItem {
    pub key: String,
    pub description: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
    pub currency: Option<String>,
    pub reference: Option<String>,
}

/// A contract clause picked out of the free text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub reference: String,
    pub text: String,
}

/// Canonical form of one extracted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanSummary {
    pub source_file: String,
    /// Document-level currency, if any
    pub currency: Option<String>,
    pub line_items: Vec<CleanLineItem>,
    pub duplicates_removed: usize,
    #[serde(default)]
    pub clauses: Vec<Clause>,
}

/// Output of the clean stage: both sides, cleaned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedBundle {
    pub contract: CleanSummary,
    pub invoice: CleanSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    QuantityMismatch,
    PriceMismatch,
    CurrencyMismatch,
    MissingOnInvoice,
    MissingInContract,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedItem {
    pub key: String,
    pub description: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub currency: Option<String>,
}

/// One difference between the contract and the invoice. A key may carry
/// several discrepancies (e.g. quantity and price both off).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub key: String,
    pub kind: DiscrepancyKind,
    pub description: String,
    pub contract: Option<CleanLineItem>,
    pub invoice: Option<CleanLineItem>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    NeedsReview,
}

/// Model judgement for one compared key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub key: String,
    pub status: ComplianceStatus,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Output of the compare stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub matched: Vec<MatchedItem>,
    pub discrepancies: Vec<Discrepancy>,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
}

impl ComparisonReport {
    /// Every compared key, matched first, each once, in report order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        let all = self
            .matched
            .iter()
            .map(|m| m.key.as_str())
            .chain(self.discrepancies.iter().map(|d| d.key.as_str()));
        for key in all {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}
