//! Extracted document records
//!
//! An `ExtractedRecord` is what an extraction adapter hands to the workflow:
//! line items plus free-text segments, immutable from then on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which side of the comparison a document sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Contract,
    Invoice,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Contract => "contract",
            DocumentKind::Invoice => "invoice",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billable (or contracted) line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,

    #[serde(default)]
    pub quantity: Option<f64>,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub unit_price: Option<f64>,

    #[serde(default)]
    pub currency: Option<String>,

    /// Clause number, invoice line number or SKU, if the source carries one
    #[serde(default)]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl LineItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            quantity: None,
            unit: None,
            unit_price: None,
            currency: None,
            reference: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_quantity(mut self, quantity: f64, unit: impl Into<String>) -> Self {
        self.quantity = Some(quantity);
        self.unit = Some(unit.into());
        self
    }

    pub fn with_price(mut self, unit_price: f64, currency: impl Into<String>) -> Self {
        self.unit_price = Some(unit_price);
        self.currency = Some(currency.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Structured representation of one source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub kind: DocumentKind,

    pub source_file: String,

    #[serde(default)]
    pub line_items: Vec<LineItem>,

    /// Document-level fields (parties, dates, default currency, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Free-text segments in reading order
    #[serde(default)]
    pub text: Vec<String>,
}

impl ExtractedRecord {
    pub fn new(kind: DocumentKind, source_file: impl Into<String>) -> Self {
        Self {
            kind,
            source_file: source_file.into(),
            line_items: Vec::new(),
            metadata: BTreeMap::new(),
            text: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    pub fn with_text(mut self, segment: impl Into<String>) -> Self {
        self.text.push(segment.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// First `limit` non-empty text segments, trimmed
    pub fn preview(&self, limit: usize) -> Vec<&str> {
        self.text
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_kind_serialization() {
        assert_eq!(serde_json::to_string(&DocumentKind::Contract).unwrap(), "\"contract\"");
        assert_eq!(serde_json::to_string(&DocumentKind::Invoice).unwrap(), "\"invoice\"");
    }

    #[test]
    fn test_record_from_minimal_yaml() {
        let yaml = r#"
kind: invoice
source_file: inv-42.xlsx
line_items:
  - description: Consulting
    quantity: 10
    unit: hours
    unit_price: 120.0
    currency: eur
"#;
        let record: ExtractedRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(record.kind, DocumentKind::Invoice);
        assert_eq!(record.line_items.len(), 1);
        assert_eq!(record.line_items[0].quantity, Some(10.0));
        assert!(record.metadata.is_empty());
        assert!(record.text.is_empty());
    }

    #[test]
    fn test_preview_skips_blank_segments() {
        let record = ExtractedRecord::new(DocumentKind::Contract, "c.pdf")
            .with_text("  ")
            .with_text(" 1. Scope ")
            .with_text("2. Fees")
            .with_text("3. Term");
        assert_eq!(record.preview(2), vec!["1. Scope", "2. Fees"]);
    }

    #[test]
    fn test_line_item_builder() {
        let item = LineItem::new("Licence")
            .with_quantity(5.0, "pcs")
            .with_price(99.5, "USD")
            .with_reference("4.2");
        assert_eq!(item.unit.as_deref(), Some("pcs"));
        assert_eq!(item.currency.as_deref(), Some("USD"));
        assert_eq!(item.reference.as_deref(), Some("4.2"));
    }
}
