//! Extraction adapters
//!
//! Turning PDFs and spreadsheets into records happens outside this crate. An
//! `Extractor` hands the workflow an `ExtractedRecord` per document; the
//! shipped `RecordFileExtractor` reads records that were already extracted to
//! YAML or JSON.

use std::fs;
use std::path::Path;

use crate::domain::{DocumentKind, ExtractedRecord};
use crate::error::{AgentError, Result};

/// An uploaded document: original file name plus content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a document from disk. An unreadable file is an extraction failure.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| AgentError::Extraction(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AgentError::Extraction(format!("{} has no file name", path.display())))?
            .to_string();
        Ok(Self { file_name, bytes })
    }

    /// Present means a name and at least one byte
    pub fn is_present(&self) -> bool {
        !self.file_name.trim().is_empty() && !self.bytes.is_empty()
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Converts a raw document into a structured record
pub trait Extractor: Send + Sync {
    fn extract_contract(&self, document: &SourceDocument) -> Result<ExtractedRecord>;

    fn extract_invoice(&self, document: &SourceDocument) -> Result<ExtractedRecord>;
}

/// Reads `ExtractedRecord`s serialized as YAML or JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFileExtractor;

impl RecordFileExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract(&self, document: &SourceDocument, expected: DocumentKind) -> Result<ExtractedRecord> {
        if !document.is_present() {
            return Err(AgentError::Extraction(format!("{} document is empty", expected)));
        }

        let text = std::str::from_utf8(&document.bytes)
            .map_err(|_| AgentError::Extraction(format!("{} is not a UTF-8 record file", document.file_name)))?;

        let mut value: serde_yaml::Value = match document.extension().as_deref() {
            Some("json") => serde_json::from_str::<serde_json::Value>(text)
                .map_err(|e| AgentError::Extraction(format!("{}: {}", document.file_name, e)))
                .and_then(|v| serde_yaml::to_value(v).map_err(AgentError::from))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(text)
                .map_err(|e| AgentError::Extraction(format!("{}: {}", document.file_name, e)))?,
            _ => {
                return Err(AgentError::Extraction(format!(
                    "{}: unsupported document type (expected an extracted .yaml, .yml or .json record)",
                    document.file_name
                )));
            }
        };

        let mapping = value
            .as_mapping_mut()
            .ok_or_else(|| AgentError::Extraction(format!("{}: record must be a mapping", document.file_name)))?;
        // kind and source_file may be left out of hand-written record files
        if !mapping.contains_key("kind") {
            mapping.insert("kind".into(), expected.as_str().into());
        }
        if !mapping.contains_key("source_file") {
            mapping.insert("source_file".into(), document.file_name.clone().into());
        }

        let record: ExtractedRecord = serde_yaml::from_value(value)
            .map_err(|e| AgentError::Extraction(format!("{}: {}", document.file_name, e)))?;

        if record.kind != expected {
            return Err(AgentError::Extraction(format!(
                "{} is a {} record, expected {}",
                document.file_name, record.kind, expected
            )));
        }
        if record.line_items.is_empty() && record.text.is_empty() {
            return Err(AgentError::Extraction(format!(
                "{} contains neither line items nor text",
                document.file_name
            )));
        }

        log::debug!(
            "extracted {} from {}: {} line items, {} text segments",
            expected,
            document.file_name,
            record.line_items.len(),
            record.text.len()
        );
        Ok(record)
    }
}

impl Extractor for RecordFileExtractor {
    fn extract_contract(&self, document: &SourceDocument) -> Result<ExtractedRecord> {
        self.extract(document, DocumentKind::Contract)
    }

    fn extract_invoice(&self, document: &SourceDocument) -> Result<ExtractedRecord> {
        self.extract(document, DocumentKind::Invoice)
    }
}
