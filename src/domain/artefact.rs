//! Artefact roles and references
//!
//! An artefact is an immutable blob tied to a run and a logical role.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Logical role of an artefact within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtefactRole {
    RawContract,
    RawInvoice,
    ContractRecord,
    InvoiceRecord,
    CleanYaml,
    Comparison,
    RiskBrief,
    Translation,
}

/// How a generated artefact is encoded on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtefactFormat {
    /// Original upload bytes, stored under the uploaded filename
    Raw,
    Yaml,
    Markdown,
}

impl ArtefactFormat {
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ArtefactFormat::Raw => None,
            ArtefactFormat::Yaml => Some("yaml"),
            ArtefactFormat::Markdown => Some("md"),
        }
    }
}

impl ArtefactRole {
    pub const ALL: [ArtefactRole; 8] = [
        ArtefactRole::RawContract,
        ArtefactRole::RawInvoice,
        ArtefactRole::ContractRecord,
        ArtefactRole::InvoiceRecord,
        ArtefactRole::CleanYaml,
        ArtefactRole::Comparison,
        ArtefactRole::RiskBrief,
        ArtefactRole::Translation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtefactRole::RawContract => "raw-contract",
            ArtefactRole::RawInvoice => "raw-invoice",
            ArtefactRole::ContractRecord => "contract-record",
            ArtefactRole::InvoiceRecord => "invoice-record",
            ArtefactRole::CleanYaml => "clean-yaml",
            ArtefactRole::Comparison => "comparison",
            ArtefactRole::RiskBrief => "risk-brief",
            ArtefactRole::Translation => "translation",
        }
    }

    pub fn format(&self) -> ArtefactFormat {
        match self {
            ArtefactRole::RawContract | ArtefactRole::RawInvoice => ArtefactFormat::Raw,
            ArtefactRole::ContractRecord
            | ArtefactRole::InvoiceRecord
            | ArtefactRole::CleanYaml
            | ArtefactRole::Comparison => ArtefactFormat::Yaml,
            ArtefactRole::RiskBrief | ArtefactRole::Translation => ArtefactFormat::Markdown,
        }
    }

    /// Raw uploads live under the artefact root, everything else under the data root
    pub fn is_raw(&self) -> bool {
        self.format() == ArtefactFormat::Raw
    }

    /// File name for a generated artefact (`<role>.<ext>`); None for raw uploads
    pub fn file_name(&self) -> Option<String> {
        self.format()
            .extension()
            .map(|ext| format!("{}.{}", self.as_str(), ext))
    }
}

impl std::fmt::Display for ArtefactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtefactRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtefactRole::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown artefact role '{}'", s))
    }
}

/// A persisted artefact as recorded in the run manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtefactRef {
    pub run_id: String,
    pub role: ArtefactRole,
    pub path: PathBuf,
    pub version: u32,
    /// SHA-256 of the payload, hex encoded
    pub sha256: String,
    pub bytes: u64,
    pub created_at: i64,
}
