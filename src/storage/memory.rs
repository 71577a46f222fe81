//! In-memory artefact store for tests and dry runs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use super::traits::{ArtefactStore, digest};
use crate::domain::{ArtefactRef, ArtefactRole};
use crate::error::{AgentError, Result};
use crate::id::now_ms;

#[derive(Default)]
pub struct MemoryArtefactStore {
    runs: RwLock<BTreeMap<String, Vec<(ArtefactRef, Vec<u8>)>>>,
}

impl MemoryArtefactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of artefacts across all runs
    pub fn len(&self) -> usize {
        self.runs
            .read()
            .map(|runs| runs.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtefactStore for MemoryArtefactStore {
    fn put_named(&self, run_id: &str, role: ArtefactRole, file_name: Option<&str>, payload: &[u8]) -> Result<ArtefactRef> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| AgentError::StorageWrite(format!("store lock poisoned: {}", e)))?;
        let entries = runs.entry(run_id.to_string()).or_default();
        if entries.iter().any(|(r, _)| r.role == role) {
            return Err(AgentError::StorageWrite(format!(
                "artefact {} already exists for run {}",
                role, run_id
            )));
        }

        let name = match (role.file_name(), file_name) {
            (Some(generated), _) => generated,
            (None, Some(upload)) => upload.to_string(),
            (None, None) => return Err(AgentError::StorageWrite(format!("{} needs an upload file name", role))),
        };
        let entry = ArtefactRef {
            run_id: run_id.to_string(),
            role,
            path: PathBuf::from(run_id).join(name),
            version: 1,
            sha256: digest(payload),
            bytes: payload.len() as u64,
            created_at: now_ms(),
        };
        entries.push((entry.clone(), payload.to_vec()));
        Ok(entry)
    }

    fn get(&self, run_id: &str, role: ArtefactRole) -> Result<Vec<u8>> {
        let runs = self
            .runs
            .read()
            .map_err(|e| AgentError::StorageRead(format!("store lock poisoned: {}", e)))?;
        runs.get(run_id)
            .and_then(|entries| entries.iter().find(|(r, _)| r.role == role))
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| AgentError::NotFound(format!("artefact {} for run {}", role, run_id)))
    }

    fn list(&self, run_id: &str) -> Result<Vec<ArtefactRef>> {
        let runs = self
            .runs
            .read()
            .map_err(|e| AgentError::StorageRead(format!("store lock poisoned: {}", e)))?;
        Ok(runs
            .get(run_id)
            .map(|entries| entries.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default())
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        let runs = self
            .runs
            .read()
            .map_err(|e| AgentError::StorageRead(format!("store lock poisoned: {}", e)))?;
        Ok(runs.keys().cloned().collect())
    }
}
