//! Run state persistence
//!
//! Every transition is written to `<data_root>/<run_id>/run.json` (temp file
//! then rename) and mirrored in an in-memory cache. Without a root the store is
//! memory-only.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::domain::Run;
use crate::error::{AgentError, Result};
use crate::id::is_valid_run_id;

const RUN_FILE: &str = "run.json";

#[derive(Default)]
pub struct RunStore {
    root: Option<PathBuf>,
    cache: RwLock<HashMap<String, Run>>,
}

impl RunStore {
    /// Persist runs under `data_root`
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(data_root.into()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    fn run_path(&self, run_id: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(run_id).join(RUN_FILE))
    }

    /// Record the current state of a run
    pub fn save(&self, run: &Run) -> Result<()> {
        if let Some(path) = self.run_path(&run.id) {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(|e| AgentError::StorageWrite(format!("{}: {}", dir.display(), e)))?;
            }
            let tmp = path.with_extension("json.tmp");
            let json = serde_json::to_vec_pretty(run)?;
            fs::write(&tmp, json).map_err(|e| AgentError::StorageWrite(format!("{}: {}", tmp.display(), e)))?;
            fs::rename(&tmp, &path).map_err(|e| AgentError::StorageWrite(format!("{}: {}", path.display(), e)))?;
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|e| AgentError::StorageWrite(format!("run cache poisoned: {}", e)))?;
        cache.insert(run.id.clone(), run.clone());
        Ok(())
    }

    /// Load a run, from cache first, then from disk
    pub fn load(&self, run_id: &str) -> Result<Run> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|e| AgentError::StorageRead(format!("run cache poisoned: {}", e)))?;
            if let Some(run) = cache.get(run_id) {
                return Ok(run.clone());
            }
        }

        if !is_valid_run_id(run_id) {
            return Err(AgentError::NotFound(format!("run {}", run_id)));
        }
        let path = self
            .run_path(run_id)
            .filter(|p| p.exists())
            .ok_or_else(|| AgentError::NotFound(format!("run {}", run_id)))?;
        let content = fs::read(&path).map_err(|e| AgentError::StorageRead(format!("{}: {}", path.display(), e)))?;
        let run: Run = serde_json::from_slice(&content)
            .map_err(|e| AgentError::StorageRead(format!("corrupt run file {}: {}", path.display(), e)))?;
        Ok(run)
    }

    /// All runs with a persisted state, oldest first
    pub fn list(&self) -> Result<Vec<Run>> {
        let mut ids: Vec<String> = match &self.root {
            Some(root) if root.exists() => fs::read_dir(root)
                .map_err(|e| AgentError::StorageRead(format!("{}: {}", root.display(), e)))?
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().join(RUN_FILE).exists())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        {
            let cache = self
                .cache
                .read()
                .map_err(|e| AgentError::StorageRead(format!("run cache poisoned: {}", e)))?;
            ids.extend(cache.keys().cloned());
        }
        ids.sort();
        ids.dedup();

        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&id) {
                Ok(run) => runs.push(run),
                Err(e) => log::warn!("skipping unreadable run {}: {}", id, e),
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }
}
