//! Filesystem artefact store
//!
//! Layout:
//! - raw uploads: `<artefact_root>/<run_id>/<original-filename>`
//! - generated outputs: `<data_root>/<run_id>/<role>.<yaml|md>`
//! - manifest: `<data_root>/<run_id>/manifest.jsonl`, one `ArtefactRef` per line

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{ArtefactStore, digest};
use crate::domain::{ArtefactRef, ArtefactRole};
use crate::error::{AgentError, Result};
use crate::id::{is_valid_run_id, now_ms};

const MANIFEST_FILE: &str = "manifest.jsonl";

pub struct FsArtefactStore {
    data_root: PathBuf,
    artefact_root: PathBuf,
    /// Serializes the check-write-append sequence of `put_named`
    write_lock: Mutex<()>,
}

impl FsArtefactStore {
    pub fn new(data_root: impl AsRef<Path>, artefact_root: impl AsRef<Path>) -> Result<Self> {
        let data_root = data_root.as_ref().to_path_buf();
        let artefact_root = artefact_root.as_ref().to_path_buf();
        fs::create_dir_all(&data_root).map_err(|e| write_error(&data_root, e))?;
        fs::create_dir_all(&artefact_root).map_err(|e| write_error(&artefact_root, e))?;
        Ok(Self {
            data_root,
            artefact_root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn artefact_root(&self) -> &Path {
        &self.artefact_root
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.data_root.join(run_id)
    }

    fn manifest_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(MANIFEST_FILE)
    }

    fn target_path(&self, run_id: &str, role: ArtefactRole, file_name: Option<&str>) -> Result<PathBuf> {
        if role.is_raw() {
            let name = file_name
                .and_then(sanitize_file_name)
                .ok_or_else(|| AgentError::StorageWrite(format!("{} needs an upload file name", role)))?;
            Ok(self.artefact_root.join(run_id).join(name))
        } else {
            let name = role
                .file_name()
                .ok_or_else(|| AgentError::StorageWrite(format!("{} has no generated file name", role)))?;
            Ok(self.run_dir(run_id).join(name))
        }
    }

    /// Location of a manifest entry under the current roots. The recorded
    /// path is informational; only its file name is used for raw uploads.
    fn stored_path(&self, entry: &ArtefactRef) -> Result<PathBuf> {
        let upload_name = entry.path.file_name().and_then(|n| n.to_str());
        self.target_path(&entry.run_id, entry.role, upload_name)
            .map_err(|e| AgentError::StorageRead(e.to_string()))
    }

    fn read_manifest(&self, run_id: &str) -> Result<Vec<ArtefactRef>> {
        let path = self.manifest_path(run_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AgentError::StorageRead(format!("{}: {}", path.display(), e))),
        };

        let mut refs = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| AgentError::StorageRead(format!("{}: {}", path.display(), e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ArtefactRef = serde_json::from_str(&line)
                .map_err(|e| AgentError::StorageRead(format!("corrupt manifest line in {}: {}", path.display(), e)))?;
            refs.push(entry);
        }
        Ok(refs)
    }

    fn append_manifest(&self, run_id: &str, entry: &ArtefactRef) -> Result<()> {
        let path = self.manifest_path(run_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_error(&path, e))?;
        writeln!(file, "{}", serde_json::to_string(entry)?).map_err(|e| write_error(&path, e))?;
        file.sync_data().map_err(|e| write_error(&path, e))?;
        Ok(())
    }
}

impl ArtefactStore for FsArtefactStore {
    fn put_named(&self, run_id: &str, role: ArtefactRole, file_name: Option<&str>, payload: &[u8]) -> Result<ArtefactRef> {
        if !is_valid_run_id(run_id) {
            return Err(AgentError::StorageWrite(format!("invalid run id '{}'", run_id)));
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| AgentError::StorageWrite(format!("store lock poisoned: {}", e)))?;

        if self.read_manifest(run_id)?.iter().any(|r| r.role == role) {
            return Err(AgentError::StorageWrite(format!(
                "artefact {} already exists for run {}",
                role, run_id
            )));
        }

        let path = self.target_path(run_id, role, file_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        }
        fs::create_dir_all(self.run_dir(run_id)).map_err(|e| write_error(&self.run_dir(run_id), e))?;

        write_new(&path, payload)?;

        let entry = ArtefactRef {
            run_id: run_id.to_string(),
            role,
            path,
            version: 1,
            sha256: digest(payload),
            bytes: payload.len() as u64,
            created_at: now_ms(),
        };
        if let Err(e) = self.append_manifest(run_id, &entry) {
            discard(&entry.path);
            return Err(e);
        }

        log::debug!("stored {} for run {} ({} bytes)", role, run_id, entry.bytes);
        Ok(entry)
    }

    fn get(&self, run_id: &str, role: ArtefactRole) -> Result<Vec<u8>> {
        let entry = self
            .read_manifest(run_id)?
            .into_iter()
            .find(|r| r.role == role)
            .ok_or_else(|| AgentError::NotFound(format!("artefact {} for run {}", role, run_id)))?;

        let path = self.stored_path(&entry)?;
        let payload = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AgentError::NotFound(format!("{} (listed in manifest)", path.display())),
            _ => AgentError::StorageRead(format!("{}: {}", path.display(), e)),
        })?;

        if digest(&payload) != entry.sha256 {
            return Err(AgentError::StorageRead(format!(
                "digest mismatch for {} of run {}",
                role, run_id
            )));
        }
        Ok(payload)
    }

    fn list(&self, run_id: &str) -> Result<Vec<ArtefactRef>> {
        self.read_manifest(run_id)
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.data_root)
            .map_err(|e| AgentError::StorageRead(format!("{}: {}", self.data_root.display(), e)))?;

        let mut runs: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_valid_run_id(name))
            .collect();
        runs.sort();
        Ok(runs)
    }
}

/// Reduce an uploaded name to its final path component
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let candidate = Path::new(name.trim()).file_name()?.to_str()?.trim();
    if candidate.is_empty() || candidate == MANIFEST_FILE || candidate.starts_with('.') {
        return None;
    }
    Some(candidate.to_string())
}

/// Write a file that must not exist yet. A file left by an earlier failed
/// write has no manifest entry (the caller checked), so it is replaced.
fn write_new(path: &Path, payload: &[u8]) -> Result<()> {
    let open = || OpenOptions::new().write(true).create_new(true).open(path);
    let mut file = match open() {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            log::warn!("replacing orphaned artefact file {}", path.display());
            fs::remove_file(path).map_err(|e| write_error(path, e))?;
            open().map_err(|e| write_error(path, e))?
        }
        Err(e) => return Err(write_error(path, e)),
    };

    if let Err(e) = file.write_all(payload).and_then(|_| file.sync_all()) {
        drop(file);
        discard(path);
        return Err(write_error(path, e));
    }
    Ok(())
}

/// Remove a partially written artefact file
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("could not remove partial artefact {}: {}", path.display(), e);
    }
}

fn write_error(path: &Path, err: std::io::Error) -> AgentError {
    AgentError::StorageWrite(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsArtefactStore) {
        let temp = TempDir::new().unwrap();
        let store = FsArtefactStore::new(temp.path().join("data"), temp.path().join("artefacts")).unwrap();
        (temp, store)
    }

    #[test]
    fn test_generated_artefact_layout() {
        let (temp, store) = store();
        let entry = store.put("run-1", ArtefactRole::CleanYaml, b"contract: {}\n").unwrap();
        assert_eq!(entry.path, temp.path().join("data/run-1/clean-yaml.yaml"));
        assert_eq!(entry.version, 1);
        assert_eq!(entry.bytes, 13);
        assert_eq!(store.get("run-1", ArtefactRole::CleanYaml).unwrap(), b"contract: {}\n");
    }

    #[test]
    fn test_raw_upload_keeps_file_name() {
        let (temp, store) = store();
        let entry = store
            .put_named("run-1", ArtefactRole::RawContract, Some("/tmp/in/contract.pdf"), b"%PDF")
            .unwrap();
        assert_eq!(entry.path, temp.path().join("artefacts/run-1/contract.pdf"));
        assert!(temp.path().join("data/run-1/manifest.jsonl").exists());
    }

    #[test]
    fn test_raw_upload_without_name_rejected() {
        let (_temp, store) = store();
        let err = store.put("run-1", ArtefactRole::RawInvoice, b"x").unwrap_err();
        assert!(matches!(err, AgentError::StorageWrite(_)));
    }

    #[test]
    fn test_put_never_overwrites() {
        let (_temp, store) = store();
        store.put("run-1", ArtefactRole::RiskBrief, b"# one").unwrap();
        let err = store.put("run-1", ArtefactRole::RiskBrief, b"# two").unwrap_err();
        assert!(matches!(err, AgentError::StorageWrite(_)));
        assert_eq!(store.get("run-1", ArtefactRole::RiskBrief).unwrap(), b"# one");
    }

    #[test]
    fn test_orphaned_file_does_not_block_put() {
        let (temp, store) = store();
        let run_dir = temp.path().join("data/run-1");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("risk-brief.md"), b"# parti").unwrap();

        store.put("run-1", ArtefactRole::RiskBrief, b"# Brief").unwrap();
        assert_eq!(store.get("run-1", ArtefactRole::RiskBrief).unwrap(), b"# Brief");
        assert_eq!(store.list("run-1").unwrap().len(), 1);
    }

    #[test]
    fn test_reads_follow_relocated_roots() {
        let (temp, store) = store();
        store
            .put_named("run-1", ArtefactRole::RawInvoice, Some("invoice.xlsx"), b"PK")
            .unwrap();
        store.put("run-1", ArtefactRole::Comparison, b"matched: []\n").unwrap();
        drop(store);

        let moved = temp.path().join("moved");
        fs::create_dir_all(&moved).unwrap();
        fs::rename(temp.path().join("data"), moved.join("data")).unwrap();
        fs::rename(temp.path().join("artefacts"), moved.join("artefacts")).unwrap();

        let store = FsArtefactStore::new(moved.join("data"), moved.join("artefacts")).unwrap();
        assert_eq!(store.get("run-1", ArtefactRole::RawInvoice).unwrap(), b"PK");
        assert_eq!(store.get("run-1", ArtefactRole::Comparison).unwrap(), b"matched: []\n");
    }

    #[test]
    fn test_list_in_write_order() {
        let (_temp, store) = store();
        store.put("run-1", ArtefactRole::Comparison, b"a").unwrap();
        store.put("run-1", ArtefactRole::CleanYaml, b"b").unwrap();
        store.put("run-1", ArtefactRole::Translation, b"c").unwrap();
        let roles: Vec<_> = store.list("run-1").unwrap().into_iter().map(|r| r.role).collect();
        assert_eq!(
            roles,
            vec![ArtefactRole::Comparison, ArtefactRole::CleanYaml, ArtefactRole::Translation]
        );
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_temp, store) = store();
        assert!(matches!(
            store.get("run-1", ArtefactRole::Translation),
            Err(AgentError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_detects_tampering() {
        let (_temp, store) = store();
        let entry = store.put("run-1", ArtefactRole::RiskBrief, b"# Brief").unwrap();
        fs::write(&entry.path, b"# Edited").unwrap();
        assert!(matches!(
            store.get("run-1", ArtefactRole::RiskBrief),
            Err(AgentError::StorageRead(_))
        ));
    }

    #[test]
    fn test_runs_are_isolated_and_listed() {
        let (_temp, store) = store();
        store.put("run-b", ArtefactRole::CleanYaml, b"b").unwrap();
        store.put("run-a", ArtefactRole::CleanYaml, b"a").unwrap();
        assert_eq!(store.get("run-a", ArtefactRole::CleanYaml).unwrap(), b"a");
        assert_eq!(store.list_runs().unwrap(), vec!["run-a", "run-b"]);
        assert!(store.contains("run-b", ArtefactRole::CleanYaml).unwrap());
        assert!(!store.contains("run-b", ArtefactRole::Comparison).unwrap());
    }

    #[test]
    fn test_invalid_run_id_rejected() {
        let (_temp, store) = store();
        assert!(store.put("../escape", ArtefactRole::CleanYaml, b"x").is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b/invoice.xlsx").as_deref(), Some("invoice.xlsx"));
        assert_eq!(sanitize_file_name("  contract.pdf ").as_deref(), Some("contract.pdf"));
        assert!(sanitize_file_name("").is_none());
        assert!(sanitize_file_name("..").is_none());
        assert!(sanitize_file_name(".hidden").is_none());
    }
}
