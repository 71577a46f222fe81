//! Persistence for artefacts and run state
//!
//! - `ArtefactStore`: append-only `(run_id, role) -> bytes` with a per-run manifest
//! - `FsArtefactStore`: filesystem implementation over two roots
//! - `MemoryArtefactStore`: in-memory implementation
//! - `RunStore`: `run.json` snapshots of run state

mod fs;
mod memory;
mod runs;
mod traits;

pub use fs::{FsArtefactStore, sanitize_file_name};
pub use memory::MemoryArtefactStore;
pub use runs::RunStore;
pub use traits::{ArtefactStore, digest};
