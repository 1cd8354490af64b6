//! Projection checkpoint persistence.
//!
//! A checkpoint pairs serialized projection state with the per-stream
//! positions it reflects. Persisting it enables:
//! - Resume after crash (continue from the last saved positions)
//! - Deterministic rebuilds (discard the checkpoint and replay from 0)
//! - Transient projections (the no-op store keeps nothing)

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use streamfold_core::{EngineError, ProjectionName};
use streamfold_events::Checkpoint;

#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    #[error("checkpoint io failed: {0}")]
    Io(#[from] io::Error),

    #[error("checkpoint could not be decoded: {0}")]
    Corrupt(String),

    #[error("checkpoint backend failed: {0}")]
    Backend(String),
}

impl From<CheckpointStoreError> for EngineError {
    fn from(err: CheckpointStoreError) -> Self {
        match err {
            CheckpointStoreError::Corrupt(msg) => EngineError::corrupt(msg),
            other => EngineError::checkpoint(other.to_string()),
        }
    }
}

/// Durable home of projection checkpoints, keyed by projection name.
pub trait CheckpointStore: Send + Sync {
    /// Load the last saved checkpoint, if any.
    fn load(&self, projection: &ProjectionName) -> Result<Option<Checkpoint>, CheckpointStoreError>;

    /// Replace the checkpoint atomically: readers see the old one or the new one.
    fn save(&self, projection: &ProjectionName, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError>;

    /// Discard the checkpoint. Deleting a missing checkpoint succeeds.
    fn delete(&self, projection: &ProjectionName) -> Result<(), CheckpointStoreError>;
}

impl<C> CheckpointStore for Arc<C>
where
    C: CheckpointStore + ?Sized,
{
    fn load(&self, projection: &ProjectionName) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        (**self).load(projection)
    }

    fn save(&self, projection: &ProjectionName, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        (**self).save(projection, checkpoint)
    }

    fn delete(&self, projection: &ProjectionName) -> Result<(), CheckpointStoreError> {
        (**self).delete(projection)
    }
}

/// Store for transient projections: nothing is kept, every start replays from 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheckpointStore;

impl CheckpointStore for NoopCheckpointStore {
    fn load(&self, _projection: &ProjectionName) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        Ok(None)
    }

    fn save(&self, _projection: &ProjectionName, _checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        Ok(())
    }

    fn delete(&self, _projection: &ProjectionName) -> Result<(), CheckpointStoreError> {
        Ok(())
    }
}

/// In-memory checkpoint store for tests/dev. Survives instance restarts
/// within one process, which is enough to exercise crash recovery.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<ProjectionName, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, projection: &ProjectionName) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| CheckpointStoreError::Backend("lock poisoned".to_string()))?;
        Ok(map.get(projection).cloned())
    }

    fn save(&self, projection: &ProjectionName, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| CheckpointStoreError::Backend("lock poisoned".to_string()))?;
        map.insert(projection.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&self, projection: &ProjectionName) -> Result<(), CheckpointStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| CheckpointStoreError::Backend("lock poisoned".to_string()))?;
        map.remove(projection);
        Ok(())
    }
}

/// JSON checkpoint files, one per projection, in a single directory.
///
/// Saves write a temporary file and rename it over `<name>.checkpoint.json`,
/// so a crash mid-save leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates `dir` if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, projection: &ProjectionName) -> PathBuf {
        let file: String = projection
            .as_str()
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.dir.join(format!("{file}.checkpoint.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, projection: &ProjectionName) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        let path = self.path_for(projection);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| CheckpointStoreError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, projection: &ProjectionName, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        let path = self.path_for(projection);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CheckpointStoreError::Backend(format!("checkpoint serialization failed: {e}")))?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn delete(&self, projection: &ProjectionName) -> Result<(), CheckpointStoreError> {
        match std::fs::remove_file(self.path_for(projection)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
