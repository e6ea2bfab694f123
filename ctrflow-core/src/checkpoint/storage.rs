use super::*;

use std::collections::BTreeMap;

/// Where completed checkpoints live.
///
/// A checkpoint is stored in one call, after every task acknowledged it, and
/// must not become visible to [`checkpoint_ids`](Self::checkpoint_ids) until
/// all of it is written.
pub trait CheckpointStorage: Send + Sync {
    fn store(
        &self,
        metadata: &CheckpointMetadata,
        task_states: &HashMap<TaskId, Vec<u8>>,
    ) -> Result<()>;

    fn read_metadata(&self, checkpoint_id: CheckpointId) -> Result<CheckpointMetadata>;

    fn read_task_state(&self, checkpoint_id: CheckpointId, task_id: TaskId) -> Result<Vec<u8>>;

    /// Stored checkpoints, oldest first.
    fn checkpoint_ids(&self) -> Result<Vec<CheckpointId>>;

    /// Drop all but the newest `retain` checkpoints.
    fn retain_latest(&self, retain: usize) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    metadata: CheckpointMetadata,
    task_states: HashMap<TaskId, Vec<u8>>,
}

/// Checkpoints kept in process memory. They survive a job restart within
/// the process but not the process itself.
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<BTreeMap<CheckpointId, StoredCheckpoint>>,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_checkpoints<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<CheckpointId, StoredCheckpoint>) -> R,
    ) -> Result<R> {
        let mut guard = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint storage lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn store(
        &self,
        metadata: &CheckpointMetadata,
        task_states: &HashMap<TaskId, Vec<u8>>,
    ) -> Result<()> {
        let stored = StoredCheckpoint {
            metadata: metadata.clone(),
            task_states: task_states.clone(),
        };
        self.with_checkpoints(|checkpoints| {
            checkpoints.insert(metadata.checkpoint_id, stored);
        })
    }

    fn read_metadata(&self, checkpoint_id: CheckpointId) -> Result<CheckpointMetadata> {
        self.with_checkpoints(|checkpoints| {
            checkpoints.get(&checkpoint_id).map(|c| c.metadata.clone())
        })?
        .ok_or_else(|| anyhow!("checkpoint {checkpoint_id} not found"))
    }

    fn read_task_state(&self, checkpoint_id: CheckpointId, task_id: TaskId) -> Result<Vec<u8>> {
        self.with_checkpoints(|checkpoints| {
            checkpoints
                .get(&checkpoint_id)
                .and_then(|c| c.task_states.get(&task_id).cloned())
        })?
        .ok_or_else(|| anyhow!("checkpoint {checkpoint_id} holds no state for task {task_id}"))
    }

    fn checkpoint_ids(&self) -> Result<Vec<CheckpointId>> {
        self.with_checkpoints(|checkpoints| checkpoints.keys().copied().collect())
    }

    fn retain_latest(&self, retain: usize) -> Result<()> {
        self.with_checkpoints(|checkpoints| {
            while checkpoints.len() > retain {
                checkpoints.pop_first();
            }
        })
    }
}

const CHECKPOINT_DIR_PREFIX: &str = "checkpoint-";
const STAGING_SUFFIX: &str = ".inprogress";
const METADATA_FILE: &str = "_metadata";

/// Checkpoints on the local file system, one directory per checkpoint:
///
/// ```text
/// <base>/checkpoint-7/_metadata
/// <base>/checkpoint-7/vertex_0_0.state
/// <base>/checkpoint-7/vertex_1_0.state
/// ```
///
/// A checkpoint is written into `checkpoint-<id>.inprogress` and renamed into
/// place once complete, so a crash mid-write never leaves a listed
/// checkpoint behind.
pub struct FsCheckpointStorage {
    base_path: PathBuf,
}

impl FsCheckpointStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!("failed to create checkpoint directory {}", base_path.display())
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory of a completed checkpoint.
    pub fn checkpoint_dir(&self, checkpoint_id: CheckpointId) -> PathBuf {
        self.base_path
            .join(format!("{CHECKPOINT_DIR_PREFIX}{checkpoint_id}"))
    }

    fn staging_dir(&self, checkpoint_id: CheckpointId) -> PathBuf {
        self.base_path
            .join(format!("{CHECKPOINT_DIR_PREFIX}{checkpoint_id}{STAGING_SUFFIX}"))
    }

    fn task_file(task_id: TaskId) -> String {
        format!("{task_id}.state")
    }
}

impl CheckpointStorage for FsCheckpointStorage {
    fn store(
        &self,
        metadata: &CheckpointMetadata,
        task_states: &HashMap<TaskId, Vec<u8>>,
    ) -> Result<()> {
        let checkpoint_id = metadata.checkpoint_id;
        let staging = self.staging_dir(checkpoint_id);
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("failed to clear {}", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;

        for (task_id, state) in task_states {
            let path = staging.join(Self::task_file(*task_id));
            fs::write(&path, state)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        let bytes = bincode::serialize(metadata).context("serialize checkpoint metadata failed")?;
        let path = staging.join(METADATA_FILE);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;

        let target = self.checkpoint_dir(checkpoint_id);
        if target.exists() {
            fs::remove_dir_all(&target)
                .with_context(|| format!("failed to replace {}", target.display()))?;
        }
        fs::rename(&staging, &target).with_context(|| {
            format!("failed to move {} to {}", staging.display(), target.display())
        })
    }

    fn read_metadata(&self, checkpoint_id: CheckpointId) -> Result<CheckpointMetadata> {
        let path = self.checkpoint_dir(checkpoint_id).join(METADATA_FILE);
        let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("corrupt checkpoint metadata in {}", path.display()))
    }

    fn read_task_state(&self, checkpoint_id: CheckpointId, task_id: TaskId) -> Result<Vec<u8>> {
        let path = self
            .checkpoint_dir(checkpoint_id)
            .join(Self::task_file(task_id));
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn checkpoint_ids(&self) -> Result<Vec<CheckpointId>> {
        let entries = fs::read_dir(&self.base_path)
            .with_context(|| format!("failed to list {}", self.base_path.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHECKPOINT_DIR_PREFIX))
                .and_then(|n| n.parse::<CheckpointId>().ok())
            else {
                continue;
            };
            if entry.path().join(METADATA_FILE).is_file() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn retain_latest(&self, retain: usize) -> Result<()> {
        let ids = self.checkpoint_ids()?;
        let excess = ids.len().saturating_sub(retain);
        for checkpoint_id in &ids[..excess] {
            let dir = self.checkpoint_dir(*checkpoint_id);
            debug!(checkpoint_id, dir = %dir.display(), "removing old checkpoint");
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
        }
        Ok(())
    }
}
