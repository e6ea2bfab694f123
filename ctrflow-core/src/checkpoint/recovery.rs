use super::*;

use crate::error::PipelineError;

/// A completed checkpoint loaded back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredCheckpoint {
    pub metadata: CheckpointMetadata,
    pub task_states: HashMap<TaskId, Vec<u8>>,
}

impl RestoredCheckpoint {
    pub fn checkpoint_id(&self) -> CheckpointId {
        self.metadata.checkpoint_id
    }

    pub fn task_state(&self, task_id: TaskId) -> Result<&[u8]> {
        self.task_states
            .get(&task_id)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                anyhow!(
                    "checkpoint {} has no state for task {}",
                    self.metadata.checkpoint_id,
                    task_id
                )
            })
    }
}

/// Find the newest checkpoint that can be restored into a job made of
/// `expected_tasks`.
///
/// Checkpoints are tried newest first; one whose metadata or task states
/// cannot be read, whose task set differs, or that `validate` rejects is
/// skipped in favour of the next older one. Returns `Ok(None)` when storage
/// holds no checkpoint, and [`PipelineError::RecoveryFailure`] when it holds
/// checkpoints but none is usable.
pub fn recover_latest(
    storage: &dyn CheckpointStorage,
    expected_tasks: &[TaskId],
    validate: impl Fn(&RestoredCheckpoint) -> Result<()>,
) -> Result<Option<RestoredCheckpoint>> {
    let ids = storage.checkpoint_ids()?;
    if ids.is_empty() {
        return Ok(None);
    }

    let mut expected: Vec<TaskId> = expected_tasks.to_vec();
    expected.sort_by_key(|t| (t.vertex_id.0, t.subtask_index));

    for &checkpoint_id in ids.iter().rev() {
        match load_checkpoint(storage, checkpoint_id, &expected) {
            Ok(restored) => match validate(&restored) {
                Ok(()) => {
                    info!(checkpoint_id, "restoring from checkpoint");
                    return Ok(Some(restored));
                }
                Err(err) => {
                    warn!(checkpoint_id, error = %err, "checkpoint state rejected, trying older one");
                }
            },
            Err(err) => {
                warn!(checkpoint_id, error = %err, "checkpoint unreadable, trying older one");
            }
        }
    }

    Err(PipelineError::RecoveryFailure(format!(
        "none of the {} checkpoints in storage can be restored",
        ids.len()
    ))
    .into())
}

fn load_checkpoint(
    storage: &dyn CheckpointStorage,
    checkpoint_id: CheckpointId,
    expected: &[TaskId],
) -> Result<RestoredCheckpoint> {
    let metadata = storage.read_metadata(checkpoint_id)?;
    let mut task_ids = metadata.task_ids.clone();
    task_ids.sort_by_key(|t| (t.vertex_id.0, t.subtask_index));
    if task_ids != expected {
        return Err(anyhow!(
            "checkpoint {} was taken with {} tasks, job has {}",
            checkpoint_id,
            task_ids.len(),
            expected.len()
        ));
    }

    let mut task_states = HashMap::with_capacity(task_ids.len());
    for task_id in task_ids {
        let state = storage
            .read_task_state(checkpoint_id, task_id)
            .with_context(|| format!("state of task {task_id} missing"))?;
        task_states.insert(task_id, state);
    }
    Ok(RestoredCheckpoint {
        metadata,
        task_states,
    })
}
