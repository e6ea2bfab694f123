use super::*;

/// Persisted checkpoint metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointMetadata {
    pub checkpoint_id: CheckpointId,
    /// Wall-clock trigger time in milliseconds since the epoch.
    pub timestamp: EventTime,
    /// Combined input watermark when the barrier was injected.
    pub watermark: EventTime,
    pub task_ids: Vec<TaskId>,
}
