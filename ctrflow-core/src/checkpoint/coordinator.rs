use super::*;

/// Checkpoint awaiting acknowledgements.
#[derive(Debug)]
pub struct PendingCheckpoint {
    pub checkpoint_id: CheckpointId,
    pub timestamp: EventTime,
    pub watermark: EventTime,
    pub triggered_at: Instant,
    pub expected_tasks: HashSet<TaskId>,
    pub acknowledged_tasks: HashSet<TaskId>,
    pub task_states: HashMap<TaskId, Vec<u8>>,
}

/// Checkpoint coordinator for single-process mode.
///
/// Owned by the source driver. At most one checkpoint is pending at a time;
/// a checkpoint not completed within `timeout` is aborted.
pub struct CheckpointCoordinator {
    next_checkpoint_id: CheckpointId,
    pending: Option<PendingCheckpoint>,
    completed_checkpoints: VecDeque<CheckpointMetadata>,
    aborted_checkpoints: HashSet<CheckpointId>,
    checkpoint_storage: Arc<dyn CheckpointStorage>,
    retained_checkpoints: usize,
    timeout: Duration,
}

impl CheckpointCoordinator {
    pub fn new(checkpoint_storage: Arc<dyn CheckpointStorage>) -> Self {
        Self {
            next_checkpoint_id: 1,
            pending: None,
            completed_checkpoints: VecDeque::new(),
            aborted_checkpoints: HashSet::new(),
            checkpoint_storage,
            retained_checkpoints: 3,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_retained_checkpoints(mut self, retained_checkpoints: usize) -> Self {
        self.retained_checkpoints = retained_checkpoints.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Continue numbering after a restored checkpoint.
    pub fn with_next_checkpoint_id(mut self, next_checkpoint_id: CheckpointId) -> Self {
        self.next_checkpoint_id = next_checkpoint_id.max(1);
        self
    }

    pub fn trigger_checkpoint(
        &mut self,
        timestamp: EventTime,
        watermark: EventTime,
        expected_tasks: Vec<TaskId>,
    ) -> Result<Barrier> {
        if expected_tasks.is_empty() {
            return Err(anyhow!("expected_tasks must not be empty"));
        }
        if let Some(pending) = &self.pending {
            return Err(anyhow!(
                "checkpoint {} is still pending",
                pending.checkpoint_id
            ));
        }

        let checkpoint_id = self.next_checkpoint_id;
        self.next_checkpoint_id += 1;
        self.pending = Some(PendingCheckpoint {
            checkpoint_id,
            timestamp,
            watermark,
            triggered_at: Instant::now(),
            expected_tasks: expected_tasks.into_iter().collect(),
            acknowledged_tasks: HashSet::new(),
            task_states: HashMap::new(),
        });
        debug!(checkpoint_id, watermark, "triggered checkpoint");

        Ok(Barrier::with_timestamp(checkpoint_id, timestamp))
    }

    /// Record a task's acknowledgement. Returns `true` when this ack completed
    /// (and persisted) the checkpoint.
    pub fn acknowledge_checkpoint(&mut self, ack: TaskCheckpointAck) -> Result<bool> {
        if self.aborted_checkpoints.contains(&ack.checkpoint_id) {
            // Ignore late acks for aborted checkpoints.
            return Ok(false);
        }

        let pending = self
            .pending
            .as_mut()
            .filter(|p| p.checkpoint_id == ack.checkpoint_id)
            .ok_or_else(|| anyhow!("checkpoint {} is not pending", ack.checkpoint_id))?;

        if !pending.expected_tasks.contains(&ack.task_id) {
            return Err(anyhow!(
                "task {} is not expected for checkpoint {}",
                ack.task_id,
                ack.checkpoint_id
            ));
        }
        if pending.acknowledged_tasks.contains(&ack.task_id) {
            return Err(anyhow!(
                "duplicate ack from task {} for checkpoint {}",
                ack.task_id,
                ack.checkpoint_id
            ));
        }

        pending.acknowledged_tasks.insert(ack.task_id);
        pending.task_states.insert(ack.task_id, ack.state);

        if pending.acknowledged_tasks.len() != pending.expected_tasks.len() {
            return Ok(false);
        }

        let finished = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("checkpoint {} disappeared", ack.checkpoint_id))?;
        let checkpoint_id = finished.checkpoint_id;
        if let Err(err) = self.finalize_checkpoint(finished) {
            self.aborted_checkpoints.insert(checkpoint_id);
            return Err(err);
        }
        Ok(true)
    }

    /// Abandon the pending checkpoint if it is `checkpoint_id`.
    pub fn abort_checkpoint(&mut self, checkpoint_id: CheckpointId, reason: &str) -> bool {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.checkpoint_id == checkpoint_id)
        {
            self.pending = None;
            self.aborted_checkpoints.insert(checkpoint_id);
            warn!(checkpoint_id, reason, "checkpoint aborted");
            true
        } else {
            false
        }
    }

    /// Abort the pending checkpoint if it exceeded the timeout.
    pub fn abort_if_timed_out(&mut self, now: Instant) -> Option<CheckpointId> {
        let checkpoint_id = self
            .pending
            .as_ref()
            .filter(|p| now.saturating_duration_since(p.triggered_at) >= self.timeout)?
            .checkpoint_id;
        self.abort_checkpoint(checkpoint_id, "timed out");
        Some(checkpoint_id)
    }

    pub fn pending_checkpoint_id(&self) -> Option<CheckpointId> {
        self.pending.as_ref().map(|p| p.checkpoint_id)
    }

    /// Deadline of the pending checkpoint.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.triggered_at + self.timeout)
    }

    pub fn latest_completed(&self) -> Option<&CheckpointMetadata> {
        self.completed_checkpoints.back()
    }

    pub fn completed_checkpoint_ids(&self) -> Vec<CheckpointId> {
        self.completed_checkpoints
            .iter()
            .map(|m| m.checkpoint_id)
            .collect()
    }

    pub fn aborted_checkpoint_ids(&self) -> Vec<CheckpointId> {
        let mut ids: Vec<_> = self.aborted_checkpoints.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn finalize_checkpoint(&mut self, pending: PendingCheckpoint) -> Result<()> {
        let mut task_ids: Vec<TaskId> = pending.expected_tasks.iter().copied().collect();
        task_ids.sort_by_key(|t| (t.vertex_id.0, t.subtask_index));

        let metadata = CheckpointMetadata {
            checkpoint_id: pending.checkpoint_id,
            timestamp: pending.timestamp,
            watermark: pending.watermark,
            task_ids,
        };

        self.checkpoint_storage
            .store(&metadata, &pending.task_states)?;
        self.checkpoint_storage
            .retain_latest(self.retained_checkpoints)?;

        info!(
            checkpoint_id = metadata.checkpoint_id,
            watermark = metadata.watermark,
            tasks = metadata.task_ids.len(),
            "checkpoint completed"
        );
        self.completed_checkpoints.push_back(metadata);
        while self.completed_checkpoints.len() > self.retained_checkpoints {
            self.completed_checkpoints.pop_front();
        }
        Ok(())
    }
}
