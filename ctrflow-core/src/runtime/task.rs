//! Task execution model.
//!
//! Every parallel stage runs as a [`Task`] on its own thread: a
//! single-threaded event loop that owns its operator and state.
//!
//! ```text
//! loop {
//!     (channel, element) = input_gate.next()       // fair selection
//!     barrier_aligner.process_element(channel, element)
//!     match element {
//!         Record    => operator.process()      -> output_gate.emit_partitioned()
//!         Watermark => tracker.advance()       -> operator.on_watermark() -> broadcast
//!         Barrier   => operator.snapshot_state() -> ack -> broadcast
//!         End       => operator.on_end()       -> broadcast End
//!     }
//! }
//! ```

use super::*;

/// Unique identifier for a Task instance.
///
/// Format: `vertex_{vertex_id}_{subtask_index}`, e.g. `vertex_1_0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub vertex_id: VertexId,
    pub subtask_index: usize,
}

impl TaskId {
    pub fn new(vertex_id: VertexId, subtask_index: usize) -> Self {
        Self {
            vertex_id,
            subtask_index,
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vertex_{}_{}", self.vertex_id.0, self.subtask_index)
    }
}

/// Identifier of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub u32);

impl VertexId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

pub const SOURCE_VERTEX: VertexId = VertexId(0);
pub const JOIN_VERTEX: VertexId = VertexId(1);
pub const AGGREGATE_VERTEX: VertexId = VertexId(2);
pub const SINK_VERTEX: VertexId = VertexId(3);

/// The tasks of a job with the given parallelism, in topological order.
pub fn job_task_ids(parallelism: usize) -> Vec<TaskId> {
    let mut tasks = vec![TaskId::new(SOURCE_VERTEX, 0)];
    tasks.extend((0..parallelism).map(|i| TaskId::new(JOIN_VERTEX, i)));
    tasks.extend((0..parallelism).map(|i| TaskId::new(AGGREGATE_VERTEX, i)));
    tasks.push(TaskId::new(SINK_VERTEX, 0));
    tasks
}

/// The stateful logic a [`Task`] drives.
pub trait TaskOperator: Send {
    type In: Send;
    type Out: Send + Clone;

    fn process(&mut self, record: Self::In, out: &mut Vec<Self::Out>) -> Result<()>;

    /// Event time reached `watermark` on every input. Returns the watermark
    /// to forward downstream, if any.
    fn on_watermark(
        &mut self,
        watermark: EventTime,
        out: &mut Vec<Self::Out>,
    ) -> Result<Option<EventTime>>;

    /// Serialize the operator state. Called once the checkpoint barrier has
    /// arrived on every input, before the barrier is forwarded.
    fn snapshot_state(&mut self) -> Result<Vec<u8>>;

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()>;

    /// Every input ended.
    fn on_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn metrics(&self) -> JobMetrics;
}

/// Checkpointed state of one task: its operator plus its input watermarks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub operator: Vec<u8>,
    pub watermarks: WatermarkTracker,
}

impl TaskSnapshot {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("deserialize task snapshot failed")
    }
}

/// Single-threaded execution unit: reads its inputs, drives one operator,
/// and routes the operator's output.
pub struct Task<Op: TaskOperator> {
    task_id: TaskId,
    input_gate: InputGate<Op::In>,
    output_gate: OutputGate<Op::Out>,
    partitioner: Option<Arc<dyn Partitioner<Op::Out>>>,
    operator: Op,
    watermark_tracker: WatermarkTracker,
    checkpoint_event_sender: Option<Sender<TaskCheckpointEvent>>,
    barrier_aligner: Option<BarrierAligner<Op::In>>,
    output_batch: Vec<Op::Out>,
}

impl<Op: TaskOperator> Task<Op> {
    pub fn new(
        task_id: TaskId,
        input_gate: InputGate<Op::In>,
        output_gate: OutputGate<Op::Out>,
        operator: Op,
    ) -> Self {
        let watermark_tracker = WatermarkTracker::new(input_gate.num_channels());
        Self {
            task_id,
            input_gate,
            output_gate,
            partitioner: None,
            operator,
            watermark_tracker,
            checkpoint_event_sender: None,
            barrier_aligner: None,
            output_batch: Vec::new(),
        }
    }

    /// Route output records with `partitioner`.
    pub fn with_partitioner(mut self, partitioner: Arc<dyn Partitioner<Op::Out>>) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    /// Enable checkpoint handling for this task.
    ///
    /// - `checkpoint_event_sender`: ack channel (Task -> Coordinator)
    /// - `max_align_buffer_size`: max held-back elements during barrier alignment
    pub fn with_checkpointing(
        mut self,
        checkpoint_event_sender: Sender<TaskCheckpointEvent>,
        max_align_buffer_size: usize,
    ) -> Self {
        self.checkpoint_event_sender = Some(checkpoint_event_sender);
        self.barrier_aligner = Some(
            BarrierAligner::new(self.input_gate.num_channels())
                .with_max_buffer_size(max_align_buffer_size),
        );
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn operator(&self) -> &Op {
        &self.operator
    }

    /// Restore operator state and input watermarks from a checkpoint.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let snapshot = TaskSnapshot::decode(bytes)?;
        if snapshot.watermarks.num_channels() != self.input_gate.num_channels() {
            bail!(
                "task {} has {} inputs, checkpoint has {}",
                self.task_id,
                self.input_gate.num_channels(),
                snapshot.watermarks.num_channels()
            );
        }
        self.operator.restore_state(&snapshot.operator)?;
        self.watermark_tracker = snapshot.watermarks;
        debug!(task = %self.task_id, "restored task state");
        Ok(())
    }

    /// Run the event loop until every input ended or an upstream task went
    /// away. Returns the operator's counters.
    pub fn run(mut self) -> Result<JobMetrics> {
        // Elements released by the aligner, processed before reading more input.
        let mut replay: VecDeque<(ChannelIndex, StreamElement<Op::In>)> = VecDeque::new();

        loop {
            let (channel_idx, element) = match replay.pop_front() {
                Some(next) => next,
                None => match self.input_gate.next()? {
                    Some(next) => next,
                    None => {
                        debug!(task = %self.task_id, "upstream disconnected, stopping");
                        return Ok(self.operator.metrics());
                    }
                },
            };

            let element = match self.barrier_aligner.as_mut() {
                None => element,
                Some(aligner) => match aligner.process_element(channel_idx, element)? {
                    BarrierAlignResult::Forward(element) => element,
                    BarrierAlignResult::Buffering => continue,
                    BarrierAlignResult::Aligned { barrier, buffered } => {
                        self.handle_aligned_checkpoint(barrier)?;
                        prepend(&mut replay, buffered);
                        continue;
                    }
                    BarrierAlignResult::Aborted {
                        checkpoint_id,
                        drained,
                    } => {
                        self.report_aborted_checkpoint(checkpoint_id)?;
                        prepend(&mut replay, drained);
                        continue;
                    }
                },
            };

            if self.process_element(channel_idx, element)? {
                break;
            }
        }

        debug!(task = %self.task_id, "all inputs ended");
        Ok(self.operator.metrics())
    }

    fn process_element(
        &mut self,
        channel_idx: ChannelIndex,
        element: StreamElement<Op::In>,
    ) -> Result<bool> {
        match element {
            StreamElement::Record(record) => {
                self.output_batch.clear();
                self.operator.process(record, &mut self.output_batch)?;
                self.emit_batch()?;
            }
            StreamElement::Watermark(wm) => {
                if let Some(aligned) = self.watermark_tracker.advance(channel_idx, wm) {
                    self.output_batch.clear();
                    let forward = self
                        .operator
                        .on_watermark(aligned.timestamp, &mut self.output_batch)?;
                    // Records finalized by this watermark precede it downstream.
                    self.emit_batch()?;
                    if let Some(ts) = forward {
                        self.output_gate.broadcast(StreamElement::watermark(ts))?;
                    }
                }
            }
            StreamElement::CheckpointBarrier(barrier) => {
                // Only reached without an aligner.
                self.handle_aligned_checkpoint(barrier)?;
            }
            StreamElement::End => {
                self.operator.on_end()?;
                self.output_gate.broadcast(StreamElement::End)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn emit_batch(&mut self) -> Result<()> {
        if self.output_batch.is_empty() {
            return Ok(());
        }
        let partitioner = self
            .partitioner
            .as_ref()
            .ok_or_else(|| anyhow!("task {} produced output but has no partitioner", self.task_id))?;
        for record in self.output_batch.drain(..) {
            self.output_gate.emit_partitioned(record, partitioner.as_ref())?;
        }
        Ok(())
    }

    fn handle_aligned_checkpoint(&mut self, barrier: Barrier) -> Result<()> {
        let snapshot = TaskSnapshot {
            operator: self.operator.snapshot_state()?,
            watermarks: self.watermark_tracker.clone(),
        };
        let state = bincode::serialize(&snapshot).context("serialize task snapshot failed")?;
        if let Some(sender) = &self.checkpoint_event_sender {
            sender
                .send(TaskCheckpointEvent::Ack(TaskCheckpointAck {
                    checkpoint_id: barrier.checkpoint_id,
                    task_id: self.task_id,
                    state,
                }))
                .map_err(|_| anyhow!("checkpoint coordinator disconnected"))?;
        }
        debug!(task = %self.task_id, checkpoint_id = barrier.checkpoint_id, "acknowledged checkpoint");
        self.output_gate
            .broadcast(StreamElement::CheckpointBarrier(barrier))
    }

    fn report_aborted_checkpoint(&self, checkpoint_id: CheckpointId) -> Result<()> {
        warn!(task = %self.task_id, checkpoint_id, "barrier alignment abandoned");
        if let Some(sender) = &self.checkpoint_event_sender {
            sender
                .send(TaskCheckpointEvent::Aborted(TaskCheckpointAbort {
                    checkpoint_id,
                    task_id: self.task_id,
                    reason: "barrier alignment abandoned".to_string(),
                }))
                .map_err(|_| anyhow!("checkpoint coordinator disconnected"))?;
        }
        Ok(())
    }
}

/// Put `elements` in front of `queue`, keeping their order.
fn prepend<T>(queue: &mut VecDeque<T>, elements: Vec<T>) {
    for element in elements.into_iter().rev() {
        queue.push_front(element);
    }
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;
