use super::*;

/// How often a checkpoint wait re-checks whether a task died.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Checkpointed state of the source: read position plus the per-stream
/// watermark generators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub position: SourcePosition,
    pub watermarks: InputWatermarks,
}

impl SourceSnapshot {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("deserialize source snapshot failed")
    }
}

/// Result of one [`RunningJob::pump`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// This many events were read (late ones included).
    Pumped(usize),
    /// The source has nothing right now.
    Idle,
    /// Both streams are exhausted.
    Exhausted,
}

/// The source task. Runs on the thread that drives the job: reads events,
/// assigns watermarks, drops late events, routes the rest to the join tasks
/// and coordinates checkpoints.
pub(crate) struct SourceDriver {
    source: Box<dyn EventSource>,
    watermarks: InputWatermarks,
    output_gate: OutputGate<InputEvent>,
    partitioner: ImpressionKeyPartitioner,
    windows: TumblingEventTimeWindows,
    coordinator: CheckpointCoordinator,
    ack_receiver: Receiver<TaskCheckpointEvent>,
    expected_tasks: Vec<TaskId>,
    metrics: JobMetrics,
    /// Events whose time cannot be assigned a window.
    out_of_range: u64,
    exhausted: bool,
    closed: bool,
}

impl SourceDriver {
    pub(crate) fn new(
        source: Box<dyn EventSource>,
        watermarks: InputWatermarks,
        output_gate: OutputGate<InputEvent>,
        windows: TumblingEventTimeWindows,
        coordinator: CheckpointCoordinator,
        ack_receiver: Receiver<TaskCheckpointEvent>,
        expected_tasks: Vec<TaskId>,
    ) -> Self {
        Self {
            source,
            watermarks,
            output_gate,
            partitioner: ImpressionKeyPartitioner,
            windows,
            coordinator,
            ack_receiver,
            expected_tasks,
            metrics: JobMetrics::default(),
            out_of_range: 0,
            exhausted: false,
            closed: false,
        }
    }

    pub(crate) fn position(&self) -> SourcePosition {
        self.source.position()
    }

    /// Combined watermark of both input streams.
    pub(crate) fn watermark(&self) -> EventTime {
        self.watermarks.current_timestamp()
    }

    pub(crate) fn last_checkpoint(&self) -> Option<CheckpointId> {
        self.coordinator.latest_completed().map(|m| m.checkpoint_id)
    }

    pub(crate) fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    /// Read up to `max_events` events from the source.
    pub(crate) fn pump(&mut self, max_events: usize) -> Result<PumpStatus> {
        self.ensure_open()?;
        if self.exhausted {
            return Ok(PumpStatus::Exhausted);
        }

        let mut pumped = 0;
        while pumped < max_events {
            match self.source.poll()? {
                SourcePoll::Event(event) => {
                    self.route(event)?;
                    pumped += 1;
                }
                SourcePoll::Pending => break,
                SourcePoll::Exhausted => {
                    debug!(position = %self.source.position(), "source exhausted");
                    self.exhausted = true;
                    break;
                }
            }
        }
        self.metrics.malformed_records = self.source.malformed_records() + self.out_of_range;

        Ok(match pumped {
            0 if self.exhausted => PumpStatus::Exhausted,
            0 => PumpStatus::Idle,
            n => PumpStatus::Pumped(n),
        })
    }

    fn route(&mut self, event: InputEvent) -> Result<()> {
        let stream = event.stream();
        match stream {
            InputStream::Impressions => self.metrics.impressions_read += 1,
            InputStream::Clicks => self.metrics.clicks_read += 1,
        }

        if self.windows.assign_window(event.event_time()).is_none() {
            self.out_of_range += 1;
            warn!(
                %stream,
                event_time = event.event_time(),
                "dropping event outside the supported event-time range"
            );
            return Ok(());
        }

        match self.watermarks.observe(&event) {
            Admission::Late => {
                match stream {
                    InputStream::Impressions => self.metrics.late_impressions += 1,
                    InputStream::Clicks => self.metrics.late_clicks += 1,
                }
                debug!(
                    %stream,
                    event_time = event.event_time(),
                    watermark = self.watermarks.current_timestamp(),
                    "dropping late event"
                );
                Ok(())
            }
            Admission::Admitted(advanced) => {
                self.output_gate.emit_partitioned(event, &self.partitioner)?;
                match advanced {
                    Some(wm) => self
                        .output_gate
                        .broadcast(StreamElement::watermark(wm.timestamp)),
                    None => Ok(()),
                }
            }
        }
    }

    pub(crate) fn broadcast_watermark(&mut self, timestamp: EventTime) -> Result<()> {
        self.ensure_open()?;
        self.output_gate
            .broadcast(StreamElement::watermark(timestamp))
    }

    pub(crate) fn end_of_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.output_gate.broadcast(StreamElement::End)
    }

    /// Drop the channels to the join tasks. Tasks drain what is queued and exit.
    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.output_gate = OutputGate::new(Vec::new());
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("job is no longer running");
        }
        Ok(())
    }

    /// Take a checkpoint and wait until every task acknowledged it.
    ///
    /// A checkpoint that times out, is rejected, or is abandoned by a task
    /// fails with [`PipelineError::CheckpointFailure`]; the job can go on.
    /// Any other error means a task is gone. `task_exited` is polled while
    /// waiting so a dead task does not stall the wait until the timeout.
    pub(crate) fn checkpoint(&mut self, task_exited: impl Fn() -> bool) -> Result<CheckpointId> {
        self.ensure_open()?;
        let result = self.run_checkpoint(task_exited);
        match &result {
            Ok(_) => self.metrics.checkpoints_completed += 1,
            Err(err) if is_checkpoint_failure(err) => {
                self.metrics.checkpoints_failed += 1;
            }
            Err(_) => {}
        }
        result
    }

    fn run_checkpoint(&mut self, task_exited: impl Fn() -> bool) -> Result<CheckpointId> {
        let barrier = self
            .coordinator
            .trigger_checkpoint(
                current_unix_millis(),
                self.watermarks.current_timestamp(),
                self.expected_tasks.clone(),
            )
            .map_err(|err| {
                checkpoint_failure(
                    self.coordinator.pending_checkpoint_id().unwrap_or_default(),
                    err,
                )
            })?;
        let checkpoint_id = barrier.checkpoint_id;

        // The source acknowledges first: its position is exactly where the
        // barrier enters the stream.
        let snapshot = SourceSnapshot {
            position: self.source.position(),
            watermarks: self.watermarks.clone(),
        };
        let state = bincode::serialize(&snapshot).context("serialize source snapshot failed")?;
        self.coordinator
            .acknowledge_checkpoint(TaskCheckpointAck {
                checkpoint_id,
                task_id: TaskId::new(SOURCE_VERTEX, 0),
                state,
            })
            .map_err(|err| {
                self.coordinator.abort_checkpoint(checkpoint_id, "source snapshot rejected");
                checkpoint_failure(checkpoint_id, err)
            })?;

        if let Err(err) = self
            .output_gate
            .broadcast(StreamElement::CheckpointBarrier(barrier))
        {
            self.coordinator.abort_checkpoint(checkpoint_id, "barrier not delivered");
            return Err(err);
        }
        debug!(checkpoint_id, position = %snapshot.position, "injected checkpoint barrier");

        loop {
            match self.ack_receiver.recv_timeout(ACK_POLL_INTERVAL) {
                Ok(TaskCheckpointEvent::Ack(ack)) if ack.checkpoint_id == checkpoint_id => {
                    match self.coordinator.acknowledge_checkpoint(ack) {
                        Ok(true) => return Ok(checkpoint_id),
                        Ok(false) => {}
                        Err(err) => {
                            self.coordinator.abort_checkpoint(checkpoint_id, "ack rejected");
                            return Err(checkpoint_failure(checkpoint_id, err));
                        }
                    }
                }
                Ok(TaskCheckpointEvent::Aborted(abort)) if abort.checkpoint_id == checkpoint_id => {
                    self.coordinator.abort_checkpoint(checkpoint_id, &abort.reason);
                    return Err(checkpoint_failure(
                        checkpoint_id,
                        anyhow!("task {} gave up: {}", abort.task_id, abort.reason),
                    ));
                }
                Ok(stale) => {
                    debug!(checkpoint_id = stale.checkpoint_id(), "ignoring stale checkpoint event");
                }
                Err(RecvTimeoutError::Timeout) => {
                    if task_exited() {
                        self.coordinator.abort_checkpoint(checkpoint_id, "task exited");
                        bail!("a task exited during checkpoint {checkpoint_id}");
                    }
                    if self.coordinator.abort_if_timed_out(Instant::now()).is_some() {
                        return Err(checkpoint_failure(
                            checkpoint_id,
                            anyhow!("timed out waiting for acknowledgements"),
                        ));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.coordinator.abort_checkpoint(checkpoint_id, "tasks disconnected");
                    bail!("every task exited during checkpoint {checkpoint_id}");
                }
            }
        }
    }
}

pub(crate) fn is_checkpoint_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::CheckpointFailure { .. })
    )
}

fn checkpoint_failure(checkpoint_id: CheckpointId, err: anyhow::Error) -> anyhow::Error {
    PipelineError::CheckpointFailure {
        checkpoint_id,
        reason: format!("{err:#}"),
    }
    .into()
}

fn current_unix_millis() -> EventTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as EventTime)
        .unwrap_or(0)
}
