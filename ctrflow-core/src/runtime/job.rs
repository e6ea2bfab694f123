use super::*;

/// Events read per [`RunningJob::pump`] call inside [`RunningJob::run`].
const PUMP_BATCH: usize = 1024;
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// How [`RunningJob::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The source ran dry. Call [`RunningJob::finish`] to flush.
    Exhausted,
    /// The stop flag was raised.
    Stopped,
}

/// Final report of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub metrics: JobMetrics,
    pub last_checkpoint: Option<CheckpointId>,
    pub restored_from: Option<CheckpointId>,
    pub position: SourcePosition,
}

impl std::fmt::Display for JobSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}; stopped at {}", self.metrics, self.position)?;
        if let Some(id) = self.last_checkpoint {
            write!(f, "; last checkpoint {id}")?;
        }
        if let Some(id) = self.restored_from {
            write!(f, "; restored from checkpoint {id}")?;
        }
        Ok(())
    }
}

/// Assembles a [`Job`] and restores it from the latest usable checkpoint.
///
/// ```ignore
/// let job = JobBuilder::new(PipelineConfig::default())
///     .source(MemorySource::new(events))
///     .sink(MemorySink::new())
///     .build()?;
/// let summary = job.start()?.run_to_completion()?;
/// ```
pub struct JobBuilder {
    config: PipelineConfig,
    source: Option<Box<dyn EventSource>>,
    sink: Option<Box<dyn RecordSink>>,
    storage: Option<Arc<dyn CheckpointStorage>>,
    require_checkpoint: bool,
}

impl JobBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source: None,
            sink: None,
            storage: None,
            require_checkpoint: false,
        }
    }

    /// Builder wired to the connectors named in a configuration file: JSON
    /// lines inputs, a CSV directory sink and, if `[checkpoint] dir` is set,
    /// file system checkpoint storage.
    pub fn from_job_config(config: &JobConfig) -> Result<Self> {
        config.validate()?;
        let (Some(impressions), Some(clicks)) = (&config.source.impressions, &config.source.clicks)
        else {
            return Err(PipelineError::config("[source] needs both `impressions` and `clicks`").into());
        };
        let output_dir = config
            .sink
            .output_dir
            .as_ref()
            .ok_or_else(|| PipelineError::config("[sink] needs `output_dir`"))?;

        let mut builder = Self::new(config.pipeline.clone())
            .source(JsonLinesSource::open(impressions, clicks, config.schema.clone())?)
            .sink(CsvDirectorySink::new(output_dir)?);
        if let Some(dir) = &config.checkpoint.dir {
            builder = builder.checkpoint_storage(Arc::new(FsCheckpointStorage::new(dir)?));
        }
        Ok(builder)
    }

    pub fn source(mut self, source: impl EventSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Where checkpoints go. Defaults to in-memory storage, which only
    /// survives within the process.
    pub fn checkpoint_storage(mut self, storage: Arc<dyn CheckpointStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Fail the build with [`PipelineError::RecoveryFailure`] when storage
    /// holds no checkpoint.
    pub fn require_checkpoint(mut self, require: bool) -> Self {
        self.require_checkpoint = require;
        self
    }

    /// Validate the configuration and look for a checkpoint to restore.
    ///
    /// When storage holds checkpoints, the newest one that decodes into this
    /// job's topology is restored and the source is rewound to its position.
    /// Checkpoints that cannot be restored are skipped; if none can be, the
    /// build fails with [`PipelineError::RecoveryFailure`].
    pub fn build(self) -> Result<Job> {
        let JobBuilder {
            config,
            source,
            sink,
            storage,
            require_checkpoint,
        } = self;
        config.validate()?;
        let mut source = source.ok_or_else(|| PipelineError::config("job has no source"))?;
        let sink = sink.ok_or_else(|| PipelineError::config("job has no sink"))?;
        let storage: Arc<dyn CheckpointStorage> =
            storage.unwrap_or_else(|| Arc::new(InMemoryCheckpointStorage::new()));

        let tasks = job_task_ids(config.parallelism);
        let restored = recover_latest(storage.as_ref(), &tasks, |checkpoint| {
            validate_checkpoint(checkpoint, &config)
        })?;
        if restored.is_none() && require_checkpoint {
            return Err(PipelineError::RecoveryFailure(
                "no checkpoint found in storage".to_string(),
            )
            .into());
        }
        let next_checkpoint_id = storage
            .checkpoint_ids()?
            .last()
            .map_or(1, |latest| latest + 1);

        let source_snapshot = match &restored {
            Some(checkpoint) => {
                let snapshot =
                    SourceSnapshot::decode(checkpoint.task_state(TaskId::new(SOURCE_VERTEX, 0))?)?;
                source.seek(snapshot.position).map_err(|err| {
                    PipelineError::RecoveryFailure(format!(
                        "cannot rewind source to {}: {err:#}",
                        snapshot.position
                    ))
                })?;
                info!(
                    checkpoint_id = checkpoint.checkpoint_id(),
                    position = %snapshot.position,
                    "rewound source"
                );
                Some(snapshot)
            }
            None => None,
        };

        Ok(Job {
            config,
            source,
            sink,
            storage,
            restored,
            source_snapshot,
            next_checkpoint_id,
        })
    }
}

/// Check that every task state in `checkpoint` restores into a fresh
/// operator of this job.
fn validate_checkpoint(checkpoint: &RestoredCheckpoint, config: &PipelineConfig) -> Result<()> {
    for (&task_id, state) in &checkpoint.task_states {
        match task_id.vertex_id {
            SOURCE_VERTEX => {
                SourceSnapshot::decode(state)?;
            }
            JOIN_VERTEX => check_task_state(JoinOperator::new(config), state, 1)?,
            AGGREGATE_VERTEX => {
                check_task_state(AggregateOperator::new(config), state, config.parallelism)?
            }
            SINK_VERTEX => {
                let snapshot = TaskSnapshot::decode(state)?;
                if snapshot.watermarks.num_channels() != config.parallelism
                    || !snapshot.operator.is_empty()
                {
                    bail!("sink state of task {task_id} does not match the job");
                }
            }
            other => bail!("unknown vertex {} in checkpoint", other.0),
        }
    }
    Ok(())
}

fn check_task_state<Op: TaskOperator>(mut operator: Op, state: &[u8], inputs: usize) -> Result<()> {
    let snapshot = TaskSnapshot::decode(state)?;
    if snapshot.watermarks.num_channels() != inputs {
        bail!(
            "task state has {} inputs, job has {inputs}",
            snapshot.watermarks.num_channels()
        );
    }
    operator.restore_state(&snapshot.operator)
}

/// A built, not yet started job.
pub struct Job {
    config: PipelineConfig,
    source: Box<dyn EventSource>,
    sink: Box<dyn RecordSink>,
    storage: Arc<dyn CheckpointStorage>,
    restored: Option<RestoredCheckpoint>,
    source_snapshot: Option<SourceSnapshot>,
    next_checkpoint_id: CheckpointId,
}

impl Job {
    pub fn builder(config: PipelineConfig) -> JobBuilder {
        JobBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The checkpoint this job resumes from, if any.
    pub fn restored_checkpoint(&self) -> Option<CheckpointId> {
        self.restored.as_ref().map(RestoredCheckpoint::checkpoint_id)
    }

    /// Where the source will resume reading.
    pub fn start_position(&self) -> SourcePosition {
        self.source.position()
    }

    /// Wire the tasks together, restore their state and start their threads.
    pub fn start(self) -> Result<RunningJob> {
        let Job {
            config,
            source,
            sink,
            storage,
            restored,
            source_snapshot,
            next_checkpoint_id,
        } = self;
        let parallelism = config.parallelism;
        let capacity = config.channel_capacity;
        let restored_from = restored.as_ref().map(RestoredCheckpoint::checkpoint_id);
        let (ack_sender, ack_receiver) = unbounded::<TaskCheckpointEvent>();

        let (source_outputs, join_inputs): (Vec<_>, Vec<_>) = (0..parallelism)
            .map(|_| local_channel::<InputEvent>(capacity))
            .unzip();
        // aggregate_inputs[a][j] carries join j's output for aggregate task a.
        let mut aggregate_inputs: Vec<Vec<_>> =
            (0..parallelism).map(|_| Vec::with_capacity(parallelism)).collect();
        let mut join_outputs = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let mut outputs = Vec::with_capacity(parallelism);
            for inputs in aggregate_inputs.iter_mut() {
                let (sender, receiver) = local_channel::<JoinOutput>(capacity);
                outputs.push(sender);
                inputs.push(receiver);
            }
            join_outputs.push(outputs);
        }
        let (aggregate_outputs, sink_inputs): (Vec<_>, Vec<_>) = (0..parallelism)
            .map(|_| local_channel::<CtrRecord>(capacity))
            .unzip();

        let mut tasks = Vec::with_capacity(2 * parallelism + 1);
        for (index, (input, outputs)) in join_inputs.into_iter().zip(join_outputs).enumerate() {
            let task = Task::new(
                TaskId::new(JOIN_VERTEX, index),
                InputGate::new(vec![input]),
                OutputGate::new(outputs),
                JoinOperator::new(&config),
            )
            .with_partitioner(Arc::new(CampaignKeyPartitioner))
            .with_checkpointing(ack_sender.clone(), config.max_alignment_buffer);
            tasks.push(launch(task, restored.as_ref())?);
        }
        for (index, (inputs, output)) in aggregate_inputs
            .into_iter()
            .zip(aggregate_outputs)
            .enumerate()
        {
            let task = Task::new(
                TaskId::new(AGGREGATE_VERTEX, index),
                InputGate::new(inputs),
                OutputGate::new(vec![output]),
                AggregateOperator::new(&config),
            )
            .with_partitioner(Arc::new(HashPartitioner::new(|record: &CtrRecord| {
                record.campaign_id.clone()
            })))
            .with_checkpointing(ack_sender.clone(), config.max_alignment_buffer);
            tasks.push(launch(task, restored.as_ref())?);
        }
        let emitter = SinkEmitter::new(sink)
            .with_retries(config.sink_max_attempts, config.sink_retry_backoff);
        let sink_task = Task::new(
            TaskId::new(SINK_VERTEX, 0),
            InputGate::new(sink_inputs),
            OutputGate::new(Vec::new()),
            SinkOperator::new(emitter),
        )
        .with_checkpointing(ack_sender, config.max_alignment_buffer);
        tasks.push(launch(sink_task, restored.as_ref())?);

        let coordinator = CheckpointCoordinator::new(storage)
            .with_retained_checkpoints(config.retained_checkpoints)
            .with_timeout(config.checkpoint_timeout)
            .with_next_checkpoint_id(next_checkpoint_id);
        let watermarks = source_snapshot
            .map(|snapshot| snapshot.watermarks)
            .unwrap_or_else(|| InputWatermarks::new(config.allowed_lateness));
        let driver = SourceDriver::new(
            source,
            watermarks,
            OutputGate::new(source_outputs),
            TumblingEventTimeWindows::of(config.window_size),
            coordinator,
            ack_receiver,
            job_task_ids(parallelism),
        );
        info!(
            parallelism,
            restored_from = ?restored_from,
            position = %driver.position(),
            "job started"
        );

        Ok(RunningJob {
            config,
            driver,
            tasks,
            restored_from,
            failed: false,
            last_checkpoint_at: Instant::now(),
        })
    }
}

struct TaskHandle {
    task_id: TaskId,
    handle: JoinHandle<Result<JobMetrics>>,
}

fn launch<Op>(mut task: Task<Op>, restored: Option<&RestoredCheckpoint>) -> Result<TaskHandle>
where
    Op: TaskOperator + 'static,
    Op::In: 'static,
    Op::Out: 'static,
{
    let task_id = task.task_id();
    if let Some(checkpoint) = restored {
        task.restore(checkpoint.task_state(task_id)?)
            .map_err(|err| PipelineError::RecoveryFailure(format!("task {task_id}: {err:#}")))?;
    }
    let handle = thread::Builder::new()
        .name(task_id.to_string())
        .spawn(move || task.run())
        .with_context(|| format!("failed to spawn task {task_id}"))?;
    Ok(TaskHandle { task_id, handle })
}

/// A job whose tasks are running. The caller's thread drives the source
/// through [`pump`](Self::pump) or [`run`](Self::run).
///
/// A fatal error (a task failed, the source failed, the sink gave up) stops
/// every task; the method that hit it returns the most downstream task's
/// error and the job refuses further calls.
pub struct RunningJob {
    config: PipelineConfig,
    driver: SourceDriver,
    tasks: Vec<TaskHandle>,
    restored_from: Option<CheckpointId>,
    failed: bool,
    last_checkpoint_at: Instant,
}

impl RunningJob {
    pub fn restored_from(&self) -> Option<CheckpointId> {
        self.restored_from
    }

    pub fn position(&self) -> SourcePosition {
        self.driver.position()
    }

    pub fn watermark(&self) -> EventTime {
        self.driver.watermark()
    }

    pub fn last_checkpoint(&self) -> Option<CheckpointId> {
        self.driver.last_checkpoint()
    }

    /// Counters of the source so far. Task counters are merged when the job
    /// stops.
    pub fn source_metrics(&self) -> &JobMetrics {
        self.driver.metrics()
    }

    /// Read up to `max_events` events and hand them to the join tasks.
    pub fn pump(&mut self, max_events: usize) -> Result<PumpStatus> {
        self.ensure_running()?;
        match self.driver.pump(max_events) {
            Ok(status) => Ok(status),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Take a checkpoint now and wait for it to complete.
    ///
    /// Returns [`PipelineError::CheckpointFailure`] if it did not complete;
    /// the job keeps running and the previous checkpoint stays the latest.
    pub fn checkpoint(&mut self) -> Result<CheckpointId> {
        self.ensure_running()?;
        let tasks = &self.tasks;
        let result = self
            .driver
            .checkpoint(|| tasks.iter().any(|task| task.handle.is_finished()));
        self.last_checkpoint_at = Instant::now();
        match result {
            Ok(checkpoint_id) => Ok(checkpoint_id),
            Err(err) if is_checkpoint_failure(&err) => Err(err),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Pump the source and checkpoint every `checkpoint_interval` until the
    /// source is exhausted or `stop` is raised. Failed checkpoints are logged
    /// and retried at the next interval.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunOutcome> {
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(RunOutcome::Stopped);
            }
            let status = self.pump(PUMP_BATCH)?;
            if self.last_checkpoint_at.elapsed() >= self.config.checkpoint_interval {
                self.checkpoint_or_warn()?;
            }
            match status {
                PumpStatus::Exhausted => return Ok(RunOutcome::Exhausted),
                PumpStatus::Idle => {
                    if self.tasks.iter().any(|task| task.handle.is_finished()) {
                        return Err(self.fail(anyhow!("a task exited while the job was running")));
                    }
                    thread::sleep(IDLE_BACKOFF);
                }
                PumpStatus::Pumped(_) => {}
            }
        }
    }

    /// [`run`](Self::run) without a stop flag, then [`finish`](Self::finish).
    pub fn run_to_completion(mut self) -> Result<JobSummary> {
        self.run(&AtomicBool::new(false))?;
        self.finish()
    }

    /// End of input: advance event time to the end, which emits every open
    /// window, take a last checkpoint, and stop the tasks.
    pub fn finish(mut self) -> Result<JobSummary> {
        self.ensure_running()?;
        if let Err(err) = self.driver.broadcast_watermark(EVENT_TIME_MAX) {
            return Err(self.fail(err));
        }
        self.checkpoint_or_warn()?;
        self.shutdown()
    }

    /// Stop without emitting open windows. A final checkpoint is taken, so a
    /// job built on the same storage resumes exactly here.
    pub fn cancel(mut self) -> Result<JobSummary> {
        self.ensure_running()?;
        let checkpoint = self.checkpoint();
        if self.failed {
            return Err(checkpoint
                .err()
                .unwrap_or_else(|| anyhow!("job failed during cancel")));
        }
        let summary = self.shutdown()?;
        checkpoint?;
        Ok(summary)
    }

    /// Stop immediately, as if the process died: no checkpoint, no flush, and
    /// task errors are discarded.
    pub fn abort(mut self) -> JobSummary {
        self.driver.close();
        let (metrics, error) = self.join_tasks();
        if let Some(err) = error {
            debug!(error = %format!("{err:#}"), "ignoring task error on abort");
        }
        warn!(position = %self.driver.position(), "job aborted");
        self.summary(metrics)
    }

    fn checkpoint_or_warn(&mut self) -> Result<()> {
        match self.checkpoint() {
            Ok(_) => Ok(()),
            Err(err) if is_checkpoint_failure(&err) => {
                warn!(error = %err, "checkpoint failed, job continues");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn shutdown(mut self) -> Result<JobSummary> {
        let ended = self.driver.end_of_input();
        self.driver.close();
        let (metrics, error) = self.join_tasks();
        if let Some(err) = error {
            return Err(err);
        }
        ended?;
        let summary = self.summary(metrics);
        info!(%summary, "job stopped");
        Ok(summary)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.failed {
            bail!("job has already failed");
        }
        Ok(())
    }

    /// Stop every task after a fatal error. Returns the error to report: the
    /// most downstream task failure, preferring [`PipelineError`]s, or
    /// `cause` if every task exited cleanly.
    fn fail(&mut self, cause: anyhow::Error) -> anyhow::Error {
        self.failed = true;
        self.driver.close();
        let (_, error) = self.join_tasks();
        let err = error.unwrap_or(cause);
        error!(error = %format!("{err:#}"), "job failed");
        err
    }

    fn join_tasks(&mut self) -> (JobMetrics, Option<anyhow::Error>) {
        let mut metrics = JobMetrics::default();
        let mut errors = Vec::new();
        for task in self.tasks.drain(..) {
            match task.handle.join() {
                Ok(Ok(task_metrics)) => metrics.absorb(&task_metrics),
                Ok(Err(err)) => {
                    debug!(task = %task.task_id, error = %format!("{err:#}"), "task failed");
                    errors.push(err);
                }
                Err(_) => errors.push(anyhow!("task {} panicked", task.task_id)),
            }
        }
        let error = match errors
            .iter()
            .rposition(|err| err.downcast_ref::<PipelineError>().is_some())
        {
            Some(index) => Some(errors.swap_remove(index)),
            None => errors.pop(),
        };
        (metrics, error)
    }

    fn summary(&self, mut metrics: JobMetrics) -> JobSummary {
        metrics.absorb(self.driver.metrics());
        JobSummary {
            metrics,
            last_checkpoint: self.driver.last_checkpoint(),
            restored_from: self.restored_from,
            position: self.driver.position(),
        }
    }
}
