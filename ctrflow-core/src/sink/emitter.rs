use super::*;

/// Hands finalized records to a [`RecordSink`], retrying failures.
///
/// Each write (and each flush) gets `max_attempts` tries with `backoff`
/// between them. When they are used up the emitter fails with
/// [`PipelineError::SinkWriteFailure`] and the job stops; a record is never
/// skipped.
pub struct SinkEmitter {
    sink: Box<dyn RecordSink>,
    max_attempts: u32,
    backoff: Duration,
    metrics: JobMetrics,
}

impl SinkEmitter {
    pub fn new(sink: Box<dyn RecordSink>) -> Self {
        Self {
            sink,
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            metrics: JobMetrics::default(),
        }
    }

    pub fn with_retries(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn emit(&mut self, record: &CtrRecord) -> Result<()> {
        let key = record.key().to_string();
        let sink = &mut self.sink;
        retry(
            &key,
            self.max_attempts,
            self.backoff,
            &mut self.metrics,
            || sink.write(record),
        )?;
        self.metrics.records_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let sink = &mut self.sink;
        retry(
            "flush",
            self.max_attempts,
            self.backoff,
            &mut self.metrics,
            || sink.flush(),
        )
    }

    pub fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }
}

fn retry(
    key: &str,
    max_attempts: u32,
    backoff: Duration,
    metrics: &mut JobMetrics,
    mut op: impl FnMut() -> Result<()>,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_attempts => {
                warn!(key, attempt, max_attempts, error = %err, "sink write failed, retrying");
                metrics.sink_retries += 1;
                attempt += 1;
                if !backoff.is_zero() {
                    std::thread::sleep(backoff);
                }
            }
            Err(err) => {
                error!(key, attempts = attempt, error = %err, "sink write failed");
                return Err(PipelineError::SinkWriteFailure {
                    key: key.to_string(),
                    attempts: attempt,
                    reason: format!("{err:#}"),
                }
                .into());
            }
        }
    }
}
