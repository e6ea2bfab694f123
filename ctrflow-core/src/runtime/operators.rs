use super::*;

/// Join stage: one [`IntervalJoin`] per subtask.
pub struct JoinOperator {
    join: IntervalJoin,
}

impl JoinOperator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            join: IntervalJoin::new(config.join_bound_ms())
                .with_forwarded_impressions(config.denominator == Denominator::AllImpressions),
        }
    }

    pub fn join(&self) -> &IntervalJoin {
        &self.join
    }
}

impl TaskOperator for JoinOperator {
    type In = InputEvent;
    type Out = JoinOutput;

    fn process(&mut self, record: InputEvent, out: &mut Vec<JoinOutput>) -> Result<()> {
        self.join.process(record, out);
        Ok(())
    }

    fn on_watermark(
        &mut self,
        watermark: EventTime,
        _out: &mut Vec<JoinOutput>,
    ) -> Result<Option<EventTime>> {
        Ok(self.join.on_watermark(watermark))
    }

    fn snapshot_state(&mut self) -> Result<Vec<u8>> {
        self.join.snapshot_state()
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.join.restore_state(bytes)
    }

    fn metrics(&self) -> JobMetrics {
        self.join.metrics().clone()
    }
}

/// Aggregation stage: windows the join output of the campaigns routed to it.
pub struct AggregateOperator {
    aggregator: WindowAggregator,
}

impl AggregateOperator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            aggregator: WindowAggregator::new(TumblingEventTimeWindows::of(config.window_size)),
        }
    }

    pub fn aggregator(&self) -> &WindowAggregator {
        &self.aggregator
    }
}

impl TaskOperator for AggregateOperator {
    type In = JoinOutput;
    type Out = CtrRecord;

    fn process(&mut self, record: JoinOutput, _out: &mut Vec<CtrRecord>) -> Result<()> {
        self.aggregator.process(record);
        Ok(())
    }

    fn on_watermark(
        &mut self,
        watermark: EventTime,
        out: &mut Vec<CtrRecord>,
    ) -> Result<Option<EventTime>> {
        out.extend(self.aggregator.on_watermark(watermark));
        Ok(Some(watermark))
    }

    fn snapshot_state(&mut self) -> Result<Vec<u8>> {
        self.aggregator.snapshot_state()
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.aggregator.restore_state(bytes)
    }

    fn metrics(&self) -> JobMetrics {
        self.aggregator.metrics().clone()
    }
}

/// Sink stage: writes every record through the [`SinkEmitter`].
///
/// A snapshot flushes the sink first, so every record that precedes a
/// checkpoint barrier is durable before the checkpoint can complete.
pub struct SinkOperator {
    emitter: SinkEmitter,
}

impl SinkOperator {
    pub fn new(emitter: SinkEmitter) -> Self {
        Self { emitter }
    }
}

impl TaskOperator for SinkOperator {
    type In = CtrRecord;
    type Out = Infallible;

    fn process(&mut self, record: CtrRecord, _out: &mut Vec<Infallible>) -> Result<()> {
        self.emitter.emit(&record)
    }

    fn on_watermark(
        &mut self,
        _watermark: EventTime,
        _out: &mut Vec<Infallible>,
    ) -> Result<Option<EventTime>> {
        Ok(None)
    }

    fn snapshot_state(&mut self) -> Result<Vec<u8>> {
        self.emitter.flush()?;
        Ok(Vec::new())
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        if !bytes.is_empty() {
            bail!("sink state must be empty, got {} bytes", bytes.len());
        }
        Ok(())
    }

    fn on_end(&mut self) -> Result<()> {
        self.emitter.flush()
    }

    fn metrics(&self) -> JobMetrics {
        self.emitter.metrics().clone()
    }
}
