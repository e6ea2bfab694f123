//! Record sinks and the retrying emitter in front of them.
//!
//! Sinks upsert by [`WindowKey`]: writing a record for a key that was already
//! written replaces it. Replays after a restore re-emit windows that were
//! finalized after the restored checkpoint, and upserting makes those
//! re-emissions harmless.

use crate::error::PipelineError;
use crate::metrics::JobMetrics;
use crate::types::{CtrRecord, EventTime, WindowKey};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

mod csv;
mod emitter;
mod memory;

pub use csv::*;
pub use emitter::*;
pub use memory::*;

/// Destination of finalized CTR records.
pub trait RecordSink: Send {
    /// Persist `record`, replacing any earlier record with the same key.
    fn write(&mut self, record: &CtrRecord) -> Result<()>;

    /// Make every record written so far durable.
    fn flush(&mut self) -> Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn write(&mut self, record: &CtrRecord) -> Result<()> {
        (**self).write(record)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

#[cfg(test)]
#[path = "tests/sink_tests.rs"]
mod tests;
