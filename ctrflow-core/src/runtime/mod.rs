//! Runtime: the task loop, the stage operators, and the job that wires them
//! together.
//!
//! ```text
//!                 ┌─ join[0] ─┐   ┌─ aggregate[0] ─┐
//! source driver ──┤    ...    ├─×─┤      ...       ├── sink
//!  (caller thread)└─ join[P] ─┘   └─ aggregate[P] ─┘
//! ```
//!
//! Input events are routed to join tasks by impression id, join output to
//! aggregate tasks by campaign. Every task runs on its own thread and talks
//! to its neighbours through bounded channels.

use crate::checkpoint::{
    recover_latest, BarrierAlignResult, BarrierAligner, CheckpointCoordinator, CheckpointStorage,
    FsCheckpointStorage, InMemoryCheckpointStorage, RestoredCheckpoint, TaskCheckpointAbort,
    TaskCheckpointAck, TaskCheckpointEvent,
};
use crate::channel::local_channel;
use crate::config::{Denominator, JobConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::input_gate::{ChannelIndex, InputGate};
use crate::join::{IntervalJoin, JoinOutput};
use crate::output_gate::OutputGate;
use crate::partitioner::{
    CampaignKeyPartitioner, HashPartitioner, ImpressionKeyPartitioner, Partitioner,
};
use crate::sink::{CsvDirectorySink, RecordSink, SinkEmitter};
use crate::source::{EventSource, JsonLinesSource, SourcePoll, SourcePosition};
use crate::time::{Admission, InputWatermarks, WatermarkTracker, EVENT_TIME_MAX};
use crate::types::{Barrier, CheckpointId, CtrRecord, EventTime, InputEvent, InputStream, StreamElement};
use crate::window::{TumblingEventTimeWindows, WindowAggregator};
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

pub use crate::metrics::JobMetrics;

mod driver;
mod job;
mod operators;
mod task;

pub use driver::*;
pub use job::*;
pub use operators::*;
pub use task::*;
