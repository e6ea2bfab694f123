//! # ctrflow core
//!
//! Stateful streaming engine that turns an impression stream and a click
//! stream into per-campaign click-through-rate records.
//!
//! - [`types`]: Events, joined pairs, window keys, CTR records and the
//!   control elements ([`Watermark`](types::Watermark),
//!   [`Barrier`](types::Barrier)) that flow between tasks.
//! - [`time`]: Watermark generation, multi-input watermark tracking and the
//!   event-time timer service.
//! - [`join`]: The interval join buffer matching clicks to impressions.
//! - [`window`]: Tumbling window assignment and distinct-count aggregation.
//! - [`checkpoint`]: Barrier alignment, checkpoint coordination, snapshot
//!   storage and recovery.
//! - [`source`] / [`sink`]: Connector traits with in-memory and file
//!   implementations.
//! - [`runtime`]: The job lifecycle: build, run, checkpoint and shut down.

pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod input_gate;
pub mod join;
pub mod metrics;
pub mod output_gate;
pub mod partitioner;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod time;
pub mod types;
pub mod window;

pub use config::{Denominator, JobConfig, PipelineConfig, SchemaConfig};
pub use error::PipelineError;
pub use metrics::JobMetrics;
pub use runtime::{Job, JobBuilder, JobSummary, PumpStatus, RunOutcome, RunningJob};
pub use types::{ClickEvent, CtrRecord, EventTime, ImpressionEvent, InputEvent, JoinedPair, WindowKey};
