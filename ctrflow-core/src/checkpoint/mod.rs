//! Barrier-based checkpointing: alignment, coordination, storage and recovery.
//!
//! The source driver injects a [`Barrier`] into the stream and snapshots its
//! own position. Each task snapshots its state when the barrier has arrived on
//! all of its inputs and acknowledges with a [`TaskCheckpointEvent`]. The
//! [`CheckpointCoordinator`] persists a checkpoint once every expected task
//! acknowledged it.

use crate::input_gate::ChannelIndex;
use crate::runtime::TaskId;
use crate::types::{Barrier, CheckpointId, EventTime, StreamElement};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

mod aligner;
mod coordinator;
mod events;
mod metadata;
mod recovery;
mod storage;

pub use aligner::*;
pub use coordinator::*;
pub use events::*;
pub use metadata::*;
pub use recovery::*;
pub use storage::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
