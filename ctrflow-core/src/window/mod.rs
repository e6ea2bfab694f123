use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::time::{TimerService, EVENT_TIME_MIN};
use crate::types::{EventTime, WindowKey};

mod aggregator;
mod assigners;
mod primitives;

pub use aggregator::*;
pub use assigners::*;
pub use primitives::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
