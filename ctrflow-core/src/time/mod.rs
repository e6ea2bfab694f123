use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EventTime, InputEvent, Watermark};

mod timer_service;
mod tracker;
mod watermark;

pub use timer_service::*;
pub use tracker::*;
pub use watermark::*;

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
