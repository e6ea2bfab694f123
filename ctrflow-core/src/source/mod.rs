//! Event sources feeding the source driver.
//!
//! A source yields impressions and clicks in arrival order and can report and
//! restore how far it has read. The position is stored in every checkpoint;
//! after a restore the source is seeked to it and the events read since are
//! replayed.

use crate::config::SchemaConfig;
use crate::types::{ClickEvent, EventTime, ImpressionEvent, InputEvent, InputStream};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

mod generator;
mod json_lines;
mod memory;

pub use generator::*;
pub use json_lines::*;
pub use memory::*;

/// How far a source has read each input stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcePosition {
    pub impressions: u64,
    pub clicks: u64,
}

impl SourcePosition {
    pub fn get(&self, stream: InputStream) -> u64 {
        match stream {
            InputStream::Impressions => self.impressions,
            InputStream::Clicks => self.clicks,
        }
    }

    fn advance(&mut self, stream: InputStream, by: u64) {
        match stream {
            InputStream::Impressions => self.impressions += by,
            InputStream::Clicks => self.clicks += by,
        }
    }
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "impressions@{} clicks@{}", self.impressions, self.clicks)
    }
}

/// Result of polling a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePoll {
    Event(InputEvent),
    /// Nothing available right now; poll again later.
    Pending,
    /// Both streams are exhausted.
    Exhausted,
}

/// Supplier of the impression and click streams.
pub trait EventSource: Send {
    fn poll(&mut self) -> Result<SourcePoll>;

    /// Position after the last event returned by [`poll`](Self::poll).
    fn position(&self) -> SourcePosition;

    /// Rewind or fast-forward so the next poll returns the event after `position`.
    fn seek(&mut self, position: SourcePosition) -> Result<()>;

    /// Records skipped because they could not be decoded.
    fn malformed_records(&self) -> u64 {
        0
    }
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn poll(&mut self) -> Result<SourcePoll> {
        (**self).poll()
    }

    fn position(&self) -> SourcePosition {
        (**self).position()
    }

    fn seek(&mut self, position: SourcePosition) -> Result<()> {
        (**self).seek(position)
    }

    fn malformed_records(&self) -> u64 {
        (**self).malformed_records()
    }
}

#[cfg(test)]
#[path = "tests/source_tests.rs"]
mod tests;
