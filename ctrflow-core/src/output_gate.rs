//! OutputGate for sending to multiple output channels.
//!
//! - Routes records to downstream tasks by key
//! - Broadcasts control elements (watermarks, barriers, end markers)

use crate::channel::LocalChannelSender;
use crate::partitioner::Partitioner;
use crate::types::StreamElement;
use anyhow::{anyhow, Result};

pub struct OutputGate<T> {
    channels: Vec<LocalChannelSender<T>>,
}

impl<T> OutputGate<T> {
    pub fn new(channels: Vec<LocalChannelSender<T>>) -> Self {
        Self { channels }
    }

    /// Emit an element to a specific channel (by index).
    pub fn emit_to(&self, channel_idx: usize, element: StreamElement<T>) -> Result<()> {
        self.channels
            .get(channel_idx)
            .ok_or_else(|| anyhow!("output channel {channel_idx} out of bounds"))?
            .send(element)
    }

    /// Emit a record to the channel chosen by `partitioner`.
    pub fn emit_partitioned<P>(&self, record: T, partitioner: &P) -> Result<()>
    where
        P: Partitioner<T> + ?Sized,
    {
        if self.channels.is_empty() {
            return Err(anyhow!("no output channels to route a record to"));
        }
        let target = partitioner.partition(&record, self.channels.len());
        self.emit_to(target, StreamElement::Record(record))
    }

    /// Broadcast an element to all output channels.
    ///
    /// Used for watermarks, checkpoint barriers and end markers, which every
    /// downstream subtask must observe.
    pub fn broadcast(&self, element: StreamElement<T>) -> Result<()>
    where
        T: Clone,
    {
        let Some((last, rest)) = self.channels.split_last() else {
            return Ok(());
        };
        for channel in rest {
            channel.send(element.clone())?;
        }
        last.send(element)
    }
}
