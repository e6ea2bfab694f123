//! InputGate for reading from multiple input channels.
//!
//! - Reads from every upstream subtask
//! - Fair selection across channels
//! - Tracks channel end markers

use crate::channel::LocalChannelReceiver;
use crate::types::StreamElement;
use anyhow::{anyhow, Result};
use crossbeam_channel::Select;

/// Channel identifier (index in the input gate).
pub type ChannelIndex = usize;

/// InputGate reads from multiple input channels.
///
/// Provides fair selection across channels using crossbeam's Select.
/// Tracks which channels have ended to detect when all inputs are exhausted.
pub struct InputGate<T> {
    channels: Vec<LocalChannelReceiver<T>>,
    ended_channels: Vec<bool>,
    ended_count: usize,
}

impl<T> InputGate<T> {
    pub fn new(channels: Vec<LocalChannelReceiver<T>>) -> Self {
        let num_channels = channels.len();
        Self {
            channels,
            ended_channels: vec![false; num_channels],
            ended_count: 0,
        }
    }

    /// Get the next stream element from any input channel.
    ///
    /// `End` markers of individual channels are absorbed; the `End` of the
    /// last open channel is returned. Returns `Ok(None)` when an upstream task
    /// disappeared without sending `End` (the job was aborted).
    ///
    /// Returns an error when called after all channels have ended.
    pub fn next(&mut self) -> Result<Option<(ChannelIndex, StreamElement<T>)>> {
        if self.all_ended() {
            return Err(anyhow!("All input channels have ended"));
        }

        loop {
            let mut select = Select::new();
            let mut active_indices = Vec::new();
            for (idx, receiver) in self.channels.iter().enumerate() {
                if !self.ended_channels[idx] {
                    select.recv(&receiver.receiver);
                    active_indices.push(idx);
                }
            }

            let oper = select.select();
            let channel_idx = active_indices[oper.index()];
            let Ok(element) = oper.recv(&self.channels[channel_idx].receiver) else {
                return Ok(None);
            };

            if matches!(element, StreamElement::End) {
                self.mark_ended(channel_idx);
                if self.all_ended() {
                    return Ok(Some((channel_idx, element)));
                }
                continue;
            }

            return Ok(Some((channel_idx, element)));
        }
    }

    fn mark_ended(&mut self, channel_idx: ChannelIndex) {
        if !self.ended_channels[channel_idx] {
            self.ended_channels[channel_idx] = true;
            self.ended_count += 1;
        }
    }

    /// Check if all input channels have ended.
    pub fn all_ended(&self) -> bool {
        self.ended_count == self.channels.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}
