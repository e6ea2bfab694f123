//! Local channels for inter-task communication.
//!
//! Uses crossbeam-channel for bounded, backpressure-aware communication
//! between tasks running in different threads.

use crate::types::StreamElement;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Sender side of a local channel.
#[derive(Clone)]
pub struct LocalChannelSender<T> {
    sender: Sender<StreamElement<T>>,
}

impl<T> LocalChannelSender<T> {
    /// Send a stream element to the channel.
    ///
    /// Blocks if the channel is full (backpressure). Fails once the receiving
    /// task has gone away.
    pub fn send(&self, element: StreamElement<T>) -> Result<()> {
        self.sender
            .send(element)
            .map_err(|_| anyhow!("Channel closed: receiver dropped"))
    }
}

/// Receiver side of a local channel. Only an [`InputGate`] reads from it.
///
/// [`InputGate`]: crate::input_gate::InputGate
pub struct LocalChannelReceiver<T> {
    pub(crate) receiver: Receiver<StreamElement<T>>,
}

/// Create a bounded local channel pair.
///
/// # Backpressure
/// When the channel is full, `send()` blocks until space is available, so a
/// slow sink throttles the aggregators, the joins and finally the source.
pub fn local_channel<T>(capacity: usize) -> (LocalChannelSender<T>, LocalChannelReceiver<T>) {
    let (sender, receiver) = bounded(capacity);
    (
        LocalChannelSender { sender },
        LocalChannelReceiver { receiver },
    )
}
