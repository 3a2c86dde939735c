//! Forward alarm events over a channel.

use crate::core::controller::{AlarmEvent, AlarmListener};
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Listener that sends every event to a [`Receiver`].
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: Sender<AlarmEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiver its events arrive on.
    pub fn new() -> (Self, Receiver<AlarmEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Listen on an existing channel.
    pub fn with_sender(sender: Sender<AlarmEvent>) -> Self {
        Self { sender }
    }
}

impl AlarmListener for ChannelListener {
    fn on_event(&mut self, event: &AlarmEvent) {
        let _ = self.sender.send(event.clone());
    }
}
