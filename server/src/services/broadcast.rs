//! Packet cast interface.

use log::trace;
use tokio::sync::mpsc;

use aisim_shared::{ServerMessage, Vec2};

/// Who should receive a cast
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CastScope {
    /// Observers near a point of a map
    Near { server: u16, map: u32, position: Vec2 },
    /// Every connected player
    Everyone,
}

/// Fire-and-forget delivery of messages to players. No acknowledgement and no
/// ordering guarantee across recipients.
pub trait Broadcaster: Send + Sync {
    fn cast(&self, scope: CastScope, message: ServerMessage);
}

/// Forwards casts to the network layer over a channel
#[derive(Clone)]
pub struct ChannelBroadcaster {
    sender: mpsc::Sender<(CastScope, ServerMessage)>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(CastScope, ServerMessage)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { sender: tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn cast(&self, scope: CastScope, message: ServerMessage) {
        // A full or closed channel drops the cast; observers resync on the next one
        if let Err(e) = self.sender.try_send((scope, message)) {
            trace!("Dropped cast: {}", e);
        }
    }
}
