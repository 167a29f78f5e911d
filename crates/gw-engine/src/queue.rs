//! Command queue plumbing
//!
//! Commands come from any control thread and drain only on the audio
//! thread, at buffer boundaries, in enqueue order. The queue is a
//! bounded ring buffer; the producer side sits behind a mutex so many
//! threads can enqueue, the consumer side is owned by the processor.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use gw_core::now_millis;

use crate::commands::{CommandResult, EngineCommand};

/// Default queue capacity
pub const COMMAND_QUEUE_CAPACITY: usize = 4096;

/// Default commands drained per buffer; the rest wait for the next
/// buffer so the audio path is never starved
pub const COMMAND_DRAIN_CAP: usize = 64;

/// What a queue slot carries
pub enum QueuedItem {
    Command(Box<dyn EngineCommand>),
    Undo,
    Redo,
}

/// One enqueued mutation, timestamped at enqueue time
pub struct QueuedCommand {
    pub item: QueuedItem,
    /// Monotonic millis stamped by the sender
    pub timestamp: u64,
    /// Completion channel for callers that wait on the drain
    pub reply: Option<Sender<CommandResult>>,
}

/// Multi-producer half of the command queue
pub struct CommandSender {
    tx: Mutex<Producer<QueuedCommand>>,
}

impl CommandSender {
    /// Build the queue; the consumer goes to the audio processor
    pub fn new(capacity: usize) -> (Self, Consumer<QueuedCommand>) {
        let (tx, rx) = RingBuffer::new(capacity);
        (Self { tx: Mutex::new(tx) }, rx)
    }

    /// Enqueue an item; returns false when the queue is full (the
    /// command is dropped and logged, never blocks)
    pub fn push(&self, item: QueuedItem, reply: Option<Sender<CommandResult>>) -> bool {
        let queued = QueuedCommand {
            item,
            timestamp: now_millis(),
            reply,
        };
        let mut tx = self.tx.lock();
        if tx.push(queued).is_err() {
            log::error!("command queue full; dropping command");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::StartTransportCommand;

    #[test]
    fn test_push_and_drain_order() {
        let (sender, mut rx) = CommandSender::new(8);
        for _ in 0..3 {
            assert!(sender.push(
                QueuedItem::Command(Box::new(StartTransportCommand::new())),
                None
            ));
        }
        let mut timestamps = Vec::new();
        while let Ok(cmd) = rx.pop() {
            timestamps.push(cmd.timestamp);
        }
        assert_eq!(timestamps.len(), 3);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_bounded_queue_drops_overflow() {
        let (sender, _rx) = CommandSender::new(2);
        assert!(sender.push(QueuedItem::Undo, None));
        assert!(sender.push(QueuedItem::Undo, None));
        assert!(!sender.push(QueuedItem::Undo, None));
    }
}
