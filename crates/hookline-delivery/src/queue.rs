//! Bounded in-process message queue.
//!
//! The scheduler publishes due messages, the dispatch worker owns the
//! receiving end. No durability: messages in the channel are lost on exit and
//! re-claimed from the database once their visibility timeout lapses.

use hookline_core::models::{Message, QueuedMessage};
use tokio::sync::mpsc;

use crate::error::{DeliveryError, Result};

/// Creates a queue holding at most `capacity` messages.
pub fn channel(capacity: usize) -> (QueuePublisher, mpsc::Receiver<QueuedMessage>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (QueuePublisher { sender }, receiver)
}

/// Cloneable publishing half of the queue.
#[derive(Debug, Clone)]
pub struct QueuePublisher {
    sender: mpsc::Sender<QueuedMessage>,
}

impl QueuePublisher {
    /// Publishes a message, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::QueueClosed` once the receiver is gone.
    pub async fn publish(&self, message: Message) -> Result<()> {
        self.sender.send(QueuedMessage::from(message)).await.map_err(|_| DeliveryError::QueueClosed)
    }

    /// Returns true once the receiver has been dropped or closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}
