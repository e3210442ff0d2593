// src/engine/feed.rs

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::model::FeedEvent;

/// Sending half of the observer stream.
///
/// Publishing never blocks: a full stream drops the event.
#[derive(Debug, Clone)]
pub struct Feed {
    tx: mpsc::Sender<FeedEvent>,
}

impl Feed {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: FeedEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("feed full; dropping event"),
            Err(TrySendError::Closed(_)) => trace!("no feed subscriber; dropping event"),
        }
    }
}
