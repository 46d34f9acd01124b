//! Assembly events: decoupled notification of subject lifecycle changes.
//!
//! The pipeline publishes these as subjects are started, become ready and
//! are handed to consumers. Other components subscribe without coupling to
//! the engine.

use crate::subject::SubjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All lifecycle events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssemblyEvent {
    /// The first patch of a subject was placed
    SubjectStarted {
        subject: SubjectId,
        shape: Vec<usize>,
        timestamp: DateTime<Utc>,
    },

    /// A subject was flagged ready for retrieval
    SubjectReady {
        subject: SubjectId,
        timestamp: DateTime<Utc>,
    },

    /// A subject's volume was handed to a consumer
    SubjectEmitted {
        subject: SubjectId,
        flushed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A batch was rejected and skipped
    BatchRejected {
        batch: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The producer hung up and the run completed
    StreamFinished {
        batches: u64,
        emitted: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for assembly events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AssemblyEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AssemblyEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AssemblyEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
