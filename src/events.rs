// src/events.rs
use crate::catalog::RefinerPreset;
use crate::models::{GeneratedImage, LifecycleState, SessionSnapshot};
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress notifications for a single pipeline run. Streamed to HTTP clients
/// as newline-delimited JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StateChanged {
        state: LifecycleState,
    },
    /// A draft finished. `index` is a stable label, not completion order.
    DraftReady {
        index: usize,
        total: usize,
        image: GeneratedImage,
    },
    Refining {
        preset: RefinerPreset,
        count: usize,
    },
    Completed {
        session: SessionSnapshot,
    },
    /// A newer generation replaced this one; its results were dropped.
    Superseded {
        epoch: u64,
    },
    Rejected {
        reason: String,
    },
    Failed {
        kind: String,
        message: String,
    },
}

/// Sending half of a progress channel. A disconnected receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
