//! Progress reporting at run checkpoints.
//!
//! The orchestrator calls a [`ProgressReporter`] when the record count is
//! known, when each page settles and when the run completes. Reporters are
//! synchronous and cheap; anything slow belongs behind a channel.

use tokio::sync::mpsc;

use crate::summary::Summary;

/// A checkpoint of a harvest run.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestEvent {
    /// The run started.
    Started { source_id: String, incremental: bool },
    /// The count request returned.
    Counted { total: u64, pages: usize },
    /// A page settled, successfully or not.
    PageCompleted { current: usize, total: usize },
    /// A named phase started (`services`, `coupling`, `publish`, ...).
    Phase { name: &'static str },
    /// The run finished; `message` is set on failure or partial success.
    Completed {
        success: bool,
        summary: Box<Summary>,
        message: Option<String>,
    },
}

/// Receives harvest checkpoints.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: HarvestEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _event: HarvestEvent) {}
}

/// Logs events with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Started {
                source_id,
                incremental,
            } => tracing::info!(source = %source_id, incremental, "Harvest started"),
            HarvestEvent::Counted { total, pages } => {
                tracing::info!(total, pages, "Records counted");
            }
            HarvestEvent::PageCompleted { current, total } => {
                tracing::debug!(current, total, "Page completed");
            }
            HarvestEvent::Phase { name } => tracing::info!(phase = name, "Phase started"),
            HarvestEvent::Completed {
                success,
                summary,
                message,
            } => tracing::info!(
                success,
                num_docs = summary.num_docs,
                skipped = summary.skipped_docs,
                message = message.as_deref().unwrap_or(""),
                "Harvest completed"
            ),
        }
    }
}

/// Forwards events into an unbounded channel.
///
/// Useful for consumers on another task (a websocket, a job queue).
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<HarvestEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HarvestEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: HarvestEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.sender.send(event);
    }
}
