//! Progress reporting for research runs.
//!
//! Sub-tasks write updates into a bounded queue; one consumer task drains
//! it, clamps the percentage so it never goes backwards, and invokes the
//! caller's callback. The callback therefore never runs concurrently.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::ResearchPhase;

/// Payload delivered to the progress callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub stage: ResearchPhase,
    pub message: String,
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<String>,
    /// Findings completed so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<usize>,
}

/// Receives progress updates, one at a time.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Callback that discards every update.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Producer handle. Cheap to clone into sub-tasks.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    /// Queue an update. Waits if the queue is full; a gone consumer is ignored.
    pub async fn report(&self, update: ProgressUpdate) {
        if self.tx.send(update).await.is_err() {
            debug!("Progress consumer closed, dropping update");
        }
    }

    /// Update at `fraction` (0..=1) of the way through `phase`.
    pub async fn within(
        &self,
        phase: ResearchPhase,
        fraction: f64,
        message: impl Into<String>,
        current_question: Option<String>,
        findings: Option<usize>,
    ) {
        self.report(ProgressUpdate {
            stage: phase,
            message: message.into(),
            progress_percent: percent_within(phase, fraction),
            current_question,
            findings,
        })
        .await;
    }

    /// Update at the start of `phase`.
    pub async fn phase(&self, phase: ResearchPhase, message: impl Into<String>) {
        self.within(phase, 0.0, message, None, None).await;
    }
}

/// Map a fraction of `phase` onto the run's 0-100 scale.
pub fn percent_within(phase: ResearchPhase, fraction: f64) -> u8 {
    let (start, end) = phase.progress_range();
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    (start as f64 + (end - start) as f64 * fraction).round() as u8
}

/// Start the single consumer. Await the handle after dropping every
/// reporter to be sure all updates were delivered.
pub fn spawn_consumer(
    callback: Arc<dyn ProgressCallback>,
    buffer: usize,
) -> (ProgressReporter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(buffer.max(1));
    let handle = tokio::spawn(async move {
        let mut last = 0u8;
        while let Some(mut update) = rx.recv().await {
            update.progress_percent = update.progress_percent.clamp(last, 100);
            last = update.progress_percent;
            callback.on_progress(&update);
        }
    });
    (ProgressReporter { tx }, handle)
}
