//! Observer trait for pipeline events.
//!
//! Inject an `Arc<dyn PipelineObserver>` into
//! [`crate::orchestrator::PipelineOrchestrator::with_observer`] to drive a
//! progress indicator, show alerts or refresh a history view. Every method
//! has a no-op default so implementations override only what they need.
//!
//! Callbacks run inline on the task executing the run; keep them short.

use crate::error::Notification;
use crate::history::ScanItem;
use crate::orchestrator::PipelineState;

pub trait PipelineObserver: Send + Sync {
    /// Called on every state transition, including the return to `Idle`.
    fn on_state_change(&self, state: &PipelineState) {
        let _ = state;
    }

    /// Called exactly once per failed run. Never called for cancellation.
    fn on_notification(&self, notification: &Notification) {
        let _ = notification;
    }

    /// Called after a completed run's item has been added to the history.
    fn on_item_stored(&self, item: &ScanItem) {
        let _ = item;
    }
}

pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
