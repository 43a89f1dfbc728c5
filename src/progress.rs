//! Progress-callback trait for per-run pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! every state transition as the orchestrator drives a run. The orchestrator
//! always emits a structured `tracing` event for each transition as well;
//! the callback is for hosts that want to route status somewhere else (a
//! terminal spinner, a status table, a pub/sub topic).
//!
//! # Example
//!
//! ```rust
//! use edgequake_docsum::{PipelineConfig, PipelineProgressCallback, PipelineState};
//! use std::sync::Arc;
//!
//! struct PrintTransitions;
//!
//! impl PipelineProgressCallback for PrintTransitions {
//!     fn on_transition(&self, event_id: &str, from: PipelineState, to: PipelineState) {
//!         eprintln!("{event_id}: {from} -> {to}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(PrintTransitions))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::InsertError;
use crate::orchestrator::PipelineState;
use std::sync::Arc;

/// Called by the orchestrator as a run moves through its states.
///
/// Implementations must be `Send + Sync`: one orchestrator may drive many
/// runs concurrently from different tasks. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once when a run enters `Received`.
    ///
    /// # Arguments
    /// * `event_id`: correlation id of the trigger
    /// * `source`:   `gs://` URI of the upload, or the document name for
    ///   direct-text triggers
    fn on_run_start(&self, event_id: &str, source: &str) {
        let _ = (event_id, source);
    }

    /// Called on every state change, including the terminal one.
    fn on_transition(&self, event_id: &str, from: PipelineState, to: PipelineState) {
        let _ = (event_id, from, to);
    }

    /// Called when the window heuristic could not find a section marker.
    fn on_marker_missing(&self, event_id: &str, marker: &str) {
        let _ = (event_id, marker);
    }

    /// Called when the table reported row-level errors (or the record failed
    /// validation). The run still completes successfully.
    fn on_insert_errors(&self, event_id: &str, errors: &[InsertError]) {
        let _ = (event_id, errors);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InsertErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        transitions: Mutex<Vec<(PipelineState, PipelineState)>>,
        missing: AtomicUsize,
        insert_errors: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_run_start(&self, _event_id: &str, _source: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_transition(&self, _event_id: &str, from: PipelineState, to: PipelineState) {
            self.transitions.lock().unwrap().push((from, to));
        }

        fn on_marker_missing(&self, _event_id: &str, _marker: &str) {
            self.missing.fetch_add(1, Ordering::SeqCst);
        }

        fn on_insert_errors(&self, _event_id: &str, errors: &[InsertError]) {
            self.insert_errors.fetch_add(errors.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("e1", "gs://in/paper.pdf");
        cb.on_transition("e1", PipelineState::Received, PipelineState::Extracted);
        cb.on_marker_missing("e1", "abstract");
        cb.on_insert_errors("e1", &[]);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_run_start("e1", "gs://in/paper.pdf");
        tracker.on_transition("e1", PipelineState::Received, PipelineState::Extracted);
        tracker.on_transition("e1", PipelineState::Extracted, PipelineState::NoContent);
        tracker.on_marker_missing("e1", "conclusion");
        tracker.on_insert_errors(
            "e1",
            &[InsertError::new(InsertErrorKind::InvalidRow, "bad timestamp")],
        );

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.transitions.lock().unwrap(),
            vec![
                (PipelineState::Received, PipelineState::Extracted),
                (PipelineState::Extracted, PipelineState::NoContent),
            ]
        );
        assert_eq!(tracker.missing.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.insert_errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_transition("e1", PipelineState::Summarized, PipelineState::Persisted);
    }
}
