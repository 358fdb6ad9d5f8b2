use crate::models::error::CaptureError;
use crate::models::result::RecordingResult;
use crate::models::state::CaptureState;

/// Event observer for capture session notifications.
///
/// All methods are called from the acquisition worker thread, not the
/// caller's thread. Implementations should marshal to their own event
/// loop if needed and return quickly; a slow observer delays the next
/// polling tick.
pub trait SessionObserver: Send + Sync {
    /// Called on every state transition.
    fn on_state_changed(&self, state: &CaptureState);

    /// Called at the polling cadence while recording.
    /// `elapsed_secs` is monotonically non-decreasing within a session.
    fn on_progress(&self, elapsed_secs: f64) {
        let _ = elapsed_secs;
    }

    /// Called once when the session delivers a result (completed or
    /// cancelled with partial data).
    fn on_finished(&self, result: &RecordingResult) {
        let _ = result;
    }

    /// Called once when the session fails.
    fn on_error(&self, error: &CaptureError) {
        let _ = error;
    }
}
