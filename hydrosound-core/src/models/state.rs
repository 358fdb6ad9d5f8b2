use super::error::CaptureError;
use super::result::RecordingResult;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → armed → recording → finishing → completed
///                    ↓            ↓
///                cancelled      failed
/// ```
/// Terminal states deliver their result through the observer, after
/// which the recorder returns to idle and may start the next session.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    Idle,
    /// Validated and hardware configured, not yet acquiring.
    Armed,
    Recording {
        elapsed_secs: f64,
        samples_acquired: u64,
    },
    /// Acquisition done, waiting for the hardware flush and finalize.
    Finishing,
    /// Stop requested mid-capture; flushed samples were preserved.
    Cancelled(Box<RecordingResult>),
    Completed(Box<RecordingResult>),
    Failed(CaptureError),
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    /// Armed, recording, or finishing: the session owns the hardware
    /// channel and the destination file.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Armed | Self::Recording { .. } | Self::Finishing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Completed(_) | Self::Failed(_))
    }

    /// Elapsed capture time, if the state tracks one.
    pub fn elapsed_secs(&self) -> Option<f64> {
        match self {
            Self::Recording { elapsed_secs, .. } => Some(*elapsed_secs),
            Self::Cancelled(result) | Self::Completed(result) => Some(result.duration_secs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(!CaptureState::Idle.is_active());
        assert!(CaptureState::Armed.is_active());
        assert!(CaptureState::Recording { elapsed_secs: 0.0, samples_acquired: 0 }.is_active());
        assert!(CaptureState::Finishing.is_active());
        assert!(!CaptureState::Failed(CaptureError::FlushTimeout).is_active());
    }

    #[test]
    fn terminal_states() {
        assert!(CaptureState::Failed(CaptureError::FlushTimeout).is_terminal());
        assert!(!CaptureState::Idle.is_terminal());
        assert!(!CaptureState::Finishing.is_terminal());
    }

    #[test]
    fn elapsed_tracks_recording() {
        let state = CaptureState::Recording { elapsed_secs: 1.5, samples_acquired: 38_400 };
        assert_eq!(state.elapsed_secs(), Some(1.5));
        assert_eq!(CaptureState::Idle.elapsed_secs(), None);
    }
}
