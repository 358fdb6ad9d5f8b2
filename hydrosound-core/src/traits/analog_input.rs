use std::time::Duration;

use crate::models::channel::ChannelConfig;
use crate::models::error::CaptureError;

/// Finite-acquisition timing handed to the hardware backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionTiming {
    pub sample_rate: f64,
    pub total_samples: u64,
    /// Estimated maximum sound pressure level in dB SPL, derived from
    /// the microphone sensitivity and the assumed maximum input voltage.
    /// Backends use it to pick an input range.
    pub max_level_db_spl: f64,
}

/// Interface to a vendor analog-input channel.
///
/// This is the only seam that touches physical hardware. Implemented by:
/// - `SimulatedMicrophoneChannel` (hydrosound-sim)
/// - Future: an NI-DAQmx backed channel on rigs with the vendor driver.
///
/// Lifecycle: `configure` → `start` → poll `read_available` /
/// `samples_acquired` / `is_done` → `wait_until_done` → drop (or `stop`
/// early on cancellation). After `stop` the driver finishes flushing
/// whatever it already acquired; `read_available` stays callable until
/// the channel is drained.
pub trait AnalogInputChannel: Send + 'static {
    /// Apply sensor and timing configuration. No acquisition starts yet.
    fn configure(
        &mut self,
        config: &ChannelConfig,
        timing: &AcquisitionTiming,
    ) -> Result<(), CaptureError>;

    /// Begin the finite acquisition.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop acquiring early. Samples already acquired remain readable.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Total samples the driver has acquired so far. Monotonically
    /// non-decreasing; may run ahead of what `read_available` returned.
    fn samples_acquired(&self) -> u64;

    /// Drain whatever the driver buffered since the last call.
    fn read_available(&mut self) -> Result<Vec<f64>, CaptureError>;

    /// Whether the finite acquisition has acquired all requested samples
    /// (or was stopped).
    fn is_done(&self) -> bool;

    /// Block until the acquisition is done, bounded by `timeout`.
    /// Returns `CaptureError::FlushTimeout` when the bound is exceeded.
    fn wait_until_done(&mut self, timeout: Duration) -> Result<(), CaptureError>;
}
