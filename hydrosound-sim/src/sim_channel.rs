use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use hydrosound_core::models::channel::ChannelConfig;
use hydrosound_core::models::error::CaptureError;
use hydrosound_core::traits::analog_input::{AcquisitionTiming, AnalogInputChannel};

/// Signal the simulated microphone "hears": a pure tone in Pascals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneProfile {
    pub frequency_hz: f64,
    pub amplitude_pa: f64,
}

impl Default for ToneProfile {
    fn default() -> Self {
        Self { frequency_hz: 1_000.0, amplitude_pa: 1.0 }
    }
}

/// Deterministic stand-in for a DAQ microphone channel.
///
/// Sample values are a pure function of the absolute sample index, so
/// two captures of the same length produce identical data regardless of
/// polling cadence. Acquisition progress is paced by the wall clock
/// multiplied by `time_scale`, letting tests capture seconds of signal
/// in milliseconds.
pub struct SimulatedMicrophoneChannel {
    profile: ToneProfile,
    time_scale: f64,
    sample_rate: f64,
    total_samples: u64,
    started_at: Option<Instant>,
    frozen_count: Option<u64>,
    read_cursor: u64,
}

impl SimulatedMicrophoneChannel {
    pub fn new(profile: ToneProfile) -> Self {
        Self {
            profile,
            time_scale: 1.0,
            sample_rate: 0.0,
            total_samples: 0,
            started_at: None,
            frozen_count: None,
            read_cursor: 0,
        }
    }

    /// Run the simulated clock faster (or slower) than real time.
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    fn sample_at(&self, index: u64) -> f64 {
        self.profile.amplitude_pa
            * (2.0 * PI * self.profile.frequency_hz * index as f64 / self.sample_rate).sin()
    }
}

impl AnalogInputChannel for SimulatedMicrophoneChannel {
    fn configure(
        &mut self,
        config: &ChannelConfig,
        timing: &AcquisitionTiming,
    ) -> Result<(), CaptureError> {
        log::debug!(
            "simulated channel {} configured: {} samples at {} Hz, max {:.1} dB SPL",
            config.physical_channel,
            timing.total_samples,
            timing.sample_rate,
            timing.max_level_db_spl
        );
        self.sample_rate = timing.sample_rate;
        self.total_samples = timing.total_samples;
        self.started_at = None;
        self.frozen_count = None;
        self.read_cursor = 0;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.total_samples == 0 {
            return Err(CaptureError::Device("channel is not configured".into()));
        }
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        // Freeze the counter; already-acquired samples stay readable.
        self.frozen_count = Some(self.samples_acquired());
        Ok(())
    }

    fn samples_acquired(&self) -> u64 {
        if let Some(frozen) = self.frozen_count {
            return frozen;
        }
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let scaled_secs = started_at.elapsed().as_secs_f64() * self.time_scale;
        ((scaled_secs * self.sample_rate) as u64).min(self.total_samples)
    }

    fn read_available(&mut self) -> Result<Vec<f64>, CaptureError> {
        let acquired = self.samples_acquired();
        let block: Vec<f64> = (self.read_cursor..acquired).map(|i| self.sample_at(i)).collect();
        self.read_cursor = acquired;
        Ok(block)
    }

    fn is_done(&self) -> bool {
        self.frozen_count.is_some()
            || (self.started_at.is_some() && self.samples_acquired() >= self.total_samples)
    }

    fn wait_until_done(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + timeout;
        while !self.is_done() {
            if Instant::now() >= deadline {
                return Err(CaptureError::FlushTimeout);
            }
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}
