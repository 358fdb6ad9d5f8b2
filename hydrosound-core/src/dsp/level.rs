//! A-weighted sound level measurement.
//!
//! Pure and stateless: safe to invoke repeatedly and concurrently on
//! independent inputs, including in parallel with an active capture.
//! The zero-phase filtering step holds the whole waveform (plus edge
//! padding) in memory; arbitrarily long captures would need incremental
//! filtering, which is explicitly out of scope.

use std::f64::consts::PI;

use crate::models::error::CaptureError;
use crate::storage::tdms::TdmsChannel;

use super::weighting::{AWeighting, Sos, F1};

/// Reference sound pressure, 20 µPa.
pub const REFERENCE_PRESSURE_PA: f64 = 20e-6;

/// Sentinel returned for silence or empty input.
pub const NO_SIGNAL_DB: f64 = f64::NEG_INFINITY;

/// Result of a weighted level computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelMeasurement {
    /// Level in dB re 20 µPa, or [`NO_SIGNAL_DB`] when the weighted
    /// signal carries no energy.
    pub level_db: f64,

    /// Number of non-finite input samples replaced with zero.
    pub sanitized_samples: usize,

    /// Propagated from the filter design (sample rate below twice the
    /// highest corner frequency).
    pub degraded_filter: bool,
}

impl LevelMeasurement {
    pub fn is_silence(&self) -> bool {
        self.level_db == NO_SIGNAL_DB
    }
}

/// Compute the A-weighted level of a pressure waveform in Pascals.
///
/// Sanitizes non-finite samples to zero, removes the arithmetic mean,
/// applies the weighting cascade with zero-phase filtering, and reduces
/// to `20·log10(rms / 20 µPa)`. Silence and empty input yield the
/// no-signal sentinel, never an error; the only failure mode is an
/// invalid sample rate.
pub fn compute_weighted_level(
    samples: &[f64],
    sample_rate: f64,
) -> Result<LevelMeasurement, CaptureError> {
    let filter = AWeighting::design(sample_rate)?;

    let mut sanitized_samples = 0usize;
    let mut pressure: Vec<f64> = samples
        .iter()
        .map(|&s| {
            if s.is_finite() {
                s
            } else {
                sanitized_samples += 1;
                0.0
            }
        })
        .collect();
    if sanitized_samples > 0 {
        log::warn!("replaced {sanitized_samples} non-finite samples with zero");
    }

    if pressure.is_empty() {
        return Ok(LevelMeasurement {
            level_db: NO_SIGNAL_DB,
            sanitized_samples,
            degraded_filter: filter.degraded,
        });
    }

    // Remove DC bias so it cannot skew the RMS.
    let mean = pressure.iter().sum::<f64>() / pressure.len() as f64;
    for sample in &mut pressure {
        *sample -= mean;
    }

    // Pad with a few time constants of the lowest corner frequency to
    // suppress boundary transients.
    let padlen = (3.0 * sample_rate / (2.0 * PI * F1)).ceil() as usize;
    let weighted = zero_phase_filter(&filter.sections, &pressure, padlen);

    let mean_square = weighted.iter().map(|&y| y * y).sum::<f64>() / weighted.len() as f64;
    let rms = mean_square.sqrt();

    let level_db = if rms > 0.0 {
        20.0 * (rms / REFERENCE_PRESSURE_PA).log10()
    } else {
        NO_SIGNAL_DB
    };

    Ok(LevelMeasurement {
        level_db,
        sanitized_samples,
        degraded_filter: filter.degraded,
    })
}

/// Compute the weighted level of a container channel, recovering the
/// sample rate from its properties.
pub fn weighted_level_of_channel(channel: &TdmsChannel) -> Result<LevelMeasurement, CaptureError> {
    let sample_rate = channel.sample_rate().ok_or_else(|| {
        CaptureError::Configuration(format!(
            "channel '{}' carries no sample rate property",
            channel.name
        ))
    })?;
    compute_weighted_level(&channel.data, sample_rate)
}

/// Forward-backward filtering through a biquad cascade with odd edge
/// extension and steady-state section initial conditions, so no net
/// time shift is introduced.
fn zero_phase_filter(sections: &[Sos], x: &[f64], padlen: usize) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let padlen = padlen.min(n - 1);

    // Odd extension around both endpoints.
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    for i in (1..=padlen).rev() {
        ext.push(2.0 * x[0] - x[i]);
    }
    ext.extend_from_slice(x);
    for i in 1..=padlen {
        ext.push(2.0 * x[n - 1] - x[n - 1 - i]);
    }

    let mut forward = cascade_filter(sections, &ext);
    forward.reverse();
    let mut backward = cascade_filter(sections, &forward);
    backward.reverse();

    backward[padlen..padlen + n].to_vec()
}

/// Run the cascade over `x` in transposed direct form II, seeding each
/// section with its steady-state response to the first input value.
fn cascade_filter(sections: &[Sos], x: &[f64]) -> Vec<f64> {
    let mut y = x.to_vec();
    let mut scale = y.first().copied().unwrap_or(0.0);
    for section in sections {
        let [zi1, zi2] = steady_state(section);
        let mut z1 = zi1 * scale;
        let mut z2 = zi2 * scale;
        for sample in &mut y {
            let input = *sample;
            let output = section.b[0] * input + z1;
            z1 = section.b[1] * input - section.a[1] * output + z2;
            z2 = section.b[2] * input - section.a[2] * output;
            *sample = output;
        }
        scale *= section.dc_gain();
    }
    y
}

/// Steady-state transposed direct form II state for unit input.
fn steady_state(section: &Sos) -> [f64; 2] {
    let b = section.b;
    let a = section.a;
    let denom = 1.0 + a[1] + a[2];
    if denom == 0.0 {
        return [0.0, 0.0];
    }
    let dc = (b[0] + b[1] + b[2]) / denom;
    let z2 = b[2] - a[2] * dc;
    let z1 = b[1] + b[2] - (a[1] + a[2]) * dc;
    [z1, z2]
}
