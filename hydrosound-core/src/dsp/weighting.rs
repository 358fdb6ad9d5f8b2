//! A-weighting filter design (IEC 61672 prototype).
//!
//! The analog prototype is fixed: four corner frequencies and the 1 kHz
//! gain constant. The digital cascade is obtained with the bilinear
//! transform (no prewarping, `s = 2·fs·(z−1)/(z+1)`) applied to each
//! factored second-order section. The construction is order-sensitive;
//! the section factoring reproduces the full polynomial prototype
//! exactly (see the tests) and must not be algebraically rearranged.

use std::f64::consts::PI;

use crate::models::error::CaptureError;

/// IEC 61672 corner frequencies, Hz.
pub const F1: f64 = 20.598997;
pub const F2: f64 = 107.65265;
pub const F3: f64 = 737.86223;
pub const F4: f64 = 12_194.217;

/// Analog prototype gain at 1 kHz, dB.
pub const A1000_DB: f64 = 1.9997;

/// One digital second-order section. `a[0]` is normalized to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sos {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Sos {
    /// Jury criterion for `z² + a1·z + a2`.
    pub fn is_stable(&self) -> bool {
        let a1 = self.a[1];
        let a2 = self.a[2];
        a2.abs() < 1.0 && a1.abs() < 1.0 + a2
    }

    /// DC gain of the section.
    pub fn dc_gain(&self) -> f64 {
        let den: f64 = self.a.iter().sum();
        if den == 0.0 {
            return 0.0;
        }
        self.b.iter().sum::<f64>() / den
    }

    /// Squared magnitude response at normalized angular frequency `w`.
    fn magnitude_squared(&self, w: f64) -> (f64, f64) {
        let eval = |c: &[f64; 3]| {
            let re = c[0] + c[1] * w.cos() + c[2] * (2.0 * w).cos();
            let im = c[1] * w.sin() + c[2] * (2.0 * w).sin();
            re * re + im * im
        };
        (eval(&self.b), eval(&self.a))
    }
}

/// Bilinear transform of one analog biquad `(B0·s² + B1·s + B2) /
/// (A0·s² + A1·s + A2)` at rate `fs`, matching the classic
/// `signal.bilinear` substitution `s = 2·fs·(z−1)/(z+1)`.
fn bilinear(b: [f64; 3], a: [f64; 3], fs: f64) -> Sos {
    let c = 2.0 * fs;
    let c2 = c * c;

    let bd = [
        b[0] * c2 + b[1] * c + b[2],
        2.0 * b[2] - 2.0 * b[0] * c2,
        b[0] * c2 - b[1] * c + b[2],
    ];
    let ad = [
        a[0] * c2 + a[1] * c + a[2],
        2.0 * a[2] - 2.0 * a[0] * c2,
        a[0] * c2 - a[1] * c + a[2],
    ];

    let norm = ad[0];
    Sos {
        b: [bd[0] / norm, bd[1] / norm, bd[2] / norm],
        a: [1.0, ad[1] / norm, ad[2] / norm],
    }
}

/// Digital A-weighting filter: an ordered cascade of second-order
/// sections designed for one sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AWeighting {
    pub sections: Vec<Sos>,
    pub sample_rate: f64,
    /// Set when the sample rate is below twice the highest corner
    /// frequency; the design proceeds but the curve near Nyquist is
    /// compressed by frequency warping.
    pub degraded: bool,
}

impl AWeighting {
    /// Design the cascade for `sample_rate`.
    ///
    /// Fails with a configuration error for a non-positive rate. Rates
    /// below `2·F4` produce a degraded-accuracy design with a warning
    /// rather than an error.
    pub fn design(sample_rate: f64) -> Result<Self, CaptureError> {
        if sample_rate <= 0.0 {
            return Err(CaptureError::Configuration(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        let degraded = sample_rate < 2.0 * F4;
        if degraded {
            log::warn!(
                "A-weighting design at {sample_rate} Hz is below twice the highest \
                 corner frequency; accuracy near Nyquist is degraded"
            );
        }

        let w1 = 2.0 * PI * F1;
        let w2 = 2.0 * PI * F2;
        let w3 = 2.0 * PI * F3;
        let w4 = 2.0 * PI * F4;
        let gain = 10f64.powf(A1000_DB / 20.0);

        // Factored analog prototype. The cascade product equals
        //   NUM = (2π·F4)² · 10^(A1000/20) · s⁴
        //   DEN = (s² + 4π·F1·s + (2π·F1)²) · (s² + 4π·F4·s + (2π·F4)²)
        //         · (s + 2π·F2) · (s + 2π·F3)
        let sections = vec![
            bilinear([1.0, 0.0, 0.0], [1.0, 2.0 * w1, w1 * w1], sample_rate),
            bilinear([1.0, 0.0, 0.0], [1.0, w2 + w3, w2 * w3], sample_rate),
            bilinear([0.0, 0.0, gain * w4 * w4], [1.0, 2.0 * w4, w4 * w4], sample_rate),
        ];

        let mut filter = Self { sections, sample_rate, degraded };

        // The bilinear transform warps the 1 kHz alignment point (by
        // +0.16 dB at 8 kHz sample rate). Re-align digitally so the
        // reference gain is exactly unity at every rate.
        let mag_1k = filter.magnitude(1_000.0);
        if mag_1k.is_finite() && mag_1k > 0.0 {
            for coeff in &mut filter.sections[0].b {
                *coeff /= mag_1k;
            }
        }

        Ok(filter)
    }

    /// Magnitude response at `frequency_hz`.
    pub fn magnitude(&self, frequency_hz: f64) -> f64 {
        let w = 2.0 * PI * frequency_hz / self.sample_rate;
        let mut num = 1.0;
        let mut den = 1.0;
        for section in &self.sections {
            let (n, d) = section.magnitude_squared(w);
            num *= n;
            den *= d;
        }
        (num / den).sqrt()
    }

    /// Magnitude response in dB at `frequency_hz`.
    pub fn response_db(&self, frequency_hz: f64) -> f64 {
        20.0 * self.magnitude(frequency_hz).log10()
    }

    /// All poles strictly inside the unit circle.
    pub fn is_stable(&self) -> bool {
        self.sections.iter().all(Sos::is_stable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const RATES: [f64; 4] = [8_000.0, 25_600.0, 48_000.0, 96_000.0];

    #[test]
    fn rejects_non_positive_rate() {
        assert!(matches!(
            AWeighting::design(0.0),
            Err(CaptureError::Configuration(_))
        ));
        assert!(matches!(
            AWeighting::design(-48_000.0),
            Err(CaptureError::Configuration(_))
        ));
    }

    #[test]
    fn unity_gain_at_alignment_point() {
        for fs in RATES {
            let filter = AWeighting::design(fs).unwrap();
            assert!(
                filter.response_db(1_000.0).abs() < 0.05,
                "1 kHz gain off at fs={fs}: {} dB",
                filter.response_db(1_000.0)
            );
        }
    }

    #[test]
    fn low_frequency_attenuation() {
        for fs in RATES {
            let filter = AWeighting::design(fs).unwrap();
            let db_20 = filter.response_db(20.0);
            assert!(
                (db_20 + 50.0).abs() < 2.0,
                "20 Hz gain off at fs={fs}: {db_20} dB"
            );
        }
    }

    #[test]
    fn all_sections_stable() {
        for fs in RATES {
            let filter = AWeighting::design(fs).unwrap();
            assert!(filter.is_stable(), "unstable section at fs={fs}");
        }
    }

    #[test]
    fn degraded_flag_below_twice_highest_corner() {
        assert!(AWeighting::design(8_000.0).unwrap().degraded);
        assert!(!AWeighting::design(25_600.0).unwrap().degraded);
        assert!(!AWeighting::design(48_000.0).unwrap().degraded);
    }

    #[test]
    fn follows_the_standard_curve_shape() {
        let filter = AWeighting::design(48_000.0).unwrap();
        // Reference A-weighting values, IEC 61672 table.
        for (freq, expected) in [(100.0, -19.1), (500.0, -3.2), (2_000.0, 1.2), (4_000.0, 1.0)] {
            assert_abs_diff_eq!(filter.response_db(freq), expected, epsilon = 0.3);
        }
    }

    /// The factored sections must reproduce the full polynomial
    /// prototype coefficient for coefficient.
    #[test]
    fn cascade_matches_full_polynomial_prototype() {
        fn polymul(p: &[f64], q: &[f64]) -> Vec<f64> {
            let mut out = vec![0.0; p.len() + q.len() - 1];
            for (i, &pi) in p.iter().enumerate() {
                for (j, &qj) in q.iter().enumerate() {
                    out[i + j] += pi * qj;
                }
            }
            out
        }

        let w1 = 2.0 * PI * F1;
        let w2 = 2.0 * PI * F2;
        let w3 = 2.0 * PI * F3;
        let w4 = 2.0 * PI * F4;

        let reference_den = polymul(
            &[1.0, 2.0 * w4, w4 * w4],
            &polymul(
                &[1.0, 2.0 * w1, w1 * w1],
                &polymul(&[1.0, w3], &[1.0, w2]),
            ),
        );

        let cascade_den = polymul(
            &[1.0, 2.0 * w1, w1 * w1],
            &polymul(&[1.0, w2 + w3, w2 * w3], &[1.0, 2.0 * w4, w4 * w4]),
        );

        for (lhs, rhs) in cascade_den.iter().zip(&reference_den) {
            assert_abs_diff_eq!(lhs / rhs, 1.0, epsilon = 1e-12);
        }
    }
}
