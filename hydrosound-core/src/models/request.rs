use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Fixed acquisition rate of the sound module, in Hz.
pub const DEFAULT_SAMPLE_RATE: f64 = 25_600.0;

/// Default container group holding the raw pressure trace.
pub const DEFAULT_GROUP_NAME: &str = "RawRecord";

/// Default channel name within the group.
pub const DEFAULT_CHANNEL_NAME: &str = "Sound";

/// How the container writer treats an existing file at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Truncate and start a fresh container.
    CreateOrReplace,
    /// Append a new data segment to an existing container.
    Append,
}

/// Descriptive tags identifying a survey recording. These drive the
/// output filename and are written into the container as properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingTags {
    pub project: String,
    pub unit: String,
    pub unit_state: String,
    pub location: String,
    pub timestamp: DateTime<Local>,
}

impl RecordingTags {
    pub fn new(
        project: impl Into<String>,
        unit: impl Into<String>,
        unit_state: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            unit: unit.into(),
            unit_state: unit_state.into(),
            location: location.into(),
            timestamp: Local::now(),
        }
    }
}

/// Everything needed to run one finite capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Sample rate in Hz. The module runs at a fixed rate unless overridden.
    pub sample_rate: f64,

    /// Requested capture length in seconds.
    pub duration_secs: f64,

    /// Destination container path. Collision handling happens before
    /// the request reaches the recorder (see `storage::path`).
    pub destination: PathBuf,

    /// Container group the channel is written under.
    pub group_name: String,

    /// Channel name within the group.
    pub channel_name: String,

    pub write_mode: WriteMode,

    pub tags: RecordingTags,
}

impl CaptureRequest {
    pub fn new(destination: PathBuf, duration_secs: f64, tags: RecordingTags) -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            duration_secs,
            destination,
            group_name: DEFAULT_GROUP_NAME.into(),
            channel_name: DEFAULT_CHANNEL_NAME.into(),
            write_mode: WriteMode::CreateOrReplace,
            tags,
        }
    }

    /// Number of samples the hardware is asked to acquire.
    pub fn total_samples(&self) -> u64 {
        (self.duration_secs * self.sample_rate).round() as u64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate <= 0.0 {
            return Err(format!("sample rate must be positive, got {}", self.sample_rate));
        }
        if self.duration_secs <= 0.0 {
            return Err(format!("duration must be positive, got {}", self.duration_secs));
        }
        if self.total_samples() == 0 {
            return Err(format!(
                "duration {} s covers no full sample period at {} Hz",
                self.duration_secs, self.sample_rate
            ));
        }
        if self.group_name.is_empty() || self.channel_name.is_empty() {
            return Err("group and channel names must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(duration_secs: f64) -> CaptureRequest {
        CaptureRequest::new(
            PathBuf::from("out.tdms"),
            duration_secs,
            RecordingTags::new("PIT5", "U1", "Full Load", "G1"),
        )
    }

    #[test]
    fn default_rate_is_module_rate() {
        let req = request(10.0);
        assert_eq!(req.sample_rate, 25_600.0);
        assert_eq!(req.total_samples(), 256_000);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_duration() {
        assert!(request(0.0).validate().is_err());
        assert!(request(-1.0).validate().is_err());
    }

    #[test]
    fn rejects_duration_below_one_sample_period() {
        let mut req = request(1e-9);
        assert!(req.validate().is_err());

        // One sample period exactly is acceptable.
        req.duration_secs = 1.0 / req.sample_rate;
        assert!(req.validate().is_ok());
        assert_eq!(req.total_samples(), 1);
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut req = request(1.0);
        req.sample_rate = 0.0;
        assert!(req.validate().is_err());
    }
}
