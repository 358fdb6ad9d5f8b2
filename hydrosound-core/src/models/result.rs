use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::request::RecordingTags;

/// Result delivered when a capture session reaches a terminal state with
/// durable data (completed or cancelled mid-capture).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,

    /// Seconds of signal actually captured (`samples_written / sample_rate`).
    pub duration_secs: f64,

    pub samples_written: u64,

    pub sample_rate: f64,

    /// True when the session was cancelled before the requested duration.
    pub cancelled: bool,

    pub metadata: RecordingMetadata,

    /// SHA-256 of the finished container file.
    pub checksum: String,

    /// Set when metadata finalization failed after the samples were
    /// already durable. The recording itself is still valid.
    pub finalize_warning: Option<String>,
}

/// Metadata stored in the JSON sidecar next to a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    pub duration_secs: f64,
    pub samples_written: u64,
    pub sample_rate: f64,
    pub checksum: String,
    pub microphone_id: String,
    pub sensitivity_mv_per_pa: f64,
    pub tags: RecordingTags,
}

impl RecordingMetadata {
    pub fn new(
        file_path: &str,
        duration_secs: f64,
        samples_written: u64,
        sample_rate: f64,
        checksum: &str,
        microphone_id: &str,
        sensitivity_mv_per_pa: f64,
        tags: RecordingTags,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Local::now().to_rfc3339(),
            file_path: file_path.to_string(),
            duration_secs,
            samples_written,
            sample_rate,
            checksum: checksum.to_string(),
            microphone_id: microphone_id.to_string(),
            sensitivity_mv_per_pa,
            tags,
        }
    }
}
