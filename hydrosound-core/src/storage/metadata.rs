use std::fs;
use std::path::Path;

use crate::models::error::CaptureError;
use crate::models::result::RecordingMetadata;

/// Write recording metadata as a JSON sidecar file.
///
/// Creates `{recording_path}.meta.json` alongside the container.
pub fn write_sidecar(metadata: &RecordingMetadata, recording_path: &Path) -> Result<(), CaptureError> {
    let sidecar_path = sidecar_path(recording_path);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| CaptureError::Storage(format!("failed to serialize metadata: {e}")))?;
    fs::write(&sidecar_path, json)
        .map_err(|e| CaptureError::Storage(format!("failed to write metadata: {e}")))?;
    Ok(())
}

/// Read recording metadata from a JSON sidecar file.
pub fn read_sidecar(recording_path: &Path) -> Result<RecordingMetadata, CaptureError> {
    let sidecar_path = sidecar_path(recording_path);
    let json = fs::read_to_string(&sidecar_path)
        .map_err(|e| CaptureError::Storage(format!("failed to read metadata: {e}")))?;
    serde_json::from_str(&json)
        .map_err(|e| CaptureError::Storage(format!("failed to parse metadata: {e}")))
}

fn sidecar_path(recording_path: &Path) -> std::path::PathBuf {
    let mut name = recording_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta.json");
    recording_path.with_file_name(name)
}
