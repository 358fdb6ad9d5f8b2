use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while configuring, running, or finalizing a
/// capture session.
///
/// `Configuration`, `Device`, `Storage`, and `Collision` abort a session
/// before or during acquisition. `Finalize` is non-fatal: the samples are
/// already durable when metadata append fails, so it is surfaced as a
/// warning on an otherwise successful result. `FlushTimeout` means the
/// hardware did not report completion within the guard margin; samples
/// flushed up to that point remain valid.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("destination already exists: {0}")]
    Collision(PathBuf),

    #[error("finalize failed: {0}")]
    Finalize(String),

    #[error("hardware flush did not complete within the guard margin")]
    FlushTimeout,
}
