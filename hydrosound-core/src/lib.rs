//! # hydrosound-core
//!
//! Platform-agnostic acoustic capture core library.
//!
//! Streams a microphone channel into a self-describing TDMS-style
//! container under cooperative cancellation, and computes standardized
//! A-weighted sound levels from captured pressure waveforms. Hardware
//! backends implement the `AnalogInputChannel` trait and plug into the
//! generic `StreamRecorder`.
//!
//! ## Architecture
//!
//! ```text
//! hydrosound-core (this crate)
//! ├── traits/   ← AnalogInputChannel, SessionObserver
//! ├── models/   ← CaptureError, CaptureState, ChannelConfig, CaptureRequest, RecordingResult
//! ├── session/  ← StreamRecorder (polling loop, cancellation, state machine)
//! ├── storage/  ← TDMS container writer/reader, path resolver, JSON sidecar
//! └── dsp/      ← A-weighting filter design, weighted level computation
//! ```

pub mod dsp;
pub mod models;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use dsp::level::{
    compute_weighted_level, weighted_level_of_channel, LevelMeasurement, NO_SIGNAL_DB,
    REFERENCE_PRESSURE_PA,
};
pub use dsp::weighting::{AWeighting, Sos};
pub use models::channel::{ChannelConfig, Coupling, EngineeringUnit, ExcitationSource};
pub use models::error::CaptureError;
pub use models::request::{CaptureRequest, RecordingTags, WriteMode, DEFAULT_SAMPLE_RATE};
pub use models::result::{RecordingMetadata, RecordingResult};
pub use models::state::CaptureState;
pub use session::recorder::{SessionHandle, StreamRecorder};
pub use storage::path::{build_filename, build_filename_today, resolve_collision, CollisionPolicy};
pub use storage::tdms::{ContainerProperties, PropertyValue, TdmsFile, TdmsStreamWriter};
pub use traits::analog_input::{AcquisitionTiming, AnalogInputChannel};
pub use traits::session_observer::SessionObserver;
