//! # hydrosound-sim
//!
//! Simulated analog-input backend for hydrosound-core.
//!
//! Provides:
//! - `SimulatedMicrophoneChannel`: a deterministic sine generator
//!   implementing `AnalogInputChannel`, paced by a scalable wall clock
//!
//! Used for development rigs without DAQ hardware and for integration
//! tests of the capture pipeline. A vendor-driver backend would live in
//! a sibling crate implementing the same trait.
//!
//! ## Usage
//! ```no_run
//! use hydrosound_core::session::recorder::StreamRecorder;
//! use hydrosound_sim::{SimulatedMicrophoneChannel, ToneProfile};
//!
//! let channel = SimulatedMicrophoneChannel::new(ToneProfile::default());
//! let mut recorder = StreamRecorder::new(channel);
//! ```

pub mod sim_channel;

pub use sim_channel::{SimulatedMicrophoneChannel, ToneProfile};
