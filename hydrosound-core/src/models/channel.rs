use serde::{Deserialize, Serialize};

/// Excitation source for IEPE-powered sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExcitationSource {
    Internal,
    External,
    None,
}

/// Input coupling mode. AC coupling removes the IEPE bias voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Coupling {
    Ac,
    Dc,
}

/// Engineering unit of the acquired samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineeringUnit {
    Pascal,
    Volt,
}

impl EngineeringUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pascal => "Pa",
            Self::Volt => "V",
        }
    }
}

/// Description of the microphone and the hardware analog-input channel
/// it is wired to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Physical channel identifier, e.g. `cDAQ1Mod1/ai0`.
    pub physical_channel: String,

    /// Microphone sensitivity in mV/Pa. Must be positive.
    pub sensitivity_mv_per_pa: f64,

    /// Optional microphone serial / label, stored as container metadata.
    pub microphone_id: String,

    /// IEPE excitation source (default: internal).
    pub excitation_source: ExcitationSource,

    /// IEPE excitation current in amperes (default: 4 mA).
    pub excitation_current_a: f64,

    /// Input coupling (default: AC, recommended with IEPE).
    pub coupling: Coupling,

    /// Unit the driver scales samples into (default: Pascal).
    pub unit: EngineeringUnit,
}

impl ChannelConfig {
    pub fn new(physical_channel: impl Into<String>, sensitivity_mv_per_pa: f64) -> Self {
        Self {
            physical_channel: physical_channel.into(),
            sensitivity_mv_per_pa,
            microphone_id: String::new(),
            excitation_source: ExcitationSource::Internal,
            excitation_current_a: 0.004,
            coupling: Coupling::Ac,
            unit: EngineeringUnit::Pascal,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.physical_channel.trim().is_empty() {
            return Err("physical channel must not be empty".into());
        }
        if self.sensitivity_mv_per_pa <= 0.0 {
            return Err(format!(
                "sensitivity must be positive, got {} mV/Pa",
                self.sensitivity_mv_per_pa
            ));
        }
        if self.excitation_current_a < 0.0 {
            return Err("excitation current must not be negative".into());
        }
        Ok(())
    }
}
