//! Process-wide differential-privacy gate.
//!
//! Built once at startup from configuration and passed by handle into every
//! component that needs it; read-only after `init`. Central and local DP
//! differ only in where noise is applied (aggregated mapping vs raw samples),
//! so both entry points share one mechanism instance.

use std::str::FromStr;

use log::info;
use serde::Deserialize;

use parameters::{ParameterMapping, TensorValue};

use crate::{
    error::{DpErr, Result},
    mechanism::NoiseMechanism,
};

/// Where noise is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DpMode {
    /// Noise on the aggregated parameter update, at the server.
    Central,
    /// Noise on raw per-sample data, at the client, before any training.
    Local,
}

impl FromStr for DpMode {
    type Err = DpErr;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cdp" | "central" => Ok(DpMode::Central),
            "ldp" | "local" => Ok(DpMode::Local),
            other => Err(DpErr::UnknownMode { got: other.into() }),
        }
    }
}

impl TryFrom<String> for DpMode {
    type Error = DpErr;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Which noise distribution to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum MechanismKind {
    Laplace,
    Gaussian,
}

impl FromStr for MechanismKind {
    type Err = DpErr;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "laplace" => Ok(MechanismKind::Laplace),
            "gaussian" => Ok(MechanismKind::Gaussian),
            other => Err(DpErr::UnknownMechanism { got: other.into() }),
        }
    }
}

impl TryFrom<String> for MechanismKind {
    type Error = DpErr;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Privacy settings as read from the configuration surface.
///
/// With `enabled = false` the mode and mechanism fields are never consulted.
#[derive(Debug, Clone, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: Option<DpMode>,
    #[serde(default)]
    pub mechanism: Option<MechanismKind>,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_delta")]
    pub delta: f64,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_delta() -> f64 {
    1e-5
}

fn default_sensitivity() -> f64 {
    1.0
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: None,
            mechanism: None,
            epsilon: default_epsilon(),
            delta: default_delta(),
            sensitivity: default_sensitivity(),
        }
    }
}

impl PrivacyConfig {
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// The per-process privacy state: a mode and a mechanism, or nothing.
#[derive(Debug, Clone, Copy)]
pub struct PrivacyContext {
    mode: Option<DpMode>,
    mechanism: Option<NoiseMechanism>,
}

impl PrivacyContext {
    /// Validates the configuration and constructs the context.
    ///
    /// # Errors
    /// Returns `DpErr::UnknownMode` / `DpErr::UnknownMechanism` when enabled
    /// without a valid mode or mechanism, and budget-validation errors from
    /// the mechanism constructors.
    pub fn init(config: &PrivacyConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self {
                mode: None,
                mechanism: None,
            });
        }

        let mode = config.mode.ok_or_else(|| DpErr::UnknownMode {
            got: "<unset>".into(),
        })?;
        let kind = config.mechanism.ok_or_else(|| DpErr::UnknownMechanism {
            got: "<unset>".into(),
        })?;

        let mechanism = match kind {
            MechanismKind::Laplace => NoiseMechanism::laplace(config.epsilon, config.sensitivity)?,
            MechanismKind::Gaussian => {
                NoiseMechanism::gaussian(config.epsilon, config.delta, config.sensitivity)?
            }
        };

        info!(
            mode = format!("{mode:?}"),
            mechanism = format!("{kind:?}"),
            epsilon = config.epsilon,
            scale = mechanism.scale();
            "differential privacy enabled"
        );

        Ok(Self {
            mode: Some(mode),
            mechanism: Some(mechanism),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.mechanism.is_some()
    }

    pub fn is_central(&self) -> bool {
        self.mode == Some(DpMode::Central)
    }

    pub fn is_local(&self) -> bool {
        self.mode == Some(DpMode::Local)
    }

    /// Adds mechanism noise to every entry of a mapping.
    ///
    /// The returned mapping has the same key set, shapes and placements as
    /// the input; when disabled this is a plain clone.
    pub fn apply_to_mapping(&self, mapping: &ParameterMapping) -> ParameterMapping {
        let Some(mechanism) = &self.mechanism else {
            return mapping.clone();
        };

        let mut rng = rand::rng();
        mapping
            .iter()
            .map(|(name, value)| {
                let noise = mechanism.compute_noise(value.shape(), &mut rng);
                let noisy = TensorValue::from_array(noise + value.data(), value.placement());
                (name.to_string(), noisy)
            })
            .collect()
    }

    /// Adds mechanism noise to every field of every record.
    ///
    /// Record order and arity are preserved. Used for local DP on raw data
    /// rather than on gradients.
    pub fn apply_to_samples(&self, samples: &[Vec<TensorValue>]) -> Vec<Vec<TensorValue>> {
        let Some(mechanism) = &self.mechanism else {
            return samples.to_vec();
        };

        let mut rng = rand::rng();
        samples
            .iter()
            .map(|record| {
                record
                    .iter()
                    .map(|field| {
                        let noise = mechanism.compute_noise(field.shape(), &mut rng);
                        TensorValue::from_array(noise + field.data(), field.placement())
                    })
                    .collect()
            })
            .collect()
    }
}
