//! Differential-privacy noise for federated parameter exchange: calibrated
//! mechanisms plus the process-wide context deciding where they apply.

pub mod context;
pub mod error;
pub mod mechanism;

pub use context::{DpMode, MechanismKind, PrivacyConfig, PrivacyContext};
pub use error::{DpErr, Result};
pub use mechanism::NoiseMechanism;
