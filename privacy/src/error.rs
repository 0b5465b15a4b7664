use std::{error::Error, fmt};

/// The privacy module's result type.
pub type Result<T> = std::result::Result<T, DpErr>;

/// Invalid privacy configuration. All variants are fatal at init time.
#[derive(Debug, Clone, PartialEq)]
pub enum DpErr {
    InvalidEpsilon { got: f64 },
    InvalidDelta { got: f64 },
    InvalidSensitivity { got: f64 },
    UnknownMode { got: String },
    UnknownMechanism { got: String },
}

impl fmt::Display for DpErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpErr::InvalidEpsilon { got } => {
                write!(f, "epsilon must be positive, got {got}")
            }
            DpErr::InvalidDelta { got } => {
                write!(f, "delta must lie in (0, 1) for the gaussian mechanism, got {got}")
            }
            DpErr::InvalidSensitivity { got } => {
                write!(f, "sensitivity must be positive, got {got}")
            }
            DpErr::UnknownMode { got } => {
                write!(f, "unknown dp mode '{got}', expected 'cdp' or 'ldp'")
            }
            DpErr::UnknownMechanism { got } => {
                write!(f, "unknown dp mechanism '{got}', expected 'laplace' or 'gaussian'")
            }
        }
    }
}

impl Error for DpErr {}
