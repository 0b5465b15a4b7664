use std::{error::Error, fmt, io};

use parameters::ParamErr;
use privacy::DpErr;

/// The federation module's result type.
pub type Result<T> = std::result::Result<T, FederationErr>;

/// Round-engine failures. Everything here is fatal for the round or the run;
/// only telemetry reporting is absorbed locally (see the server unit).
#[derive(Debug)]
pub enum FederationErr {
    /// Invalid node configuration, rejected before any round starts.
    Config(String),
    /// Local optimization failed. Propagated to the orchestrator, never
    /// retried here.
    FatalTraining { round: usize, detail: String },
    Param(ParamErr),
    Privacy(DpErr),
    Io(io::Error),
}

impl fmt::Display for FederationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FederationErr::Config(msg) => write!(f, "invalid config: {msg}"),
            FederationErr::FatalTraining { round, detail } => {
                write!(f, "fatal training error at round {round}: {detail}")
            }
            FederationErr::Param(e) => write!(f, "parameter error: {e}"),
            FederationErr::Privacy(e) => write!(f, "privacy error: {e}"),
            FederationErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for FederationErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FederationErr::Param(e) => Some(e),
            FederationErr::Privacy(e) => Some(e),
            FederationErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParamErr> for FederationErr {
    fn from(value: ParamErr) -> Self {
        Self::Param(value)
    }
}

impl From<DpErr> for FederationErr {
    fn from(value: DpErr) -> Self {
        Self::Privacy(value)
    }
}

impl From<io::Error> for FederationErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
