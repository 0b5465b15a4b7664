use std::{error::Error, fmt, io, path::PathBuf};

/// The parameters module's result type.
pub type Result<T> = std::result::Result<T, ParamErr>;

/// Failures in the parameter data model, codec and checkpoint store.
#[derive(Debug)]
pub enum ParamErr {
    /// A reduced mapping carries a key the base mapping does not know.
    KeyMismatch {
        key: String,
    },
    /// Two tensors that must agree on shape do not.
    ShapeMismatch {
        key: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// An architecture descriptor names the same parameter twice.
    DuplicateName {
        name: String,
    },
    /// A parameter export was requested before any checkpoint was written.
    CheckpointMissing {
        dir: PathBuf,
    },
    /// A checkpoint blob could not be encoded or decoded.
    Encoding(String),
    Io(io::Error),
}

impl fmt::Display for ParamErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamErr::KeyMismatch { key } => {
                write!(f, "key mismatch: '{key}' is not part of the base mapping")
            }
            ParamErr::ShapeMismatch { key, got, expected } => write!(
                f,
                "shape mismatch for '{key}': got {got:?}, expected {expected:?}"
            ),
            ParamErr::DuplicateName { name } => {
                write!(f, "duplicate parameter name in architecture: '{name}'")
            }
            ParamErr::CheckpointMissing { dir } => {
                write!(f, "no checkpoint found under {}", dir.display())
            }
            ParamErr::Encoding(detail) => write!(f, "checkpoint encoding error: {detail}"),
            ParamErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ParamErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParamErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParamErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
