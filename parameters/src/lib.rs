//! Parameter data model for federated adapter tuning: named tensor mappings,
//! the reduced/full codec, and the per-node checkpoint store.

pub mod arch;
pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod mapping;

pub use arch::{Architecture, ParamSpec};
pub use checkpoint::CheckpointStore;
pub use error::{ParamErr, Result};
pub use mapping::{ParameterMapping, Placement, TensorValue};
