use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
};

use ndarray::{ArrayD, IxDyn};

use crate::error::{ParamErr, Result};

/// Where a tensor's buffer lives.
///
/// Mappings crossing the transport boundary must be `Cpu`; training may place
/// tensors on an accelerator, identified by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Cpu,
    Accelerator(usize),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Cpu => write!(f, "cpu"),
            Placement::Accelerator(ord) => write!(f, "accelerator:{ord}"),
        }
    }
}

/// A named parameter's value: a dynamic-shape f32 tensor plus its placement.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    data: ArrayD<f32>,
    placement: Placement,
}

impl TensorValue {
    /// Wraps an existing array with a placement tag.
    pub fn from_array(data: ArrayD<f32>, placement: Placement) -> Self {
        Self { data, placement }
    }

    /// Creates a zero-filled tensor on the CPU.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
            placement: Placement::Cpu,
        }
    }

    /// Creates a tensor on the CPU from a flat buffer.
    ///
    /// # Errors
    /// Returns `ParamErr::Encoding` if the buffer length does not match the shape.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| ParamErr::Encoding(e.to_string()))?;

        Ok(Self {
            data,
            placement: Placement::Cpu,
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    /// Copies the tensor to the requested placement.
    pub fn to_placement(&self, placement: Placement) -> Self {
        Self {
            data: self.data.clone(),
            placement,
        }
    }

    /// Returns the tensor's elements as a contiguous slice, copying only when
    /// the underlying layout is not standard.
    pub fn contiguous(&self) -> Cow<'_, [f32]> {
        match self.data.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(self.data.iter().copied().collect()),
        }
    }
}

/// A unique-keyed mapping from parameter name to tensor value.
///
/// Both the *full* mapping (every model parameter) and the *reduced* mapping
/// (adapter parameters only) use this representation; the distinction is a
/// matter of which keys are present. Iteration order is deterministic but
/// carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMapping {
    entries: BTreeMap<String, TensorValue>,
}

impl ParameterMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: TensorValue) -> Option<TensorValue> {
        self.entries.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&TensorValue> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TensorValue> {
        self.entries.get_mut(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, TensorValue)> for ParameterMapping {
    fn from_iter<I: IntoIterator<Item = (String, TensorValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
