//! Owned model handle: an architecture descriptor plus its full parameter
//! mapping. Parameter updates never mutate tensors in place across a
//! replacement boundary; units construct a fresh handle, merge, then swap.

use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use parameters::{Architecture, ParameterMapping, Placement, TensorValue, codec};

/// One node's in-memory model.
#[derive(Debug, Clone)]
pub struct Model {
    arch: Arc<Architecture>,
    params: ParameterMapping,
}

impl Model {
    /// Builds a model with deterministic initial parameters.
    ///
    /// Frozen base parameters are drawn from a small seeded normal (every
    /// node starts from the same base when given the same seed); trainable
    /// adapter parameters start at zero, a neutral adapter.
    pub fn init(arch: Arc<Architecture>, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        // Normal(0, 0.02) is always constructible.
        let normal = Normal::new(0.0f32, 0.02).unwrap();

        let params = arch
            .specs()
            .iter()
            .map(|spec| {
                let value = if spec.trainable {
                    TensorValue::zeros(&spec.shape)
                } else {
                    let len: usize = spec.shape.iter().product();
                    let draws = (0..len).map(|_| normal.sample(&mut rng)).collect();
                    TensorValue::from_vec(&spec.shape, draws)
                        .unwrap_or_else(|_| TensorValue::zeros(&spec.shape))
                };
                (spec.name.clone(), value)
            })
            .collect();

        Self { arch, params }
    }

    pub fn arch(&self) -> &Arc<Architecture> {
        &self.arch
    }

    /// The full parameter mapping, frozen and trainable alike.
    pub fn full_mapping(&self) -> &ParameterMapping {
        &self.params
    }

    /// Extracts the adapter-only mapping via the codec.
    pub fn reduced_mapping(&self) -> parameters::Result<ParameterMapping> {
        codec::extract_reduced(&self.arch, &self.params)
    }

    pub fn tensor(&self, name: &str) -> Option<&TensorValue> {
        self.params.get(name)
    }

    pub fn tensor_mut(&mut self, name: &str) -> Option<&mut TensorValue> {
        self.params.get_mut(name)
    }

    /// Client-side ingest: merges an incoming reduced mapping into the full
    /// mapping. All-or-nothing; on error the model is unchanged.
    pub fn apply_reduced(&mut self, incoming: &ParameterMapping) -> parameters::Result<()> {
        self.params = codec::merge_reduced(&self.params, incoming)?;
        Ok(())
    }

    /// Server-side ingest: merges against the *current adapter-only* set, so
    /// an incoming key outside the adapter set is rejected even if the full
    /// mapping knows it. The server never exchanges base weights.
    pub fn apply_reduced_adapter(&mut self, incoming: &ParameterMapping) -> parameters::Result<()> {
        let current = codec::extract_reduced(&self.arch, &self.params)?;
        let merged = codec::merge_reduced(&current, incoming)?;
        self.params = codec::merge_reduced(&self.params, &merged)?;
        Ok(())
    }

    /// Copies every parameter to the requested placement.
    pub fn to_placement(&mut self, placement: Placement) {
        self.params = codec::to_placement(&self.params, placement);
    }
}
