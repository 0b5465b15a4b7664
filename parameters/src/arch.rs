use std::collections::BTreeSet;

use crate::error::{ParamErr, Result};

/// One parameter slot in a model architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    /// Whether the parameter belongs to the trainable adapter set. Frozen
    /// base parameters are never exchanged between nodes.
    pub trainable: bool,
}

impl ParamSpec {
    pub fn frozen(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
            trainable: false,
        }
    }

    pub fn adapter(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
            trainable: true,
        }
    }
}

/// Explicit descriptor of every parameter a model architecture owns.
///
/// The reduced/adapter key set is defined here and only here; the codec never
/// infers it from tensor contents. By construction the adapter key set is a
/// subset of the full key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Architecture {
    specs: Vec<ParamSpec>,
}

impl Architecture {
    /// Builds a descriptor from an explicit parameter list.
    ///
    /// # Errors
    /// Returns `ParamErr::DuplicateName` if two specs share a name.
    pub fn new(specs: Vec<ParamSpec>) -> Result<Self> {
        let mut seen = BTreeSet::new();

        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(ParamErr::DuplicateName {
                    name: spec.name.clone(),
                });
            }
        }

        Ok(Self { specs })
    }

    /// A frozen encoder block plus a trainable linear adapter head.
    ///
    /// This is the reference architecture used by the bundled SGD backend:
    /// `head.adapter.weight` ([features]) and `head.adapter.bias` ([1]) are
    /// the exchanged adapter set, the encoder weights stay local.
    pub fn linear_adapter(features: usize) -> Self {
        let specs = vec![
            ParamSpec::frozen("encoder.weight", vec![features, features]),
            ParamSpec::frozen("encoder.bias", vec![features]),
            ParamSpec::adapter("head.adapter.weight", vec![features]),
            ParamSpec::adapter("head.adapter.bias", vec![1]),
        ];

        // Names above are distinct, `new` cannot fail.
        Self { specs }
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Names of every parameter, frozen and trainable alike.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Names of the trainable adapter parameters.
    pub fn adapter_names(&self) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter(|s| s.trainable)
            .map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let specs = vec![
            ParamSpec::frozen("w", vec![2]),
            ParamSpec::adapter("w", vec![2]),
        ];

        assert!(matches!(
            Architecture::new(specs),
            Err(ParamErr::DuplicateName { .. })
        ));
    }

    #[test]
    fn adapter_names_are_a_subset_of_param_names() {
        let arch = Architecture::linear_adapter(4);
        let all: Vec<_> = arch.param_names().collect();

        for name in arch.adapter_names() {
            assert!(all.contains(&name));
        }
        assert_eq!(arch.adapter_names().count(), 2);
    }
}
