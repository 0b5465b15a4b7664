//! Bridges between a model's full parameter mapping and the reduced mapping
//! actually shipped between nodes, and between device placements and the
//! placement-neutral form used in transit.

use crate::{
    arch::Architecture,
    error::{ParamErr, Result},
    mapping::{ParameterMapping, Placement},
};

/// Extracts the reduced (adapter-only) mapping from a full mapping.
///
/// The key set comes from the architecture descriptor, never from the tensor
/// contents.
///
/// # Errors
/// Returns `ParamErr::KeyMismatch` if the full mapping lacks an adapter key.
pub fn extract_reduced(arch: &Architecture, full: &ParameterMapping) -> Result<ParameterMapping> {
    arch.adapter_names()
        .map(|name| {
            let value = full.get(name).ok_or_else(|| ParamErr::KeyMismatch {
                key: name.to_string(),
            })?;
            Ok((name.to_string(), value.clone()))
        })
        .collect()
}

/// Merges an incoming reduced mapping into a copy of `base`.
///
/// Every incoming entry overwrites the corresponding base entry; base keys
/// absent from `incoming` are left untouched. The merge is all-or-nothing:
/// validation runs before any write, so on error the returned mapping never
/// exists and `base` is unchanged.
///
/// # Errors
/// Returns `ParamErr::KeyMismatch` for an incoming key absent from `base` and
/// `ParamErr::ShapeMismatch` for shape skew on a shared key.
pub fn merge_reduced(
    base: &ParameterMapping,
    incoming: &ParameterMapping,
) -> Result<ParameterMapping> {
    for (key, value) in incoming.iter() {
        let current = base.get(key).ok_or_else(|| ParamErr::KeyMismatch {
            key: key.to_string(),
        })?;

        if current.shape() != value.shape() {
            return Err(ParamErr::ShapeMismatch {
                key: key.to_string(),
                got: value.shape().to_vec(),
                expected: current.shape().to_vec(),
            });
        }
    }

    let mut merged = base.clone();
    for (key, value) in incoming.iter() {
        merged.insert(key, value.clone());
    }

    Ok(merged)
}

/// Copies every tensor in the mapping to the requested placement.
pub fn to_placement(mapping: &ParameterMapping, placement: Placement) -> ParameterMapping {
    mapping
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_placement(placement)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::TensorValue;

    fn full_mapping(arch: &Architecture, fill: f32) -> ParameterMapping {
        arch.specs()
            .iter()
            .map(|spec| {
                let len: usize = spec.shape.iter().product();
                let value = TensorValue::from_vec(&spec.shape, vec![fill; len]).unwrap();
                (spec.name.clone(), value)
            })
            .collect()
    }

    #[test]
    fn extract_then_merge_is_identity_on_adapter_keys() {
        let arch = Architecture::linear_adapter(3);
        let full = full_mapping(&arch, 0.5);

        let reduced = extract_reduced(&arch, &full).unwrap();
        let merged = merge_reduced(&full, &reduced).unwrap();

        for name in arch.adapter_names() {
            assert_eq!(merged.get(name), full.get(name));
        }
        assert_eq!(merged, full);
    }

    #[test]
    fn extract_uses_the_descriptor_key_set() {
        let arch = Architecture::linear_adapter(3);
        let full = full_mapping(&arch, 1.0);

        let reduced = extract_reduced(&arch, &full).unwrap();

        let mut expected: Vec<_> = arch.adapter_names().collect();
        expected.sort_unstable();
        let got: Vec<_> = reduced.keys().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn merge_rejects_unknown_keys() {
        let arch = Architecture::linear_adapter(3);
        let full = full_mapping(&arch, 1.0);

        let mut incoming = ParameterMapping::new();
        incoming.insert("head.adapter.weight", TensorValue::zeros(&[3]));
        incoming.insert("rogue.weight", TensorValue::zeros(&[3]));

        assert!(matches!(
            merge_reduced(&full, &incoming),
            Err(ParamErr::KeyMismatch { key }) if key == "rogue.weight"
        ));
    }

    #[test]
    fn merge_rejects_shape_skew() {
        let arch = Architecture::linear_adapter(3);
        let full = full_mapping(&arch, 1.0);

        let mut incoming = ParameterMapping::new();
        incoming.insert("head.adapter.weight", TensorValue::zeros(&[7]));

        assert!(matches!(
            merge_reduced(&full, &incoming),
            Err(ParamErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn merge_leaves_untouched_keys_alone() {
        let arch = Architecture::linear_adapter(2);
        let full = full_mapping(&arch, 1.0);

        let mut incoming = ParameterMapping::new();
        incoming.insert(
            "head.adapter.bias",
            TensorValue::from_vec(&[1], vec![9.0]).unwrap(),
        );

        let merged = merge_reduced(&full, &incoming).unwrap();

        assert_eq!(merged.get("encoder.weight"), full.get("encoder.weight"));
        assert_eq!(
            merged.get("head.adapter.weight"),
            full.get("head.adapter.weight")
        );
        assert_eq!(
            merged.get("head.adapter.bias").unwrap().contiguous()[0],
            9.0
        );
    }

    #[test]
    fn to_placement_retags_every_tensor() {
        let arch = Architecture::linear_adapter(2);
        let full = full_mapping(&arch, 1.0);

        let moved = to_placement(&full, Placement::Cpu);

        assert_eq!(moved.len(), full.len());
        for (_, value) in moved.iter() {
            assert_eq!(value.placement(), Placement::Cpu);
        }
    }
}
