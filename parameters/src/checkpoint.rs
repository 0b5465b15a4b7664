//! Durable full-mapping snapshots, one per node per round.
//!
//! The store only guarantees read-after-write consistency at a node-private
//! path; earlier rounds are superseded by later ones but not deleted.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use safetensors::{
    SafeTensors, serialize,
    tensor::{Dtype, TensorView},
};

use crate::{
    error::{ParamErr, Result},
    mapping::{ParameterMapping, TensorValue},
};

const CHECKPOINT_PREFIX: &str = "round-";
const CHECKPOINT_SUFFIX: &str = ".safetensors";

/// Checkpoint storage scoped to one node.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (creating if needed) the node-private checkpoint directory
    /// `{output_dir}/node{rank}_tmp`.
    ///
    /// # Errors
    /// Returns `ParamErr::Io` if the directory cannot be created.
    pub fn new(output_dir: &Path, rank: usize) -> Result<Self> {
        let dir = output_dir.join(format!("node{rank}_tmp"));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn round_path(&self, round: usize) -> PathBuf {
        self.dir
            .join(format!("{CHECKPOINT_PREFIX}{round:04}{CHECKPOINT_SUFFIX}"))
    }

    /// Persists a full mapping as this round's checkpoint.
    ///
    /// # Errors
    /// Returns `ParamErr::Encoding` if serialization fails, `ParamErr::Io` on
    /// write failure.
    pub fn save(&self, round: usize, mapping: &ParameterMapping) -> Result<PathBuf> {
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = mapping
            .iter()
            .map(|(name, value)| {
                let bytes = bytemuck::cast_slice::<f32, u8>(&value.contiguous()).to_vec();
                (name.to_string(), value.shape().to_vec(), bytes)
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map_err(|e| ParamErr::Encoding(e.to_string()))?;
                Ok((name.as_str(), view))
            })
            .collect::<Result<Vec<_>>>()?;

        let blob = serialize(views, &None).map_err(|e| ParamErr::Encoding(e.to_string()))?;

        let path = self.round_path(round);
        fs::write(&path, blob)?;

        debug!(round = round, path = path.display().to_string(); "checkpoint written");
        Ok(path)
    }

    /// Returns the highest round with a checkpoint on disk, if any.
    pub fn latest_round(&self) -> Result<Option<usize>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(round) = parse_round(&name.to_string_lossy()) else {
                continue;
            };
            latest = latest.max(Some(round));
        }

        Ok(latest)
    }

    /// Reads the most recent checkpoint back into memory.
    ///
    /// # Returns
    /// The round the checkpoint was written for and the full mapping.
    ///
    /// # Errors
    /// Returns `ParamErr::CheckpointMissing` when no checkpoint exists yet.
    pub fn load_latest(&self) -> Result<(usize, ParameterMapping)> {
        let round = self
            .latest_round()?
            .ok_or_else(|| ParamErr::CheckpointMissing {
                dir: self.dir.clone(),
            })?;

        let blob = fs::read(self.round_path(round))?;
        let tensors =
            SafeTensors::deserialize(&blob).map_err(|e| ParamErr::Encoding(e.to_string()))?;

        let mut mapping = ParameterMapping::new();
        for (name, view) in tensors.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(ParamErr::Encoding(format!(
                    "tensor '{name}' has dtype {:?}, expected F32",
                    view.dtype()
                )));
            }

            let values = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            mapping.insert(name, TensorValue::from_vec(view.shape(), values)?);
        }

        Ok((round, mapping))
    }
}

fn parse_round(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?
        .parse()
        .ok()
}
