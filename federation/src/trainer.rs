//! The seam between the round engine and the numerical training backend.
//!
//! The forward/backward pass and optimizer are external collaborators; the
//! bundled [`SgdBackend`] is a reference implementation over the linear
//! adapter architecture so the engine is executable and testable end to end.

use std::{
    collections::BTreeMap,
    error::Error,
    fmt,
    num::NonZeroUsize,
};

use rand::{SeedableRng, rngs::StdRng};

use crate::{dataset::Dataset, model::Model};

/// A backend-local training failure. The owning unit turns this into a
/// fatal, round-tagged error; backends never retry.
#[derive(Debug)]
pub struct TrainingFault(pub String);

impl fmt::Display for TrainingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for TrainingFault {}

/// Bookkeeping the reporting layer reads; the server pins both counters to
/// the round index for continuity across rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainerState {
    pub epoch: usize,
    pub global_step: usize,
}

/// A node's local optimization backend.
pub trait TrainerBackend {
    /// Runs local optimization to completion for the configured number of
    /// epochs. Blocking.
    ///
    /// # Returns
    /// The per-epoch training losses.
    fn train(&mut self, model: &mut Model) -> Result<Vec<f32>, TrainingFault>;

    /// Evaluates the model over this backend's dataset.
    fn evaluate(&mut self, model: &Model) -> BTreeMap<String, f64>;

    fn state(&self) -> &TrainerState;

    fn state_mut(&mut self) -> &mut TrainerState;
}

/// Builds a fresh backend bound to a (possibly noised) dataset partition.
/// Clients invoke this every round: optimizer state is never carried over.
pub type TrainerFactory = Box<dyn Fn(&Dataset) -> Box<dyn TrainerBackend> + Send>;

/// Mini-batch SGD on the linear adapter head (`y = w . x + b`), with the
/// encoder block left frozen.
pub struct SgdBackend {
    dataset: Dataset,
    epochs: usize,
    batch_size: NonZeroUsize,
    learning_rate: f32,
    rng: StdRng,
    state: TrainerState,
}

impl SgdBackend {
    /// Creates a backend over an owned dataset partition.
    ///
    /// # Arguments
    /// * `dataset` - The local partition this backend trains or evaluates on.
    /// * `epochs` - Full passes over the partition per `train` call.
    /// * `batch_size` - Mini-batch size.
    /// * `learning_rate` - SGD step size.
    /// * `seed` - Shuffling seed; `None` seeds from the OS.
    pub fn new(
        dataset: Dataset,
        epochs: usize,
        batch_size: NonZeroUsize,
        learning_rate: f32,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            dataset,
            epochs,
            batch_size,
            learning_rate,
            rng,
            state: TrainerState::default(),
        }
    }

    fn head(model: &Model, name: &str, dim: usize) -> Result<Vec<f32>, TrainingFault> {
        let tensor = model
            .tensor(name)
            .ok_or_else(|| TrainingFault(format!("model has no '{name}' parameter")))?;

        if tensor.len() != dim {
            return Err(TrainingFault(format!(
                "'{name}' has {} elements, dataset expects {dim}",
                tensor.len()
            )));
        }

        Ok(tensor.contiguous().into_owned())
    }

    fn predict(w: &[f32], b: f32, x: &[f32]) -> f32 {
        w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f32>() + b
    }

    fn epoch_step(&mut self, model: &mut Model) -> Result<f32, TrainingFault> {
        let dim = self.dataset.feature_dim();
        self.dataset.shuffle(&mut self.rng);

        let mut epoch_loss = 0.0;
        let mut batches = 0;

        // Owned copies per batch keep the borrow on `model` short.
        for batch in self.dataset.clone().batches(self.batch_size.get()) {
            let w = Self::head(model, "head.adapter.weight", dim)?;
            let b = Self::head(model, "head.adapter.bias", 1)?[0];

            let mut grad_w = vec![0.0f32; dim];
            let mut grad_b = 0.0f32;
            let mut loss = 0.0f32;

            for sample in batch {
                let err = Self::predict(&w, b, &sample.x) - sample.y;
                loss += err * err;
                for (gw, xi) in grad_w.iter_mut().zip(&sample.x) {
                    *gw += err * xi;
                }
                grad_b += err;
            }

            let n = batch.len() as f32;
            let lr = self.learning_rate;

            let weight = model
                .tensor_mut("head.adapter.weight")
                .ok_or_else(|| TrainingFault("missing 'head.adapter.weight'".into()))?;
            for (wi, gw) in weight.data_mut().iter_mut().zip(&grad_w) {
                *wi -= lr * gw / n;
            }

            let bias = model
                .tensor_mut("head.adapter.bias")
                .ok_or_else(|| TrainingFault("missing 'head.adapter.bias'".into()))?;
            for bi in bias.data_mut().iter_mut() {
                *bi -= lr * grad_b / n;
            }

            epoch_loss += loss / n;
            batches += 1;
            self.state.global_step += 1;
        }

        Ok(epoch_loss / batches.max(1) as f32)
    }
}

impl TrainerBackend for SgdBackend {
    fn train(&mut self, model: &mut Model) -> Result<Vec<f32>, TrainingFault> {
        let mut losses = Vec::with_capacity(self.epochs);

        for _ in 0..self.epochs {
            losses.push(self.epoch_step(model)?);
            self.state.epoch += 1;
        }

        Ok(losses)
    }

    fn evaluate(&mut self, model: &Model) -> BTreeMap<String, f64> {
        let dim = self.dataset.feature_dim();
        let mut metrics = BTreeMap::new();

        let (Ok(w), Ok(b)) = (
            Self::head(model, "head.adapter.weight", dim),
            Self::head(model, "head.adapter.bias", 1).map(|b| b[0]),
        ) else {
            metrics.insert("eval_loss".into(), f64::NAN);
            return metrics;
        };

        let loss: f64 = self
            .dataset
            .samples()
            .iter()
            .map(|sample| {
                let err = (Self::predict(&w, b, &sample.x) - sample.y) as f64;
                err * err
            })
            .sum::<f64>()
            / self.dataset.len() as f64;

        metrics.insert("eval_loss".into(), loss);
        metrics.insert("eval_samples".into(), self.dataset.len() as f64);
        metrics
    }

    fn state(&self) -> &TrainerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TrainerState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parameters::Architecture;

    use super::*;

    fn backend(seed: u64) -> SgdBackend {
        let dataset = Dataset::synthetic(32, 3, seed).unwrap();
        SgdBackend::new(
            dataset,
            5,
            NonZeroUsize::new(8).unwrap(),
            0.05,
            Some(seed),
        )
    }

    #[test]
    fn training_reduces_the_loss() {
        let mut model = Model::init(Arc::new(Architecture::linear_adapter(3)), Some(1));
        let mut trainer = backend(2);

        let before = trainer.evaluate(&model)["eval_loss"];
        trainer.train(&mut model).unwrap();
        let after = trainer.evaluate(&model)["eval_loss"];

        assert!(after < before, "loss did not improve: {before} -> {after}");
    }

    #[test]
    fn train_reports_one_loss_per_epoch() {
        let mut model = Model::init(Arc::new(Architecture::linear_adapter(3)), Some(1));
        let mut trainer = backend(3);

        let losses = trainer.train(&mut model).unwrap();
        assert_eq!(losses.len(), 5);
        assert_eq!(trainer.state().epoch, 5);
    }

    #[test]
    fn dimension_skew_is_a_training_fault() {
        // 2-feature model against a 3-feature dataset.
        let mut model = Model::init(Arc::new(Architecture::linear_adapter(2)), Some(1));
        let mut trainer = backend(4);

        assert!(trainer.train(&mut model).is_err());
    }
}
