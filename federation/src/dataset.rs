//! In-memory supervised dataset for one node's local partition.
//!
//! Partitioning policy is not decided here; each node resolves its own file
//! through the config path template.

use rand::{Rng, seq::SliceRandom};

use parameters::TensorValue;

use crate::error::{FederationErr, Result};

/// One supervised sample: a feature vector and a scalar target.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub x: Vec<f32>,
    pub y: f32,
}

/// A node's local dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    /// Creates a dataset from owned samples.
    ///
    /// # Errors
    /// Returns `FederationErr::Config` if the samples are empty or have
    /// inconsistent feature dimensions.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(FederationErr::Config("dataset must be non-empty".into()));
        }

        let dim = samples[0].x.len();
        for (i, sample) in samples.iter().enumerate() {
            if sample.x.len() != dim {
                return Err(FederationErr::Config(format!(
                    "sample {i}: expected {dim} features, got {}",
                    sample.x.len()
                )));
            }
        }

        Ok(Self { samples })
    }

    /// Loads a CSV file where each line is `x_0,...,x_{d-1},y`.
    ///
    /// # Errors
    /// Returns `FederationErr::Config` with the offending line on parse
    /// failure.
    pub fn from_csv(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FederationErr::Config(format!("cannot read dataset '{path}': {e}")))?;

        let mut samples = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut values = line
                .split(',')
                .map(|v| {
                    v.trim().parse::<f32>().map_err(|_| {
                        FederationErr::Config(format!(
                            "dataset line {i}: cannot parse '{v}' as f32"
                        ))
                    })
                })
                .collect::<Result<Vec<f32>>>()?;

            if values.len() < 2 {
                return Err(FederationErr::Config(format!(
                    "dataset line {i}: expected at least one feature and a target"
                )));
            }

            let y = values.pop().unwrap_or_default();
            samples.push(Sample { x: values, y });
        }

        Self::new(samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.samples[0].x.len()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.samples.shuffle(rng);
    }

    /// Iterates the samples in contiguous batches of at most `batch_size`.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = &[Sample]> {
        self.samples.chunks(batch_size.max(1))
    }

    /// Converts each sample into an ordered record of tensor fields, the form
    /// the privacy context noises for local DP.
    pub fn records(&self) -> Vec<Vec<TensorValue>> {
        self.samples
            .iter()
            .map(|sample| {
                let x = TensorValue::from_vec(&[sample.x.len()], sample.x.clone())
                    .unwrap_or_else(|_| TensorValue::zeros(&[sample.x.len()]));
                let y = TensorValue::from_vec(&[1], vec![sample.y])
                    .unwrap_or_else(|_| TensorValue::zeros(&[1]));
                vec![x, y]
            })
            .collect()
    }

    /// Rebuilds a dataset from noised records.
    ///
    /// # Errors
    /// Returns `FederationErr::Config` if a record does not have the (x, y)
    /// arity produced by [`Dataset::records`].
    pub fn from_records(records: &[Vec<TensorValue>]) -> Result<Self> {
        let samples = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let [x, y] = record.as_slice() else {
                    return Err(FederationErr::Config(format!(
                        "record {i}: expected (x, y) fields, got {}",
                        record.len()
                    )));
                };

                Ok(Sample {
                    x: x.contiguous().into_owned(),
                    y: y.contiguous().first().copied().unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(samples)
    }

    /// A deterministic synthetic linear dataset, used by the demo binary and
    /// the integration tests.
    pub fn synthetic(rows: usize, features: usize, seed: u64) -> Result<Self> {
        use rand::{SeedableRng, rngs::StdRng};
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(seed);
        // Unit-variance draws keep the SGD backend numerically tame.
        let normal = Normal::new(0.0, 1.0).map_err(|e| FederationErr::Config(e.to_string()))?;

        let samples = (0..rows)
            .map(|_| {
                let x: Vec<f32> = (0..features).map(|_| normal.sample(&mut rng) as f32).collect();
                let y = x.iter().sum::<f32>() * 0.5 + normal.sample(&mut rng) as f32 * 0.01;
                Sample { x, y }
            })
            .collect();

        Self::new(samples)
    }
}
