//! Randomized noise mechanisms parameterized by a privacy budget.

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Exp, Normal};

use crate::error::{DpErr, Result};

/// A stateless noise generator with its scale fixed at construction.
///
/// Both variants draw i.i.d. per element; they differ in the distribution and
/// in how the budget calibrates the scale (the laplace variant ignores delta).
#[derive(Debug, Clone, Copy)]
pub enum NoiseMechanism {
    Laplace { scale: f64, exp: Exp<f64> },
    Gaussian { sigma: f64, normal: Normal<f64> },
}

impl NoiseMechanism {
    /// Laplace mechanism: `scale = sensitivity / epsilon`.
    ///
    /// # Errors
    /// Returns `DpErr::InvalidEpsilon` / `DpErr::InvalidSensitivity` for a
    /// non-positive budget.
    pub fn laplace(epsilon: f64, sensitivity: f64) -> Result<Self> {
        validate_epsilon(epsilon)?;
        validate_sensitivity(sensitivity)?;

        let scale = sensitivity / epsilon;
        let exp = Exp::new(1.0 / scale).map_err(|_| DpErr::InvalidEpsilon { got: epsilon })?;

        Ok(Self::Laplace { scale, exp })
    }

    /// Gaussian mechanism: `sigma = sensitivity * sqrt(2 ln(1.25/delta)) / epsilon`.
    ///
    /// # Errors
    /// Additionally returns `DpErr::InvalidDelta` unless `0 < delta < 1`.
    pub fn gaussian(epsilon: f64, delta: f64, sensitivity: f64) -> Result<Self> {
        validate_epsilon(epsilon)?;
        validate_sensitivity(sensitivity)?;
        if !delta.is_finite() || delta <= 0.0 || delta >= 1.0 {
            return Err(DpErr::InvalidDelta { got: delta });
        }

        let sigma = sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon;
        let normal = Normal::new(0.0, sigma).map_err(|_| DpErr::InvalidDelta { got: delta })?;

        Ok(Self::Gaussian { sigma, normal })
    }

    /// The mechanism's noise scale (laplace scale or gaussian sigma).
    pub fn scale(&self) -> f64 {
        match self {
            NoiseMechanism::Laplace { scale, .. } => *scale,
            NoiseMechanism::Gaussian { sigma, .. } => *sigma,
        }
    }

    /// Draws a noise tensor of the given shape.
    pub fn compute_noise<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> ArrayD<f32> {
        let len = shape.iter().product();
        let draws: Vec<f32> = match self {
            // A Laplace variate is the difference of two i.i.d. exponentials.
            NoiseMechanism::Laplace { exp, .. } => (0..len)
                .map(|_| (exp.sample(rng) - exp.sample(rng)) as f32)
                .collect(),
            NoiseMechanism::Gaussian { normal, .. } => {
                (0..len).map(|_| normal.sample(rng) as f32).collect()
            }
        };

        // `draws` has exactly `shape.iter().product()` elements.
        ArrayD::from_shape_vec(IxDyn(shape), draws).unwrap_or_else(|_| ArrayD::zeros(IxDyn(shape)))
    }
}

fn validate_epsilon(epsilon: f64) -> Result<()> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(DpErr::InvalidEpsilon { got: epsilon });
    }
    Ok(())
}

fn validate_sensitivity(sensitivity: f64) -> Result<()> {
    if !sensitivity.is_finite() || sensitivity <= 0.0 {
        return Err(DpErr::InvalidSensitivity { got: sensitivity });
    }
    Ok(())
}
