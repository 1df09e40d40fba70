//! A CPU-based linear transformation layer (y = xW^T + b).
//!
//! Weight tensors are stored in an `[OutFeatures, InFeatures]` layout,
//! matching the standard layout of checkpoint formats like safetensors.

use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Standard deviation for normal weight initialization.
pub const INIT_STD: f32 = 0.02;

pub struct LinearLayer {
    /// Weights in `[out_features, in_features]` layout.
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl LinearLayer {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Self {
        if let Some(ref b) = bias {
            debug_assert_eq!(weight.shape()[0], b.len());
        }
        Self { weight, bias }
    }

    /// Creates a layer with normal-initialized weights and a zero bias.
    pub fn init(out_features: usize, in_features: usize, std: f32, rng: &mut StdRng) -> Result<Self> {
        let normal = Normal::new(0.0, std)?;
        let weight = Array2::random_using((out_features, in_features), normal, rng);
        let bias = Array1::zeros(out_features);
        Ok(Self::new(weight, Some(bias)))
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    /// Computes `x @ W^T + b` for a flattened `[rows, in_features]` input.
    pub fn matmul(&self, input: &ArrayView2<f32>) -> Array2<f32> {
        let mut output = input.dot(&self.weight.t());
        if let Some(ref bias) = self.bias {
            output += bias;
        }
        output
    }
}
