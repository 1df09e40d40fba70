//! Activation functions and softmax operations.

use std::str::FromStr;

use libm::{erff, tanhf};
use ndarray::{parallel::prelude::*, Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

/// Minimum array size for parallel execution.
pub const PARALLEL_THRESHOLD: usize = 16_384;

const SQRT_2_INV: f32 = 0.7071067811865475;
const SQRT_2_OVER_PI: f32 = 0.7978845608;
const GELU_COEFF: f32 = 0.044715;

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[serde(alias = "gelu")]
    Gelu,
    /// Tanh-approximated GELU, the SigLIP MLP activation.
    #[serde(alias = "gelu_new", alias = "gelu_pytorch_tanh")]
    GeluNew,
    #[serde(alias = "relu")]
    Relu,
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gelu" => Ok(Activation::Gelu),
            "gelu_new" | "gelu_fast" | "gelu_pytorch_tanh" => Ok(Activation::GeluNew),
            "relu" => Ok(Activation::Relu),
            _ => Err(format!("unknown activation function: {}", s)),
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Activation::GeluNew
    }
}

#[inline(always)]
pub fn gelu_scalar(x: f32) -> f32 {
    0.5 * x * (1.0 + erff(x * SQRT_2_INV))
}

#[inline(always)]
pub fn gelu_new_scalar(x: f32) -> f32 {
    let x_cubed = x * x * x;
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x_cubed);
    0.5 * x * (1.0 + tanhf(inner))
}

#[inline(always)]
pub fn relu_scalar(x: f32) -> f32 {
    x.max(0.0)
}

fn apply_activation_slice(slice: &mut [f32], activation: Activation, use_parallel: bool) {
    match (activation, use_parallel) {
        (Activation::Gelu, true) => slice.par_iter_mut().for_each(|x| *x = gelu_scalar(*x)),
        (Activation::Gelu, false) => slice.iter_mut().for_each(|x| *x = gelu_scalar(*x)),
        (Activation::GeluNew, true) => slice.par_iter_mut().for_each(|x| *x = gelu_new_scalar(*x)),
        (Activation::GeluNew, false) => slice.iter_mut().for_each(|x| *x = gelu_new_scalar(*x)),
        (Activation::Relu, true) => slice.par_iter_mut().for_each(|x| *x = relu_scalar(*x)),
        (Activation::Relu, false) => slice.iter_mut().for_each(|x| *x = relu_scalar(*x)),
    }
}

/// Applies activation in-place to a 2D array.
pub fn apply_activation_2d(arr: &mut Array2<f32>, activation: Activation) {
    let use_parallel = arr.len() >= PARALLEL_THRESHOLD;
    if let Some(slice) = arr.as_slice_mut() {
        apply_activation_slice(slice, activation, use_parallel);
    } else {
        match activation {
            Activation::Gelu => arr.mapv_inplace(gelu_scalar),
            Activation::GeluNew => arr.mapv_inplace(gelu_new_scalar),
            Activation::Relu => arr.mapv_inplace(relu_scalar),
        }
    }
}

/// Applies activation in-place to a 3D array.
pub fn apply_activation(arr: &mut Array3<f32>, activation: Activation) {
    let use_parallel = arr.len() >= PARALLEL_THRESHOLD;
    if let Some(slice) = arr.as_slice_mut() {
        apply_activation_slice(slice, activation, use_parallel);
    } else {
        match activation {
            Activation::Gelu => arr.mapv_inplace(gelu_scalar),
            Activation::GeluNew => arr.mapv_inplace(gelu_new_scalar),
            Activation::Relu => arr.mapv_inplace(relu_scalar),
        }
    }
}

/// Applies softmax in-place to a slice.
pub fn softmax_inplace(slice: &mut [f32]) {
    if slice.is_empty() {
        return;
    }

    let max = slice.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

    let mut sum = 0.0;
    for v in slice.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }

    if sum > 0.0 {
        let scale = 1.0 / sum;
        for v in slice.iter_mut() {
            *v *= scale;
        }
    }
}

/// Applies softmax along the last axis of a 4D score tensor
/// `[batch, heads, query, key]`, parallelized over the batch axis.
pub fn softmax_4d_inplace(scores: &mut Array4<f32>) {
    scores
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut batch| {
            for mut head in batch.outer_iter_mut() {
                for mut row in head.outer_iter_mut() {
                    if let Some(slice) = row.as_slice_mut() {
                        softmax_inplace(slice);
                    } else {
                        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                        row.mapv_inplace(|x| (x - max).exp());
                        let sum = row.sum();
                        if sum > 0.0 {
                            row.mapv_inplace(|x| x / sum);
                        }
                    }
                }
            }
        });
}
