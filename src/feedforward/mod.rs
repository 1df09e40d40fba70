//! Per-token feed-forward block.

use anyhow::Result;
use ndarray::Array3;
use rand::rngs::StdRng;

use crate::activations::{apply_activation_2d, Activation};
use crate::config::VisionConfig;
use crate::linear_layer::{LinearLayer, INIT_STD};


/// Two-layer projection with a non-linearity, applied independently to each
/// token: `fc2(act(fc1(x)))`. No cross-token mixing.
pub struct Mlp {
    fc1: LinearLayer,
    fc2: LinearLayer,
    activation: Activation,
}

impl Mlp {
    pub fn new(fc1: LinearLayer, fc2: LinearLayer, activation: Activation) -> Self {
        Self {
            fc1,
            fc2,
            activation,
        }
    }

    /// Creates the block with randomly initialized projections and the
    /// tanh-approximated GELU used by SigLIP checkpoints.
    pub fn init(config: &VisionConfig, rng: &mut StdRng) -> Result<Self> {
        let fc1 = LinearLayer::init(config.intermediate_size, config.hidden_size, INIT_STD, rng)?;
        let fc2 = LinearLayer::init(config.hidden_size, config.intermediate_size, INIT_STD, rng)?;
        Ok(Self::new(fc1, fc2, Activation::GeluNew))
    }

    /// Shape-preserving forward pass over `[batch, seq, hidden]`.
    pub fn forward(&self, hidden: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq, _) = hidden.dim();

        // Ensure contiguous layout before reshape
        let hidden_contig = hidden.as_standard_layout();
        let hidden_2d = hidden_contig
            .view()
            .into_shape_with_order((batch * seq, hidden.shape()[2]))?;

        // FC1 + activation
        let mut intermediate = self.fc1.matmul(&hidden_2d);
        apply_activation_2d(&mut intermediate, self.activation);

        // FC2
        let output = self.fc2.matmul(&intermediate.view());

        Ok(output.into_shape_with_order((batch, seq, self.fc2.out_features()))?)
    }
}
