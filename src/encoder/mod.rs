//! Pre-norm transformer encoder stack.

pub mod layer;

pub use crate::encoder::layer::EncoderLayer;

use anyhow::Result;
use ndarray::Array3;
use rand::rngs::StdRng;

use crate::config::VisionConfig;

/// Applies `num_hidden_layers` encoder layers in sequence, each consuming and
/// producing a `[batch, num_patches, hidden]` tensor.
pub struct Encoder {
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    pub fn new(layers: Vec<EncoderLayer>) -> Self {
        Self { layers }
    }

    /// Creates a stack of randomly initialized layers.
    pub fn init(config: &VisionConfig, rng: &mut StdRng) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for _ in 0..config.num_hidden_layers {
            layers.push(EncoderLayer::init(config, rng)?);
        }
        Ok(Self::new(layers))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Feeds each layer's output as the next layer's input. A stack of zero
    /// layers is the identity.
    pub fn forward(&self, hidden_states: Array3<f32>) -> Result<Array3<f32>> {
        let mut hidden = hidden_states;
        for layer in &self.layers {
            hidden = layer.forward(hidden)?;
        }
        Ok(hidden)
    }
}
