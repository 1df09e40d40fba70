//! A single pre-norm residual encoder layer.

use anyhow::Result;
use ndarray::Array3;
use rand::rngs::StdRng;

use crate::attention::SelfAttention;
use crate::config::VisionConfig;
use crate::feedforward::Mlp;
use crate::normalization::LayerNorm;
use crate::utils::linear_algebra::add_inplace;

/// Pre-norm transformer block:
///
/// ```text
/// x ──┬── LN ──► Attention ──┬──► + ──┬── LN ──► MLP ──┬──► + ──► out
///     └─────────────────────►┘        └────────────────►┘
/// ```
pub struct EncoderLayer {
    pub self_attn: SelfAttention,
    pub layer_norm1: LayerNorm,
    pub mlp: Mlp,
    pub layer_norm2: LayerNorm,
}

impl EncoderLayer {
    pub fn new(
        self_attn: SelfAttention,
        layer_norm1: LayerNorm,
        mlp: Mlp,
        layer_norm2: LayerNorm,
    ) -> Self {
        Self {
            self_attn,
            layer_norm1,
            mlp,
            layer_norm2,
        }
    }

    /// Creates a layer with randomly initialized sublayers and
    /// identity-initialized norms.
    pub fn init(config: &VisionConfig, rng: &mut StdRng) -> Result<Self> {
        Ok(Self::new(
            SelfAttention::init(config, rng)?,
            LayerNorm::identity(config.hidden_size, config.layer_norm_eps),
            Mlp::init(config, rng)?,
            LayerNorm::identity(config.hidden_size, config.layer_norm_eps),
        ))
    }

    /// Shape-preserving forward pass over `[batch, seq, hidden]`.
    pub fn forward(&self, mut hidden: Array3<f32>) -> Result<Array3<f32>> {
        // 1. Attention block
        let normed = self.layer_norm1.forward_3d(&hidden);
        let attn_out = self.self_attn.forward(&normed)?;
        add_inplace(&mut hidden, &attn_out.view());

        // 2. MLP block
        let normed = self.layer_norm2.forward_3d(&hidden);
        let mlp_out = self.mlp.forward(&normed)?;
        add_inplace(&mut hidden, &mlp_out.view());

        Ok(hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::Activation;
    use crate::linear_layer::LinearLayer;
    use ndarray::{Array1, Array2, Array3};
    use rand::SeedableRng;

    fn small_config() -> VisionConfig {
        VisionConfig {
            hidden_size: 32,
            intermediate_size: 64,
            num_attention_heads: 4,
            ..Default::default()
        }
    }

    fn zero_sublayer_layer(hidden: usize, intermediate: usize, heads: usize) -> EncoderLayer {
        let zero_proj =
            || LinearLayer::new(Array2::zeros((hidden, hidden)), Some(Array1::zeros(hidden)));
        let self_attn = SelfAttention::new(
            hidden,
            heads,
            zero_proj(),
            zero_proj(),
            zero_proj(),
            zero_proj(),
        );
        let mlp = Mlp::new(
            LinearLayer::new(
                Array2::zeros((intermediate, hidden)),
                Some(Array1::zeros(intermediate)),
            ),
            LinearLayer::new(
                Array2::zeros((hidden, intermediate)),
                Some(Array1::zeros(hidden)),
            ),
            Activation::GeluNew,
        );
        EncoderLayer::new(
            self_attn,
            LayerNorm::identity(hidden, 1e-6),
            mlp,
            LayerNorm::identity(hidden, 1e-6),
        )
    }

    #[test]
    fn test_forward_shape() {
        let config = small_config();
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let layer = EncoderLayer::init(&config, &mut rng).unwrap();

        let input = Array3::from_shape_fn((2, 10, 32), |(b, s, h)| {
            ((b * 100 + s * 10 + h) % 23) as f32 * 0.1 - 1.0
        });
        let output = layer.forward(input).unwrap();

        assert_eq!(output.shape(), &[2, 10, 32]);
        assert!(!output.iter().any(|x| x.is_nan()), "Output contains NaNs");
    }

    #[test]
    fn test_residual_preserves_input_with_zero_sublayers() {
        // With zero attention/MLP weights the pre-norm layer is the identity:
        // only the residual path carries signal.
        let layer = zero_sublayer_layer(32, 64, 2);

        let input = Array3::from_shape_fn((1, 4, 32), |(_, _, h)| h as f32);
        let output = layer.forward(input.clone()).unwrap();

        for (inp, out) in input.iter().zip(output.iter()) {
            assert!(
                (inp - out).abs() < 1e-5,
                "Residual should preserve input when sublayers are zero"
            );
        }
    }

    #[test]
    fn test_output_not_normalized() {
        // Pre-norm ends with a residual addition, not a LayerNorm, so the
        // output keeps the input's scale.
        let config = small_config();
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let layer = EncoderLayer::init(&config, &mut rng).unwrap();

        let input = Array3::from_elem((2, 10, 32), 5.0);
        let output = layer.forward(input).unwrap();

        let mean = output.mean().unwrap();
        assert!(
            mean.abs() > 0.5,
            "Pre-norm mean should NOT be near zero (residual preserved), got {}",
            mean
        );
    }

    #[test]
    fn test_single_token() {
        let config = small_config();
        let mut rng = rand::rngs::StdRng::seed_from_u64(8);
        let layer = EncoderLayer::init(&config, &mut rng).unwrap();

        let input = Array3::<f32>::ones((1, 1, 32));
        let output = layer.forward(input).unwrap();

        assert_eq!(output.shape(), &[1, 1, 32]);
    }
}
