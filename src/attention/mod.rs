//! Multi-head self-attention over patch tokens.

use anyhow::Result;
use ndarray::Array3;
use rand::rngs::StdRng;

use crate::activations::softmax_4d_inplace;
use crate::config::VisionConfig;
use crate::linear_layer::{LinearLayer, INIT_STD};
use crate::utils::linear_algebra::matmul_4d;


/// Bidirectional scaled dot-product attention.
///
/// Vision tokens are unordered, so there is no causal mask, and inputs are
/// never padded, so there is no padding mask either. Attention dropout is a
/// training-time concern and is not applied here.
pub struct SelfAttention {
    pub q_proj: LinearLayer,
    pub k_proj: LinearLayer,
    pub v_proj: LinearLayer,
    pub out_proj: LinearLayer,

    pub num_heads: usize,
    pub head_dim: usize,
    pub scale_factor: f32,
}

impl SelfAttention {
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        q: LinearLayer,
        k: LinearLayer,
        v: LinearLayer,
        o: LinearLayer,
    ) -> Self {
        let head_dim = hidden_size / num_heads;
        Self {
            q_proj: q,
            k_proj: k,
            v_proj: v,
            out_proj: o,
            num_heads,
            head_dim,
            scale_factor: 1.0 / (head_dim as f32).sqrt(),
        }
    }

    /// Creates attention with randomly initialized projections.
    pub fn init(config: &VisionConfig, rng: &mut StdRng) -> Result<Self> {
        let d = config.hidden_size;
        Ok(Self::new(
            d,
            config.num_attention_heads,
            LinearLayer::init(d, d, INIT_STD, rng)?,
            LinearLayer::init(d, d, INIT_STD, rng)?,
            LinearLayer::init(d, d, INIT_STD, rng)?,
            LinearLayer::init(d, d, INIT_STD, rng)?,
        ))
    }

    /// Shape-preserving forward pass over `[batch, seq, hidden]`.
    pub fn forward(&self, hidden_states: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq_len, _) = hidden_states.dim();
        let hidden_dim = self.num_heads * self.head_dim;

        // 1. Flatten & project
        let hidden_contig = hidden_states.as_standard_layout();
        let hidden_2d = hidden_contig
            .view()
            .into_shape_with_order((batch * seq_len, hidden_dim))?;

        let q = self.q_proj.matmul(&hidden_2d);
        let k = self.k_proj.matmul(&hidden_2d);
        let v = self.v_proj.matmul(&hidden_2d);

        // 2. Reshape & permute to heads
        let q_heads = q
            .into_shape_with_order((batch, seq_len, self.num_heads, self.head_dim))?
            .permuted_axes([0, 2, 1, 3]);

        // K transposed for Q@K^T
        let k_heads_t = k
            .into_shape_with_order((batch, seq_len, self.num_heads, self.head_dim))?
            .permuted_axes([0, 2, 3, 1]);

        let v_heads = v
            .into_shape_with_order((batch, seq_len, self.num_heads, self.head_dim))?
            .permuted_axes([0, 2, 1, 3]);

        // 3. Scaled scores
        let mut scores = matmul_4d(&q_heads, &k_heads_t);
        scores.mapv_inplace(|x| x * self.scale_factor);

        // 4. Softmax over keys
        softmax_4d_inplace(&mut scores);

        // 5. Context
        let context = matmul_4d(&scores, &v_heads);

        // 6. Merge heads & output projection
        let context_flat = context
            .permuted_axes([0, 2, 1, 3])
            .as_standard_layout()
            .into_shape_with_order((batch * seq_len, hidden_dim))?
            .to_owned();

        let output = self.out_proj.matmul(&context_flat.view());

        Ok(output.into_shape_with_order((batch, seq_len, hidden_dim))?)
    }
}
