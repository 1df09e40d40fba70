//! Vision tower configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Static hyperparameters of the vision transformer.
///
/// Constructed once, validated, and passed by reference into every component
/// constructor. Field names follow the HF `config.json` convention so a
/// checkpoint's vision config section deserializes directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_intermediate_size")]
    pub intermediate_size: usize,
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_num_attention_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
    #[serde(default)]
    pub attention_dropout: f32,
    /// Fixed token count expected by a downstream consumer, if any.
    /// When set it must equal the derived patch count.
    #[serde(default)]
    pub num_image_tokens: Option<usize>,
}

fn default_hidden_size() -> usize {
    768
}
fn default_intermediate_size() -> usize {
    3072
}
fn default_num_hidden_layers() -> usize {
    12
}
fn default_num_attention_heads() -> usize {
    12
}
fn default_num_channels() -> usize {
    3
}
fn default_image_size() -> usize {
    224
}
fn default_patch_size() -> usize {
    16
}
fn default_layer_norm_eps() -> f32 {
    1e-6
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
            intermediate_size: default_intermediate_size(),
            num_hidden_layers: default_num_hidden_layers(),
            num_attention_heads: default_num_attention_heads(),
            num_channels: default_num_channels(),
            image_size: default_image_size(),
            patch_size: default_patch_size(),
            layer_norm_eps: default_layer_norm_eps(),
            attention_dropout: 0.0,
            num_image_tokens: None,
        }
    }
}

impl VisionConfig {
    /// Parses a config from HF-style JSON. Unknown keys are ignored and
    /// missing keys fall back to the SigLIP-base defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the structural invariants every component relies on.
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0
            || self.intermediate_size == 0
            || self.num_attention_heads == 0
            || self.num_channels == 0
            || self.image_size == 0
            || self.patch_size == 0
        {
            bail!("vision config dimensions must be non-zero");
        }
        if self.image_size % self.patch_size != 0 {
            bail!(
                "image_size {} is not divisible by patch_size {}",
                self.image_size,
                self.patch_size
            );
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        if let Some(tokens) = self.num_image_tokens {
            if tokens != self.num_patches() {
                bail!(
                    "num_image_tokens {} does not match derived patch count {}",
                    tokens,
                    self.num_patches()
                );
            }
        }
        Ok(())
    }

    /// Patches per side of the square grid.
    pub fn patches_per_side(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Sequence length produced by patch embedding.
    pub fn num_patches(&self) -> usize {
        self.patches_per_side() * self.patches_per_side()
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Flattened size of one patch, the input width of the patch projection.
    pub fn patch_dim(&self) -> usize {
        self.num_channels * self.patch_size * self.patch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_siglip_base() {
        let config = VisionConfig::default();
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.intermediate_size, 3072);
        assert_eq!(config.num_hidden_layers, 12);
        assert_eq!(config.num_attention_heads, 12);
        assert_eq!(config.num_channels, 3);
        assert_eq!(config.image_size, 224);
        assert_eq!(config.patch_size, 16);
        assert_eq!(config.num_patches(), 196);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.patch_dim(), 768);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_non_tiling_image() {
        let config = VisionConfig {
            image_size: 225,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_indivisible_heads() {
        let config = VisionConfig {
            hidden_size: 100,
            num_attention_heads: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_token_count_mismatch() {
        let config = VisionConfig {
            num_image_tokens: Some(100),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VisionConfig {
            num_image_tokens: Some(196),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_from_json_partial_with_unknown_keys() {
        let json = r#"{
            "hidden_size": 512,
            "num_attention_heads": 8,
            "projection_dim": 2048,
            "model_type": "siglip_vision_model"
        }"#;
        let config = VisionConfig::from_json_str(json).unwrap();
        assert_eq!(config.hidden_size, 512);
        assert_eq!(config.num_attention_heads, 8);
        // Missing keys fall back to defaults
        assert_eq!(config.image_size, 224);
        assert_eq!(config.patch_size, 16);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let json = r#"{"image_size": 225}"#;
        assert!(VisionConfig::from_json_str(json).is_err());
    }
}
