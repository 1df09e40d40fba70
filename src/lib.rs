//! Core components for a SigLIP-style vision transformer encoder
//!
//! This crate provides the CPU building blocks for turning an image tensor
//! into a sequence of per-patch embeddings: patch embedding with learned
//! positions, a stack of pre-norm bidirectional encoder layers, and a final
//! layer normalization.

pub mod activations;
pub mod attention;
pub mod config;
pub mod embeddings;
pub mod encoder;
pub mod feedforward;
pub mod linear_layer;
pub mod model;
pub mod normalization;
pub mod utils;

// Re-export commonly used items
pub use crate::{
    activations::Activation,
    attention::SelfAttention,
    config::VisionConfig,
    embeddings::PatchEmbeddings,
    encoder::{Encoder, EncoderLayer},
    feedforward::Mlp,
    linear_layer::LinearLayer,
    model::{VisionModel, VisionTransformer},
    normalization::LayerNorm,
};

// Prelude for easy imports
pub mod prelude {
    pub use crate::config::VisionConfig;
    pub use crate::model::{VisionModel, VisionTransformer};
}
