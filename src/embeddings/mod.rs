//! Patch embedding: image tensor to token sequence with learned positions.

use anyhow::{bail, Result};
use ndarray::{Array2, Array3, Array4, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::config::VisionConfig;
use crate::linear_layer::{LinearLayer, INIT_STD};


/// Splits an image into non-overlapping square patches, projects each patch
/// to an embedding vector, and adds a learned per-position vector.
///
/// The projection is the linear form of a stride = kernel = `patch_size`
/// convolution: each flattened patch (channel-major, then pixel row, then
/// pixel column, matching the conv-kernel layout) is mapped from `patch_dim`
/// to `hidden_size`.
pub struct PatchEmbeddings {
    projection: LinearLayer,
    /// Learned position table `[num_patches, hidden_size]`, shared read-only
    /// across all forward calls.
    position_embeddings: Array2<f32>,
    num_channels: usize,
    image_size: usize,
    patch_size: usize,
    num_patches: usize,
}

impl PatchEmbeddings {
    /// Creates patch embeddings from externally loaded parameters.
    pub fn new(
        config: &VisionConfig,
        projection: LinearLayer,
        position_embeddings: Array2<f32>,
    ) -> Result<Self> {
        config.validate()?;
        if projection.in_features() != config.patch_dim()
            || projection.out_features() != config.hidden_size
        {
            bail!(
                "patch projection is [{}, {}], expected [{}, {}]",
                projection.out_features(),
                projection.in_features(),
                config.hidden_size,
                config.patch_dim()
            );
        }
        if position_embeddings.shape() != [config.num_patches(), config.hidden_size] {
            bail!(
                "position table is {:?}, expected [{}, {}]",
                position_embeddings.shape(),
                config.num_patches(),
                config.hidden_size
            );
        }
        Ok(Self {
            projection,
            position_embeddings,
            num_channels: config.num_channels,
            image_size: config.image_size,
            patch_size: config.patch_size,
            num_patches: config.num_patches(),
        })
    }

    /// Creates patch embeddings with randomly initialized parameters.
    pub fn init(config: &VisionConfig, rng: &mut StdRng) -> Result<Self> {
        let projection = LinearLayer::init(config.hidden_size, config.patch_dim(), INIT_STD, rng)?;
        let normal = Normal::new(0.0, INIT_STD)?;
        let position_embeddings =
            Array2::random_using((config.num_patches(), config.hidden_size), normal, rng);
        Self::new(config, projection, position_embeddings)
    }

    /// The fixed position id sequence, identical across calls.
    pub fn position_ids(&self) -> std::ops::Range<usize> {
        0..self.num_patches
    }

    pub fn num_patches(&self) -> usize {
        self.num_patches
    }

    /// Embeds a `[batch, channels, height, width]` image tensor into a
    /// `[batch, num_patches, hidden_size]` token sequence.
    ///
    /// The patch grid is flattened row-major; position vectors are added by
    /// sequential position id.
    pub fn forward(&self, pixel_values: &Array4<f32>) -> Result<Array3<f32>> {
        let (batch, channels, height, width) = pixel_values.dim();
        if channels != self.num_channels {
            bail!(
                "input has {} channels, model expects {}",
                channels,
                self.num_channels
            );
        }
        if height != self.image_size || width != self.image_size {
            bail!(
                "input is {}x{}, model expects {}x{} ({}x{} patches of size {})",
                height,
                width,
                self.image_size,
                self.image_size,
                self.image_size / self.patch_size,
                self.image_size / self.patch_size,
                self.patch_size
            );
        }

        let p = self.patch_size;
        let grid = self.image_size / p;
        let patch_dim = self.projection.in_features();

        // Unfold each image into rows of flattened patches, in parallel
        // across the batch.
        let mut patches = Array3::<f32>::zeros((batch, self.num_patches, patch_dim));
        patches
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(pixel_values.axis_iter(Axis(0)))
            .for_each(|(mut rows, image)| {
                for gy in 0..grid {
                    for gx in 0..grid {
                        let mut row = rows.row_mut(gy * grid + gx);
                        let mut k = 0;
                        for c in 0..channels {
                            for dy in 0..p {
                                for dx in 0..p {
                                    row[k] = image[[c, gy * p + dy, gx * p + dx]];
                                    k += 1;
                                }
                            }
                        }
                    }
                }
            });

        let patches_2d = patches.into_shape_with_order((batch * self.num_patches, patch_dim))?;
        let projected = self.projection.matmul(&patches_2d.view());
        let mut hidden = projected.into_shape_with_order((
            batch,
            self.num_patches,
            self.projection.out_features(),
        ))?;

        // Same position table for every input, keyed by sequential position id.
        hidden += &self.position_embeddings.view().insert_axis(Axis(0));

        Ok(hidden)
    }
}
