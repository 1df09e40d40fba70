//! Linear algebra operations for the encoder stack

use ndarray::{Array3, Array4, ArrayView3, Zip};
use rayon::prelude::*;

/// Batched matmul over `[batch, heads, m, k] @ [batch, heads, k, n]`.
///
/// Parallelized over the batch axis; per-head slices are forced into
/// standard layout so permuted inputs are accepted.
pub fn matmul_4d(a: &Array4<f32>, b: &Array4<f32>) -> Array4<f32> {
    let (batch, heads, m, k) = a.dim();
    let n = b.shape()[3];
    assert_eq!(b.shape()[0], batch);
    assert_eq!(b.shape()[1], heads);
    assert_eq!(b.shape()[2], k, "Matmul inner dimensions do not match");

    let mut output = Array4::<f32>::zeros((batch, heads, m, n));

    Zip::from(output.outer_iter_mut())
        .and(a.outer_iter())
        .and(b.outer_iter())
        .par_for_each(|mut out_b, a_b, b_b| {
            Zip::from(out_b.outer_iter_mut())
                .and(a_b.outer_iter())
                .and(b_b.outer_iter())
                .for_each(|mut out_h, a_h, b_h| {
                    let a_s = a_h.as_standard_layout();
                    let b_s = b_h.as_standard_layout();
                    out_h.assign(&a_s.dot(&b_s));
                });
        });

    output
}

/// Parallel in-place addition: a += b
pub fn add_inplace(a: &mut Array3<f32>, b: &ArrayView3<f32>) {
    let a_slice = a.as_slice_mut().expect("A must be contiguous");
    let b_slice = b.as_slice().expect("B must be contiguous");

    a_slice
        .par_iter_mut()
        .zip(b_slice.par_iter())
        .for_each(|(x, y)| *x += *y);
}
