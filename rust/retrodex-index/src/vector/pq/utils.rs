// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

/// Divide a flattened `[num_rows, dimension]` matrix into `m` sub-matrices.
///
/// For example, for a `[1M x 1024]` matrix, when `m = 8`, this function divides
/// the matrix into `[1M x 128; 8]` sub-matrices.
pub(super) fn divide_to_subvectors(data: &[f32], dimension: usize, m: usize) -> Vec<Vec<f32>> {
    let sub_vector_length = dimension / m;
    let num_rows = data.len() / dimension;
    let capacity = num_rows * sub_vector_length;

    let mut subarrays = vec![Vec::with_capacity(capacity); m];
    for row in data.chunks_exact(dimension) {
        for (sub, chunk) in subarrays.iter_mut().zip(row.chunks_exact(sub_vector_length)) {
            sub.extend_from_slice(chunk);
        }
    }
    subarrays
}

/// Number of PQ centroids, for the corresponding number of PQ bits.
pub fn num_centroids(num_bits: impl Into<u32>) -> usize {
    2_usize.pow(num_bits.into())
}

/// Centroids of one sub-vector in a `[num_sub_vectors, num_centroids, sub_dim]` codebook.
#[inline]
pub(super) fn get_sub_vector_centroids(
    codebook: &[f32],
    dimension: usize,
    num_bits: u32,
    num_sub_vectors: usize,
    sub_vector_idx: usize,
) -> &[f32] {
    let num_centroids = num_centroids(num_bits);
    let sub_vector_width = dimension / num_sub_vectors;
    &codebook[sub_vector_idx * num_centroids * sub_vector_width
        ..(sub_vector_idx + 1) * num_centroids * sub_vector_width]
}
