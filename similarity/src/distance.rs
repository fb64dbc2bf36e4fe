use pulp::{Arch, Simd, WithSimd};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::DistanceFn;

/// Built-in distance measures. All of them are dissimilarities: identical vectors score lowest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Distance {
    /// L2 distance
    #[default]
    Euclidean,
    /// L2 distance without the final square root. Ranks identically to `Euclidean`.
    SquaredEuclidean,
    /// L1 distance
    Manhattan,
    /// `1 - cos(a, b)`, ranges over `[0, 2]`
    Cosine,
    /// `1 - a · b`, meaningful for normalised embeddings
    InnerProduct,
}

impl DistanceFn for Distance {
    fn distance(&self, first: &[f32], second: &[f32]) -> f32 {
        match self {
            Self::Euclidean => euclidean_distance(first, second),
            Self::SquaredEuclidean => squared_euclidean_distance(first, second),
            Self::Manhattan => manhattan_distance(first, second),
            Self::Cosine => cosine_distance(first, second),
            Self::InnerProduct => 1.0 - dot_product(first, second),
        }
    }
}

/// Sum of squared differences, the shared core of both L2 variants.
struct SquaredDifference<'a> {
    first: &'a [f32],
    second: &'a [f32],
}

impl WithSimd for SquaredDifference<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let (first_head, first_tail) = S::as_simd_f32s(self.first);
        let (second_head, second_tail) = S::as_simd_f32s(self.second);

        let mut acc = simd.splat_f32s(0.0);
        for (&a, &b) in first_head.iter().zip(second_head) {
            let diff = simd.sub_f32s(a, b);
            acc = simd.mul_add_f32s(diff, diff, acc);
        }

        let tail: f32 = first_tail
            .iter()
            .zip(second_tail)
            .map(|(&x, &y)| (x - y) * (x - y))
            .sum();
        simd.reduce_sum_f32s(acc) + tail
    }
}

pub fn squared_euclidean_distance(first: &[f32], second: &[f32]) -> f32 {
    debug_assert_eq!(first.len(), second.len(), "Vectors must have the same length!");
    Arch::new().dispatch(SquaredDifference { first, second })
}

pub fn euclidean_distance(first: &[f32], second: &[f32]) -> f32 {
    squared_euclidean_distance(first, second).sqrt()
}

struct DotProduct<'a> {
    first: &'a [f32],
    second: &'a [f32],
}

impl WithSimd for DotProduct<'_> {
    type Output = f32;

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let (first_head, first_tail) = S::as_simd_f32s(self.first);
        let (second_head, second_tail) = S::as_simd_f32s(self.second);

        let mut acc = simd.splat_f32s(0.0);
        for (&a, &b) in first_head.iter().zip(second_head) {
            acc = simd.mul_add_f32s(a, b, acc);
        }

        let tail: f32 = first_tail.iter().zip(second_tail).map(|(&x, &y)| x * y).sum();
        simd.reduce_sum_f32s(acc) + tail
    }
}

pub fn dot_product(first: &[f32], second: &[f32]) -> f32 {
    debug_assert_eq!(first.len(), second.len(), "Vectors must have the same length!");
    Arch::new().dispatch(DotProduct { first, second })
}

/// Fused kernel: dot product and both squared magnitudes in a single pass.
struct CosineKernel<'a> {
    first: &'a [f32],
    second: &'a [f32],
}

impl WithSimd for CosineKernel<'_> {
    type Output = (f32, f32, f32);

    #[inline(always)]
    fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
        let (first_head, first_tail) = S::as_simd_f32s(self.first);
        let (second_head, second_tail) = S::as_simd_f32s(self.second);

        let mut dot = simd.splat_f32s(0.0);
        let mut norm_first = simd.splat_f32s(0.0);
        let mut norm_second = simd.splat_f32s(0.0);
        for (&a, &b) in first_head.iter().zip(second_head) {
            dot = simd.mul_add_f32s(a, b, dot);
            norm_first = simd.mul_add_f32s(a, a, norm_first);
            norm_second = simd.mul_add_f32s(b, b, norm_second);
        }

        let mut dot = simd.reduce_sum_f32s(dot);
        let mut norm_first = simd.reduce_sum_f32s(norm_first);
        let mut norm_second = simd.reduce_sum_f32s(norm_second);
        for (&x, &y) in first_tail.iter().zip(second_tail) {
            dot += x * y;
            norm_first += x * x;
            norm_second += y * y;
        }
        (dot, norm_first, norm_second)
    }
}

/// A zero vector has no direction; it is treated as orthogonal to everything.
pub fn cosine_distance(first: &[f32], second: &[f32]) -> f32 {
    debug_assert_eq!(first.len(), second.len(), "Vectors must have the same length!");
    let (dot, norm_first, norm_second) = Arch::new().dispatch(CosineKernel { first, second });
    let magnitude = (norm_first * norm_second).sqrt();
    if magnitude == 0.0 {
        return 1.0;
    }
    1.0 - dot / magnitude
}

pub fn manhattan_distance(first: &[f32], second: &[f32]) -> f32 {
    debug_assert_eq!(first.len(), second.len(), "Vectors must have the same length!");
    first
        .iter()
        .zip(second)
        .map(|(a, b)| (a - b).abs())
        .sum()
}
