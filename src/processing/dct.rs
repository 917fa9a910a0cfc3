//! # 8×8 Block Transform
//!
//! Forward DCT-II, quantization, dequantization and inverse DCT for a single
//! 8×8 block of one color channel.
//!
//! ## Definition
//!
//! ```text
//! F(u,v) = 1/4 · C(u) · C(v) · Σx Σy f(x,y) · cos((2x+1)uπ/16) · cos((2y+1)vπ/16)
//! C(0) = 1/√2, C(k>0) = 1
//! ```
//!
//! The 2-D transform is computed as two passes of the 1-D transform (first
//! along `y`, then along `x`) using a precomputed cosine table, which costs
//! O(8³) per block instead of O(8⁴) for the direct double sum.
//!
//! ## Layout
//!
//! A [`Block`] is indexed `[x][y]` in the spatial domain and `[u][v]` in the
//! frequency domain, so row `u` of [`QUANTIZATION_MATRIX`] holds the divisors
//! for horizontal frequency `u`.
//!
//! ## Numeric conventions
//!
//! - Quantization rounds half away from zero (`f64::round`).
//! - Reconstructed samples are clamped to `[0, 255]`; conversion to a byte
//!   rounds to nearest (see [`to_sample`]).
//! - Samples enter the transform as `0..=255` with no level shift.

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::sync::OnceLock;

pub const BLOCK_SIZE: usize = 8;

/// One 8×8 plane of samples or coefficients.
pub type Block = [[f64; BLOCK_SIZE]; BLOCK_SIZE];

/// Quantized coefficients.
pub type QuantizedBlock = [[i32; BLOCK_SIZE]; BLOCK_SIZE];

/// Fixed per-frequency divisors, row-major.
pub const QUANTIZATION_MATRIX: [[u16; BLOCK_SIZE]; BLOCK_SIZE] = [
    [32, 24, 20, 32, 48, 80, 102, 122],
    [24, 24, 28, 38, 52, 116, 120, 110],
    [28, 26, 32, 48, 80, 114, 138, 112],
    [28, 34, 44, 58, 102, 174, 160, 124],
    [36, 44, 74, 112, 136, 218, 206, 154],
    [48, 70, 110, 128, 162, 208, 226, 184],
    [98, 128, 156, 174, 206, 242, 240, 202],
    [144, 184, 190, 196, 224, 200, 206, 198],
];

#[inline]
fn weight(k: usize) -> f64 {
    if k == 0 {
        FRAC_1_SQRT_2
    } else {
        1.0
    }
}

/// Precomputed `cos((2x+1)kπ/16)` table, indexed `[k][x]`.
#[derive(Debug, Clone)]
pub struct DctKernel {
    cos: [[f64; BLOCK_SIZE]; BLOCK_SIZE],
}

impl DctKernel {
    pub fn new() -> Self {
        let mut cos = [[0.0; BLOCK_SIZE]; BLOCK_SIZE];
        for (k, row) in cos.iter_mut().enumerate() {
            for (x, value) in row.iter_mut().enumerate() {
                *value = ((2 * x + 1) as f64 * k as f64 * PI / 16.0).cos();
            }
        }
        Self { cos }
    }

    /// Process-wide shared kernel.
    pub fn shared() -> &'static DctKernel {
        static KERNEL: OnceLock<DctKernel> = OnceLock::new();
        KERNEL.get_or_init(DctKernel::new)
    }

    fn forward_1d(&self, input: &[f64; BLOCK_SIZE]) -> [f64; BLOCK_SIZE] {
        let mut output = [0.0; BLOCK_SIZE];
        for (u, out) in output.iter_mut().enumerate() {
            let sum: f64 = input
                .iter()
                .zip(self.cos[u].iter())
                .map(|(sample, cos)| sample * cos)
                .sum();
            *out = 0.5 * weight(u) * sum;
        }
        output
    }

    fn inverse_1d(&self, input: &[f64; BLOCK_SIZE]) -> [f64; BLOCK_SIZE] {
        let mut output = [0.0; BLOCK_SIZE];
        for (x, out) in output.iter_mut().enumerate() {
            let sum: f64 = (0..BLOCK_SIZE)
                .map(|u| weight(u) * input[u] * self.cos[u][x])
                .sum();
            *out = 0.5 * sum;
        }
        output
    }

    /// Forward 2-D DCT of a spatial block.
    pub fn forward(&self, block: &Block) -> Block {
        separable(block, |line| self.forward_1d(line))
    }

    /// Inverse 2-D DCT of a coefficient block (unclamped).
    pub fn inverse(&self, coefficients: &Block) -> Block {
        separable(coefficients, |line| self.inverse_1d(line))
    }

    /// Full lossy round trip for one channel block:
    /// DCT → quantize → dequantize → IDCT → clamp to `[0, 255]`.
    pub fn reconstruct(&self, block: &Block) -> Block {
        let coefficients = self.forward(block);
        let restored = self.inverse(&dequantize(&quantize(&coefficients)));
        clamp(restored)
    }
}

impl Default for DctKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a 1-D transform along the second index, then along the first.
fn separable<F>(block: &Block, transform: F) -> Block
where
    F: Fn(&[f64; BLOCK_SIZE]) -> [f64; BLOCK_SIZE],
{
    let mut rows = [[0.0; BLOCK_SIZE]; BLOCK_SIZE];
    for (i, line) in block.iter().enumerate() {
        rows[i] = transform(line);
    }

    let mut result = [[0.0; BLOCK_SIZE]; BLOCK_SIZE];
    for j in 0..BLOCK_SIZE {
        let column: [f64; BLOCK_SIZE] = std::array::from_fn(|i| rows[i][j]);
        for (i, value) in transform(&column).into_iter().enumerate() {
            result[i][j] = value;
        }
    }
    result
}

/// `Q(u,v) = round(F(u,v) / M(u,v))`, rounding half away from zero.
pub fn quantize(coefficients: &Block) -> QuantizedBlock {
    let mut quantized = [[0i32; BLOCK_SIZE]; BLOCK_SIZE];
    for u in 0..BLOCK_SIZE {
        for v in 0..BLOCK_SIZE {
            quantized[u][v] = (coefficients[u][v] / QUANTIZATION_MATRIX[u][v] as f64).round() as i32;
        }
    }
    quantized
}

/// `F'(u,v) = Q(u,v) · M(u,v)`
pub fn dequantize(quantized: &QuantizedBlock) -> Block {
    let mut coefficients = [[0.0; BLOCK_SIZE]; BLOCK_SIZE];
    for u in 0..BLOCK_SIZE {
        for v in 0..BLOCK_SIZE {
            coefficients[u][v] = quantized[u][v] as f64 * QUANTIZATION_MATRIX[u][v] as f64;
        }
    }
    coefficients
}

fn clamp(mut block: Block) -> Block {
    for value in block.iter_mut().flatten() {
        *value = value.clamp(0.0, 255.0);
    }
    block
}

/// Convert a reconstructed sample to a byte: round to nearest, then saturate.
#[inline]
pub fn to_sample(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f64) -> Block {
        [[value; BLOCK_SIZE]; BLOCK_SIZE]
    }

    fn textured() -> Block {
        std::array::from_fn(|x| std::array::from_fn(|y| ((x * 37 + y * 91 + x * y * 13) % 256) as f64))
    }

    /// Straight double-sum definition, used to check the separable version.
    fn forward_direct(block: &Block) -> Block {
        let mut result = [[0.0; BLOCK_SIZE]; BLOCK_SIZE];
        for u in 0..BLOCK_SIZE {
            for v in 0..BLOCK_SIZE {
                let mut sum = 0.0;
                for x in 0..BLOCK_SIZE {
                    for y in 0..BLOCK_SIZE {
                        sum += block[x][y]
                            * ((2 * x + 1) as f64 * u as f64 * PI / 16.0).cos()
                            * ((2 * y + 1) as f64 * v as f64 * PI / 16.0).cos();
                    }
                }
                result[u][v] = 0.25 * weight(u) * weight(v) * sum;
            }
        }
        result
    }

    #[test]
    fn test_separable_matches_direct_definition() {
        let kernel = DctKernel::new();
        let block = textured();
        let fast = kernel.forward(&block);
        let direct = forward_direct(&block);

        for u in 0..BLOCK_SIZE {
            for v in 0..BLOCK_SIZE {
                assert!((fast[u][v] - direct[u][v]).abs() < 1e-9, "mismatch at ({}, {})", u, v);
            }
        }
    }

    #[test]
    fn test_inverse_undoes_forward() {
        let kernel = DctKernel::new();
        let block = textured();
        let restored = kernel.inverse(&kernel.forward(&block));

        for x in 0..BLOCK_SIZE {
            for y in 0..BLOCK_SIZE {
                assert!((restored[x][y] - block[x][y]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_constant_block_is_dc_only() {
        let kernel = DctKernel::new();
        let coefficients = kernel.forward(&constant(100.0));

        assert!((coefficients[0][0] - 800.0).abs() < 1e-9);
        for (u, row) in coefficients.iter().enumerate() {
            for (v, value) in row.iter().enumerate() {
                if (u, v) != (0, 0) {
                    assert!(value.abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_zero_block_reconstructs_exactly() {
        let restored = DctKernel::new().reconstruct(&constant(0.0));
        assert!(restored.iter().flatten().all(|&v| to_sample(v) == 0));
    }

    #[test]
    fn test_mid_gray_block_reconstructs_exactly() {
        // DC = 8 * 128 = 1024, an exact multiple of M(0,0) = 32.
        let restored = DctKernel::new().reconstruct(&constant(128.0));
        assert!(restored.iter().flatten().all(|&v| to_sample(v) == 128));
    }

    #[test]
    fn test_constant_block_snaps_to_dc_step() {
        // DC step of 32 in the coefficient domain is 4 in the sample domain.
        let restored = DctKernel::new().reconstruct(&constant(201.0));
        assert!(restored.iter().flatten().all(|&v| to_sample(v) == 200));
    }

    #[test]
    fn test_quantize_rounds_half_away_from_zero() {
        let mut coefficients = constant(0.0);
        coefficients[0][0] = 16.0; // 16 / 32 = 0.5
        coefficients[0][1] = -12.0; // -12 / 24 = -0.5
        coefficients[1][1] = 35.0; // 35 / 24 ≈ 1.46

        let quantized = quantize(&coefficients);
        assert_eq!(quantized[0][0], 1);
        assert_eq!(quantized[0][1], -1);
        assert_eq!(quantized[1][1], 1);
    }

    #[test]
    fn test_coefficient_error_bounded_by_half_step() {
        let kernel = DctKernel::new();
        let coefficients = kernel.forward(&textured());
        let restored = dequantize(&quantize(&coefficients));

        for u in 0..BLOCK_SIZE {
            for v in 0..BLOCK_SIZE {
                let step = QUANTIZATION_MATRIX[u][v] as f64;
                assert!((coefficients[u][v] - restored[u][v]).abs() <= step / 2.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_sample_error_bounded_by_quantization_energy() {
        // The transform is orthonormal, so the spatial error energy equals the
        // coefficient error energy, which is at most Σ (M/2)².
        let bound = QUANTIZATION_MATRIX
            .iter()
            .flatten()
            .map(|&m| (m as f64 / 2.0).powi(2))
            .sum::<f64>()
            .sqrt();

        let block = textured();
        let restored = DctKernel::new().reconstruct(&block);
        for x in 0..BLOCK_SIZE {
            for y in 0..BLOCK_SIZE {
                assert!((restored[x][y] - block[x][y]).abs() <= bound);
            }
        }
    }

    #[test]
    fn test_reconstruct_clamps_to_byte_range() {
        let mut block = constant(0.0);
        block[0][0] = 255.0;
        block[7][7] = 255.0;
        let restored = DctKernel::new().reconstruct(&block);
        assert!(restored.iter().flatten().all(|&v| (0.0..=255.0).contains(&v)));
    }

    #[test]
    fn test_to_sample_saturates() {
        assert_eq!(to_sample(-3.2), 0);
        assert_eq!(to_sample(254.6), 255);
        assert_eq!(to_sample(300.0), 255);
        assert_eq!(to_sample(127.5), 128);
    }
}
