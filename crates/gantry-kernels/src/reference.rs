//! Sequential host implementations used as correctness references.

use std::fmt::Write;

/// Element-wise `a + b`.
pub fn vadd(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Element-wise `a + b + c`.
pub fn vadd3(a: &[f32], b: &[f32], c: &[f32]) -> Vec<f32> {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((x, y), z)| x + y + z)
        .collect()
}

/// `c = a * b` for row-major `n x n` matrices.
///
/// # Panics
/// If any slice holds fewer than `n * n` elements.
pub fn sequential_mat_mul(n: usize, a: &[f32], b: &[f32], c: &mut [f32]) {
    for i in 0..n {
        for j in 0..n {
            let mut tmp = 0.0f32;
            for k in 0..n {
                tmp += a[i * n + k] * b[k * n + j];
            }
            c[i * n + j] = tmp;
        }
    }
}

/// Clear the first `n * n` elements of `c`.
pub fn zero_mat(c: &mut [f32], n: usize) {
    let len = (n * n).min(c.len());
    c[..len].fill(0.0);
}

/// Render an `n x n` matrix, one row per line.
pub fn format_mat(c: &[f32], n: usize) -> String {
    let mut out = String::new();
    if n == 0 {
        return out;
    }
    for row in c.chunks(n).take(n) {
        for value in row {
            let _ = write!(out, "{value:.6} ");
        }
        out.push('\n');
    }
    out
}

/// Throughput of an `n x n` matrix product that took `seconds`.
pub fn mflops(n: usize, seconds: f64) -> f64 {
    let n = n as f64;
    2.0 * n * n * n / (1_000_000.0 * seconds)
}
