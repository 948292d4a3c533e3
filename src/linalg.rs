//! Small dense linear algebra on row-major `Vec<Vec<f64>>` matrices.
//!
//! Problem sizes here are a handful of assets or regime features, so plain
//! loops are used instead of a BLAS dependency.

use crate::error::{PipelineError, Result};

/// Row-major dense matrix.
pub type Matrix = Vec<Vec<f64>>;

/// `n x n` identity.
pub fn identity(n: usize) -> Matrix {
    let mut m = vec![vec![0.0; n]; n];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

pub fn transpose(a: &[Vec<f64>]) -> Matrix {
    if a.is_empty() {
        return Vec::new();
    }
    let cols = a[0].len();
    (0..cols).map(|j| a.iter().map(|row| row[j]).collect()).collect()
}

pub fn mat_mul(a: &[Vec<f64>], b: &[Vec<f64>]) -> Matrix {
    let inner = b.len();
    let cols = b.first().map(|r| r.len()).unwrap_or(0);
    a.iter()
        .map(|row| {
            (0..cols)
                .map(|j| (0..inner).map(|k| row[k] * b[k][j]).sum())
                .collect()
        })
        .collect()
}

pub fn mat_vec(a: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    a.iter().map(|row| dot(row, x)).collect()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `x' A x`.
pub fn quad_form(a: &[Vec<f64>], x: &[f64]) -> f64 {
    dot(x, &mat_vec(a, x))
}

pub fn scale(a: &[Vec<f64>], s: f64) -> Matrix {
    a.iter().map(|row| row.iter().map(|v| v * s).collect()).collect()
}

pub fn add(a: &[Vec<f64>], b: &[Vec<f64>]) -> Matrix {
    a.iter()
        .zip(b)
        .map(|(ra, rb)| ra.iter().zip(rb).map(|(x, y)| x + y).collect())
        .collect()
}

/// Check that `a` is `rows x cols`.
pub fn check_shape(a: &[Vec<f64>], rows: usize, cols: usize, name: &str) -> Result<()> {
    if a.len() != rows || a.iter().any(|r| r.len() != cols) {
        return Err(PipelineError::InvalidInput(format!(
            "{} must be {}x{}",
            name, rows, cols
        )));
    }
    Ok(())
}

/// Invert a matrix using Gauss-Jordan elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
pub fn invert_matrix(matrix: &[Vec<f64>]) -> Result<Matrix> {
    let n = matrix.len();
    check_shape(matrix, n, n, "Matrix")?;

    // Augmented [A | I]
    let mut aug = vec![vec![0.0; 2 * n]; n];
    for i in 0..n {
        aug[i][..n].copy_from_slice(&matrix[i]);
        aug[i][n + i] = 1.0;
    }

    for col in 0..n {
        let mut max_row = col;
        for row in (col + 1)..n {
            if aug[row][col].abs() > aug[max_row][col].abs() {
                max_row = row;
            }
        }
        if max_row != col {
            aug.swap(col, max_row);
        }

        if aug[col][col].abs() < 1e-12 {
            return Err(PipelineError::OptimizationError(
                "Matrix is singular or nearly singular".to_string(),
            ));
        }

        for row in (col + 1)..n {
            let factor = aug[row][col] / aug[col][col];
            for j in col..(2 * n) {
                aug[row][j] -= factor * aug[col][j];
            }
        }
    }

    for col in (0..n).rev() {
        let pivot = aug[col][col];
        for j in 0..(2 * n) {
            aug[col][j] /= pivot;
        }
        for row in 0..col {
            let factor = aug[row][col];
            for j in 0..(2 * n) {
                aug[row][j] -= factor * aug[col][j];
            }
        }
    }

    Ok(aug.into_iter().map(|row| row[n..].to_vec()).collect())
}

/// Solve `A x = b` for square `A`.
pub fn solve(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>> {
    Ok(mat_vec(&invert_matrix(a)?, b))
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
#[allow(clippy::needless_range_loop)]
pub fn cholesky(a: &[Vec<f64>]) -> Result<Matrix> {
    let n = a.len();
    check_shape(a, n, n, "Matrix")?;
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let s: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = a[i][i] - s;
                if d <= 0.0 || !d.is_finite() {
                    return Err(PipelineError::OptimizationError(
                        "Matrix is not positive definite".to_string(),
                    ));
                }
                l[i][i] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - s) / l[j][j];
            }
        }
    }
    Ok(l)
}

/// Solve `L y = b` for lower-triangular `L`.
pub fn forward_substitute(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let s: f64 = (0..i).map(|k| l[i][k] * y[k]).sum();
        y[i] = (b[i] - s) / l[i][i];
    }
    y
}

/// Symmetrize in place: `A = (A + A') / 2`.
#[allow(clippy::needless_range_loop)]
pub fn symmetrize(a: &mut [Vec<f64>]) {
    let n = a.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (a[i][j] + a[j][i]);
            a[i][j] = v;
            a[j][i] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[Vec<f64>], b: &[Vec<f64>]) {
        for (ra, rb) in a.iter().zip(b) {
            for (x, y) in ra.iter().zip(rb) {
                assert!((x - y).abs() < 1e-9, "{} vs {}", x, y);
            }
        }
    }

    #[test]
    fn test_invert_roundtrip() {
        let a = vec![
            vec![4.0, 1.0, 0.5],
            vec![1.0, 3.0, 0.2],
            vec![0.5, 0.2, 2.0],
        ];
        let inv = invert_matrix(&a).unwrap();
        assert_close(&mat_mul(&a, &inv), &identity(3));
    }

    #[test]
    fn test_singular_matrix_errors() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(invert_matrix(&a).is_err());
    }

    #[test]
    fn test_cholesky_reconstructs() {
        let a = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        assert_close(&mat_mul(&l, &transpose(&l)), &a);
        assert!(cholesky(&[vec![1.0, 2.0], vec![2.0, 1.0]]).is_err());
    }

    #[test]
    fn test_solve_and_forward_substitution() {
        let a = vec![vec![2.0, 0.0], vec![1.0, 1.0]];
        let x = solve(&a, &[4.0, 5.0]).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12 && (x[1] - 3.0).abs() < 1e-12);
        let y = forward_substitute(&a, &[4.0, 5.0]);
        assert_eq!(y, vec![2.0, 3.0]);
    }

    #[test]
    fn test_quad_form() {
        let a = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        assert_eq!(quad_form(&a, &[1.0, 1.0]), 5.0);
    }
}
