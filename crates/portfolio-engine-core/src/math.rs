//! Dense matrix and vector helpers over `Decimal`.
//!
//! Matrices are row-major `Vec<Vec<Decimal>>`; sizes here are small (tens of
//! assets) so nothing is blocked or cached.

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::error::EngineError;
use crate::EngineResult;

/// Matrix-vector multiplication.
pub fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// Dot product.
pub fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Matrix-matrix multiplication.
#[allow(clippy::needless_range_loop)]
pub fn mat_multiply(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    let m = a.len();
    let p = if m > 0 { a[0].len() } else { 0 };
    let n_cols = if !b.is_empty() { b[0].len() } else { 0 };
    let mut c = vec![vec![Decimal::ZERO; n_cols]; m];
    for i in 0..m {
        for j in 0..n_cols {
            let mut sum = Decimal::ZERO;
            for k in 0..p {
                sum += a[i][k] * b[k][j];
            }
            c[i][j] = sum;
        }
    }
    c
}

pub fn mat_transpose(mat: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    if mat.is_empty() {
        return Vec::new();
    }
    let cols = mat[0].len();
    (0..cols)
        .map(|j| mat.iter().map(|row| row[j]).collect())
        .collect()
}

pub fn mat_scale(mat: &[Vec<Decimal>], s: Decimal) -> Vec<Vec<Decimal>> {
    mat.iter()
        .map(|row| row.iter().map(|v| *v * s).collect())
        .collect()
}

/// Matrix inverse via Gauss-Jordan with partial pivoting.
#[allow(clippy::needless_range_loop)]
pub fn mat_inverse(mat: &[Vec<Decimal>]) -> EngineResult<Vec<Vec<Decimal>>> {
    let n = mat.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut aug: Vec<Vec<Decimal>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(&mat[i]);
        for j in 0..n {
            row.push(if i == j { Decimal::ONE } else { Decimal::ZERO });
        }
        aug.push(row);
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < dec!(0.0000000000001) {
            return Err(EngineError::Estimation(
                "Singular matrix cannot be inverted".into(),
            ));
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }

    Ok(aug.iter().map(|row| row[n..].to_vec()).collect())
}

/// Square root, zero for non-positive input.
pub fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

/// w' * Sigma * w
pub fn portfolio_variance(w: &[Decimal], sigma: &[Vec<Decimal>]) -> Decimal {
    let sigma_w = mat_vec_multiply(sigma, w);
    vec_dot(w, &sigma_w)
}

pub fn portfolio_std(w: &[Decimal], sigma: &[Vec<Decimal>]) -> Decimal {
    sqrt_decimal(portfolio_variance(w, sigma))
}

/// Equal weights for n assets.
pub fn equal_weights(n: usize) -> Vec<Decimal> {
    if n == 0 {
        return Vec::new();
    }
    let w = Decimal::ONE / Decimal::from(n as i64);
    vec![w; n]
}

/// Largest absolute element-wise difference.
pub fn max_abs_diff(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x - *y).abs())
        .fold(Decimal::ZERO, Decimal::max)
}

#[allow(clippy::needless_range_loop)]
pub fn validate_covariance_matrix(cov: &[Vec<Decimal>], n: usize) -> EngineResult<()> {
    if cov.len() != n {
        return Err(EngineError::configuration(
            "covariance_matrix",
            format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        ));
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(EngineError::configuration(
                "covariance_matrix",
                format!("Row {} has {} columns, expected {}", i, row.len(), n),
            ));
        }
    }
    let tolerance = dec!(0.0000001);
    for i in 0..n {
        if cov[i][i] < Decimal::ZERO {
            return Err(EngineError::configuration(
                "covariance_matrix",
                format!("Negative variance on diagonal [{},{}]={}", i, i, cov[i][i]),
            ));
        }
        for j in (i + 1)..n {
            if (cov[i][j] - cov[j][i]).abs() > tolerance {
                return Err(EngineError::configuration(
                    "covariance_matrix",
                    format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_of_diagonal() {
        let m = vec![vec![dec!(4), dec!(0)], vec![dec!(0), dec!(0.5)]];
        let inv = mat_inverse(&m).unwrap();
        assert_eq!(inv[0][0], dec!(0.25));
        assert_eq!(inv[1][1], dec!(2));
        assert_eq!(inv[0][1], Decimal::ZERO);
    }

    #[test]
    fn test_inverse_round_trip_identity() {
        let m = vec![
            vec![dec!(0.04), dec!(0.006), dec!(0.002)],
            vec![dec!(0.006), dec!(0.09), dec!(0.01)],
            vec![dec!(0.002), dec!(0.01), dec!(0.0625)],
        ];
        let inv = mat_inverse(&m).unwrap();
        let product = mat_multiply(&m, &inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { Decimal::ONE } else { Decimal::ZERO };
                assert!((product[i][j] - expected).abs() < dec!(0.0000001));
            }
        }
    }

    #[test]
    fn test_singular_matrix_error() {
        let m = vec![vec![dec!(1), dec!(2)], vec![dec!(2), dec!(4)]];
        assert!(mat_inverse(&m).is_err());
    }

    #[test]
    fn test_portfolio_std() {
        let sigma = vec![vec![dec!(0.04), Decimal::ZERO], vec![Decimal::ZERO, dec!(0.09)]];
        let w = vec![dec!(0.5), dec!(0.5)];
        // 0.25*0.04 + 0.25*0.09 = 0.0325
        assert_eq!(portfolio_variance(&w, &sigma), dec!(0.0325));
        assert!((portfolio_std(&w, &sigma) - dec!(0.180277563773)).abs() < dec!(0.000000001));
    }

    #[test]
    fn test_asymmetric_covariance_rejected() {
        let cov = vec![vec![dec!(0.04), dec!(0.01)], vec![dec!(0.02), dec!(0.09)]];
        assert!(validate_covariance_matrix(&cov, 2).is_err());
    }
}
