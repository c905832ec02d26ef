//! Ciphertext matrices
//!
//! 2D arrays of ciphertexts stored in `nalgebra::DMatrix`. nalgebra only
//! needs `Scalar` for storage, reshaping and transposition; the arithmetic
//! below goes through the `Ciphertext` trait. Shape mismatches panic, the
//! same way nalgebra treats them for plaintext matrices.

use super::{Ciphertext, SecretContext};
use crate::error::Result;
use nalgebra::DMatrix;

/// A 2D array of ciphertexts
pub type CipherMatrix<C> = DMatrix<C>;

/// Encrypt every entry of a plaintext matrix
pub fn encrypt_matrix<X: SecretContext>(ctx: &X, m: &DMatrix<f64>) -> CipherMatrix<X::Ciphertext> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| ctx.encrypt(m[(i, j)]))
}

/// Encrypted zero matrix
pub fn encrypt_zeros<X: SecretContext>(ctx: &X, nrows: usize, ncols: usize) -> CipherMatrix<X::Ciphertext> {
    let zero = ctx.encrypt(0.0);
    DMatrix::from_fn(nrows, ncols, |_, _| zero.clone())
}

/// Decrypt every entry
pub fn decrypt_matrix<X: SecretContext>(ctx: &X, m: &CipherMatrix<X::Ciphertext>) -> Result<DMatrix<f64>> {
    let mut out = DMatrix::zeros(m.nrows(), m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            out[(i, j)] = ctx.decrypt(&m[(i, j)])?;
        }
    }
    Ok(out)
}

/// Matrix product `a @ b`
pub fn matmul<C: Ciphertext>(a: &CipherMatrix<C>, b: &CipherMatrix<C>) -> CipherMatrix<C> {
    assert_eq!(a.ncols(), b.nrows(), "matmul: inner dimensions must match");
    assert!(a.ncols() > 0, "matmul: empty inner dimension");
    DMatrix::from_fn(a.nrows(), b.ncols(), |i, j| {
        (1..a.ncols()).fold(a[(i, 0)].mul(&b[(0, j)]), |acc, k| {
            acc.add(&a[(i, k)].mul(&b[(k, j)]))
        })
    })
}

fn zip_with<C: Ciphertext>(
    a: &CipherMatrix<C>,
    b: &CipherMatrix<C>,
    f: impl Fn(&C, &C) -> C,
) -> CipherMatrix<C> {
    assert_eq!(a.shape(), b.shape(), "elementwise op: shapes must match");
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| f(&a[(i, j)], &b[(i, j)]))
}

pub fn add<C: Ciphertext>(a: &CipherMatrix<C>, b: &CipherMatrix<C>) -> CipherMatrix<C> {
    zip_with(a, b, |x, y| x.add(y))
}

pub fn sub<C: Ciphertext>(a: &CipherMatrix<C>, b: &CipherMatrix<C>) -> CipherMatrix<C> {
    zip_with(a, b, |x, y| x.sub(y))
}

/// Broadcast-add an encrypted scalar to every entry
pub fn add_scalar<C: Ciphertext>(m: &CipherMatrix<C>, s: &C) -> CipherMatrix<C> {
    m.map(|c| c.add(s))
}

/// Multiply every entry by an encrypted scalar
pub fn mul_scalar<C: Ciphertext>(m: &CipherMatrix<C>, s: &C) -> CipherMatrix<C> {
    m.map(|c| c.mul(s))
}

/// Row-wise broadcast product of an (n × f) matrix with an (n × 1) column
pub fn mul_column<C: Ciphertext>(m: &CipherMatrix<C>, column: &CipherMatrix<C>) -> CipherMatrix<C> {
    assert_eq!(column.ncols(), 1, "mul_column: rhs must be a single column");
    assert_eq!(m.nrows(), column.nrows(), "mul_column: row counts must match");
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)].mul(&column[(i, 0)]))
}

/// Elementwise square
pub fn square<C: Ciphertext>(m: &CipherMatrix<C>) -> CipherMatrix<C> {
    m.map(|c| c.mul(&c))
}

/// Mean over all entries
pub fn mean<C: Ciphertext>(m: &CipherMatrix<C>) -> C {
    assert!(!m.is_empty(), "mean of an empty matrix");
    m.iter()
        .skip(1)
        .fold(m[0].clone(), |acc, c| acc.add(c))
        .scale(1.0 / m.len() as f64)
}

/// Mean over rows (axis 0), keeping a 1 × ncols shape
pub fn mean_rows<C: Ciphertext>(m: &CipherMatrix<C>) -> CipherMatrix<C> {
    assert!(m.nrows() > 0, "mean_rows of an empty matrix");
    let inv = 1.0 / m.nrows() as f64;
    DMatrix::from_fn(1, m.ncols(), |_, j| {
        (1..m.nrows())
            .fold(m[(0, j)].clone(), |acc, i| acc.add(&m[(i, j)]))
            .scale(inv)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::he::SimulatedContext;

    const TOL: f64 = 1e-5;

    fn assert_close(a: &DMatrix<f64>, b: &DMatrix<f64>) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < TOL, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_matmul_matches_plaintext() {
        let ctx = SimulatedContext::from_seed(5);
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, -1.0, 0.5, 3.0, -2.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.25, -1.5]);
        let product = matmul(&encrypt_matrix(&ctx, &a), &encrypt_matrix(&ctx, &b));
        assert_close(&decrypt_matrix(&ctx, &product).unwrap(), &(&a * &b));
    }

    #[test]
    fn test_reductions() {
        let ctx = SimulatedContext::from_seed(5);
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let enc = encrypt_matrix(&ctx, &m);
        assert!((ctx.decrypt(&mean(&enc)).unwrap() - 3.5).abs() < TOL);
        let rows = decrypt_matrix(&ctx, &mean_rows(&enc)).unwrap();
        assert_close(&rows, &DMatrix::from_row_slice(1, 3, &[2.5, 3.5, 4.5]));
        let squared = decrypt_matrix(&ctx, &square(&enc)).unwrap();
        assert_close(&squared, &m.map(|v| v * v));
    }

    #[test]
    fn test_broadcasts() {
        let ctx = SimulatedContext::from_seed(5);
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let col = DMatrix::from_row_slice(2, 1, &[10.0, -1.0]);
        let enc = encrypt_matrix(&ctx, &m);
        let s = ctx.encrypt(0.5);

        let scaled = decrypt_matrix(&ctx, &mul_column(&enc, &encrypt_matrix(&ctx, &col))).unwrap();
        assert_close(&scaled, &DMatrix::from_row_slice(2, 2, &[10.0, 20.0, -3.0, -4.0]));

        let shifted = decrypt_matrix(&ctx, &add_scalar(&enc, &s)).unwrap();
        assert_close(&shifted, &m.add_scalar(0.5));

        let halved = decrypt_matrix(&ctx, &mul_scalar(&enc, &s)).unwrap();
        assert_close(&halved, &(&m * 0.5));

        let diff = decrypt_matrix(&ctx, &sub(&enc, &encrypt_zeros(&ctx, 2, 2))).unwrap();
        assert_close(&diff, &m);
    }

    #[test]
    #[should_panic(expected = "inner dimensions")]
    fn test_matmul_shape_mismatch() {
        let ctx = SimulatedContext::from_seed(5);
        let a = encrypt_zeros(&ctx, 2, 3);
        let b = encrypt_zeros(&ctx, 2, 1);
        let _ = matmul(&a, &b);
    }
}
