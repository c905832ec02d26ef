//! Ciphertext array codec — JSON <-> 1D / 2D ciphertext arrays
//!
//! Wire format: a flat JSON list of ciphertext records (1D) or a list of
//! equally long lists of records (2D, row-major). Each record is decoded on
//! its own through the context that produced it.

use crate::error::{EmlError, Result};
use crate::he::{CipherMatrix, Ciphertext, SecretContext};
use nalgebra::DMatrix;
use serde_json::Value;

/// A 1D or 2D array of ciphertexts
#[derive(Debug, Clone, PartialEq)]
pub enum CipherArray<C> {
    OneD(Vec<C>),
    TwoD(Vec<Vec<C>>),
}

impl<C: Ciphertext> CipherArray<C> {
    /// Number of elements along the first axis
    pub fn len(&self) -> usize {
        match self {
            CipherArray::OneD(v) => v.len(),
            CipherArray::TwoD(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ndim(&self) -> usize {
        match self {
            CipherArray::OneD(_) => 1,
            CipherArray::TwoD(_) => 2,
        }
    }

    /// View as a matrix. A 1D array becomes a single column.
    pub fn to_matrix(&self) -> Result<CipherMatrix<C>> {
        match self {
            CipherArray::OneD(v) => Ok(DMatrix::from_fn(v.len(), 1, |i, _| v[i].clone())),
            CipherArray::TwoD(rows) => {
                let ncols = rows.first().map(Vec::len).unwrap_or(0);
                if rows.iter().any(|r| r.len() != ncols) {
                    return Err(EmlError::Shape("rows have different lengths".into()));
                }
                Ok(DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j].clone()))
            }
        }
    }

    /// Row-major 2D array from a matrix
    pub fn from_matrix(m: &CipherMatrix<C>) -> Self {
        CipherArray::TwoD(
            (0..m.nrows())
                .map(|i| (0..m.ncols()).map(|j| m[(i, j)].clone()).collect())
                .collect(),
        )
    }

    /// All elements in row-major order
    pub fn flatten(&self) -> Vec<C> {
        match self {
            CipherArray::OneD(v) => v.clone(),
            CipherArray::TwoD(rows) => rows.iter().flatten().cloned().collect(),
        }
    }
}

/// Serialize a ciphertext array to JSON text
pub fn serialize<C: Ciphertext>(array: &CipherArray<C>) -> Result<String> {
    let value = match array {
        CipherArray::OneD(v) => Value::Array(v.iter().map(Ciphertext::to_record).collect()),
        CipherArray::TwoD(rows) => Value::Array(
            rows.iter()
                .map(|r| Value::Array(r.iter().map(Ciphertext::to_record).collect()))
                .collect(),
        ),
    };
    Ok(serde_json::to_string(&value)?)
}

/// Deserialize JSON text into a 1D or 2D ciphertext array.
///
/// Dimensionality follows the JSON nesting. Fails with `EmlError::Format`
/// on text that is not JSON, or unless the top level is a non-empty list of records or a non-empty list
/// of equally long, non-empty lists of records.
pub fn deserialize<X: SecretContext>(ctx: &X, json: &str) -> Result<CipherArray<X::Ciphertext>> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| EmlError::Format(format!("invalid JSON: {}", e)))?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(EmlError::Format(format!(
                "top-level value must be a list, got {}",
                kind(&other)
            )))
        }
    };
    if items.is_empty() {
        return Err(EmlError::Format("empty list".into()));
    }

    let nested = items.iter().filter(|v| v.is_array()).count();
    if nested == 0 {
        let values = items
            .iter()
            .map(|record| ctx.ciphertext_from_record(record))
            .collect::<Result<Vec<_>>>()?;
        return Ok(CipherArray::OneD(values));
    }
    if nested != items.len() {
        return Err(EmlError::Format("list mixes scalars and lists".into()));
    }

    let mut rows = Vec::with_capacity(items.len());
    let mut width = None;
    for (i, item) in items.iter().enumerate() {
        let leaves = item.as_array().map(Vec::as_slice).unwrap_or_default();
        if leaves.is_empty() {
            return Err(EmlError::Format(format!("row {} is empty", i)));
        }
        match width {
            None => width = Some(leaves.len()),
            Some(w) if w != leaves.len() => {
                return Err(EmlError::Format(format!(
                    "row {} has {} elements, expected {}",
                    i,
                    leaves.len(),
                    w
                )))
            }
            Some(_) => {}
        }
        let row = leaves
            .iter()
            .map(|leaf| {
                if leaf.is_array() {
                    Err(EmlError::Format("arrays deeper than 2D are not supported".into()))
                } else {
                    ctx.ciphertext_from_record(leaf)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }
    Ok(CipherArray::TwoD(rows))
}

/// Encrypt a plaintext vector into a 1D array
pub fn encrypt_array<X: SecretContext>(ctx: &X, values: &[f64]) -> CipherArray<X::Ciphertext> {
    CipherArray::OneD(values.iter().map(|v| ctx.encrypt(*v)).collect())
}

/// Encrypt plaintext rows into a 2D array
pub fn encrypt_rows<X: SecretContext>(ctx: &X, rows: &[Vec<f64>]) -> CipherArray<X::Ciphertext> {
    CipherArray::TwoD(
        rows.iter()
            .map(|r| r.iter().map(|v| ctx.encrypt(*v)).collect())
            .collect(),
    )
}

/// Decrypt every element, row-major
pub fn decrypt_values<X: SecretContext>(ctx: &X, array: &CipherArray<X::Ciphertext>) -> Result<Vec<f64>> {
    array.flatten().iter().map(|c| ctx.decrypt(c)).collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::he::SimulatedContext;

    fn ctx() -> SimulatedContext {
        SimulatedContext::from_seed(21)
    }

    #[test]
    fn test_deserialize_1d() {
        let ctx = ctx();
        let json = serialize(&encrypt_array(&ctx, &[1.0, 2.0, 3.0, 4.0])).unwrap();
        let array = deserialize(&ctx, &json).unwrap();
        assert_eq!(array.ndim(), 1);
        assert_eq!(array.len(), 4);
    }

    #[test]
    fn test_deserialize_2d_row_major() {
        let ctx = ctx();
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let json = serialize(&encrypt_rows(&ctx, &rows)).unwrap();
        let array = deserialize(&ctx, &json).unwrap();
        assert_eq!(array.ndim(), 2);
        assert_eq!(array.len(), 2);
        let values = decrypt_values(&ctx, &array).unwrap();
        for (got, want) in values.iter().zip([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]) {
            assert!((got - want).abs() < 1e-6);
        }
        let m = array.to_matrix().unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert!((ctx.decrypt(&m[(1, 0)]).unwrap() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_roundtrip_preserves_plaintext() {
        let ctx = ctx();
        let original = encrypt_array(&ctx, &[-0.5, 0.0, 12.125]);
        let restored = deserialize(&ctx, &serialize(&original).unwrap()).unwrap();
        assert_eq!(
            decrypt_values(&ctx, &original).unwrap(),
            decrypt_values(&ctx, &restored).unwrap()
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let ctx = ctx();
        let record = ctx.encrypt(1.0).to_record();
        let cases = [
            "[]".to_string(),
            "{}".to_string(),
            "42".to_string(),
            "not json".to_string(),
            "[{\"key_id\": ".to_string(),
            serde_json::json!([record.clone(), [record.clone()]]).to_string(),
            serde_json::json!([[record.clone()], [record.clone(), record.clone()]]).to_string(),
            serde_json::json!([[]]).to_string(),
            serde_json::json!([[[record.clone()]]]).to_string(),
        ];
        for case in &cases {
            match deserialize(&ctx, case) {
                Err(EmlError::Format(_)) => {}
                other => panic!("{} should be a format error, got {:?}", case, other),
            }
        }
    }

    #[test]
    fn test_one_d_becomes_column() {
        let ctx = ctx();
        let m = encrypt_array(&ctx, &[1.0, 2.0, 3.0]).to_matrix().unwrap();
        assert_eq!(m.shape(), (3, 1));
    }
}
