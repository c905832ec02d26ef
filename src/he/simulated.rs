//! Simulated HE backend — fixed-point software scheme (NOT cryptographically secure)
//!
//! Values are encoded as signed fixed-point integers with `precision`
//! fractional bits and tagged with the key id of the context that produced
//! them. Arithmetic behaves like a leveled approximate scheme (rounding on
//! every multiply) so training runs reproduce the numerical behaviour of a
//! real backend, but the encoding hides nothing. Use it for development,
//! tests and demos only.
//!
//! A result that leaves the i64 range is kept as an overflowed ciphertext
//! rather than aborting; decrypting or decoding it fails with
//! `EmlError::Overflow`.

use super::{Ciphertext, SecretContext};
use crate::error::{EmlError, Result};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default number of fractional bits (about 7 decimal digits)
pub const DEFAULT_PRECISION: u32 = 24;

/// Upper bound keeping products inside i128 and results inside i64
pub const MAX_PRECISION: u32 = 40;

/// Secret context of the simulated scheme
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedContext {
    /// Public identifier derived from the secret
    pub key_id: String,
    /// Hex-encoded secret bytes
    secret: String,
    precision: u32,
}

/// Ciphertext of the simulated scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedCiphertext {
    pub key_id: String,
    pub frac_bits: u32,
    pub data: i64,
    /// Set once a result left the fixed-point range; `data` is then meaningless
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overflow: bool,
}

impl SimulatedContext {
    /// Create a context with fresh random key material
    pub fn generate() -> Self {
        Self::from_rng(&mut StdRng::from_entropy())
    }

    /// Deterministic context, for reproducible tests and demos
    pub fn from_seed(seed: u64) -> Self {
        Self::from_rng(&mut StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: &mut StdRng) -> Self {
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self {
            key_id: Self::derive_key_id(&secret),
            secret: hex::encode(secret),
            precision: DEFAULT_PRECISION,
        }
    }

    fn derive_key_id(secret: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"eml-simulated-key-v1");
        hasher.update(secret);
        hex::encode(hasher.finalize())[..16].to_string()
    }

    fn check_key(&self, key_id: &str) -> Result<()> {
        if key_id != self.key_id {
            return Err(EmlError::ContextMismatch {
                expected: self.key_id.clone(),
                found: key_id.to_string(),
            });
        }
        Ok(())
    }
}

impl SecretContext for SimulatedContext {
    type Ciphertext = SimulatedCiphertext;

    /// # Panics
    /// On non-finite input or values outside the fixed-point range.
    fn encrypt(&self, value: f64) -> SimulatedCiphertext {
        assert!(value.is_finite(), "cannot encrypt non-finite value {}", value);
        let encoded = (value * pow2(self.precision)).round();
        assert!(
            encoded.abs() < i64::MAX as f64,
            "value {} exceeds the fixed-point range at precision {}",
            value,
            self.precision
        );
        SimulatedCiphertext {
            key_id: self.key_id.clone(),
            frac_bits: self.precision,
            data: encoded as i64,
            overflow: false,
        }
    }

    fn decrypt(&self, ciphertext: &SimulatedCiphertext) -> Result<f64> {
        self.check_key(&ciphertext.key_id)?;
        ciphertext.check_range()?;
        Ok(ciphertext.data as f64 / pow2(ciphertext.frac_bits))
    }

    fn precision(&self) -> u32 {
        self.precision
    }

    fn set_precision(&mut self, bits: u32) -> Result<()> {
        if bits > MAX_PRECISION {
            return Err(EmlError::Config(format!(
                "precision {} above maximum {}",
                bits, MAX_PRECISION
            )));
        }
        self.precision = bits;
        Ok(())
    }

    fn ciphertext_from_record(&self, record: &serde_json::Value) -> Result<SimulatedCiphertext> {
        let ct: SimulatedCiphertext = serde_json::from_value(record.clone())
            .map_err(|e| EmlError::Format(format!("invalid ciphertext record: {}", e)))?;
        if ct.frac_bits > MAX_PRECISION {
            return Err(EmlError::Format(format!(
                "ciphertext precision {} above maximum {}",
                ct.frac_bits, MAX_PRECISION
            )));
        }
        self.check_key(&ct.key_id)?;
        ct.check_range()?;
        Ok(ct)
    }

    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn from_json(json: &str) -> Result<Self> {
        let ctx: SimulatedContext = serde_json::from_str(json)?;
        let secret = hex::decode(&ctx.secret)
            .map_err(|e| EmlError::Config(format!("context secret is not hex: {}", e)))?;
        if Self::derive_key_id(&secret) != ctx.key_id {
            return Err(EmlError::Config("context key id does not match its secret".into()));
        }
        if ctx.precision > MAX_PRECISION {
            return Err(EmlError::Config(format!(
                "context precision {} above maximum {}",
                ctx.precision, MAX_PRECISION
            )));
        }
        Ok(ctx)
    }
}

impl SimulatedCiphertext {
    fn check_range(&self) -> Result<()> {
        if self.overflow {
            return Err(EmlError::Overflow(format!(
                "ciphertext left the i64 range at {} fractional bits",
                self.frac_bits
            )));
        }
        Ok(())
    }

    /// Apply `op` to both operands aligned to the larger precision
    fn combine(&self, rhs: &Self, op: impl Fn(i128, i128, u32) -> Option<i128>) -> Self {
        assert_eq!(
            self.key_id, rhs.key_id,
            "arithmetic across different contexts"
        );
        let bits = self.frac_bits.max(rhs.frac_bits);
        let a = (self.data as i128) << (bits - self.frac_bits);
        let b = (rhs.data as i128) << (bits - rhs.frac_bits);
        let data = if self.overflow || rhs.overflow {
            None
        } else {
            op(a, b, bits)
        };
        self.with_data(data, bits)
    }

    fn with_data(&self, data: Option<i128>, frac_bits: u32) -> Self {
        let data = data.and_then(|d| i64::try_from(d).ok());
        Self {
            key_id: self.key_id.clone(),
            frac_bits,
            data: data.unwrap_or(0),
            overflow: data.is_none(),
        }
    }
}

/// `a * b` rescaled by `bits`, rounding to nearest
fn mul_fixed(a: i128, b: i128, bits: u32) -> Option<i128> {
    let product = a.checked_mul(b)?;
    if bits == 0 {
        return Some(product);
    }
    Some(product.checked_add(1i128 << (bits - 1))? >> bits)
}

impl Ciphertext for SimulatedCiphertext {
    fn add(&self, rhs: &Self) -> Self {
        self.combine(rhs, |a, b, _| a.checked_add(b))
    }

    fn sub(&self, rhs: &Self) -> Self {
        self.combine(rhs, |a, b, _| a.checked_sub(b))
    }

    fn mul(&self, rhs: &Self) -> Self {
        self.combine(rhs, mul_fixed)
    }

    fn neg(&self) -> Self {
        let data = if self.overflow {
            None
        } else {
            (self.data as i128).checked_neg()
        };
        self.with_data(data, self.frac_bits)
    }

    fn scale(&self, factor: f64) -> Self {
        assert!(factor.is_finite(), "cannot scale by non-finite factor {}", factor);
        let encoded = (factor * pow2(self.frac_bits)).round();
        let data = if self.overflow || encoded.abs() >= i64::MAX as f64 {
            None
        } else {
            mul_fixed(self.data as i128, encoded as i128, self.frac_bits)
        };
        self.with_data(data, self.frac_bits)
    }

    fn to_record(&self) -> serde_json::Value {
        let mut record = serde_json::json!({
            "key_id": self.key_id,
            "frac_bits": self.frac_bits,
            "data": self.data,
        });
        if self.overflow {
            record["overflow"] = serde_json::Value::Bool(true);
        }
        record
    }
}

fn pow2(bits: u32) -> f64 {
    (1u64 << bits) as f64
}
