//! Homomorphic encryption seam
//!
//! The encrypted arithmetic itself belongs to an external scheme. This module
//! only fixes the interface the training loop, codec and relay rely on:
//! - **SecretContext**: encrypt / decrypt, precision, JSON persistence
//! - **Ciphertext**: closed add / sub / mul / neg plus plaintext scaling
//! - **matrix**: 2D ciphertext arrays and the few reductions training needs
//! - **simulated**: software backend for development and tests

pub mod matrix;
pub mod simulated;

use crate::error::Result;
use std::fmt::Debug;

pub use matrix::CipherMatrix;
pub use simulated::{SimulatedCiphertext, SimulatedContext};

/// An encrypted scalar.
///
/// Operands must come from the same context. Mixing contexts is a
/// precondition violation and implementations panic on it.
pub trait Ciphertext: Clone + PartialEq + Debug + 'static {
    fn add(&self, rhs: &Self) -> Self;
    fn sub(&self, rhs: &Self) -> Self;
    fn mul(&self, rhs: &Self) -> Self;
    fn neg(&self) -> Self;

    /// Multiply by a plaintext constant
    fn scale(&self, factor: f64) -> Self;

    /// Encode this ciphertext as a standalone JSON record
    fn to_record(&self) -> serde_json::Value;
}

/// Secret key material plus encoding parameters.
///
/// Required for both encryption and decryption. `precision` may only be
/// changed right after loading, before any ciphertext is produced with it.
pub trait SecretContext {
    type Ciphertext: Ciphertext;

    fn encrypt(&self, value: f64) -> Self::Ciphertext;

    fn decrypt(&self, ciphertext: &Self::Ciphertext) -> Result<f64>;

    /// Number of fractional bits retained by the encoding
    fn precision(&self) -> u32;

    /// Fails with `EmlError::Config` when the backend cannot hold `bits`
    fn set_precision(&mut self, bits: u32) -> Result<()>;

    /// Rebuild a ciphertext from a record produced by `Ciphertext::to_record`
    fn ciphertext_from_record(&self, record: &serde_json::Value) -> Result<Self::Ciphertext>;

    fn to_json(&self) -> Result<String>;

    fn from_json(json: &str) -> Result<Self>
    where
        Self: Sized;
}
