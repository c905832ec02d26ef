//! Encrypted linear regression model
//!
//! Holds the caller's secret context and the optimizer hyperparameters, and
//! keeps the encrypted intercept / coefficients of the most recent fit.

use crate::codec::CipherArray;
use crate::error::{EmlError, Result};
use crate::he::{matrix, Ciphertext, SecretContext};
use crate::train::{run_training, LossSink, NesterovConfig, TrainOutcome};
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Exported encrypted model: ciphertext records only, no key material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedModel {
    pub intercept: serde_json::Value,
    pub coef: Vec<serde_json::Value>,
}

/// Linear regression trained and evaluated on ciphertexts
pub struct EncryptedLinearRegression<'a, X: SecretContext> {
    ctx: &'a X,
    pub optimizer: NesterovConfig,
    fitted: Option<TrainOutcome<X::Ciphertext>>,
}

impl<'a, X: SecretContext> EncryptedLinearRegression<'a, X> {
    pub fn new(ctx: &'a X, optimizer: NesterovConfig) -> Self {
        Self {
            ctx,
            optimizer,
            fitted: None,
        }
    }

    pub fn context(&self) -> &'a X {
        self.ctx
    }

    /// Train on encrypted data, reporting every epoch's loss to `sink`.
    ///
    /// A successful fit replaces any previous parameters; a failed one leaves
    /// them untouched.
    pub fn encrypted_fit<S>(
        &mut self,
        x: &CipherArray<X::Ciphertext>,
        y: &CipherArray<X::Ciphertext>,
        sink: &mut S,
    ) -> Result<&TrainOutcome<X::Ciphertext>>
    where
        S: LossSink<X::Ciphertext> + ?Sized,
    {
        let outcome = run_training(self.ctx, &self.optimizer, x, y, sink)?;
        info!(
            "Fitted model with {} coefficients over {} epochs",
            outcome.coefficients.len(),
            outcome.losses.len()
        );
        Ok(&*self.fitted.insert(outcome))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn state(&self) -> Result<&TrainOutcome<X::Ciphertext>> {
        self.fitted.as_ref().ok_or(EmlError::NotFitted)
    }

    pub fn encrypted_intercept(&self) -> Result<&X::Ciphertext> {
        Ok(&self.state()?.intercept)
    }

    pub fn encrypted_coefficients(&self) -> Result<&[X::Ciphertext]> {
        Ok(&self.state()?.coefficients)
    }

    /// Encrypted losses of the last fit
    pub fn losses(&self) -> Result<&[X::Ciphertext]> {
        Ok(&self.state()?.losses)
    }

    /// `x @ coef + intercept`, in ciphertext space
    pub fn encrypted_predict(&self, x: &CipherArray<X::Ciphertext>) -> Result<Vec<X::Ciphertext>> {
        let state = self.state()?;
        let x = x.to_matrix()?;
        if x.ncols() != state.coefficients.len() {
            return Err(EmlError::Shape(format!(
                "model has {} coefficients, x has {} features",
                state.coefficients.len(),
                x.ncols()
            )));
        }
        let w = DMatrix::from_fn(state.coefficients.len(), 1, |i, _| state.coefficients[i].clone());
        let y = matrix::add_scalar(&matrix::matmul(&x, &w), &state.intercept);
        Ok(y.iter().cloned().collect())
    }

    pub fn decrypt_intercept(&self) -> Result<f64> {
        self.ctx.decrypt(&self.state()?.intercept)
    }

    pub fn decrypt_coefficients(&self) -> Result<Vec<f64>> {
        self.state()?
            .coefficients
            .iter()
            .map(|c| self.ctx.decrypt(c))
            .collect()
    }

    /// Serialize the fitted parameters as ciphertext records
    pub fn export(&self) -> Result<String> {
        let state = self.state()?;
        let export = ExportedModel {
            intercept: state.intercept.to_record(),
            coef: state.coefficients.iter().map(Ciphertext::to_record).collect(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Restore parameters exported by `export`. The loss history is not part
    /// of the export and comes back empty.
    pub fn import(&mut self, json: &str) -> Result<()> {
        let export: ExportedModel = serde_json::from_str(json)?;
        if export.coef.is_empty() {
            return Err(EmlError::Format("exported model has no coefficients".into()));
        }
        let intercept = self.ctx.ciphertext_from_record(&export.intercept)?;
        let coefficients = export
            .coef
            .iter()
            .map(|r| self.ctx.ciphertext_from_record(r))
            .collect::<Result<Vec<_>>>()?;
        self.fitted = Some(TrainOutcome {
            intercept,
            coefficients,
            losses: Vec::new(),
        });
        Ok(())
    }
}
