//! Nesterov accelerated gradient descent over ciphertexts
//!
//! Linear regression trained entirely in ciphertext space. Only the initial
//! random draws are plaintext; they are encrypted before any arithmetic.
//! Each epoch:
//! 1. look-ahead weights `w - v_w * momentum`, `b - v_b * momentum`
//! 2. prediction `x @ w_la + b_la`, error `y_pred - y`
//! 3. loss `mean(error^2)`, reported to the sink (blocking)
//! 4. gradients, velocity and weight updates
//!
//! The fitted parameters are the look-ahead values of the last epoch, not the
//! post-update weights.

use super::sink::LossSink;
use crate::codec::CipherArray;
use crate::error::{EmlError, Result};
use crate::he::{matrix, CipherMatrix, Ciphertext, SecretContext};
use log::{debug, error, info};
use nalgebra::DMatrix;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Optimizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NesterovConfig {
    pub learning_rate: f64,
    /// Momentum coefficient (gamma)
    pub momentum: f64,
    pub epochs: u32,
    /// Seed for the initial parameter draws; `None` draws from entropy
    pub seed: Option<u64>,
}

impl Default for NesterovConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            momentum: 0.9,
            epochs: 10,
            seed: None,
        }
    }
}

impl NesterovConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(EmlError::Config(format!("invalid learning rate {}", self.learning_rate)));
        }
        if !self.momentum.is_finite() || self.momentum < 0.0 {
            return Err(EmlError::Config(format!("invalid momentum {}", self.momentum)));
        }
        if self.epochs == 0 {
            return Err(EmlError::Config("epochs must be at least 1".into()));
        }
        Ok(())
    }

    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainOutcome<C> {
    pub intercept: C,
    pub coefficients: Vec<C>,
    /// Encrypted loss of every epoch, in order
    pub losses: Vec<C>,
}

/// Plaintext initial parameters: coefficients first (scaled by
/// `sqrt(1 / n_features)`), then the intercept.
pub fn initial_parameters(rng: &mut impl Rng, n_features: usize) -> (DMatrix<f64>, f64) {
    let scale = (1.0 / n_features as f64).sqrt();
    let w = DMatrix::from_fn(n_features, 1, |_, _| rng.sample::<f64, _>(StandardNormal) * scale);
    let b: f64 = rng.sample(StandardNormal);
    (w, b)
}

/// Run Nesterov training on encrypted `x` (n_samples × n_features) and
/// `y` (n_samples × 1). 1D inputs are read as a single column.
///
/// `sink` is called once per epoch, in order, and must return before the
/// next epoch starts. Its first error aborts the run.
pub fn run_training<X, S>(
    ctx: &X,
    config: &NesterovConfig,
    x: &CipherArray<X::Ciphertext>,
    y: &CipherArray<X::Ciphertext>,
    sink: &mut S,
) -> Result<TrainOutcome<X::Ciphertext>>
where
    X: SecretContext,
    S: LossSink<X::Ciphertext> + ?Sized,
{
    config.validate()?;
    let x = x.to_matrix()?;
    let y = y.to_matrix()?;
    let (n_samples, n_features) = x.shape();
    if n_samples == 0 || n_features == 0 {
        return Err(EmlError::Shape(format!("x is empty ({}x{})", n_samples, n_features)));
    }
    if y.nrows() != n_samples {
        return Err(EmlError::Shape(format!(
            "x has {} samples but y has {}",
            n_samples,
            y.nrows()
        )));
    }
    if y.ncols() != 1 {
        return Err(EmlError::Shape(format!("y must have one column, got {}", y.ncols())));
    }

    let mut rng = config.rng();
    let (w0, b0) = initial_parameters(&mut rng, n_features);
    let mut w = matrix::encrypt_matrix(ctx, &w0);
    let mut b = ctx.encrypt(b0);
    let lr = ctx.encrypt(config.learning_rate);
    let gamma = ctx.encrypt(config.momentum);
    let mut velocity_w = matrix::encrypt_zeros(ctx, n_features, 1);
    let mut velocity_b = ctx.encrypt(0.0);

    info!(
        "Training on {} samples x {} features for {} epochs | lr={} | momentum={}",
        n_samples, n_features, config.epochs, config.learning_rate, config.momentum
    );

    let mut losses = Vec::with_capacity(config.epochs as usize);
    let mut look_ahead: Option<(X::Ciphertext, CipherMatrix<X::Ciphertext>)> = None;

    for epoch in 0..config.epochs {
        let w_la = matrix::sub(&w, &matrix::mul_scalar(&velocity_w, &gamma));
        let b_la = b.sub(&velocity_b.mul(&gamma));

        let y_pred = matrix::add_scalar(&matrix::matmul(&x, &w_la), &b_la);
        let error = matrix::sub(&y_pred, &y);
        let loss = matrix::mean(&matrix::square(&error));
        losses.push(loss.clone());

        if let Err(e) = sink.report(&loss, epoch) {
            error!("Aborting training at epoch {}: {}", epoch, e);
            return Err(e);
        }

        let grad_w = matrix::mean_rows(&matrix::mul_column(&x, &error)).transpose();
        let grad_b = matrix::mean(&error);

        velocity_w = matrix::add(
            &matrix::mul_scalar(&velocity_w, &gamma),
            &matrix::mul_scalar(&grad_w, &lr),
        );
        velocity_b = velocity_b.mul(&gamma).add(&grad_b.mul(&lr));

        w = matrix::sub(&w, &velocity_w);
        b = b.sub(&velocity_b);

        debug!("epoch {} complete", epoch);
        look_ahead = Some((b_la, w_la));
    }

    let (intercept, coef) = look_ahead.ok_or_else(|| EmlError::Config("no epoch was run".into()))?;
    info!("Training complete after {} epochs", losses.len());

    Ok(TrainOutcome {
        intercept,
        coefficients: coef.iter().cloned().collect(),
        losses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encrypt_array, encrypt_rows};
    use crate::he::SimulatedContext;
    use crate::train::RecordingSink;

    /// Same update rule in plaintext f64
    fn reference(config: &NesterovConfig, x: &DMatrix<f64>, y: &DMatrix<f64>) -> (f64, Vec<f64>, Vec<f64>) {
        let (mut w, mut b) = initial_parameters(&mut config.rng(), x.ncols());
        let n = x.nrows() as f64;
        let (lr, gamma) = (config.learning_rate, config.momentum);
        let mut vw = DMatrix::zeros(x.ncols(), 1);
        let mut vb = 0.0;
        let mut losses = Vec::new();
        let (mut w_la, mut b_la) = (w.clone(), b);
        for _ in 0..config.epochs {
            w_la = &w - &vw * gamma;
            b_la = b - vb * gamma;
            let error = (x * &w_la).add_scalar(b_la) - y;
            losses.push(error.map(|e| e * e).sum() / n);
            let mut grad_w = DMatrix::zeros(x.ncols(), 1);
            for j in 0..x.ncols() {
                grad_w[(j, 0)] = (0..x.nrows()).map(|i| x[(i, j)] * error[(i, 0)]).sum::<f64>() / n;
            }
            let grad_b = error.sum() / n;
            vw = &vw * gamma + grad_w * lr;
            vb = vb * gamma + grad_b * lr;
            w -= &vw;
            b -= vb;
        }
        (b_la, w_la.iter().cloned().collect(), losses)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-3 * b.abs().max(1.0)
    }

    fn line_data(ctx: &SimulatedContext) -> (CipherArray<crate::he::SimulatedCiphertext>, CipherArray<crate::he::SimulatedCiphertext>) {
        (
            encrypt_rows(ctx, &[vec![1.0], vec![2.0], vec![3.0]]),
            encrypt_rows(ctx, &[vec![2.0], vec![4.0], vec![6.0]]),
        )
    }

    #[test]
    fn test_sink_called_once_per_epoch_in_order() {
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let config = NesterovConfig { epochs: 7, seed: Some(1), learning_rate: 0.03, ..Default::default() };
        let mut epochs = Vec::new();
        let mut sink = |_loss: &crate::he::SimulatedCiphertext, epoch: u32| -> Result<()> {
            epochs.push(epoch);
            Ok(())
        };
        let outcome = run_training(&ctx, &config, &x, &y, &mut sink).unwrap();
        assert_eq!(epochs, (0..7).collect::<Vec<_>>());
        assert_eq!(outcome.losses.len(), 7);
        assert_eq!(outcome.coefficients.len(), 1);
    }

    #[test]
    fn test_matches_plaintext_reference() {
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let config = NesterovConfig { learning_rate: 0.3, momentum: 0.9, epochs: 10, seed: Some(11) };
        let mut sink = RecordingSink::new(&ctx);
        let outcome = run_training(&ctx, &config, &x, &y, &mut sink).unwrap();

        let xs = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
        let ys = DMatrix::from_row_slice(3, 1, &[2.0, 4.0, 6.0]);
        let (b_ref, w_ref, losses_ref) = reference(&config, &xs, &ys);

        let b = ctx.decrypt(&outcome.intercept).unwrap();
        let w = ctx.decrypt(&outcome.coefficients[0]).unwrap();
        assert!(close(b, b_ref), "intercept {} vs reference {}", b, b_ref);
        assert!(close(w, w_ref[0]), "coefficient {} vs reference {}", w, w_ref[0]);
        for ((epoch, loss), want) in sink.records.iter().zip(&losses_ref) {
            assert!(close(*loss, *want), "epoch {} loss {} vs {}", epoch, loss, want);
        }
    }

    #[test]
    fn test_returns_look_ahead_not_final_weights() {
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let config = NesterovConfig { learning_rate: 0.05, epochs: 4, seed: Some(2), ..Default::default() };
        let outcome = run_training(&ctx, &config, &x, &y, &mut crate::train::NoopSink).unwrap();

        // Replay one more epoch's look-ahead in plaintext: it must differ from the returned value
        let xs = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
        let ys = DMatrix::from_row_slice(3, 1, &[2.0, 4.0, 6.0]);
        let (b_ref, w_ref, _) = reference(&config, &xs, &ys);
        let (b_next, w_next, _) = reference(&NesterovConfig { epochs: 5, ..config.clone() }, &xs, &ys);
        let w = ctx.decrypt(&outcome.coefficients[0]).unwrap();
        let b = ctx.decrypt(&outcome.intercept).unwrap();
        assert!(close(w, w_ref[0]) && close(b, b_ref));
        assert!(!close(w, w_next[0]) || !close(b, b_next));
    }

    #[test]
    fn test_converges_on_line() {
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let config = NesterovConfig { learning_rate: 0.03, momentum: 0.9, epochs: 200, seed: Some(5) };
        let outcome = run_training(&ctx, &config, &x, &y, &mut crate::train::NoopSink).unwrap();
        let w = ctx.decrypt(&outcome.coefficients[0]).unwrap();
        let b = ctx.decrypt(&outcome.intercept).unwrap();
        assert!((w - 2.0).abs() < 0.01, "coefficient {}", w);
        assert!(b.abs() < 0.02, "intercept {}", b);
        let first = ctx.decrypt(&outcome.losses[0]).unwrap();
        let last = ctx.decrypt(outcome.losses.last().unwrap()).unwrap();
        assert!(last < first);
    }

    #[test]
    fn test_sink_failure_aborts_run() {
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let config = NesterovConfig { epochs: 10, seed: Some(1), ..Default::default() };
        let mut epochs = Vec::new();
        let mut sink = |_loss: &crate::he::SimulatedCiphertext, epoch: u32| -> Result<()> {
            epochs.push(epoch);
            if epoch == 3 {
                return Err(EmlError::Delivery("simulated outage".into()));
            }
            Ok(())
        };
        let result = run_training(&ctx, &config, &x, &y, &mut sink);
        assert!(matches!(result, Err(EmlError::Delivery(_))));
        assert_eq!(epochs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_one_d_inputs_are_columns() {
        let ctx = SimulatedContext::from_seed(3);
        let (x2, y2) = line_data(&ctx);
        let x1 = encrypt_array(&ctx, &[1.0, 2.0, 3.0]);
        let y1 = encrypt_array(&ctx, &[2.0, 4.0, 6.0]);
        let config = NesterovConfig { epochs: 3, seed: Some(8), ..Default::default() };
        let a = run_training(&ctx, &config, &x1, &y1, &mut crate::train::NoopSink).unwrap();
        let b = run_training(&ctx, &config, &x2, &y2, &mut crate::train::NoopSink).unwrap();
        assert_eq!(a.intercept, b.intercept);
        assert_eq!(a.coefficients, b.coefficients);
    }

    #[test]
    fn test_invalid_inputs() {
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let zero_epochs = NesterovConfig { epochs: 0, ..Default::default() };
        assert!(matches!(
            run_training(&ctx, &zero_epochs, &x, &y, &mut crate::train::NoopSink),
            Err(EmlError::Config(_))
        ));

        let short_y = encrypt_array(&ctx, &[1.0, 2.0]);
        assert!(matches!(
            run_training(&ctx, &NesterovConfig::default(), &x, &short_y, &mut crate::train::NoopSink),
            Err(EmlError::Shape(_))
        ));

        let wide_y = encrypt_rows(&ctx, &[vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);
        assert!(matches!(
            run_training(&ctx, &NesterovConfig::default(), &x, &wide_y, &mut crate::train::NoopSink),
            Err(EmlError::Shape(_))
        ));
    }

    #[test]
    fn test_multi_feature_matches_reference() {
        let ctx = SimulatedContext::from_seed(4);
        let rows = vec![
            vec![0.5, -1.0],
            vec![1.0, 0.0],
            vec![-0.5, 2.0],
            vec![1.5, 1.0],
        ];
        let targets: Vec<f64> = rows.iter().map(|r| 1.5 * r[0] - 0.5 * r[1] + 0.25).collect();
        let x = encrypt_rows(&ctx, &rows);
        let y = encrypt_array(&ctx, &targets);
        let config = NesterovConfig { learning_rate: 0.1, momentum: 0.9, epochs: 15, seed: Some(9) };
        let outcome = run_training(&ctx, &config, &x, &y, &mut crate::train::NoopSink).unwrap();

        let xs = DMatrix::from_fn(4, 2, |i, j| rows[i][j]);
        let ys = DMatrix::from_fn(4, 1, |i, _| targets[i]);
        let (b_ref, w_ref, _) = reference(&config, &xs, &ys);
        assert!(close(ctx.decrypt(&outcome.intercept).unwrap(), b_ref));
        for (c, want) in outcome.coefficients.iter().zip(&w_ref) {
            assert!(close(ctx.decrypt(c).unwrap(), *want));
        }
    }

    #[test]
    fn test_divergence_surfaces_as_overflow() {
        // lr 0.3 with momentum 0.9 diverges on this line well before epoch 100
        let ctx = SimulatedContext::from_seed(3);
        let (x, y) = line_data(&ctx);
        let config = NesterovConfig { epochs: 100, seed: Some(0), ..Default::default() };

        let mut sink = RecordingSink::new(&ctx);
        let result = run_training(&ctx, &config, &x, &y, &mut sink);
        assert!(matches!(result, Err(EmlError::Overflow(_))));
        assert!(!sink.records.is_empty());
        assert!(sink.records.len() < 100);

        let outcome = run_training(&ctx, &config, &x, &y, &mut crate::train::NoopSink).unwrap();
        assert!(matches!(ctx.decrypt(&outcome.intercept), Err(EmlError::Overflow(_))));
        assert!(matches!(
            ctx.decrypt(outcome.losses.last().unwrap()),
            Err(EmlError::Overflow(_))
        ));
    }
}
