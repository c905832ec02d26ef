//! Loss sinks — where the training loop reports each epoch's encrypted loss
//!
//! The training loop calls `report` synchronously once per epoch and waits
//! for it. An error from the sink aborts the run.

use crate::error::Result;
use crate::he::SecretContext;
use log::info;

/// Receives the encrypted loss of every epoch
pub trait LossSink<C> {
    fn report(&mut self, loss: &C, epoch: u32) -> Result<()>;
}

impl<C, F> LossSink<C> for F
where
    F: FnMut(&C, u32) -> Result<()>,
{
    fn report(&mut self, loss: &C, epoch: u32) -> Result<()> {
        self(loss, epoch)
    }
}

/// Discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl<C> LossSink<C> for NoopSink {
    fn report(&mut self, _loss: &C, _epoch: u32) -> Result<()> {
        Ok(())
    }
}

/// Decrypts and logs every loss. Needs the secret context.
pub struct LoggingSink<'a, X> {
    ctx: &'a X,
    log_interval: u32,
}

impl<'a, X: SecretContext> LoggingSink<'a, X> {
    pub fn new(ctx: &'a X) -> Self {
        Self { ctx, log_interval: 1 }
    }

    /// Log every N epochs only
    pub fn every(mut self, log_interval: u32) -> Self {
        self.log_interval = log_interval.max(1);
        self
    }
}

impl<X: SecretContext> LossSink<X::Ciphertext> for LoggingSink<'_, X> {
    fn report(&mut self, loss: &X::Ciphertext, epoch: u32) -> Result<()> {
        // Decrypt outside the macro: disabled levels skip its arguments
        let value = self.ctx.decrypt(loss)?;
        if epoch % self.log_interval == 0 {
            info!("  epoch={:>4} | loss={:.6}", epoch, value);
        }
        Ok(())
    }
}

/// Keeps decrypted `(epoch, loss)` pairs in memory
pub struct RecordingSink<'a, X> {
    ctx: &'a X,
    pub records: Vec<(u32, f64)>,
}

impl<'a, X: SecretContext> RecordingSink<'a, X> {
    pub fn new(ctx: &'a X) -> Self {
        Self {
            ctx,
            records: Vec::new(),
        }
    }
}

impl<X: SecretContext> LossSink<X::Ciphertext> for RecordingSink<'_, X> {
    fn report(&mut self, loss: &X::Ciphertext, epoch: u32) -> Result<()> {
        self.records.push((epoch, self.ctx.decrypt(loss)?));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::he::{SimulatedCiphertext, SimulatedContext};

    #[test]
    fn test_recording_sink() {
        let ctx = SimulatedContext::from_seed(1);
        let mut sink = RecordingSink::new(&ctx);
        sink.report(&ctx.encrypt(0.5), 0).unwrap();
        sink.report(&ctx.encrypt(0.25), 1).unwrap();
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[1].0, 1);
        assert!((sink.records[1].1 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_closure_sink() {
        let ctx = SimulatedContext::from_seed(1);
        let mut seen = Vec::new();
        let mut sink = |_loss: &SimulatedCiphertext, epoch: u32| -> Result<()> {
            seen.push(epoch);
            Ok(())
        };
        LossSink::report(&mut sink, &ctx.encrypt(1.0), 4).unwrap();
        assert_eq!(seen, vec![4]);
    }

    #[test]
    fn test_logging_sink_rejects_foreign_ciphertext() {
        let ctx = SimulatedContext::from_seed(1);
        let other = SimulatedContext::from_seed(2);
        let mut sink = LoggingSink::new(&ctx);
        assert!(sink.report(&other.encrypt(1.0), 0).is_err());
    }

    #[test]
    fn test_logging_sink_checks_skipped_epochs() {
        let ctx = SimulatedContext::from_seed(1);
        let other = SimulatedContext::from_seed(2);
        let mut sink = LoggingSink::new(&ctx).every(5);
        assert!(sink.report(&ctx.encrypt(1.0), 3).is_ok());
        assert!(matches!(
            sink.report(&other.encrypt(1.0), 3),
            Err(crate::error::EmlError::ContextMismatch { .. })
        ));
    }
}
