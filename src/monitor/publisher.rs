//! Loss publisher
//!
//! Serializes each epoch's loss and publishes it to a bus topic, blocking
//! until the bus acknowledged it. Two payload shapes:
//! - `Decrypted`: `{"epoch": 3, "loss": 0.42}`. The publisher decrypts with
//!   the training secret, so the plaintext loss leaves the trainer.
//! - `Encrypted`: `{"epoch": 3, "encrypted_loss": <record>}`, the shape the
//!   relay consumes.

use crate::bus::{MessageBus, MessageId, TopicPath};
use crate::error::{EmlError, Result};
use crate::he::{Ciphertext, SecretContext};
use crate::train::LossSink;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// What goes on the wire for each epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    Decrypted,
    Encrypted,
}

/// Plaintext loss message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossMessage {
    pub epoch: u32,
    pub loss: f64,
}

/// Loss message carrying the ciphertext record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedLossMessage {
    pub epoch: u32,
    pub encrypted_loss: serde_json::Value,
}

/// `LossSink` that publishes every epoch's loss to `topic`
pub struct LossPublisher<'a, X, B> {
    ctx: &'a X,
    bus: B,
    topic: TopicPath,
    mode: PublishMode,
    warned: bool,
    published: Vec<MessageId>,
}

impl<'a, X: SecretContext, B: MessageBus> LossPublisher<'a, X, B> {
    pub fn new(ctx: &'a X, bus: B, topic: TopicPath) -> Self {
        Self {
            ctx,
            bus,
            topic,
            mode: PublishMode::default(),
            warned: false,
            published: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: PublishMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub fn topic(&self) -> &TopicPath {
        &self.topic
    }

    /// IDs acknowledged by the bus so far, in epoch order
    pub fn published(&self) -> &[MessageId] {
        &self.published
    }

    /// Publish one epoch's loss and wait for the acknowledgement
    pub fn publish_loss(&mut self, loss: &X::Ciphertext, epoch: u32) -> Result<MessageId> {
        let payload = match self.mode {
            PublishMode::Decrypted => {
                if !self.warned {
                    warn!(
                        "Publishing decrypted loss to {}: plaintext leaves the trainer",
                        self.topic
                    );
                    self.warned = true;
                }
                serde_json::to_vec(&LossMessage {
                    epoch,
                    loss: self.ctx.decrypt(loss)?,
                })?
            }
            PublishMode::Encrypted => serde_json::to_vec(&EncryptedLossMessage {
                epoch,
                encrypted_loss: loss.to_record(),
            })?,
        };

        let id = self.bus.publish(&self.topic, payload).map_err(|e| match e {
            EmlError::Delivery(msg) => EmlError::Delivery(msg),
            other => EmlError::Delivery(other.to_string()),
        })?;
        debug!("Published epoch {} loss to {} as {}", epoch, self.topic, id);
        self.published.push(id.clone());
        Ok(id)
    }

    pub fn into_bus(self) -> B {
        self.bus
    }
}

impl<X: SecretContext, B: MessageBus> LossSink<X::Ciphertext> for LossPublisher<'_, X, B> {
    fn report(&mut self, loss: &X::Ciphertext, epoch: u32) -> Result<()> {
        self.publish_loss(loss, epoch).map(|_| ())
    }
}
