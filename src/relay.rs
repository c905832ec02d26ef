//! Loss relay — re-encrypts inbound encrypted losses and republishes them
//!
//! Triggered once per inbound message. Each invocation:
//! 1. Decodes the base64 JSON payload and reads `encrypted_loss`
//! 2. Downloads the secret context (one download per invocation)
//! 3. Runs the `Reencryptor` over the ciphertext
//! 4. Publishes `{"reencrypted_loss": <record>}` to the output topic
//!
//! Failures are logged and returned; redelivery is the transport's business.

use crate::bus::{BusMessage, MessageBus, MessageId, TopicPath};
use crate::error::{EmlError, Result};
use crate::he::{Ciphertext, SecretContext};
use crate::storage::{self, ObjectStore};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;

/// Transforms a ciphertext so a different key holder can decrypt it
pub trait Reencryptor<X: SecretContext> {
    fn transform(&self, ctx: &X, ciphertext: X::Ciphertext) -> Result<X::Ciphertext>;
}

/// Returns the ciphertext unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityReencryptor;

impl<X: SecretContext> Reencryptor<X> for IdentityReencryptor {
    fn transform(&self, _ctx: &X, ciphertext: X::Ciphertext) -> Result<X::Ciphertext> {
        Ok(ciphertext)
    }
}

/// Push-subscription envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubEvent {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// Base64-encoded payload
    pub data: String,
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl PubSubEvent {
    /// Wrap a raw payload
    pub fn new(message_id: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            message: PubSubMessage {
                data: BASE64.encode(payload),
                message_id: message_id.into(),
                publish_time: Utc::now(),
                attributes: HashMap::new(),
            },
            subscription: None,
        }
    }

    pub fn from_bus_message(msg: &BusMessage) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("topic".to_string(), msg.topic.to_string());
        Self {
            message: PubSubMessage {
                data: BASE64.encode(&msg.data),
                message_id: msg.id.clone(),
                publish_time: msg.publish_time,
                attributes,
            },
            subscription: None,
        }
    }

    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(self.message.data.as_bytes())?)
    }
}

/// Relay input payload. Extra fields (e.g. `epoch`) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayInput {
    pub encrypted_loss: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayOutput {
    pub reencrypted_loss: serde_json::Value,
}

/// Where the relay finds its context and where it publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bucket: String,
    pub context_path: String,
    /// Fractional bits set on the downloaded context
    pub precision: u32,
    pub output_topic: TopicPath,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bucket: "eml_training".into(),
            context_path: "secret_context.json".into(),
            precision: crate::he::simulated::DEFAULT_PRECISION,
            output_topic: TopicPath::new("eml-demo", "loss_pre"),
        }
    }
}

/// Stateless relay between the loss topic and the re-encrypted loss topic
pub struct LossRelay<X, S, B, R = IdentityReencryptor> {
    store: S,
    bus: B,
    reencryptor: R,
    config: RelayConfig,
    _context: PhantomData<fn() -> X>,
}

impl<X, S, B> LossRelay<X, S, B, IdentityReencryptor>
where
    X: SecretContext,
    S: ObjectStore,
    B: MessageBus,
{
    pub fn new(store: S, bus: B, config: RelayConfig) -> Self {
        Self::with_reencryptor(store, bus, IdentityReencryptor, config)
    }
}

impl<X, S, B, R> LossRelay<X, S, B, R>
where
    X: SecretContext,
    S: ObjectStore,
    B: MessageBus,
    R: Reencryptor<X>,
{
    pub fn with_reencryptor(store: S, bus: B, reencryptor: R, config: RelayConfig) -> Self {
        Self {
            store,
            bus,
            reencryptor,
            config,
            _context: PhantomData,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle one inbound event. Errors are logged, then returned.
    pub fn on_event(&self, event: &PubSubEvent) -> Result<MessageId> {
        self.relay(event).map_err(|e| {
            error!("Relay failed for message {}: {}", event.message.message_id, e);
            e
        })
    }

    fn relay(&self, event: &PubSubEvent) -> Result<MessageId> {
        let payload = event.decode_payload()?;
        let input: RelayInput = serde_json::from_slice(&payload)
            .map_err(|e| EmlError::Event(format!("expected {{\"encrypted_loss\": ...}}: {}", e)))?;

        let ctx: X = storage::load_context(
            &self.store,
            &self.config.bucket,
            &self.config.context_path,
            self.config.precision,
        )?;
        let loss = ctx.ciphertext_from_record(&input.encrypted_loss)?;
        let reencrypted = self.reencryptor.transform(&ctx, loss)?;

        let output = RelayOutput {
            reencrypted_loss: reencrypted.to_record(),
        };
        let id = self
            .bus
            .publish(&self.config.output_topic, serde_json::to_vec(&output)?)?;
        info!(
            "Relayed message {} to {} as {}",
            event.message.message_id, self.config.output_topic, id
        );
        Ok(id)
    }
}
