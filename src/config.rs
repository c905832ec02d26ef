//! Pipeline configuration
//!
//! One JSON file drives the whole pipeline: where the context and datasets
//! live, which topics carry losses, and the optimizer settings. Missing keys
//! fall back to the defaults below.

use crate::bus::TopicPath;
use crate::error::{EmlError, Result};
use crate::he::simulated::{DEFAULT_PRECISION, MAX_PRECISION};
use crate::monitor::PublishMode;
use crate::relay::RelayConfig;
use crate::train::NesterovConfig;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub project_id: String,
    /// Topic the trainer publishes losses to
    pub loss_topic: String,
    /// Topic the relay republishes re-encrypted losses to
    pub relay_topic: String,
    /// Local directory backing the object store
    pub storage_root: String,
    pub bucket: String,
    pub context_path: String,
    pub x_path: String,
    pub y_path: String,
    /// Fractional bits set on every loaded context
    pub precision: u32,
    pub publish_mode: PublishMode,
    pub optimizer: NesterovConfig,
    /// Gossip listen port (0 = random)
    pub swarm_port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: "eml-demo".into(),
            loss_topic: "loss".into(),
            relay_topic: "loss_pre".into(),
            storage_root: "eml-store".into(),
            bucket: "eml_training".into(),
            context_path: "secret_context.json".into(),
            x_path: "X_train_ct.json".into(),
            y_path: "y_train_ct.json".into(),
            precision: DEFAULT_PRECISION,
            publish_mode: PublishMode::Encrypted,
            optimizer: NesterovConfig {
                learning_rate: 0.03,
                ..NesterovConfig::default()
            },
            swarm_port: 0,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.precision > MAX_PRECISION {
            return Err(EmlError::Config(format!(
                "precision {} above maximum {}",
                self.precision, MAX_PRECISION
            )));
        }
        TopicPath::parse(self.loss_topic_path().as_str())?;
        TopicPath::parse(self.relay_topic_path().as_str())?;
        self.optimizer.validate()
    }

    pub fn loss_topic_path(&self) -> TopicPath {
        TopicPath::new(&self.project_id, &self.loss_topic)
    }

    pub fn relay_topic_path(&self) -> TopicPath {
        TopicPath::new(&self.project_id, &self.relay_topic)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            bucket: self.bucket.clone(),
            context_path: self.context_path.clone(),
            precision: self.precision,
            output_topic: self.relay_topic_path(),
        }
    }
}
