//! Training monitor — pushes per-epoch loss to a message bus
//!
//! `LossPublisher` is the `LossSink` used by monitored training runs.

pub mod publisher;

pub use publisher::{EncryptedLossMessage, LossMessage, LossPublisher, PublishMode};
