//! EML — Encrypted Machine Learning
//!
//! Linear regression trained with Nesterov gradient descent entirely over
//! homomorphically encrypted data, with per-epoch loss published to a
//! message bus and a relay that re-encrypts losses for a second audience.

pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod he;
pub mod model;
pub mod monitor;
pub mod relay;
pub mod storage;
pub mod train;

pub use bus::{InMemoryBus, MessageBus, TopicPath};
pub use codec::CipherArray;
pub use config::PipelineConfig;
pub use error::{EmlError, Result};
pub use he::{Ciphertext, SecretContext, SimulatedContext};
pub use model::EncryptedLinearRegression;
pub use monitor::{LossPublisher, PublishMode};
pub use relay::{IdentityReencryptor, LossRelay, PubSubEvent, Reencryptor};
pub use storage::{FsObjectStore, ObjectStore};
pub use train::{run_training, LossSink, NesterovConfig};
