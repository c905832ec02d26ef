//! Training engine — encrypted Nesterov gradient descent with per-epoch loss reporting
//!
//! The loop itself knows nothing about messaging: progress goes through an
//! injected `LossSink`, so plain training and monitored training share one
//! implementation.

pub mod nesterov;
pub mod sink;

pub use nesterov::{initial_parameters, run_training, NesterovConfig, TrainOutcome};
pub use sink::{LoggingSink, LossSink, NoopSink, RecordingSink};
