//! Channel → store ingestion

mod consumer;

pub use consumer::{ConsumerState, ConsumerStats, IngestionConsumer, MessageOutcome};
