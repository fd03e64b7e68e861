//! Error types shared between the broker adapter and the publish loop.

use thiserror::Error;

use crate::metrics::GenerateError;
use crate::publisher::LoopState;

/// Failures reported by a [`BrokerClient`](crate::broker::BrokerClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker never acknowledged the connection.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// A single publish request was rejected; the transport is still usable.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The transport is gone for good.
    #[error("transport unavailable: {0}")]
    Fatal(String),
}

/// Reasons the publish loop stops with an error.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("broker connection failed")]
    Connection(#[source] BrokerError),

    #[error("transport lost while publishing")]
    Transport(#[source] BrokerError),

    #[error("cannot publish while the loop is {0:?}")]
    NotRunning(LoopState),

    #[error(transparent)]
    Generate(#[from] GenerateError),
}
