//! Stream gateway: consumer-group read loops feeding a message handler
//!
//! One read loop per stream. Each claimed batch is dispatched to the
//! handler concurrently and the loop does not claim again until the batch
//! has drained. Acknowledgment follows the handler's [`Disposition`]; a
//! message is never acknowledged without the handler's say-so.

mod consumer;
mod tracker;

pub use consumer::{GatewayConfig, StreamGateway};
pub use tracker::{InFlight, InFlightGuard};

use crate::stream::{Message, StreamError};
use async_trait::async_trait;
use thiserror::Error;

/// What to do with a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done, or not worth retrying: acknowledge.
    Ack,
    /// Nothing was written; leave pending so it is redelivered. Dead-lettered
    /// once it has been delivered `max_deliveries` times.
    Retry,
    /// The failure may have left a write half done. Leave the message
    /// pending and stop the gateway.
    Halt,
}

/// Processes messages claimed by the gateway.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Disposition;
}

/// Errors that stop the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Stream {stream}: giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        stream: String,
        attempts: u32,
        #[source]
        source: StreamError,
    },

    #[error("Stream {stream}: {source}")]
    Stream {
        stream: String,
        #[source]
        source: StreamError,
    },

    #[error("Stream {stream}: message {id} could not be processed and stays pending")]
    Halted { stream: String, id: String },

    #[error("Read loop for {0} stopped unexpectedly")]
    Task(String),
}
