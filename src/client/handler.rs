//! Caller-implemented callbacks for incoming traffic
//!
//! The client invokes the handler from its dispatch task, never while holding
//! internal locks, so implementations may call back into the client: publish
//! from a callback, or disconnect from one.

use crate::error::{ClientError, HandlerError};
use crate::protocol::{PubAck, Publish};
use async_trait::async_trait;

#[async_trait]
pub trait Handler: Send + Sync {
    /// An application message arrived
    ///
    /// For QoS 1 the PUBACK is sent only after this returns `Ok`. Returning
    /// an error tears the connection down without acknowledging, so the
    /// broker redelivers on the next session.
    async fn process_publish(&self, publish: &Publish) -> Result<(), HandlerError>;

    /// The broker acknowledged `original`
    async fn process_puback(&self, puback: &PubAck, original: &Publish)
        -> Result<(), HandlerError>;

    /// A live connection failed, or the client gave up reconnecting
    ///
    /// Called exactly once per failure, before any reconnect attempt.
    async fn process_error(&self, error: &ClientError);
}
