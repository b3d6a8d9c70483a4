//! Persistent-connection client
//!
//! The module separates pure decision logic from I/O:
//!
//! - [`connection`] - connection states, session identity, backoff policies
//! - [`ledger`] - in-flight QoS 1 publishes awaiting PUBACK
//! - [`health_monitor`] - reconnect and keep-alive decisions, health metrics
//! - [`dispatch`] - inbound packet routing and the per-connection read loop
//! - [`handler`] - the caller-implemented callback trait
//! - [`client`] - the [`MqttClient`] facade and its background tasks
//!
//! # Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use brokerlink::client::{Handler, MqttClient};
//! use brokerlink::config::ClientConfig;
//! use brokerlink::error::{ClientError, HandlerError};
//! use brokerlink::protocol::{PubAck, Publish, QoS};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Handler for Printer {
//!     async fn process_publish(&self, publish: &Publish) -> Result<(), HandlerError> {
//!         println!("{}: {:?}", publish.topic, publish.payload);
//!         Ok(())
//!     }
//!
//!     async fn process_puback(&self, puback: &PubAck, _original: &Publish) -> Result<(), HandlerError> {
//!         println!("acknowledged {}", puback.packet_id);
//!         Ok(())
//!     }
//!
//!     async fn process_error(&self, error: &ClientError) {
//!         eprintln!("connection error: {error}");
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::new("tcp://localhost:1883");
//! let client = MqttClient::builder(config, Arc::new(Printer)).build()?;
//!
//! client.connect().await?;
//! client.publish("sensors/kitchen/temp", "21.5", QoS::AtLeastOnce, false).await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

#[allow(clippy::module_inception)]
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod health_monitor;
pub mod ledger;

pub use client::{ConnectOutcome, MqttClient, MqttClientBuilder};
pub use connection::{BackoffPolicy, ConnectionState, ExponentialBackoff, FixedBackoff, Session};
pub use dispatch::{IncomingRoute, MessageRouter};
pub use handler::Handler;
pub use health_monitor::{HealthMetrics, HealthMonitor, KeepAliveAction, ReconnectionDecision};
pub use ledger::{AckLedger, PendingAck};
