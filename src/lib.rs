//! brokerlink - a persistent-connection MQTT 3.1.1 client
//!
//! # Overview
//!
//! This crate keeps one long-lived session with a broker and provides:
//! - A connection state machine with automatic, backed-off reconnection
//! - QoS 0 and QoS 1 publishing with an acknowledgment ledger
//! - A dispatch loop handing inbound messages to a caller-supplied [`Handler`]
//! - Keep-alive probing that detects half-open connections
//!
//! # Quick Start
//!
//! ```rust
//! use brokerlink::config::ClientConfig;
//! use brokerlink::protocol::{validate_topic_name, Publish, QoS};
//!
//! let config = ClientConfig::from_toml_str(r#"
//!     broker_url = "tcp://localhost:1883"
//!     client_id = "kitchen-sensor"
//! "#).unwrap();
//! assert_eq!(config.keep_alive_secs, 30);
//!
//! validate_topic_name("sensors/kitchen/temp").unwrap();
//! let message = Publish::new("sensors/kitchen/temp", "21.5", QoS::AtLeastOnce);
//! assert!(message.qos.requires_ack());
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{ConnectOutcome, ConnectionState, Handler, MqttClient, MqttClientBuilder, Session};
pub use config::{ClientConfig, ConfigError, ReconnectConfig};
pub use error::{ClientError, ClientResult, ErrorKind, HandlerError};
pub use protocol::{Packet, PubAck, Publish, QoS};
