//! Transport abstraction for packet exchange with a broker
//!
//! A [`Dialer`] opens a connection and hands back independent read and write
//! halves, so the dispatch loop can block on reads while publishers write.
//! [`tcp::TcpDialer`] is the production implementation; the in-memory
//! implementation in [`crate::testing`] backs the test suite.

use crate::config::ConfigError;
use crate::protocol::{CodecError, Packet};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use url::Url;

pub mod tcp;

pub use tcp::TcpDialer;

/// Default port for plain MQTT
pub const DEFAULT_PORT: u16 = 1883;

/// Where to dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `tcp://` or `mqtt://` broker URL
    pub fn parse(broker_url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBrokerUrl {
            url: broker_url.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(broker_url).map_err(|e| invalid(&e.to_string()))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            "mqtts" | "ssl" | "tls" => return Err(invalid("TLS transports are not supported")),
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        }

        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("no traffic from broker within {0:?} after keep-alive probe")]
    KeepAliveTimeout(std::time::Duration),
}

impl TransportError {
    /// Whether the failure happened before any bytes reached the stream
    pub fn is_encoding(&self) -> bool {
        matches!(self, TransportError::Codec(_))
    }

    /// Equivalent error for reporting one failure to two parties
    ///
    /// I/O sources are rebuilt from their kind and message.
    pub(crate) fn duplicate(&self) -> TransportError {
        let copy_io = |e: &std::io::Error| std::io::Error::new(e.kind(), e.to_string());
        match self {
            TransportError::Dial { address, source } => TransportError::Dial {
                address: address.clone(),
                source: copy_io(source),
            },
            TransportError::Io(e) => TransportError::Io(copy_io(e)),
            TransportError::Codec(e) => TransportError::Codec(e.clone()),
            TransportError::ConnectionClosed => TransportError::ConnectionClosed,
            TransportError::KeepAliveTimeout(grace) => TransportError::KeepAliveTimeout(*grace),
        }
    }
}

/// Receiving half of a connection
#[async_trait]
pub trait PacketReader: Send {
    /// Read the next packet; `Ok(None)` means the peer closed the stream
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError>;
}

/// Sending half of a connection
#[async_trait]
pub trait PacketWriter: Send {
    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// Shut the connection down; later writes fail
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Both halves of a freshly dialed connection
pub struct TransportPair {
    pub reader: Box<dyn PacketReader>,
    pub writer: Box<dyn PacketWriter>,
}

impl fmt::Debug for TransportPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportPair").finish_non_exhaustive()
    }
}

/// Opens connections to a broker
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &BrokerAddress) -> Result<TransportPair, TransportError>;
}
