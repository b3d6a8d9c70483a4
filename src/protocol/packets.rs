//! Typed MQTT 3.1.1 packets used by the client core
//!
//! Only the packet types the client exchanges with a broker are modelled here.
//! Anything else arriving on the wire is reported by the codec as unsupported.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery guarantee of a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// Fire-and-forget, no acknowledgment
    AtMostOnce = 0,
    /// Acknowledged with PUBACK, may be redelivered
    AtLeastOnce = 1,
    /// Four-way handshake (not supported by this client)
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse a numeric QoS level
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    /// Whether a message at this level needs a tracked packet identifier
    pub fn requires_ack(self) -> bool {
        !matches!(self, QoS::AtMostOnce)
    }
}

/// CONNACK return codes defined by MQTT 3.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectReturnCode {
    Accepted,
    RefusedProtocolVersion,
    BadClientId,
    ServiceUnavailable,
    BadUserNamePassword,
    NotAuthorized,
}

impl ConnectReturnCode {
    pub fn is_accepted(self) -> bool {
        matches!(self, ConnectReturnCode::Accepted)
    }

    /// Rejections that may clear up on their own, so a reconnect is worth trying
    pub fn is_transient(self) -> bool {
        matches!(self, ConnectReturnCode::ServiceUnavailable)
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::RefusedProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::BadClientId => "identifier rejected",
            ConnectReturnCode::ServiceUnavailable => "server unavailable",
            ConnectReturnCode::BadUserNamePassword => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// Opaque login credentials carried in CONNECT
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Never print the password, even at trace level.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// CONNECT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    /// Keep-alive in seconds, 0 disables it
    pub keep_alive: u16,
    pub credentials: Option<Credentials>,
}

/// CONNACK packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub code: ConnectReturnCode,
    pub session_present: bool,
}

impl ConnAck {
    pub fn accepted(session_present: bool) -> Self {
        Self {
            code: ConnectReturnCode::Accepted,
            session_present,
        }
    }

    pub fn rejected(code: ConnectReturnCode) -> Self {
        Self {
            code,
            session_present: false,
        }
    }
}

/// PUBLISH packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// Present for QoS 1 and 2, absent for QoS 0
    pub packet_id: Option<u16>,
    pub retain: bool,
    pub dup: bool,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            packet_id: None,
            retain: false,
            dup: false,
        }
    }

    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// PUBACK packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubAck {
    pub packet_id: u16,
}

impl PubAck {
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }
}

/// Packets exchanged between this client and a broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Short packet type name for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}
