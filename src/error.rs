//! Client error taxonomy
//!
//! Every failure the client can report is a [`ClientError`]. [`ErrorKind`]
//! groups them by how the client reacts: handshake rejections fail the
//! `connect` call, transport failures and protocol violations tear the
//! connection down and schedule a reconnect, invariant violations are bugs.

use crate::client::ConnectionState;
use crate::config::ConfigError;
use crate::protocol::{ConnectReturnCode, QoS, ValidationError};
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Error returned by caller-supplied handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Why a handshake did not produce a session
#[derive(Debug, Error)]
pub enum HandshakeFailure {
    #[error("broker refused connection: {0}")]
    Refused(ConnectReturnCode),
    #[error("no CONNACK within {0:?}")]
    Timeout(Duration),
    #[error("expected CONNACK, received {0}")]
    UnexpectedPacket(&'static str),
    #[error("connection closed before CONNACK")]
    ClosedBeforeConnAck,
}

/// Broken protocol contract on an established connection
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("malformed packet")]
    Malformed(#[source] TransportError),
    #[error("unexpected {0} packet")]
    UnexpectedPacket(&'static str),
    #[error("PUBACK for unknown packet id {0}")]
    UnexpectedAck(u16),
    #[error("broker delivered unsupported {0:?} publish")]
    UnsupportedQos(QoS),
    #[error("handler failed to process packet")]
    HandlerFailed(#[source] HandlerError),
}

/// Acknowledgment ledger invariant violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("packet id {0} is already in flight")]
    DuplicateIdentifier(u16),
    #[error("packet id 0 is reserved")]
    ZeroIdentifier,
    #[error("all packet ids are in flight")]
    Exhausted,
}

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("handshake rejected: {reason}")]
    HandshakeRejected { reason: HandshakeFailure },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("internal invariant violated: {0}")]
    Invariant(#[from] LedgerError),

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection attempt already in progress")]
    ConnectInProgress,

    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("{0:?} publishing is not supported")]
    UnsupportedQos(QoS),

    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] ValidationError),

    #[error("connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classification used to decide how the client reacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    HandshakeRejected,
    TransportFailure,
    ProtocolViolation,
    InvariantViolation,
    Usage,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::HandshakeRejected { .. } => ErrorKind::HandshakeRejected,
            ClientError::Transport(_) => ErrorKind::TransportFailure,
            ClientError::Protocol(_) => ErrorKind::ProtocolViolation,
            ClientError::Invariant(_) => ErrorKind::InvariantViolation,
            ClientError::AlreadyConnected
            | ClientError::ConnectInProgress
            | ClientError::NotConnected { .. }
            | ClientError::UnsupportedQos(_)
            | ClientError::InvalidTopic(_)
            | ClientError::Cancelled
            | ClientError::ReconnectExhausted { .. }
            | ClientError::Config(_) => ErrorKind::Usage,
        }
    }

    /// Whether tearing down and reconnecting can clear this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportFailure | ErrorKind::ProtocolViolation
        )
    }

    pub(crate) fn handshake(reason: HandshakeFailure) -> Self {
        ClientError::HandshakeRejected { reason }
    }

    /// The broker's refusal code, if this is a refused handshake
    pub fn refusal_code(&self) -> Option<ConnectReturnCode> {
        match self {
            ClientError::HandshakeRejected {
                reason: HandshakeFailure::Refused(code),
            } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
