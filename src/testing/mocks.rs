//! Mock implementations for testing
//!
//! [`MockDialer`] hands the client in-memory connections whose far ends are
//! delivered to a [`MockBroker`], so tests script the broker side packet by
//! packet. [`RecordingHandler`] records every callback.

use crate::client::Handler;
use crate::error::{ClientError, ErrorKind, HandlerError};
use crate::protocol::{ConnAck, Connect, ConnectReturnCode, Packet, PubAck, Publish};
use crate::transport::{
    BrokerAddress, Dialer, PacketReader, PacketWriter, TransportError, TransportPair,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// How long mock waits give up after
pub const MOCK_WAIT: Duration = Duration::from_secs(5);

/// Outcome of one scripted dial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialScript {
    /// Open an in-memory connection and hand its far end to the broker
    Accept,
    /// Fail with `ConnectionRefused`
    Refuse,
}

#[derive(Debug, Default)]
struct DialerState {
    scripted: VecDeque<DialScript>,
    dials: usize,
}

/// In-memory dialer paired with a [`MockBroker`]
#[derive(Clone)]
pub struct MockDialer {
    state: Arc<Mutex<DialerState>>,
    connections: mpsc::UnboundedSender<BrokerConnection>,
}

impl MockDialer {
    /// A dialer that accepts every dial, and the broker receiving them
    pub fn new() -> (Self, MockBroker) {
        let (connections, accepted) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(DialerState::default())),
                connections,
            },
            MockBroker { accepted },
        )
    }

    /// Queue outcomes for the next dials; unscripted dials are accepted
    pub async fn script(&self, outcomes: impl IntoIterator<Item = DialScript>) {
        self.state.lock().await.scripted.extend(outcomes);
    }

    pub async fn dial_count(&self) -> usize {
        self.state.lock().await.dials
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, address: &BrokerAddress) -> Result<TransportPair, TransportError> {
        let outcome = {
            let mut state = self.state.lock().await;
            state.dials += 1;
            state.scripted.pop_front().unwrap_or(DialScript::Accept)
        };

        if outcome == DialScript::Refuse {
            return Err(TransportError::Dial {
                address: address.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock broker refused",
                ),
            });
        }

        let (to_client, client_inbox) = mpsc::unbounded_channel();
        let (client_outbox, from_client) = mpsc::unbounded_channel();
        let client_closed = Arc::new(AtomicBool::new(false));

        let far_end = BrokerConnection {
            to_client: Some(to_client),
            from_client,
            client_closed: Arc::clone(&client_closed),
        };
        self.connections
            .send(far_end)
            .map_err(|_| TransportError::ConnectionClosed)?;

        Ok(TransportPair {
            reader: Box::new(MockPacketReader {
                inbox: client_inbox,
            }),
            writer: Box::new(MockPacketWriter {
                outbox: client_outbox,
                closed: client_closed,
            }),
        })
    }
}

struct MockPacketReader {
    inbox: mpsc::UnboundedReceiver<Result<Packet, TransportError>>,
}

#[async_trait]
impl PacketReader for MockPacketReader {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        match self.inbox.recv().await {
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }
}

struct MockPacketWriter {
    outbox: mpsc::UnboundedSender<Packet>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PacketWriter for MockPacketWriter {
    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbox.send(packet.clone()).map_err(|_| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock broker hung up",
            ))
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Receives the far end of every connection the paired dialer opens
pub struct MockBroker {
    accepted: mpsc::UnboundedReceiver<BrokerConnection>,
}

impl MockBroker {
    /// Next dialed connection, or `None` after [`MOCK_WAIT`]
    pub async fn accept(&mut self) -> Option<BrokerConnection> {
        tokio::time::timeout(MOCK_WAIT, self.accepted.recv())
            .await
            .ok()
            .flatten()
    }

    /// Accept the next connection and answer its CONNECT with `connack`
    pub async fn accept_with(&mut self, connack: ConnAck) -> Option<(BrokerConnection, Connect)> {
        let mut connection = self.accept().await?;
        let connect = connection.expect_connect().await?;
        connection.send(Packet::ConnAck(connack));
        Some((connection, connect))
    }

    /// Accept the next connection as a fresh session
    pub async fn accept_session(&mut self) -> Option<(BrokerConnection, Connect)> {
        self.accept_with(ConnAck::accepted(false)).await
    }

    /// Accept the next connection and refuse it with `code`
    pub async fn refuse(&mut self, code: ConnectReturnCode) -> Option<BrokerConnection> {
        self.accept_with(ConnAck::rejected(code))
            .await
            .map(|(connection, _)| connection)
    }
}

/// Broker side of one in-memory connection
pub struct BrokerConnection {
    to_client: Option<mpsc::UnboundedSender<Result<Packet, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<Packet>,
    client_closed: Arc<AtomicBool>,
}

impl BrokerConnection {
    /// Deliver `packet` to the client; false once the client side is gone
    pub fn send(&self, packet: Packet) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(packet)).is_ok())
    }

    /// Make the client's next read fail with `error`
    pub fn inject_error(&self, error: TransportError) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Next packet written by the client, or `None` after [`MOCK_WAIT`]
    pub async fn recv(&mut self) -> Option<Packet> {
        self.recv_within(MOCK_WAIT).await
    }

    pub async fn recv_within(&mut self, wait: Duration) -> Option<Packet> {
        tokio::time::timeout(wait, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Read the client's first packet, which must be CONNECT
    pub async fn expect_connect(&mut self) -> Option<Connect> {
        match self.recv().await? {
            Packet::Connect(connect) => Some(connect),
            _ => None,
        }
    }

    /// End of stream for the client's reader
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Whether the client closed its write half
    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }
}

/// One `process_error` call, flattened for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub message: String,
    pub refusal: Option<ConnectReturnCode>,
}

/// Callback counts, for waiting on handler activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerCounts {
    pub publishes: usize,
    pub pubacks: usize,
    pub errors: usize,
}

/// Handler that records every callback
pub struct RecordingHandler {
    publishes: Mutex<Vec<Publish>>,
    pubacks: Mutex<Vec<(PubAck, Publish)>>,
    errors: Mutex<Vec<RecordedError>>,
    failing_publishes: AtomicUsize,
    failing_pubacks: AtomicUsize,
    counts: watch::Sender<HandlerCounts>,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            publishes: Mutex::new(Vec::new()),
            pubacks: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            failing_publishes: AtomicUsize::new(0),
            failing_pubacks: AtomicUsize::new(0),
            counts: watch::channel(HandlerCounts::default()).0,
        }
    }

    /// Fail the next `count` calls to `process_publish`
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `process_puback`
    pub fn fail_next_pubacks(&self, count: usize) {
        self.failing_pubacks.store(count, Ordering::SeqCst);
    }

    pub async fn publishes(&self) -> Vec<Publish> {
        self.publishes.lock().await.clone()
    }

    pub async fn pubacks(&self) -> Vec<(PubAck, Publish)> {
        self.pubacks.lock().await.clone()
    }

    pub async fn errors(&self) -> Vec<RecordedError> {
        self.errors.lock().await.clone()
    }

    pub fn counts(&self) -> HandlerCounts {
        *self.counts.borrow()
    }

    /// Wait until `condition` holds, false after [`MOCK_WAIT`]
    pub async fn wait_for(&self, condition: impl Fn(&HandlerCounts) -> bool) -> bool {
        let mut counts = self.counts.subscribe();
        tokio::time::timeout(MOCK_WAIT, counts.wait_for(|current| condition(current)))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    pub async fn wait_for_errors(&self, count: usize) -> bool {
        self.wait_for(|counts| counts.errors >= count).await
    }

    pub async fn wait_for_publishes(&self, count: usize) -> bool {
        self.wait_for(|counts| counts.publishes >= count).await
    }

    pub async fn wait_for_pubacks(&self, count: usize) -> bool {
        self.wait_for(|counts| counts.pubacks >= count).await
    }

    fn take_failure(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn process_publish(&self, publish: &Publish) -> Result<(), HandlerError> {
        self.publishes.lock().await.push(publish.clone());
        self.counts.send_modify(|counts| counts.publishes += 1);

        if Self::take_failure(&self.failing_publishes) {
            return Err(format!("refusing message on {}", publish.topic).into());
        }
        Ok(())
    }

    async fn process_puback(&self, puback: &PubAck, original: &Publish) -> Result<(), HandlerError> {
        self.pubacks.lock().await.push((*puback, original.clone()));
        self.counts.send_modify(|counts| counts.pubacks += 1);

        if Self::take_failure(&self.failing_pubacks) {
            return Err(format!("refusing ack {}", puback.packet_id).into());
        }
        Ok(())
    }

    async fn process_error(&self, error: &ClientError) {
        self.errors.lock().await.push(RecordedError {
            kind: error.kind(),
            message: error.to_string(),
            refusal: error.refusal_code(),
        });
        self.counts.send_modify(|counts| counts.errors += 1);
    }
}
