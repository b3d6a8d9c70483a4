//! Impure I/O coordination for the client
//!
//! [`MqttClient`] owns one swappable live connection. All mutable state sits
//! behind a single async mutex; network writes go through the connection's
//! own writer mutex so they never hold the state guard, and handlers are
//! always invoked with no guard held.
//!
//! Every live connection carries a generation number. Background tasks of a
//! torn-down connection report failures against their own generation, which
//! no longer matches, so they cannot disturb the connection that replaced it.

use super::connection::{BackoffPolicy, ConnectionState, ExponentialBackoff, Session};
use super::dispatch::run_dispatch_loop;
use super::handler::Handler;
use super::health_monitor::{HealthMetrics, HealthMonitor, KeepAliveAction, ReconnectionDecision};
use super::ledger::{AckLedger, PendingAck};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, HandshakeFailure};
use crate::observability::metrics;
use crate::protocol::{validate_topic_name, ConnAck, Connect, Packet, Publish, QoS};
use crate::transport::{
    BrokerAddress, Dialer, PacketWriter, TcpDialer, TransportError, TransportPair,
};
use crate::{lifecycle_span, mqtt_span};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn, Instrument};

/// How long disconnect waits for the dispatch task before aborting it
const DISPATCH_STOP_GRACE: Duration = Duration::from_secs(2);

type SharedWriter = Arc<ConnectionWriter>;

/// Write half of a live connection, stamped with the last successful write
struct ConnectionWriter {
    writer: Mutex<Box<dyn PacketWriter>>,
    last_outbound: watch::Sender<Instant>,
}

impl ConnectionWriter {
    fn new(writer: Box<dyn PacketWriter>, since: Instant) -> Self {
        let (last_outbound, _) = watch::channel(since);
        Self {
            writer: Mutex::new(writer),
            last_outbound,
        }
    }

    async fn write(&self, packet: &Packet) -> Result<(), TransportError> {
        self.writer.lock().await.write_packet(packet).await?;
        self.last_outbound.send_replace(Instant::now());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer.lock().await.close().await
    }

    fn last_outbound(&self) -> Instant {
        *self.last_outbound.borrow()
    }
}

/// Result of a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    /// Broker still holds state for this client id
    pub session_present: bool,
}

/// Persistent-connection MQTT client
///
/// Not `Clone`; share it behind an `Arc`. Dropping the client stops its
/// background tasks without a graceful DISCONNECT, so call
/// [`MqttClient::disconnect`] first when that matters.
pub struct MqttClient {
    inner: Arc<Inner>,
}

/// Builder for [`MqttClient`]
pub struct MqttClientBuilder {
    config: ClientConfig,
    handler: Arc<dyn Handler>,
    dialer: Option<Arc<dyn Dialer>>,
    backoff: Option<Arc<dyn BackoffPolicy>>,
}

impl MqttClientBuilder {
    /// Replace the TCP dialer
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Replace the exponential backoff derived from the config
    pub fn backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Validate the configuration and fix the session identity
    pub fn build(self) -> ClientResult<MqttClient> {
        self.config.validate()?;
        let address = self.config.broker_address()?;
        let session = Session::new(self.config.resolve_client_id(), self.config.clean_session);

        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(TcpDialer::new(self.config.max_packet_size)));
        let backoff = self
            .backoff
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::from(&self.config.reconnect)));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        debug!(
            client_id = %session.client_id,
            broker = %address,
            clean_session = session.clean_session,
            "Built client"
        );

        Ok(MqttClient {
            inner: Arc::new(Inner {
                config: self.config,
                session,
                address,
                dialer,
                handler: self.handler,
                backoff,
                shared: Mutex::new(Shared::new()),
                state_tx,
            }),
        })
    }
}

impl MqttClient {
    pub fn builder(config: ClientConfig, handler: Arc<dyn Handler>) -> MqttClientBuilder {
        MqttClientBuilder {
            config,
            handler,
            dialer: None,
            backoff: None,
        }
    }

    /// Dial the broker and complete the CONNECT/CONNACK handshake
    ///
    /// Bounded by the configured handshake timeout. On success the dispatch
    /// loop and keep-alive task are running when this returns.
    pub async fn connect(&self) -> ClientResult<ConnectOutcome> {
        let generation = {
            let mut shared = self.inner.shared.lock().await;
            match shared.state {
                ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
                ConnectionState::Disconnected => {}
                _ => return Err(ClientError::ConnectInProgress),
            }
            shared.explicit_disconnect = false;
            shared.generation += 1;
            self.inner
                .set_state(&mut shared, ConnectionState::Connecting);
            shared.generation
        };

        let span = lifecycle_span!(
            step = "connect",
            client_id = %self.inner.session.client_id,
            broker = %self.inner.address
        );
        self.inner
            .establish(generation, ConnectionState::Connecting)
            .instrument(span)
            .await
    }

    /// Send an application message
    ///
    /// Returns the packet id for QoS 1; the matching PUBACK is delivered to
    /// [`Handler::process_puback`]. Only valid while `Connected`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<Option<u16>> {
        if qos == QoS::ExactlyOnce {
            return Err(ClientError::UnsupportedQos(qos));
        }
        validate_topic_name(topic)?;

        let (generation, writer, publish) = {
            let mut shared = self.inner.shared.lock().await;
            if !HealthMonitor::can_publish(&shared.state) {
                return Err(ClientError::NotConnected {
                    state: shared.state.clone(),
                });
            }
            let Some((generation, writer)) = shared
                .live
                .as_ref()
                .map(|live| (live.generation, Arc::clone(&live.writer)))
            else {
                return Err(ClientError::NotConnected {
                    state: shared.state.clone(),
                });
            };

            let mut publish = Publish::new(topic, payload, qos).with_retain(retain);
            if qos.requires_ack() {
                let packet_id = shared.ledger.allocate_id()?;
                publish = publish.with_packet_id(packet_id);
                shared.ledger.track(packet_id, publish.clone())?;
            }
            (generation, writer, publish)
        };

        let packet_id = publish.packet_id;
        let span = mqtt_span!(topic = %publish.topic, ?qos, ?packet_id);
        let result = writer
            .write(&Packet::Publish(publish))
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                metrics().message_published();
                trace!(target: "mqtt_transport", topic, ?packet_id, "Published");
                Ok(packet_id)
            }
            // Nothing reached the stream, so the connection is still sound.
            Err(error) if error.is_encoding() => {
                metrics().publish_failed();
                if let Some(packet_id) = packet_id {
                    self.inner.untrack(generation, packet_id).await;
                }
                Err(error.into())
            }
            Err(error) => {
                metrics().publish_failed();
                self.inner
                    .fail(generation, ClientError::Transport(error.duplicate()))
                    .await;
                Err(error.into())
            }
        }
    }

    /// Gracefully close the session and stop any pending reconnect
    ///
    /// Waits for the dispatch task to stop, except when called from inside a
    /// [`Handler`] callback, where the dispatch task stops as soon as the
    /// callback returns.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let (live, supervisor) = {
            let mut shared = self.inner.shared.lock().await;
            let idle = shared.live.is_none() && shared.supervisor.is_none();
            match shared.state {
                ConnectionState::Disconnected if idle => {
                    return Err(ClientError::NotConnected {
                        state: ConnectionState::Disconnected,
                    })
                }
                ConnectionState::Disconnecting => {
                    return Err(ClientError::NotConnected {
                        state: ConnectionState::Disconnecting,
                    })
                }
                _ => {}
            }

            shared.explicit_disconnect = true;
            shared.generation += 1;
            let dropped = shared.ledger.pending_ids();
            shared.ledger.clear();
            if !dropped.is_empty() {
                debug!(packet_ids = ?dropped, "Dropping unacknowledged publishes on disconnect");
            }
            self.inner
                .set_state(&mut shared, ConnectionState::Disconnecting);
            (shared.live.take(), shared.supervisor.take())
        };

        if let Some(supervisor) = supervisor {
            supervisor.cancel();
        }
        if let Some(live) = live {
            live.shutdown().await;
            metrics().connection_closed();
        }

        {
            let mut shared = self.inner.shared.lock().await;
            if shared.state == ConnectionState::Disconnecting {
                self.inner
                    .set_state(&mut shared, ConnectionState::Disconnected);
            }
        }

        info!(client_id = %self.inner.session.client_id, "Client disconnected");
        Ok(())
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Watch every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Identity presented on every (re)connect
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// QoS 1 publishes still awaiting PUBACK
    pub async fn pending_acks(&self) -> usize {
        self.inner.shared.lock().await.ledger.len()
    }

    /// When the current connection was established
    pub async fn established_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .shared
            .lock()
            .await
            .live
            .as_ref()
            .map(|live| live.established_at)
    }

    pub async fn health_metrics(&self) -> HealthMetrics {
        let shared = self.inner.shared.lock().await;
        let (connected_since, last_inbound) = match &shared.live {
            Some(live) => (Some(live.connected_since), Some(*live.last_inbound.borrow())),
            None => (None, None),
        };
        HealthMonitor::calculate_health_metrics(
            connected_since,
            last_inbound,
            shared.reconnect_count,
            self.inner.config.keep_alive(),
        )
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // No async in Drop: stop background tasks, skip the DISCONNECT.
        if let Ok(mut shared) = self.inner.shared.try_lock() {
            shared.explicit_disconnect = true;
            if let Some(supervisor) = shared.supervisor.take() {
                supervisor.cancel();
            }
            if let Some(live) = shared.live.take() {
                live.abort();
            }
        }
    }
}

/// State shared between the facade and its background tasks
pub(crate) struct Inner {
    config: ClientConfig,
    session: Session,
    address: BrokerAddress,
    dialer: Arc<dyn Dialer>,
    handler: Arc<dyn Handler>,
    backoff: Arc<dyn BackoffPolicy>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Shared {
    state: ConnectionState,
    live: Option<LiveConnection>,
    ledger: AckLedger,
    explicit_disconnect: bool,
    generation: u64,
    supervisor: Option<Supervisor>,
    reconnect_count: u32,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            live: None,
            ledger: AckLedger::new(),
            explicit_disconnect: false,
            generation: 0,
            supervisor: None,
            reconnect_count: 0,
        }
    }
}

struct Supervisor {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Supervisor {
    fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        self.handle.abort();
        debug!("Reconnect supervisor cancelled");
    }
}

/// One established connection and the tasks serving it
struct LiveConnection {
    generation: u64,
    writer: SharedWriter,
    established_at: DateTime<Utc>,
    connected_since: Instant,
    last_inbound: watch::Receiver<Instant>,
    shutdown_tx: watch::Sender<bool>,
    dispatch_handle: JoinHandle<()>,
    keepalive_handle: Option<JoinHandle<()>>,
}

impl LiveConnection {
    /// Graceful teardown for an explicit disconnect
    async fn shutdown(self) {
        let LiveConnection {
            writer,
            shutdown_tx,
            mut dispatch_handle,
            keepalive_handle,
            ..
        } = self;

        match tokio::time::timeout(DISPATCH_STOP_GRACE, writer.write(&Packet::Disconnect)).await {
            Ok(Ok(())) => trace!(target: "mqtt_transport", "Sent DISCONNECT"),
            Ok(Err(e)) => debug!(target: "mqtt_transport", error = %e, "DISCONNECT not delivered"),
            Err(_) => debug!(target: "mqtt_transport", "DISCONNECT write timed out"),
        }

        let _ = shutdown_tx.send(true);
        if let Some(handle) = keepalive_handle {
            handle.abort();
        }

        // Called from a handler callback: the dispatch task is this task and
        // stops on the shutdown signal once the callback returns.
        if tokio::task::try_id() == Some(dispatch_handle.id()) {
            debug!("Disconnect requested from the dispatch task");
        } else {
            match tokio::time::timeout(DISPATCH_STOP_GRACE, &mut dispatch_handle).await {
                Ok(Ok(())) => debug!("Dispatch task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Dispatch task ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Dispatch task didn't stop within {:?}, aborting", DISPATCH_STOP_GRACE);
                    dispatch_handle.abort();
                }
            }
        }

        close_writer(&writer).await;
    }

    /// Teardown after a failure; may run on one of this connection's own tasks
    async fn abandon(self) {
        // Dropping the handles detaches the tasks; the signal stops them.
        let _ = self.shutdown_tx.send(true);
        close_writer(&self.writer).await;
    }

    fn abort(self) {
        let _ = self.shutdown_tx.send(true);
        self.dispatch_handle.abort();
        if let Some(handle) = self.keepalive_handle {
            handle.abort();
        }
    }
}

async fn close_writer(writer: &SharedWriter) {
    match tokio::time::timeout(DISPATCH_STOP_GRACE, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(target: "mqtt_transport", error = %e, "Transport close failed"),
        Err(_) => debug!(target: "mqtt_transport", "Transport close timed out"),
    }
}

/// What a per-connection task needs to act for its connection
#[derive(Clone)]
pub(crate) struct ConnectionLink {
    inner: Arc<Inner>,
    pub(crate) generation: u64,
    writer: SharedWriter,
}

impl ConnectionLink {
    pub(crate) fn handler(&self) -> &dyn Handler {
        self.inner.handler.as_ref()
    }

    pub(crate) async fn write(&self, packet: &Packet) -> Result<(), TransportError> {
        self.writer.write(packet).await
    }

    pub(crate) fn last_outbound(&self) -> Instant {
        self.writer.last_outbound()
    }

    /// Resolve a PUBACK against this connection's ledger
    pub(crate) async fn resolve_ack(&self, packet_id: u16) -> Option<PendingAck> {
        let mut shared = self.inner.shared.lock().await;
        if shared.live_generation() != Some(self.generation) {
            return None;
        }
        shared.ledger.resolve(packet_id)
    }

    pub(crate) async fn fail(&self, error: ClientError) {
        self.inner.fail(self.generation, error).await;
    }
}

impl Shared {
    fn live_generation(&self) -> Option<u64> {
        self.live.as_ref().map(|live| live.generation)
    }
}

impl Inner {
    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            HealthMonitor::log_state_transition(&shared.state, &next);
            shared.state = next.clone();
            self.state_tx.send_replace(next);
        }
    }

    /// Dial plus handshake, bounded by the handshake timeout
    async fn handshake(&self) -> ClientResult<(TransportPair, ConnAck)> {
        let limit = self.config.handshake_timeout();
        match tokio::time::timeout(limit, self.dial_and_handshake()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::handshake(HandshakeFailure::Timeout(limit))),
        }
    }

    async fn dial_and_handshake(&self) -> ClientResult<(TransportPair, ConnAck)> {
        let TransportPair {
            mut reader,
            mut writer,
        } = self.dialer.dial(&self.address).await?;

        let connect = Connect {
            client_id: self.session.client_id.clone(),
            clean_session: self.session.clean_session,
            keep_alive: self.config.keep_alive_secs,
            credentials: self.config.credentials(),
        };
        writer.write_packet(&Packet::Connect(connect)).await?;

        let failure = match reader.read_packet().await? {
            Some(Packet::ConnAck(connack)) if connack.code.is_accepted() => {
                return Ok((TransportPair { reader, writer }, connack));
            }
            Some(Packet::ConnAck(connack)) => HandshakeFailure::Refused(connack.code),
            Some(other) => HandshakeFailure::UnexpectedPacket(other.kind()),
            None => HandshakeFailure::ClosedBeforeConnAck,
        };

        if let Err(e) = writer.close().await {
            debug!(target: "mqtt_transport", error = %e, "Close after failed handshake");
        }
        Err(ClientError::handshake(failure))
    }

    /// Run one handshake for `origin` and install the connection if still wanted
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        origin: ConnectionState,
    ) -> ClientResult<ConnectOutcome> {
        metrics().connection_attempt();
        let result = self.handshake().await;

        let mut shared = self.shared.lock().await;
        if shared.generation != generation || shared.state != origin {
            drop(shared);
            if let Ok((mut pair, _)) = result {
                let _ = pair.writer.close().await;
            }
            debug!("Handshake finished after disconnect, discarding it");
            return Err(ClientError::Cancelled);
        }

        match result {
            Ok((pair, connack)) => {
                let reconnect = matches!(origin, ConnectionState::Reconnecting(_));
                if reconnect {
                    shared.reconnect_count += 1;
                    shared.supervisor = None;
                }
                self.install(&mut shared, generation, pair);
                self.set_state(&mut shared, ConnectionState::Connected);
                metrics().connection_established(reconnect);
                info!(
                    client_id = %self.session.client_id,
                    session_present = connack.session_present,
                    "Connected to broker"
                );
                Ok(ConnectOutcome {
                    session_present: connack.session_present,
                })
            }
            Err(error) => {
                metrics().connection_failed();
                if origin == ConnectionState::Connecting {
                    self.set_state(&mut shared, ConnectionState::Disconnected);
                }
                warn!(error = %error, "Connection attempt failed");
                Err(error)
            }
        }
    }

    /// Start the dispatch and keep-alive tasks for a fresh connection
    fn install(self: &Arc<Self>, shared: &mut Shared, generation: u64, pair: TransportPair) {
        let TransportPair { reader, writer } = pair;
        let connected_since = Instant::now();
        let writer: SharedWriter = Arc::new(ConnectionWriter::new(writer, connected_since));
        let (inbound_tx, inbound_rx) = watch::channel(connected_since);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let link = ConnectionLink {
            inner: Arc::clone(self),
            generation,
            writer: Arc::clone(&writer),
        };
        let span = mqtt_span!(client_id = %self.session.client_id, generation);

        let dispatch_handle = tokio::spawn(
            run_dispatch_loop(link.clone(), reader, inbound_tx, shutdown_rx.clone())
                .instrument(span.clone()),
        );

        let keep_alive = self.config.keep_alive();
        let keepalive_handle = (!keep_alive.is_zero()).then(|| {
            tokio::spawn(
                run_keepalive_loop(
                    link,
                    inbound_rx.clone(),
                    shutdown_rx,
                    keep_alive,
                    self.config.keep_alive_grace(),
                )
                .instrument(span),
            )
        });

        shared.live = Some(LiveConnection {
            generation,
            writer,
            established_at: Utc::now(),
            connected_since,
            last_inbound: inbound_rx,
            shutdown_tx,
            dispatch_handle,
            keepalive_handle,
        });
    }

    /// Unrequested teardown of the connection with `generation`
    ///
    /// Runs at most once per connection; later reports for the same or an
    /// older generation are ignored.
    async fn fail(self: &Arc<Self>, generation: u64, error: ClientError) {
        let live = {
            let mut shared = self.shared.lock().await;
            let live = match shared.live.take() {
                Some(live) if live.generation == generation => live,
                other => {
                    shared.live = other;
                    debug!(generation, error = %error, "Ignoring failure of a replaced connection");
                    return;
                }
            };
            shared.generation += 1;
            let dropped = shared.ledger.clear();
            metrics().connection_lost(dropped);
            self.set_state(&mut shared, ConnectionState::Reconnecting(1));
            live
        };

        error!(
            client_id = %self.session.client_id,
            error = %error,
            kind = ?error.kind(),
            recoverable = error.is_recoverable(),
            "Connection failed"
        );
        live.abandon().await;
        self.handler.process_error(&error).await;
        self.start_recovery().await;
    }

    async fn start_recovery(self: &Arc<Self>) {
        let mut shared = self.shared.lock().await;
        if shared.explicit_disconnect
            || shared.supervisor.is_some()
            || !matches!(shared.state, ConnectionState::Reconnecting(_))
        {
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = self.spawn_supervisor(cancel_rx);
        shared.supervisor = Some(Supervisor { cancel_tx, handle });
    }

    fn spawn_supervisor(self: &Arc<Self>, cancel_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let span = lifecycle_span!(step = "reconnect", client_id = %self.session.client_id);
        tokio::spawn(inner.supervise(cancel_rx).instrument(span))
    }

    /// Reconnect loop: backoff, cancellable sleep, full handshake
    async fn supervise(self: Arc<Self>, mut cancel_rx: watch::Receiver<bool>) {
        let mut completed = 0u32;

        loop {
            let cancelled = *cancel_rx.borrow();
            let decision = HealthMonitor::should_attempt_reconnection(
                completed,
                self.backoff.as_ref(),
                cancelled,
            );

            match decision {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    let Some(generation) = self.begin_reconnect(attempt).await else {
                        return;
                    };

                    let max_display = self
                        .backoff
                        .max_attempts()
                        .map_or("∞".to_string(), |max| max.to_string());
                    info!(
                        "Attempting reconnection {}/{} after {}ms delay",
                        attempt,
                        max_display,
                        delay.as_millis()
                    );

                    if !interruptible_sleep(&mut cancel_rx, delay).await {
                        return;
                    }

                    match self
                        .establish(generation, ConnectionState::Reconnecting(attempt))
                        .await
                    {
                        Ok(_) | Err(ClientError::Cancelled) => return,
                        Err(error) => {
                            if let Some(code) = error.refusal_code() {
                                if !HealthMonitor::is_retryable_refusal(code) {
                                    self.give_up(error).await;
                                    return;
                                }
                            }
                            completed = attempt;
                        }
                    }
                }
                ReconnectionDecision::AbortDisconnectRequested => {
                    info!("Disconnect requested, stopping reconnection");
                    return;
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    self.give_up(ClientError::ReconnectExhausted {
                        attempts: completed,
                    })
                    .await;
                    return;
                }
            }
        }
    }

    /// Claim the next attempt, unless a disconnect got there first
    async fn begin_reconnect(&self, attempt: u32) -> Option<u64> {
        let mut shared = self.shared.lock().await;
        if shared.explicit_disconnect || !matches!(shared.state, ConnectionState::Reconnecting(_)) {
            return None;
        }
        shared.generation += 1;
        self.set_state(&mut shared, ConnectionState::Reconnecting(attempt));
        Some(shared.generation)
    }

    async fn give_up(&self, error: ClientError) {
        {
            let mut shared = self.shared.lock().await;
            if shared.explicit_disconnect
                || !matches!(shared.state, ConnectionState::Reconnecting(_))
            {
                return;
            }
            shared.supervisor = None;
            self.set_state(&mut shared, ConnectionState::Disconnected);
        }

        error!(error = %error, "Giving up on reconnection");
        self.handler.process_error(&error).await;
    }

    /// Drop a ledger entry whose publish never reached the stream
    async fn untrack(&self, generation: u64, packet_id: u16) {
        let mut shared = self.shared.lock().await;
        if shared.live_generation() == Some(generation) {
            shared.ledger.resolve(packet_id);
        }
    }
}

/// Perform interruptible sleep with cancellation monitoring
/// Returns true if sleep completed, false if cancelled
async fn interruptible_sleep(cancel_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *cancel_rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = cancel_rx.changed() => {
            info!("Cancelled during reconnection delay");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Probe the broker after a quiet interval in either direction and fail the
/// connection when the probe goes unanswered
async fn run_keepalive_loop(
    link: ConnectionLink,
    last_inbound: watch::Receiver<Instant>,
    mut shutdown_rx: watch::Receiver<bool>,
    keep_alive: Duration,
    grace: Duration,
) {
    let mut probe_sent: Option<Instant> = None;

    loop {
        let action = HealthMonitor::keepalive_action(
            *last_inbound.borrow(),
            link.last_outbound(),
            probe_sent,
            Instant::now(),
            keep_alive,
            grace,
        );
        match action {
            KeepAliveAction::Wait(delay) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            KeepAliveAction::SendProbe => {
                trace!(target: "mqtt_transport", "Sending PINGREQ");
                metrics().keepalive_probe();
                if let Err(error) = link.write(&Packet::PingReq).await {
                    link.fail(error.into()).await;
                    return;
                }
                probe_sent = Some(Instant::now());
            }
            KeepAliveAction::Expired => {
                warn!(target: "mqtt_transport", ?grace, "Broker silent after keep-alive probe");
                link.fail(TransportError::KeepAliveTimeout(grace).into())
                    .await;
                return;
            }
        }
    }
}
