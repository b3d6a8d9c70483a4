//! Inbound packet routing and the per-connection dispatch loop
//!
//! [`MessageRouter::route_incoming`] is the pure decision of what an inbound
//! packet means. [`run_dispatch_loop`] owns the read half of one connection
//! and carries those decisions out.

use super::client::ConnectionLink;
use crate::error::{ClientError, ProtocolViolation};
use crate::observability::metrics;
use crate::protocol::{CodecError, Packet, PubAck, Publish, QoS};
use crate::transport::{PacketReader, TransportError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Pure routing decisions for inbound packets
pub struct MessageRouter;

impl MessageRouter {
    /// Decide how to handle a packet read from an established connection (pure function)
    pub fn route_incoming(packet: Packet) -> IncomingRoute {
        match packet {
            Packet::Publish(publish) => match publish.qos {
                QoS::AtMostOnce => IncomingRoute::Deliver { publish, ack: None },
                QoS::AtLeastOnce => match publish.packet_id {
                    Some(packet_id) if packet_id != 0 => IncomingRoute::Deliver {
                        publish,
                        ack: Some(packet_id),
                    },
                    _ => IncomingRoute::Violation(ProtocolViolation::UnexpectedPacket(
                        "PUBLISH without packet id",
                    )),
                },
                QoS::ExactlyOnce => {
                    IncomingRoute::Violation(ProtocolViolation::UnsupportedQos(publish.qos))
                }
            },
            Packet::PubAck(puback) => IncomingRoute::Acknowledge(puback),
            Packet::PingResp => IncomingRoute::KeepAliveResponse,
            other => IncomingRoute::Violation(ProtocolViolation::UnexpectedPacket(other.kind())),
        }
    }

    /// Map a read failure to the error reported for the connection (pure function)
    pub fn classify_read_error(error: TransportError) -> ClientError {
        match error {
            TransportError::Codec(CodecError::Unsupported(kind)) => {
                ProtocolViolation::UnexpectedPacket(kind).into()
            }
            TransportError::Codec(codec) => {
                ProtocolViolation::Malformed(TransportError::Codec(codec)).into()
            }
            other => other.into(),
        }
    }
}

/// What the dispatch loop does with an inbound packet
#[derive(Debug)]
pub enum IncomingRoute {
    /// Hand to the handler, then acknowledge `ack` if set
    Deliver { publish: Publish, ack: Option<u16> },
    /// Resolve a pending acknowledgment
    Acknowledge(PubAck),
    /// PINGRESP; only refreshes liveness
    KeepAliveResponse,
    /// Tear the connection down
    Violation(ProtocolViolation),
}

/// Read and route packets until the connection fails or is shut down
///
/// Every exit other than a shutdown signal reports exactly one failure for
/// this connection's generation.
pub(crate) async fn run_dispatch_loop(
    link: ConnectionLink,
    mut reader: Box<dyn PacketReader>,
    last_inbound: watch::Sender<Instant>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(target: "mqtt_transport", generation = link.generation, "Dispatch loop started");

    let failure = loop {
        let read = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!(target: "mqtt_transport", generation = link.generation, "Dispatch loop stopping");
                return;
            }
            read = reader.read_packet() => read,
        };

        let packet = match read {
            Ok(Some(packet)) => packet,
            Ok(None) => break ClientError::from(TransportError::ConnectionClosed),
            Err(error) => break MessageRouter::classify_read_error(error),
        };

        last_inbound.send_replace(Instant::now());
        trace!(target: "mqtt_transport", kind = packet.kind(), "Inbound packet");

        if let Err(error) = handle_route(&link, MessageRouter::route_incoming(packet)).await {
            break error;
        }
    };

    if matches!(failure, ClientError::Protocol(_)) {
        metrics().protocol_error();
    }
    link.fail(failure).await;
}

async fn handle_route(link: &ConnectionLink, route: IncomingRoute) -> Result<(), ClientError> {
    match route {
        IncomingRoute::Deliver { publish, ack } => {
            metrics().message_received();
            link.handler()
                .process_publish(&publish)
                .await
                .map_err(ProtocolViolation::HandlerFailed)?;

            if let Some(packet_id) = ack {
                link.write(&Packet::PubAck(PubAck::new(packet_id))).await?;
                trace!(target: "mqtt_transport", packet_id, "Acknowledged inbound publish");
            }
            Ok(())
        }
        IncomingRoute::Acknowledge(puback) => {
            let Some(pending) = link.resolve_ack(puback.packet_id).await else {
                warn!(target: "mqtt_transport", packet_id = puback.packet_id, "PUBACK for unknown packet id");
                return Err(ProtocolViolation::UnexpectedAck(puback.packet_id).into());
            };

            metrics().ack_received(pending.created_at.elapsed());
            link.handler()
                .process_puback(&puback, &pending.message)
                .await
                .map_err(ProtocolViolation::HandlerFailed)?;
            Ok(())
        }
        IncomingRoute::KeepAliveResponse => {
            trace!(target: "mqtt_transport", "PINGRESP");
            Ok(())
        }
        IncomingRoute::Violation(violation) => Err(violation.into()),
    }
}
