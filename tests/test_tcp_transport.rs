//! TCP transport tests against a local fake broker
//!
//! The fake broker is a plain `TcpListener` speaking through the same codec,
//! so these tests exercise real framing over a socket.

use brokerlink::client::MqttClient;
use brokerlink::config::ClientConfig;
use brokerlink::error::{ClientError, ErrorKind};
use brokerlink::protocol::{CodecError, ConnAck, Packet, PubAck, Publish, QoS};
use brokerlink::testing::RecordingHandler;
use brokerlink::transport::{
    BrokerAddress, Dialer, PacketReader, PacketWriter, TcpDialer, TransportError, TransportPair,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const MAX_PACKET: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(5);

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn client_config(port: u16) -> ClientConfig {
    let mut config = ClientConfig::new(format!("tcp://127.0.0.1:{port}"));
    config.client_id = Some("tcp-test".to_string());
    config.keep_alive_secs = 0;
    config.handshake_timeout_ms = 2_000;
    config
}

/// Accept one client, answer its CONNECT, and return the broker's halves
async fn accept_session(listener: &TcpListener) -> TransportPair {
    let (stream, _) = listener.accept().await.unwrap();
    let mut pair = TcpDialer::wrap(stream, MAX_PACKET);

    let first = pair.reader.read_packet().await.unwrap();
    assert!(matches!(first, Some(Packet::Connect(_))));
    pair.writer
        .write_packet(&Packet::ConnAck(ConnAck::accepted(false)))
        .await
        .unwrap();
    pair
}

#[tokio::test]
async fn test_dialer_round_trip() {
    let (listener, port) = listen().await;

    let server: JoinHandle<Option<Packet>> = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut pair = TcpDialer::wrap(stream, MAX_PACKET);
        let received = pair.reader.read_packet().await.unwrap();
        pair.writer.write_packet(&Packet::PingResp).await.unwrap();
        received
    });

    let mut pair = TcpDialer::new(MAX_PACKET)
        .dial(&BrokerAddress::new("127.0.0.1", port))
        .await
        .expect("dial should succeed");

    pair.writer.write_packet(&Packet::PingReq).await.unwrap();
    assert_eq!(pair.reader.read_packet().await.unwrap(), Some(Packet::PingResp));
    assert_eq!(server.await.unwrap(), Some(Packet::PingReq));

    // The server task dropped its socket
    assert_eq!(pair.reader.read_packet().await.unwrap(), None);
}

#[tokio::test]
async fn test_dial_closed_port_fails() {
    let (listener, port) = listen().await;
    drop(listener);

    let result = TcpDialer::new(MAX_PACKET)
        .dial(&BrokerAddress::new("127.0.0.1", port))
        .await;

    assert!(matches!(result, Err(TransportError::Dial { .. })));
}

#[tokio::test]
async fn test_client_publish_and_ack_over_tcp() {
    let (listener, port) = listen().await;

    let server = tokio::spawn(async move {
        let mut pair = accept_session(&listener).await;

        let Some(Packet::Publish(publish)) = pair.reader.read_packet().await.unwrap() else {
            panic!("expected PUBLISH");
        };
        let packet_id = publish.packet_id.unwrap();
        pair.writer
            .write_packet(&Packet::PubAck(PubAck::new(packet_id)))
            .await
            .unwrap();

        let inbound = Publish::new("commands/valve", "open", QoS::AtLeastOnce).with_packet_id(300);
        pair.writer.write_packet(&Packet::Publish(inbound)).await.unwrap();

        let mut after = Vec::new();
        while let Some(packet) = pair.reader.read_packet().await.unwrap() {
            after.push(packet);
        }
        (publish, after)
    });

    let handler = Arc::new(RecordingHandler::new());
    let client = MqttClient::builder(client_config(port), handler.clone())
        .build()
        .unwrap();

    client.connect().await.expect("connect over TCP");
    let packet_id = client
        .publish("sensors/pressure", "1.2bar", QoS::AtLeastOnce, false)
        .await
        .unwrap();

    assert!(handler.wait_for_pubacks(1).await);
    assert!(handler.wait_for_publishes(1).await);
    client.disconnect().await.unwrap();

    let (publish, after) = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(publish.packet_id, packet_id);
    assert_eq!(publish.topic, "sensors/pressure");
    // The inbound ack and the farewell share one writer, in either order
    assert_eq!(after.len(), 2);
    assert!(after.contains(&Packet::PubAck(PubAck::new(300))));
    assert!(after.contains(&Packet::Disconnect));
    assert_eq!(handler.publishes().await[0].topic, "commands/valve");
}

#[tokio::test]
async fn test_oversized_publish_keeps_connection() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let pair = accept_session(&listener).await;
        tokio::time::sleep(WAIT).await;
        drop(pair);
    });

    let mut config = client_config(port);
    config.max_packet_size = 128;
    let client = MqttClient::builder(config, Arc::new(RecordingHandler::new()))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let result = client
        .publish("t", vec![0u8; 1024], QoS::AtLeastOnce, false)
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Transport(TransportError::Codec(CodecError::TooLarge { limit: 128, .. })))
    ));
    assert!(client.is_connected());
    assert_eq!(client.pending_acks().await, 0);

    client.disconnect().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_broker_hangup_triggers_reconnect() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut pair = TcpDialer::wrap(stream, MAX_PACKET);
        pair.reader.read_packet().await.unwrap();
        pair.writer
            .write_packet(&Packet::ConnAck(ConnAck::accepted(false)))
            .await
            .unwrap();
        drop(pair);

        // Second session: the reconnect after the teardown
        accept_session(&listener).await
    });

    let handler = Arc::new(RecordingHandler::new());
    let client = MqttClient::builder(client_config(port), handler.clone())
        .backoff(brokerlink::client::FixedBackoff::new(Duration::from_millis(20)))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    assert!(handler.wait_for_errors(1).await);
    let errors = handler.errors().await;
    assert_eq!(errors[0].kind, ErrorKind::TransportFailure);

    let _second = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    client.disconnect().await.ok();
}

#[tokio::test]
async fn test_pubrec_is_protocol_violation() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // CONNACK accepted, then a PUBREC for packet 1
        stream
            .write_all(&[0x20, 0x02, 0x00, 0x00, 0x50, 0x02, 0x00, 0x01])
            .await
            .unwrap();
        tokio::time::sleep(WAIT).await;
        drop(stream);
    });

    let handler = Arc::new(RecordingHandler::new());
    let client = MqttClient::builder(client_config(port), handler.clone())
        .backoff(brokerlink::client::FixedBackoff::new(Duration::from_secs(30)))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    assert!(handler.wait_for_errors(1).await);
    let errors = handler.errors().await;
    assert_eq!(errors[0].kind, ErrorKind::ProtocolViolation);
    assert!(errors[0].message.contains("PUBREC"));

    client.disconnect().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_stream_reader_reassembles_split_frames() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // PUBACK for packet 513 written one byte at a time
        for byte in [0x40u8, 0x02, 0x02, 0x01] {
            stream.write_all(&[byte]).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut pair = TcpDialer::wrap(stream, MAX_PACKET);

    assert_eq!(
        pair.reader.read_packet().await.unwrap(),
        Some(Packet::PubAck(PubAck::new(513)))
    );
    server.await.unwrap();
    assert_eq!(pair.reader.read_packet().await.unwrap(), None);
}
