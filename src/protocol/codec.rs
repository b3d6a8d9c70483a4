//! Conversion between the client's typed packets and the rumqttc wire codec
//!
//! Framing, remaining-length encoding and field layout all come from
//! `rumqttc::mqttbytes::v4`. This module maps types across and reports the
//! packets the client core does not handle.

use super::packets::{
    ConnAck, Connect, ConnectReturnCode, Credentials, Packet, PubAck, Publish, QoS,
};
use bytes::BytesMut;
use rumqttc::mqttbytes::{self, v4};
use thiserror::Error;

/// Wire encode/decode failures
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("malformed packet: {0}")]
    Wire(#[from] mqttbytes::Error),
    #[error("unsupported packet type {0}")]
    Unsupported(&'static str),
    #[error("{0:?} publish requires a packet identifier")]
    MissingPacketId(QoS),
    #[error("encoded packet of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Encode `packet` onto the end of `buf`, returning the number of bytes written
pub fn encode(packet: &Packet, buf: &mut BytesMut) -> Result<usize, CodecError> {
    let before = buf.len();
    match packet {
        Packet::Connect(connect) => {
            let mut wire = v4::Connect::new(connect.client_id.as_str());
            wire.clean_session = connect.clean_session;
            wire.keep_alive = connect.keep_alive;
            if let Some(credentials) = &connect.credentials {
                wire.set_login(credentials.username.as_str(), credentials.password.as_str());
            }
            wire.write(buf)?;
        }
        Packet::ConnAck(connack) => {
            v4::ConnAck::new(code_to_wire(connack.code), connack.session_present).write(buf)?;
        }
        Packet::Publish(publish) => {
            let mut wire =
                v4::Publish::from_bytes(publish.topic.as_str(), qos_to_wire(publish.qos), publish.payload.clone());
            wire.retain = publish.retain;
            wire.dup = publish.dup;
            if publish.qos.requires_ack() {
                wire.pkid = publish
                    .packet_id
                    .ok_or(CodecError::MissingPacketId(publish.qos))?;
            }
            wire.write(buf)?;
        }
        Packet::PubAck(puback) => {
            v4::PubAck::new(puback.packet_id).write(buf)?;
        }
        Packet::PingReq => {
            v4::PingReq.write(buf)?;
        }
        Packet::PingResp => {
            v4::PingResp.write(buf)?;
        }
        Packet::Disconnect => {
            v4::Disconnect.write(buf)?;
        }
    }
    Ok(buf.len() - before)
}

/// Decode one packet from the front of `buf`
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
/// caller reads more bytes and tries again.
pub fn decode(buf: &mut BytesMut, max_size: usize) -> Result<Option<Packet>, CodecError> {
    match v4::read(buf, max_size) {
        Ok(packet) => from_wire(packet).map(Some),
        Err(mqttbytes::Error::InsufficientBytes(_)) => Ok(None),
        Err(e) => Err(CodecError::Wire(e)),
    }
}

fn from_wire(packet: v4::Packet) -> Result<Packet, CodecError> {
    let packet = match packet {
        v4::Packet::Connect(connect) => Packet::Connect(Connect {
            client_id: connect.client_id,
            clean_session: connect.clean_session,
            keep_alive: connect.keep_alive,
            credentials: connect
                .login
                .map(|login| Credentials::new(login.username, login.password)),
        }),
        v4::Packet::ConnAck(connack) => Packet::ConnAck(ConnAck {
            code: code_from_wire(connack.code),
            session_present: connack.session_present,
        }),
        v4::Packet::Publish(publish) => {
            let qos = qos_from_wire(publish.qos);
            Packet::Publish(Publish {
                topic: publish.topic,
                payload: publish.payload,
                qos,
                packet_id: qos.requires_ack().then_some(publish.pkid),
                retain: publish.retain,
                dup: publish.dup,
            })
        }
        v4::Packet::PubAck(puback) => Packet::PubAck(PubAck::new(puback.pkid)),
        v4::Packet::PingReq => Packet::PingReq,
        v4::Packet::PingResp => Packet::PingResp,
        v4::Packet::Disconnect => Packet::Disconnect,
        v4::Packet::PubRec(_) => return Err(CodecError::Unsupported("PUBREC")),
        v4::Packet::PubRel(_) => return Err(CodecError::Unsupported("PUBREL")),
        v4::Packet::PubComp(_) => return Err(CodecError::Unsupported("PUBCOMP")),
        v4::Packet::Subscribe(_) => return Err(CodecError::Unsupported("SUBSCRIBE")),
        v4::Packet::SubAck(_) => return Err(CodecError::Unsupported("SUBACK")),
        v4::Packet::Unsubscribe(_) => return Err(CodecError::Unsupported("UNSUBSCRIBE")),
        v4::Packet::UnsubAck(_) => return Err(CodecError::Unsupported("UNSUBACK")),
    };
    Ok(packet)
}

fn qos_to_wire(qos: QoS) -> mqttbytes::QoS {
    match qos {
        QoS::AtMostOnce => mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => mqttbytes::QoS::ExactlyOnce,
    }
}

fn qos_from_wire(qos: mqttbytes::QoS) -> QoS {
    match qos {
        mqttbytes::QoS::AtMostOnce => QoS::AtMostOnce,
        mqttbytes::QoS::AtLeastOnce => QoS::AtLeastOnce,
        mqttbytes::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn code_to_wire(code: ConnectReturnCode) -> v4::ConnectReturnCode {
    match code {
        ConnectReturnCode::Accepted => v4::ConnectReturnCode::Success,
        ConnectReturnCode::RefusedProtocolVersion => v4::ConnectReturnCode::RefusedProtocolVersion,
        ConnectReturnCode::BadClientId => v4::ConnectReturnCode::BadClientId,
        ConnectReturnCode::ServiceUnavailable => v4::ConnectReturnCode::ServiceUnavailable,
        ConnectReturnCode::BadUserNamePassword => v4::ConnectReturnCode::BadUserNamePassword,
        ConnectReturnCode::NotAuthorized => v4::ConnectReturnCode::NotAuthorized,
    }
}

fn code_from_wire(code: v4::ConnectReturnCode) -> ConnectReturnCode {
    match code {
        v4::ConnectReturnCode::Success => ConnectReturnCode::Accepted,
        v4::ConnectReturnCode::RefusedProtocolVersion => ConnectReturnCode::RefusedProtocolVersion,
        v4::ConnectReturnCode::BadClientId => ConnectReturnCode::BadClientId,
        v4::ConnectReturnCode::ServiceUnavailable => ConnectReturnCode::ServiceUnavailable,
        v4::ConnectReturnCode::BadUserNamePassword => ConnectReturnCode::BadUserNamePassword,
        v4::ConnectReturnCode::NotAuthorized => ConnectReturnCode::NotAuthorized,
    }
}
