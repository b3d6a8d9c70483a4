//! Plain TCP transport
//!
//! The stream is split into owned halves. Reads accumulate in a `BytesMut`
//! until the codec can frame a whole packet; writes encode into a reusable
//! buffer and flush once per packet.

use super::{BrokerAddress, Dialer, PacketReader, PacketWriter, TransportError, TransportPair};
use crate::protocol::{self, CodecError, Packet};
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Dials brokers over TCP
#[derive(Debug, Clone)]
pub struct TcpDialer {
    max_packet_size: usize,
}

impl TcpDialer {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &BrokerAddress) -> Result<TransportPair, TransportError> {
        debug!(target: "mqtt_transport", %address, "Dialing broker");

        let stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|source| TransportError::Dial {
                address: address.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        Ok(Self::wrap(stream, self.max_packet_size))
    }
}

impl TcpDialer {
    /// Wrap an already connected stream
    pub fn wrap(stream: TcpStream, max_packet_size: usize) -> TransportPair {
        let (read_half, write_half) = stream.into_split();
        TransportPair {
            reader: Box::new(TcpPacketReader {
                stream: read_half,
                buffer: BytesMut::with_capacity(10 * 1024),
                max_packet_size,
            }),
            writer: Box::new(TcpPacketWriter {
                stream: write_half,
                buffer: BytesMut::with_capacity(1024),
                max_packet_size,
            }),
        }
    }
}

pub struct TcpPacketReader {
    stream: OwnedReadHalf,
    buffer: BytesMut,
    max_packet_size: usize,
}

#[async_trait]
impl PacketReader for TcpPacketReader {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            if let Some(packet) = protocol::decode(&mut self.buffer, self.max_packet_size)? {
                trace!(target: "mqtt_transport", kind = packet.kind(), "Read packet");
                return Ok(Some(packet));
            }

            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                // A clean close only happens on a frame boundary.
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-packet",
                    )))
                };
            }
        }
    }
}

pub struct TcpPacketWriter {
    stream: OwnedWriteHalf,
    buffer: BytesMut,
    max_packet_size: usize,
}

#[async_trait]
impl PacketWriter for TcpPacketWriter {
    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.buffer.clear();
        let size = protocol::encode(packet, &mut self.buffer)?;
        if size > self.max_packet_size {
            return Err(CodecError::TooLarge {
                size,
                limit: self.max_packet_size,
            }
            .into());
        }

        self.stream.write_all(&self.buffer).await?;
        self.stream.flush().await?;
        trace!(target: "mqtt_transport", kind = packet.kind(), size, "Wrote packet");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
