//! MQTT publisher session over an arbitrary byte stream
//!
//! Runs CONNECT/CONNACK, PUBLISH (QoS 0 or 1) and DISCONNECT over anything
//! implementing `AsyncRead + AsyncWrite`. In production that is a TLS
//! stream; tests use an in-memory duplex.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::MqttError;
use crate::codec::{Decoder, Encoder};
use crate::protocol::{Connect, Disconnect, Packet, ProtocolVersion, Publish, QoS};

/// Parameters for opening a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub protocol_version: ProtocolVersion,
    pub client_id: String,
    pub keep_alive: u16,
    /// Bound on waiting for CONNACK and PUBACK
    pub ack_timeout: Duration,
}

impl SessionOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_version: ProtocolVersion::V311,
            client_id: client_id.into(),
            keep_alive: 60,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// An established MQTT session
pub struct MqttSession<S> {
    stream: S,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    client_id: String,
    ack_timeout: Duration,
    next_packet_id: u16,
}

impl<S> MqttSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send CONNECT (clean session) and wait for a successful CONNACK
    pub async fn handshake(stream: S, options: &SessionOptions) -> Result<Self, MqttError> {
        let mut session = Self {
            stream,
            encoder: Encoder::new(options.protocol_version),
            decoder: Decoder::new(options.protocol_version),
            read_buf: BytesMut::with_capacity(1024),
            write_buf: BytesMut::with_capacity(1024),
            client_id: options.client_id.clone(),
            ack_timeout: options.ack_timeout,
            next_packet_id: 1,
        };

        let connect = Packet::Connect(Box::new(Connect {
            protocol_version: options.protocol_version,
            client_id: options.client_id.clone(),
            clean_start: true,
            keep_alive: options.keep_alive,
        }));
        session.send(&connect).await?;
        debug!(client_id = %session.client_id, "CONNECT sent");

        let packet = timeout(session.ack_timeout, session.read_packet())
            .await
            .map_err(|_| MqttError::Timeout("CONNACK"))??;

        match packet {
            Packet::ConnAck(connack) => {
                if !connack.reason_code.is_success() {
                    warn!(
                        client_id = %session.client_id,
                        reason = %connack.reason_code,
                        "Connection refused by broker"
                    );
                    return Err(MqttError::Rejected(connack.reason_code));
                }
                info!(
                    client_id = %session.client_id,
                    session_present = connack.session_present,
                    "Connected to broker"
                );
                Ok(session)
            }
            other => Err(MqttError::UnexpectedPacket {
                expected: "CONNACK",
                received: other.packet_type(),
            }),
        }
    }

    /// Client identifier sent in CONNECT
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Publish one message.
    ///
    /// QoS 0 completes once the bytes are flushed; QoS 1 waits for the
    /// matching PUBACK.
    pub async fn publish(&mut self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), MqttError> {
        if qos == QoS::ExactlyOnce {
            return Err(MqttError::UnsupportedQoS(qos));
        }

        let packet_id = if qos == QoS::AtLeastOnce {
            Some(self.allocate_packet_id())
        } else {
            None
        };

        let publish = Packet::Publish(Publish {
            dup: false,
            qos,
            retain: false,
            topic: topic.to_string(),
            packet_id,
            payload,
        });
        self.send(&publish).await?;
        debug!(client_id = %self.client_id, topic, ?qos, "PUBLISH sent");

        let Some(packet_id) = packet_id else {
            return Ok(());
        };

        timeout(self.ack_timeout, self.await_puback(packet_id))
            .await
            .map_err(|_| MqttError::Timeout("PUBACK"))?
    }

    /// Send DISCONNECT and close the stream
    pub async fn disconnect(mut self) -> Result<(), MqttError> {
        self.send(&Packet::Disconnect(Disconnect::default())).await?;
        self.stream.shutdown().await?;
        debug!(client_id = %self.client_id, "Disconnected");
        Ok(())
    }

    async fn await_puback(&mut self, packet_id: u16) -> Result<(), MqttError> {
        loop {
            match self.read_packet().await? {
                Packet::PubAck(ack) if ack.packet_id == packet_id => {
                    if !ack.reason_code.is_success() {
                        return Err(MqttError::Rejected(ack.reason_code));
                    }
                    debug!(client_id = %self.client_id, packet_id, "PUBACK received");
                    return Ok(());
                }
                Packet::PubAck(ack) => {
                    trace!(packet_id = ack.packet_id, "Ignoring PUBACK for another packet");
                }
                Packet::PingResp => {}
                Packet::Disconnect(disconnect) => {
                    return Err(MqttError::Rejected(disconnect.reason_code));
                }
                other => {
                    return Err(MqttError::UnexpectedPacket {
                        expected: "PUBACK",
                        received: other.packet_type(),
                    })
                }
            }
        }
    }

    fn allocate_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), MqttError> {
        self.write_buf.clear();
        self.encoder.encode(packet, &mut self.write_buf)?;
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read until one complete packet is buffered
    async fn read_packet(&mut self) -> Result<Packet, MqttError> {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(packet);
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(MqttError::ConnectionClosed);
            }
        }
    }
}
