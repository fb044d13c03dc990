//! Scripted MQTT broker
//!
//! Speaks the broker side of a publisher session over any byte stream.
//! CONNECT is parsed here, PUBLISH and DISCONNECT go through the library
//! decoder, and CONNACK, PUBACK and PINGRESP are written as raw frames.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use telemetry_conformance::codec::{read_string, read_u16, read_variable_int, Decoder};
use telemetry_conformance::protocol::{Connect, Packet, ProtocolVersion, ReasonCode};

pub struct FakeBroker<S> {
    pub stream: S,
    version: ProtocolVersion,
    buf: BytesMut,
}

impl<S> FakeBroker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `version` is replaced by the level of the first CONNECT received
    pub fn new(stream: S, version: ProtocolVersion) -> Self {
        Self {
            stream,
            version,
            buf: BytesMut::new(),
        }
    }

    /// Next complete client packet, or None once the client hangs up
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            if let Some((packet, consumed)) = self.try_decode() {
                self.buf.advance(consumed);
                if let Packet::Connect(connect) = &packet {
                    self.version = connect.protocol_version;
                }
                return Some(packet);
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    fn try_decode(&self) -> Option<(Packet, usize)> {
        if self.buf.first().map(|b| b >> 4) == Some(1) {
            let (remaining, len_bytes) = read_variable_int(&self.buf[1..]).ok()?;
            let total = 1 + len_bytes + remaining as usize;
            if self.buf.len() < total {
                return None;
            }
            let connect = parse_connect(&self.buf[1 + len_bytes..total]);
            return Some((Packet::Connect(Box::new(connect)), total));
        }
        Decoder::new(self.version).decode(&self.buf).unwrap()
    }

    /// Read CONNECT and answer it with `reason_code`
    pub async fn accept(&mut self, reason_code: ReasonCode) -> Packet {
        let connect = self.recv().await.expect("CONNECT");
        self.send_connack(reason_code).await;
        connect
    }

    pub fn connack_bytes(&self, reason_code: ReasonCode) -> Vec<u8> {
        match self.version {
            ProtocolVersion::V311 => vec![0x20, 0x02, 0x00, v3_return_code(reason_code)],
            ProtocolVersion::V5 => vec![0x20, 0x03, 0x00, reason_code as u8, 0x00],
        }
    }

    pub async fn send_connack(&mut self, reason_code: ReasonCode) {
        let frame = self.connack_bytes(reason_code);
        self.write(&frame).await;
    }

    /// The reason byte is only written for v5 failures
    pub async fn send_puback(&mut self, packet_id: u16, reason_code: ReasonCode) {
        let [hi, lo] = packet_id.to_be_bytes();
        let frame = if self.version == ProtocolVersion::V5 && !reason_code.is_success() {
            vec![0x40, 0x03, hi, lo, reason_code as u8]
        } else {
            vec![0x40, 0x02, hi, lo]
        };
        self.write(&frame).await;
    }

    pub async fn send_pingresp(&mut self) {
        self.write(&[0xD0, 0x00]).await;
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }
}

fn v3_return_code(reason_code: ReasonCode) -> u8 {
    match reason_code {
        ReasonCode::Success => 0x00,
        ReasonCode::UnsupportedProtocolVersion => 0x01,
        ReasonCode::ClientIdNotValid => 0x02,
        ReasonCode::ServerUnavailable => 0x03,
        ReasonCode::BadUserNameOrPassword => 0x04,
        ReasonCode::NotAuthorized => 0x05,
        other => panic!("{:?} has no v3.1.1 return code", other),
    }
}

/// Variable header and payload of a CONNECT without will or credentials
fn parse_connect(body: &[u8]) -> Connect {
    let (name, mut pos) = read_string(body).unwrap();
    assert_eq!(name, "MQTT");

    let protocol_version = ProtocolVersion::from_u8(body[pos]).expect("protocol level");
    let flags = body[pos + 1];
    assert_eq!(flags & !0x02, 0, "unexpected CONNECT flags {:#04x}", flags);
    pos += 2;

    let keep_alive = read_u16(&body[pos..]).unwrap();
    pos += 2;

    if protocol_version == ProtocolVersion::V5 {
        let (len, len_bytes) = read_variable_int(&body[pos..]).unwrap();
        pos += len_bytes + len as usize;
    }

    let (client_id, _) = read_string(&body[pos..]).unwrap();
    Connect {
        protocol_version,
        client_id: client_id.to_string(),
        clean_start: flags & 0x02 != 0,
        keep_alive,
    }
}
