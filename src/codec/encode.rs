//! MQTT Packet Encoder
//!
//! Encodes the packets a publishing client sends, for both v3.1.1 and v5.0.
//! Every v5.0 packet is written with an empty property block.

use bytes::{BufMut, BytesMut};

use super::{write_string, write_variable_int};
use crate::protocol::{
    Connect, Disconnect, EncodeError, Packet, ProtocolVersion, Publish, QoS, ReasonCode,
};

/// MQTT Packet Encoder
pub struct Encoder {
    protocol_version: ProtocolVersion,
}

impl Encoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            protocol_version: version,
        }
    }

    fn is_v5(&self) -> bool {
        self.protocol_version == ProtocolVersion::V5
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => self.encode_connect(p, buf),
            Packet::Publish(p) => self.encode_publish(p, buf),
            Packet::PingReq => {
                buf.put_u8(0xC0); // PINGREQ type + flags
                buf.put_u8(0x00); // Remaining length
                Ok(())
            }
            Packet::Disconnect(p) => self.encode_disconnect(p, buf),
            Packet::ConnAck(_) | Packet::PubAck(_) | Packet::PingResp => {
                Err(EncodeError::UnsupportedPacketType(packet.packet_type()))
            }
        }
    }

    fn encode_connect(&self, packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
        // Protocol name "MQTT" with length prefix, level, flags, keep alive
        let mut remaining_length = 6 + 1 + 1 + 2;

        // Empty properties (v5.0 only)
        if packet.protocol_version == ProtocolVersion::V5 {
            remaining_length += 1;
        }

        remaining_length += 2 + packet.client_id.len();

        // Fixed header
        buf.put_u8(0x10); // CONNECT type + flags (0001 0000)
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, "MQTT")?;
        buf.put_u8(packet.protocol_version as u8);

        let mut connect_flags: u8 = 0;
        if packet.clean_start {
            connect_flags |= 0x02;
        }
        buf.put_u8(connect_flags);

        buf.put_u16(packet.keep_alive);

        if packet.protocol_version == ProtocolVersion::V5 {
            buf.put_u8(0x00);
        }

        write_string(buf, &packet.client_id)?;

        Ok(())
    }

    fn encode_publish(&self, packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if packet.topic.is_empty() || packet.topic.contains(['+', '#']) {
            return Err(EncodeError::InvalidTopicName);
        }

        let mut remaining_length = 2 + packet.topic.len();

        if packet.qos != QoS::AtMostOnce {
            remaining_length += 2; // packet identifier
        }

        if self.is_v5() {
            remaining_length += 1;
        }

        remaining_length += packet.payload.len();

        // Fixed header
        let mut first_byte: u8 = 0x30; // PUBLISH type (0011)
        if packet.dup {
            first_byte |= 0x08;
        }
        first_byte |= (packet.qos as u8) << 1;
        if packet.retain {
            first_byte |= 0x01;
        }
        buf.put_u8(first_byte);
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, &packet.topic)?;

        if packet.qos != QoS::AtMostOnce {
            buf.put_u16(packet.packet_id.unwrap_or(1));
        }

        if self.is_v5() {
            buf.put_u8(0x00);
        }

        buf.put_slice(&packet.payload);

        Ok(())
    }

    fn encode_disconnect(
        &self,
        packet: &Disconnect,
        buf: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        buf.put_u8(0xE0);
        if self.is_v5() && packet.reason_code != ReasonCode::Success {
            buf.put_u8(0x01);
            buf.put_u8(packet.reason_code as u8);
        } else {
            buf.put_u8(0x00);
        }
        Ok(())
    }
}
