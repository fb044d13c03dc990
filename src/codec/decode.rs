//! MQTT Packet Decoder
//!
//! Decodes the packets a broker sends to a publishing client, for both
//! v3.1.1 and v5.0

use bytes::Bytes;

use super::{read_string, read_u16, read_variable_int, skip_properties};
use crate::protocol::{
    ConnAck, DecodeError, Disconnect, Packet, ProtocolVersion, PubAck, Publish, QoS, ReasonCode,
};

/// MQTT Packet Decoder for the broker-to-client direction
pub struct Decoder {
    protocol_version: ProtocolVersion,
}

impl Decoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            protocol_version: version,
        }
    }

    fn is_v5(&self) -> bool {
        self.protocol_version == ProtocolVersion::V5
    }

    /// Decode a packet from the buffer
    /// Returns (packet, bytes_consumed), or None while the frame is incomplete
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        // Parse fixed header
        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        let total_len = 1 + len_bytes + remaining_length as usize;

        // Wait for complete packet
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            2 => self.decode_connack(flags, payload)?,
            3 => self.decode_publish(flags, payload)?,
            4 => self.decode_puback(flags, payload)?,
            13 => {
                if flags != 0 || !payload.is_empty() {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::PingResp
            }
            14 => self.decode_disconnect(flags, payload)?,
            0 => return Err(DecodeError::InvalidPacketType(packet_type)),
            _ => return Err(DecodeError::UnsupportedPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connack(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        if payload.len() < 2 {
            return Err(DecodeError::InsufficientData);
        }

        let acknowledge_flags = payload[0];
        // Only bit 0 is valid (session present), rest must be 0
        if (acknowledge_flags & 0xFE) != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let session_present = (acknowledge_flags & 0x01) != 0;
        let reason_byte = payload[1];

        let reason_code = if self.is_v5() {
            if payload.len() > 2 {
                skip_properties(&payload[2..])?;
            }
            ReasonCode::from_u8(reason_byte).ok_or(DecodeError::InvalidReasonCode(reason_byte))?
        } else {
            ReasonCode::from_v3_connack_code(reason_byte)
        };

        Ok(Packet::ConnAck(ConnAck {
            session_present,
            reason_code,
        }))
    }

    fn decode_publish(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
        }

        let mut pos = 0;

        let (topic, len) = read_string(payload)?;
        pos += len;

        if topic.contains(['+', '#']) {
            return Err(DecodeError::MalformedPacket("topic contains wildcard"));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&payload[pos..])?;
            if id == 0 {
                return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        if self.is_v5() {
            pos += skip_properties(&payload[pos..])?;
        }

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(&payload[pos..]),
        }))
    }

    fn decode_puback(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(payload)?;

        let reason_code = if self.is_v5() && payload.len() > 2 {
            ReasonCode::from_u8(payload[2]).ok_or(DecodeError::InvalidReasonCode(payload[2]))?
        } else {
            ReasonCode::Success
        };

        Ok(Packet::PubAck(PubAck {
            packet_id,
            reason_code,
        }))
    }

    fn decode_disconnect(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let reason_code = match payload.first() {
            Some(&code) if self.is_v5() => {
                ReasonCode::from_u8(code).ok_or(DecodeError::InvalidReasonCode(code))?
            }
            Some(_) => return Err(DecodeError::MalformedPacket("v3.1.1 DISCONNECT has no body")),
            None => ReasonCode::Success,
        };

        Ok(Packet::Disconnect(Disconnect { reason_code }))
    }
}
