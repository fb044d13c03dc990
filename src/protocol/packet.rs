//! MQTT Packet Definitions

use bytes::Bytes;

use super::{ProtocolVersion, QoS, ReasonCode};

/// MQTT Packet as seen from the publishing client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PingReq,
    PingResp,
    Disconnect(Disconnect),
}

impl Packet {
    /// Get packet type as u8
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Connect(_) => 1,
            Packet::ConnAck(_) => 2,
            Packet::Publish(_) => 3,
            Packet::PubAck(_) => 4,
            Packet::PingReq => 12,
            Packet::PingResp => 13,
            Packet::Disconnect(_) => 14,
        }
    }
}

/// CONNECT packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// Protocol version (determines v3.1.1 or v5.0 behavior)
    pub protocol_version: ProtocolVersion,
    /// Client identifier, the device name for provisioned devices
    pub client_id: String,
    /// Clean session (v3.1.1) / Clean start (v5.0)
    pub clean_start: bool,
    /// Keep alive interval in seconds
    pub keep_alive: u16,
}

impl Default for Connect {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V311,
            client_id: String::new(),
            clean_start: true,
            keep_alive: 60,
        }
    }
}

/// CONNACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnAck {
    /// Session present flag
    pub session_present: bool,
    /// Reason code (v5.0) / Return code (v3.1.1), normalized to v5.0 codes
    pub reason_code: ReasonCode,
}

/// PUBLISH packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Publish {
    /// Duplicate delivery flag
    pub dup: bool,
    /// Quality of service
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// Topic name
    pub topic: String,
    /// Packet identifier (present only for QoS > 0)
    pub packet_id: Option<u16>,
    /// Payload
    pub payload: Bytes,
}

/// PUBACK packet (QoS 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubAck {
    /// Packet identifier
    pub packet_id: u16,
    /// Reason code (v5.0 only, always Success for v3.1.1)
    pub reason_code: ReasonCode,
}

impl PubAck {
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
        }
    }
}

/// DISCONNECT packet (bidirectional in v5.0, client -> server in v3.1.1)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Disconnect {
    /// Reason code (v5.0 only)
    pub reason_code: ReasonCode,
}
