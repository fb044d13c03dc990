//! MQTT Reason Codes
//!
//! v5.0 reason codes relevant to connecting and publishing. v3.1.1
//! CONNACK return codes are mapped onto them so callers see one type.

use std::fmt;

/// MQTT v5.0 Reason Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ReasonCode {
    /// Success / Normal disconnection
    #[default]
    Success = 0x00,
    /// No matching subscribers (PUBACK, still a success)
    NoMatchingSubscribers = 0x10,
    /// Unspecified error
    UnspecifiedError = 0x80,
    /// Malformed Packet
    MalformedPacket = 0x81,
    /// Protocol Error
    ProtocolError = 0x82,
    /// Implementation specific error
    ImplementationError = 0x83,
    /// Unsupported Protocol Version
    UnsupportedProtocolVersion = 0x84,
    /// Client Identifier not valid
    ClientIdNotValid = 0x85,
    /// Bad User Name or Password
    BadUserNameOrPassword = 0x86,
    /// Not authorized
    NotAuthorized = 0x87,
    /// Server unavailable
    ServerUnavailable = 0x88,
    /// Server busy
    ServerBusy = 0x89,
    /// Banned
    Banned = 0x8A,
    /// Server shutting down
    ServerShuttingDown = 0x8B,
    /// Keep Alive timeout
    KeepAliveTimeout = 0x8D,
    /// Session taken over
    SessionTakenOver = 0x8E,
    /// Topic Name invalid
    TopicNameInvalid = 0x90,
    /// Packet too large
    PacketTooLarge = 0x95,
    /// Quota exceeded
    QuotaExceeded = 0x97,
    /// Payload format invalid
    PayloadFormatInvalid = 0x99,
    /// QoS not supported
    QoSNotSupported = 0x9B,
    /// Connection rate exceeded
    ConnectionRateExceeded = 0x9F,
}

impl ReasonCode {
    /// Create a ReasonCode from a byte value
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(ReasonCode::Success),
            0x10 => Some(ReasonCode::NoMatchingSubscribers),
            0x80 => Some(ReasonCode::UnspecifiedError),
            0x81 => Some(ReasonCode::MalformedPacket),
            0x82 => Some(ReasonCode::ProtocolError),
            0x83 => Some(ReasonCode::ImplementationError),
            0x84 => Some(ReasonCode::UnsupportedProtocolVersion),
            0x85 => Some(ReasonCode::ClientIdNotValid),
            0x86 => Some(ReasonCode::BadUserNameOrPassword),
            0x87 => Some(ReasonCode::NotAuthorized),
            0x88 => Some(ReasonCode::ServerUnavailable),
            0x89 => Some(ReasonCode::ServerBusy),
            0x8A => Some(ReasonCode::Banned),
            0x8B => Some(ReasonCode::ServerShuttingDown),
            0x8D => Some(ReasonCode::KeepAliveTimeout),
            0x8E => Some(ReasonCode::SessionTakenOver),
            0x90 => Some(ReasonCode::TopicNameInvalid),
            0x95 => Some(ReasonCode::PacketTooLarge),
            0x97 => Some(ReasonCode::QuotaExceeded),
            0x99 => Some(ReasonCode::PayloadFormatInvalid),
            0x9B => Some(ReasonCode::QoSNotSupported),
            0x9F => Some(ReasonCode::ConnectionRateExceeded),
            _ => None,
        }
    }

    /// Check if this reason code indicates success
    #[inline]
    pub fn is_success(self) -> bool {
        (self as u8) < 0x80
    }

    /// Create from MQTT v3.1.1 CONNACK return code
    pub fn from_v3_connack_code(code: u8) -> Self {
        match code {
            0x00 => ReasonCode::Success,
            0x01 => ReasonCode::UnsupportedProtocolVersion,
            0x02 => ReasonCode::ClientIdNotValid,
            0x03 => ReasonCode::ServerUnavailable,
            0x04 => ReasonCode::BadUserNameOrPassword,
            0x05 => ReasonCode::NotAuthorized,
            _ => ReasonCode::UnspecifiedError,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Success => write!(f, "Success"),
            ReasonCode::NoMatchingSubscribers => write!(f, "No matching subscribers"),
            ReasonCode::UnspecifiedError => write!(f, "Unspecified error"),
            ReasonCode::MalformedPacket => write!(f, "Malformed Packet"),
            ReasonCode::ProtocolError => write!(f, "Protocol Error"),
            ReasonCode::ImplementationError => write!(f, "Implementation specific error"),
            ReasonCode::UnsupportedProtocolVersion => write!(f, "Unsupported Protocol Version"),
            ReasonCode::ClientIdNotValid => write!(f, "Client Identifier not valid"),
            ReasonCode::BadUserNameOrPassword => write!(f, "Bad User Name or Password"),
            ReasonCode::NotAuthorized => write!(f, "Not authorized"),
            ReasonCode::ServerUnavailable => write!(f, "Server unavailable"),
            ReasonCode::ServerBusy => write!(f, "Server busy"),
            ReasonCode::Banned => write!(f, "Banned"),
            ReasonCode::ServerShuttingDown => write!(f, "Server shutting down"),
            ReasonCode::KeepAliveTimeout => write!(f, "Keep Alive timeout"),
            ReasonCode::SessionTakenOver => write!(f, "Session taken over"),
            ReasonCode::TopicNameInvalid => write!(f, "Topic Name invalid"),
            ReasonCode::PacketTooLarge => write!(f, "Packet too large"),
            ReasonCode::QuotaExceeded => write!(f, "Quota exceeded"),
            ReasonCode::PayloadFormatInvalid => write!(f, "Payload format invalid"),
            ReasonCode::QoSNotSupported => write!(f, "QoS not supported"),
            ReasonCode::ConnectionRateExceeded => write!(f, "Connection rate exceeded"),
        }
    }
}
