//! MQTT Ingress
//!
//! Publishes telemetry to the broker as the provisioned device, over TLS
//! with the device certificate as the client identity.

mod session;

pub use session::{MqttSession, SessionOptions};

use std::fmt;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::config::Settings;
use crate::model::ProvisioningResponse;
use crate::protocol::{DecodeError, EncodeError, QoS, ReasonCode};
use crate::tls::{self, TlsError};

/// MQTT error types
#[derive(Debug)]
pub enum MqttError {
    /// Socket error
    Io(std::io::Error),
    /// Timed out waiting for the named step
    Timeout(&'static str),
    /// TLS setup or handshake error
    Tls(TlsError),
    /// Packet encoding error
    Encode(EncodeError),
    /// Packet decoding error
    Decode(DecodeError),
    /// Broker refused the connection or the publish
    Rejected(ReasonCode),
    /// Broker sent a packet that does not fit the exchange
    UnexpectedPacket { expected: &'static str, received: u8 },
    /// Broker closed the connection
    ConnectionClosed,
    /// QoS level the publisher does not implement
    UnsupportedQoS(QoS),
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::Io(e) => write!(f, "IO error: {}", e),
            MqttError::Timeout(step) => write!(f, "Timed out waiting for {}", step),
            MqttError::Tls(e) => write!(f, "{}", e),
            MqttError::Encode(e) => write!(f, "Encode error: {}", e),
            MqttError::Decode(e) => write!(f, "Decode error: {}", e),
            MqttError::Rejected(code) => write!(f, "Rejected by broker: {}", code),
            MqttError::UnexpectedPacket { expected, received } => write!(
                f,
                "Expected {}, received packet type {}",
                expected, received
            ),
            MqttError::ConnectionClosed => write!(f, "Connection closed by broker"),
            MqttError::UnsupportedQoS(qos) => write!(f, "Unsupported QoS {:?}", qos),
        }
    }
}

impl std::error::Error for MqttError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MqttError::Io(e) => Some(e),
            MqttError::Tls(e) => Some(e),
            MqttError::Encode(e) => Some(e),
            MqttError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MqttError {
    fn from(e: std::io::Error) -> Self {
        MqttError::Io(e)
    }
}

impl From<TlsError> for MqttError {
    fn from(e: TlsError) -> Self {
        MqttError::Tls(e)
    }
}

impl From<EncodeError> for MqttError {
    fn from(e: EncodeError) -> Self {
        MqttError::Encode(e)
    }
}

impl From<DecodeError> for MqttError {
    fn from(e: DecodeError) -> Self {
        MqttError::Decode(e)
    }
}

/// A device's connection to the broker
pub struct MqttPublisher {
    session: MqttSession<TlsStream<TcpStream>>,
    qos: QoS,
}

impl MqttPublisher {
    /// Connect to `broker:mqtt_port` with mutual TLS and complete the MQTT
    /// handshake using `client_id`.
    pub async fn connect(
        settings: &Settings,
        provisioning: &ProvisioningResponse,
        client_id: &str,
    ) -> Result<Self, MqttError> {
        let connector = tls::connector(provisioning)?;
        let server_name = tls::server_name(&settings.broker)?;
        let address = (settings.broker.as_str(), settings.mqtt_port);

        let tcp = timeout(settings.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| MqttError::Timeout("TCP connect"))??;
        tcp.set_nodelay(true)?;
        debug!(broker = %settings.broker, port = settings.mqtt_port, "TCP connected");

        let stream = timeout(settings.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| MqttError::Timeout("TLS handshake"))?
            .map_err(|e| MqttError::Tls(TlsError::ConfigError(format!("Handshake failed: {}", e))))?;
        debug!(broker = %settings.broker, "TLS established");

        let options = SessionOptions {
            protocol_version: settings.protocol_version(),
            client_id: client_id.to_string(),
            keep_alive: settings.mqtt_keep_alive,
            ack_timeout: settings.connect_timeout,
        };
        let session = MqttSession::handshake(stream, &options).await?;

        info!(
            client_id,
            broker = %settings.broker,
            "MQTT publisher ready"
        );

        Ok(Self {
            session,
            qos: settings.publish_qos(),
        })
    }

    /// Publish `payload` to `topic` at the configured QoS
    pub async fn publish(&mut self, topic: &str, payload: impl Into<Bytes>) -> Result<(), MqttError> {
        self.session.publish(topic, payload.into(), self.qos).await
    }

    pub async fn disconnect(self) -> Result<(), MqttError> {
        self.session.disconnect().await
    }
}
