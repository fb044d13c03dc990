//! Wire types exchanged with the device-management service.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inventory entry returned by `GET /api/devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
}

/// One-time provisioning material returned by a successful create.
///
/// Consumed to build the MQTT TLS identity and then dropped.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningResponse {
    pub name: String,
    pub arn: String,
    /// Client certificate (PEM)
    pub pem: String,
    pub public_key: String,
    /// Client private key (PEM)
    pub private_key: String,
    /// CA the broker's certificate chains to (PEM)
    pub root_ca: String,
}

impl fmt::Debug for ProvisioningResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningResponse")
            .field("name", &self.name)
            .field("arn", &self.arn)
            .field("pem", &format_args!("<{} bytes>", self.pem.len()))
            .field("public_key", &format_args!("<{} bytes>", self.public_key.len()))
            .field("private_key", &"<redacted>")
            .field("root_ca", &format_args!("<{} bytes>", self.root_ca.len()))
            .finish()
    }
}

/// A single sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Ordered measurements sent as one unit through either ingress path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub measurements: Vec<Measurement>,
}

impl TelemetryBatch {
    pub fn single(name: impl Into<String>, value: f64) -> Self {
        Self {
            measurements: vec![Measurement::new(name, value)],
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Disposable, collision-resistant device identity for one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceName(String);

impl DeviceName {
    /// `<prefix>-<uuid v4>`
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// MQTT topic the device publishes telemetry on
    pub fn data_topic(&self) -> String {
        format!("{}/data", self.0)
    }
}

impl From<&str> for DeviceName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl AsRef<str> for DeviceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
