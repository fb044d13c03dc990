//! Ingress Dispatcher
//!
//! Routes a telemetry batch through one of the two submission paths.

use std::fmt;

use tracing::debug;

use crate::api::{ApiError, DeviceClient};
use crate::model::{DeviceName, TelemetryBatch};
use crate::mqtt::{MqttError, MqttPublisher};

/// Ingress error types
#[derive(Debug)]
pub enum IngressError {
    Api(ApiError),
    Mqtt(MqttError),
    /// The batch could not be serialized
    Encode(serde_json::Error),
}

impl fmt::Display for IngressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressError::Api(e) => write!(f, "HTTP ingress failed: {}", e),
            IngressError::Mqtt(e) => write!(f, "MQTT ingress failed: {}", e),
            IngressError::Encode(e) => write!(f, "Failed to encode batch: {}", e),
        }
    }
}

impl std::error::Error for IngressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngressError::Api(e) => Some(e),
            IngressError::Mqtt(e) => Some(e),
            IngressError::Encode(e) => Some(e),
        }
    }
}

impl From<ApiError> for IngressError {
    fn from(e: ApiError) -> Self {
        IngressError::Api(e)
    }
}

impl From<MqttError> for IngressError {
    fn from(e: MqttError) -> Self {
        IngressError::Mqtt(e)
    }
}

/// Submission path for a telemetry batch
pub enum Ingress<'a> {
    /// `POST /api/devices/{name}/ingress`, expecting 204
    Http(&'a DeviceClient),
    /// PUBLISH to `<device>/data` on an established connection
    Mqtt(&'a mut MqttPublisher),
}

impl Ingress<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Ingress::Http(_) => "http",
            Ingress::Mqtt(_) => "mqtt",
        }
    }

    /// Submit `batch` on behalf of `device`. Failures are not retried.
    pub async fn dispatch(
        &mut self,
        device: &DeviceName,
        batch: &TelemetryBatch,
    ) -> Result<(), IngressError> {
        debug!(
            path = self.name(),
            device = %device,
            measurements = batch.measurements.len(),
            "Dispatching telemetry"
        );

        match self {
            Ingress::Http(client) => client.ingest(device, batch).await?,
            Ingress::Mqtt(publisher) => {
                let payload = batch.to_json().map_err(IngressError::Encode)?;
                publisher.publish(&device.data_topic(), payload).await?;
            }
        }
        Ok(())
    }
}
