//! Telemetry Conformance - end-to-end checks for a device-management and
//! telemetry-ingestion service
//!
//! Provisions disposable devices over the REST API, submits telemetry over
//! HTTP and over MQTT with per-device TLS identities, and polls the read
//! endpoints until the submitted values become visible.

pub mod api;
pub mod codec;
pub mod config;
pub mod ingress;
pub mod model;
pub mod mqtt;
pub mod poll;
pub mod protocol;
pub mod scenario;
pub mod tls;

pub use api::{ApiError, CreateOutcome, DeleteOutcome, DeviceClient, Snapshot};
pub use config::{ConfigError, Settings};
pub use ingress::{Ingress, IngressError};
pub use model::{Device, DeviceName, Measurement, ProvisioningResponse, TelemetryBatch};
pub use mqtt::{MqttError, MqttPublisher};
pub use poll::{poll_until, Convergence, PollError, PollPolicy, Probe, SensorProbe};
pub use protocol::{ProtocolVersion, QoS};
pub use scenario::{run_all, run_scenario, ScenarioKind, ScenarioReport};
