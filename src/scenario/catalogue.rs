//! Scenario catalogue

use async_trait::async_trait;
use clap::ValueEnum;
use tracing::{debug, info};

use super::{ensure, Scenario, ScenarioContext, ScenarioError};
use crate::api::{CreateOutcome, DeleteOutcome};
use crate::ingress::Ingress;
use crate::model::{ProvisioningResponse, TelemetryBatch};
use crate::mqtt::MqttPublisher;
use crate::poll::{poll_until, Convergence, SensorProbe};

/// Sensor every ingress scenario writes to
pub const SENSOR: &str = "x";

/// Value published over MQTT
pub const MQTT_VALUE: f64 = 420.69;

/// Built-in scenarios, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ScenarioKind {
    /// The harness itself runs
    Sanity,
    /// Listing devices returns at least the provisioned one
    ListDevices,
    /// A created device shows up in the inventory
    CreateDevice,
    /// Creating an existing device conflicts
    DuplicateDevice,
    /// Deleting twice yields deleted then not found
    DeleteDevice,
    /// Deleting a device that never existed is not found
    DeleteMissing,
    /// Telemetry posted over HTTP becomes readable
    HttpIngress,
    /// Telemetry published over MQTT becomes readable
    MqttIngress,
}

impl ScenarioKind {
    pub fn all() -> &'static [ScenarioKind] {
        ScenarioKind::value_variants()
    }

    /// Command-line name, e.g. `http-ingress`
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Sanity => "sanity",
            ScenarioKind::ListDevices => "list-devices",
            ScenarioKind::CreateDevice => "create-device",
            ScenarioKind::DuplicateDevice => "duplicate-device",
            ScenarioKind::DeleteDevice => "delete-device",
            ScenarioKind::DeleteMissing => "delete-missing",
            ScenarioKind::HttpIngress => "http-ingress",
            ScenarioKind::MqttIngress => "mqtt-ingress",
        }
    }
}

#[async_trait]
impl Scenario for ScenarioKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn touches_service(&self) -> bool {
        *self != ScenarioKind::Sanity
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        match self {
            ScenarioKind::Sanity => Ok(()),
            ScenarioKind::ListDevices => list_devices(ctx).await,
            ScenarioKind::CreateDevice => create_device(ctx).await,
            ScenarioKind::DuplicateDevice => duplicate_device(ctx).await,
            ScenarioKind::DeleteDevice => delete_device(ctx).await,
            ScenarioKind::DeleteMissing => delete_missing(ctx).await,
            ScenarioKind::HttpIngress => http_ingress(ctx).await,
            ScenarioKind::MqttIngress => mqtt_ingress(ctx).await,
        }
    }
}

/// Create the context's device, requiring 201
async fn provision(ctx: &ScenarioContext) -> Result<ProvisioningResponse, ScenarioError> {
    match ctx.client.create(&ctx.device).await? {
        CreateOutcome::Created(provisioning) => {
            debug!(device = %ctx.device, "Provisioned");
            Ok(provisioning)
        }
        CreateOutcome::Conflict => Err(ScenarioError::Assertion(format!(
            "expected 201 creating {}, got 409",
            ctx.device
        ))),
    }
}

/// The inventory holds an entry named exactly like the context's device
async fn assert_listed(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    let devices = ctx.client.list().await?;
    ensure(
        devices.iter().any(|d| d.name == ctx.device.as_str()),
        format!(
            "{} missing from inventory of {} devices",
            ctx.device,
            devices.len()
        ),
    )
}

async fn list_devices(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    provision(ctx).await?;
    let devices = ctx.client.list().await?;
    ensure(!devices.is_empty(), "device list is empty after provisioning")
}

async fn create_device(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    provision(ctx).await?;
    assert_listed(ctx).await
}

async fn duplicate_device(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    provision(ctx).await?;
    assert_listed(ctx).await?;

    let second = ctx.client.create(&ctx.device).await?;
    ensure(
        second == CreateOutcome::Conflict,
        format!("expected 409 re-creating {}, got 201", ctx.device),
    )
}

async fn delete_device(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    provision(ctx).await?;
    assert_listed(ctx).await?;

    let first = ctx.client.delete(&ctx.device).await?;
    ensure(
        first == DeleteOutcome::Deleted,
        format!("expected 204 deleting {}, got 404", ctx.device),
    )?;

    let second = ctx.client.delete(&ctx.device).await?;
    ensure(
        second == DeleteOutcome::NotFound,
        format!("expected 404 deleting {} again, got 204", ctx.device),
    )
}

async fn delete_missing(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    let outcome = ctx.client.delete(&ctx.device).await?;
    ensure(
        outcome == DeleteOutcome::NotFound,
        format!("expected 404 deleting unknown {}, got 204", ctx.device),
    )
}

async fn http_ingress(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    provision(ctx).await?;

    let value: f64 = rand::random();
    let batch = TelemetryBatch::single(SENSOR, value);
    Ingress::Http(&ctx.client)
        .dispatch(&ctx.device, &batch)
        .await?;
    info!(device = %ctx.device, value, "Telemetry posted");

    let probe = SensorProbe::new(&ctx.client, &ctx.device, SENSOR);
    poll_until(&probe, &Convergence::NotEmpty, &ctx.settings.poll_policy()).await?;
    Ok(())
}

async fn mqtt_ingress(ctx: &ScenarioContext) -> Result<(), ScenarioError> {
    let provisioning = provision(ctx).await?;

    let mut publisher =
        MqttPublisher::connect(&ctx.settings, &provisioning, ctx.device.as_str()).await?;
    drop(provisioning);

    let batch = TelemetryBatch::single(SENSOR, MQTT_VALUE);
    Ingress::Mqtt(&mut publisher)
        .dispatch(&ctx.device, &batch)
        .await?;
    publisher.disconnect().await?;
    info!(device = %ctx.device, value = MQTT_VALUE, "Telemetry published");

    let probe = SensorProbe::new(&ctx.client, &ctx.device, SENSOR);
    poll_until(
        &probe,
        &Convergence::Contains(MQTT_VALUE.to_string()),
        &ctx.settings.poll_policy(),
    )
    .await?;
    Ok(())
}
