//! Scenario Orchestrator
//!
//! Each scenario gets a fresh device name, runs its body and then always
//! deletes the device, whether the body passed, failed or panicked.
//! Scenarios share nothing but the immutable settings, so they can run
//! concurrently.

mod catalogue;

pub use catalogue::ScenarioKind;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::api::{ApiError, DeleteOutcome, DeviceClient};
use crate::config::Settings;
use crate::ingress::IngressError;
use crate::model::DeviceName;
use crate::mqtt::MqttError;
use crate::poll::PollError;
use crate::tls::TlsError;

/// Scenario failure
#[derive(Debug)]
pub enum ScenarioError {
    Api(ApiError),
    Mqtt(MqttError),
    Tls(TlsError),
    Poll(PollError),
    /// An observed outcome differed from the expected one
    Assertion(String),
    /// The body panicked
    Panicked(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Api(e) => write!(f, "{}", e),
            ScenarioError::Mqtt(e) => write!(f, "MQTT: {}", e),
            ScenarioError::Tls(e) => write!(f, "{}", e),
            ScenarioError::Poll(e) => write!(f, "{}", e),
            ScenarioError::Assertion(msg) => write!(f, "Assertion failed: {}", msg),
            ScenarioError::Panicked(msg) => write!(f, "Panicked: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::Api(e) => Some(e),
            ScenarioError::Mqtt(e) => Some(e),
            ScenarioError::Tls(e) => Some(e),
            ScenarioError::Poll(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ApiError> for ScenarioError {
    fn from(e: ApiError) -> Self {
        ScenarioError::Api(e)
    }
}

impl From<MqttError> for ScenarioError {
    fn from(e: MqttError) -> Self {
        ScenarioError::Mqtt(e)
    }
}

impl From<TlsError> for ScenarioError {
    fn from(e: TlsError) -> Self {
        ScenarioError::Tls(e)
    }
}

impl From<PollError> for ScenarioError {
    fn from(e: PollError) -> Self {
        ScenarioError::Poll(e)
    }
}

impl From<IngressError> for ScenarioError {
    fn from(e: IngressError) -> Self {
        match e {
            IngressError::Api(e) => ScenarioError::Api(e),
            IngressError::Mqtt(e) => ScenarioError::Mqtt(e),
            IngressError::Encode(e) => ScenarioError::Assertion(format!("batch not encodable: {}", e)),
        }
    }
}

/// Fail with `message` unless `condition` holds
pub fn ensure(condition: bool, message: impl Into<String>) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Assertion(message.into()))
    }
}

/// Everything a scenario body may use. Owned by one scenario run.
pub struct ScenarioContext {
    pub settings: Arc<Settings>,
    pub client: DeviceClient,
    pub device: DeviceName,
}

/// A self-contained check against the service
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the body may create the context's device. Teardown is
    /// skipped for scenarios that never talk to the service.
    fn touches_service(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The device existed and was deleted
    Deleted,
    /// Nothing to delete
    AlreadyAbsent,
    /// The scenario never touched the service
    Skipped,
    Failed(String),
}

/// Result of one scenario run
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub device: DeviceName,
    pub outcome: Outcome,
    pub teardown: TeardownOutcome,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.outcome {
            Outcome::Passed => "PASS".to_string(),
            Outcome::Failed(reason) => format!("FAIL {}", reason),
        };
        let teardown = match &self.teardown {
            TeardownOutcome::Deleted => "deleted".to_string(),
            TeardownOutcome::AlreadyAbsent => "absent".to_string(),
            TeardownOutcome::Skipped => "skipped".to_string(),
            TeardownOutcome::Failed(reason) => format!("failed: {}", reason),
        };
        write!(
            f,
            "{:<18} {} ({:.2?}, device {}, teardown {})",
            self.name, status, self.elapsed, self.device, teardown
        )
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn teardown(client: &DeviceClient, device: &DeviceName) -> TeardownOutcome {
    match client.delete(device).await {
        Ok(DeleteOutcome::Deleted) => TeardownOutcome::Deleted,
        Ok(DeleteOutcome::NotFound) => TeardownOutcome::AlreadyAbsent,
        Err(e) => {
            error!(device = %device, "Teardown failed: {}", e);
            TeardownOutcome::Failed(e.to_string())
        }
    }
}

/// Run one scenario with a freshly generated device and guaranteed cleanup
pub async fn run_scenario<S>(scenario: &S, settings: Arc<Settings>) -> ScenarioReport
where
    S: Scenario + ?Sized,
{
    let started = Instant::now();
    let name = scenario.name().to_string();
    let device = DeviceName::generate(&format!("{}-{}", settings.device_prefix, name));

    let client = match DeviceClient::from_settings(&settings) {
        Ok(client) => client,
        Err(e) => {
            error!(scenario = %name, "Cannot build API client: {}", e);
            return ScenarioReport {
                name,
                device,
                outcome: Outcome::Failed(e.to_string()),
                teardown: TeardownOutcome::Skipped,
                elapsed: started.elapsed(),
            };
        }
    };

    info!(scenario = %name, device = %device, "Starting scenario");
    let ctx = ScenarioContext {
        settings,
        client,
        device,
    };

    let body = AssertUnwindSafe(scenario.run(&ctx)).catch_unwind().await;
    let mut outcome = match body {
        Ok(Ok(())) => Outcome::Passed,
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(payload) => Outcome::Failed(ScenarioError::Panicked(panic_message(payload)).to_string()),
    };

    let teardown = if scenario.touches_service() {
        teardown(&ctx.client, &ctx.device).await
    } else {
        TeardownOutcome::Skipped
    };

    if let (Outcome::Passed, TeardownOutcome::Failed(reason)) = (&outcome, &teardown) {
        outcome = Outcome::Failed(format!("teardown failed: {}", reason));
    }

    let report = ScenarioReport {
        name,
        device: ctx.device,
        outcome,
        teardown,
        elapsed: started.elapsed(),
    };

    match &report.outcome {
        Outcome::Passed => info!(scenario = %report.name, elapsed = ?report.elapsed, "Scenario passed"),
        Outcome::Failed(reason) => {
            warn!(scenario = %report.name, elapsed = ?report.elapsed, "Scenario failed: {}", reason)
        }
    }

    report
}

/// Run `kinds` and return their reports in the same order
pub async fn run_all(
    kinds: &[ScenarioKind],
    settings: Arc<Settings>,
    parallel: bool,
) -> Vec<ScenarioReport> {
    if parallel {
        join_all(
            kinds
                .iter()
                .map(|kind| run_scenario(kind, Arc::clone(&settings))),
        )
        .await
    } else {
        let mut reports = Vec::with_capacity(kinds.len());
        for kind in kinds {
            reports.push(run_scenario(kind, Arc::clone(&settings)).await);
        }
        reports
    }
}
