//! Convergence Poller
//!
//! Repeatedly reads a sensor's current value until a submitted measurement
//! becomes visible or the attempt budget runs out. Both ingress paths use
//! the same bounded policy.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DeviceClient, Snapshot};
use crate::model::DeviceName;

/// Attempt ceiling and delay between attempts. Always allows at least one
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl PollPolicy {
    /// A policy with at least one attempt
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(5))
    }
}

/// Success predicate evaluated against each fetched body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Any reading is present
    NotEmpty,
    /// The body contains the given text
    Contains(String),
}

impl Convergence {
    pub fn is_satisfied(&self, body: &str) -> bool {
        match self {
            Convergence::NotEmpty => !is_empty_body(body),
            Convergence::Contains(expected) => body.contains(expected.as_str()),
        }
    }
}

impl fmt::Display for Convergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convergence::NotEmpty => write!(f, "a non-empty reading"),
            Convergence::Contains(expected) => write!(f, "a reading containing '{}'", expected),
        }
    }
}

/// "No data yet": blank, or JSON that is an empty array or `null`.
///
/// Whitespace inside the JSON is irrelevant, so `[ ]` and `[\n]` count as
/// empty. Anything else, including bodies that are not JSON, is data.
pub fn is_empty_body(body: &str) -> bool {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return true;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Null) => true,
        Ok(serde_json::Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

/// Poll failure
#[derive(Debug)]
pub enum PollError {
    /// The predicate never held within the attempt budget
    Exhausted { attempts: u32, last_body: String },
    /// The read endpoint answered with something other than 200
    UnexpectedStatus { status: u16, body: String },
    /// Transport or request error while fetching
    Api(ApiError),
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Exhausted {
                attempts,
                last_body,
            } => write!(
                f,
                "Value did not converge after {} attempts (last body: {})",
                attempts, last_body
            ),
            PollError::UnexpectedStatus { status, body } => {
                write!(f, "Unexpected status {} while polling: {}", status, body)
            }
            PollError::Api(e) => write!(f, "Poll request failed: {}", e),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Api(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ApiError> for PollError {
    fn from(e: ApiError) -> Self {
        PollError::Api(e)
    }
}

/// Source of snapshots for the poller
#[async_trait]
pub trait Probe: Send + Sync {
    /// Fetch one fresh snapshot. Errors are not retried.
    async fn fetch(&self) -> Result<Snapshot, ApiError>;

    /// Short description used in log lines
    fn describe(&self) -> String {
        "probe".to_string()
    }
}

/// Reads `GET /api/devices/{device}/sensors/{sensor}/current`
pub struct SensorProbe<'a> {
    pub client: &'a DeviceClient,
    pub device: &'a DeviceName,
    pub sensor: &'a str,
}

impl<'a> SensorProbe<'a> {
    pub fn new(client: &'a DeviceClient, device: &'a DeviceName, sensor: &'a str) -> Self {
        Self {
            client,
            device,
            sensor,
        }
    }
}

#[async_trait]
impl Probe for SensorProbe<'_> {
    async fn fetch(&self) -> Result<Snapshot, ApiError> {
        self.client.current(self.device, self.sensor).await
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.device, self.sensor)
    }
}

/// Poll `probe` until `until` holds, making exactly `policy.max_attempts`
/// fetches at most.
pub async fn poll_until<P>(
    probe: &P,
    until: &Convergence,
    policy: &PollPolicy,
) -> Result<String, PollError>
where
    P: Probe + ?Sized,
{
    let target = probe.describe();
    let mut last_body = String::new();

    for attempt in 1..=policy.max_attempts {
        let snapshot = probe.fetch().await?;

        if snapshot.status != 200 {
            warn!(
                target_probe = %target,
                attempt,
                status = snapshot.status,
                "Unexpected status while polling"
            );
            return Err(PollError::UnexpectedStatus {
                status: snapshot.status,
                body: snapshot.body,
            });
        }

        if until.is_satisfied(&snapshot.body) {
            info!(target_probe = %target, attempt, "Converged on {}", until);
            return Ok(snapshot.body);
        }

        debug!(
            target_probe = %target,
            attempt,
            max_attempts = policy.max_attempts,
            "Not converged yet"
        );
        last_body = snapshot.body;

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    warn!(
        target_probe = %target,
        attempts = policy.max_attempts,
        "Gave up waiting for {}",
        until
    );
    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
        last_body,
    })
}
