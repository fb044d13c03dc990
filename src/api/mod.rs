//! Device Lifecycle Client
//!
//! Thin wrapper over the device-management REST API. Every request carries
//! the bearer token; the expected alternates (409 on duplicate create, 404 on
//! delete of a missing device) are returned as outcomes, any other status is
//! an error. Nothing is retried here.

use std::fmt;

use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use tracing::{debug, field, warn};

use crate::config::Settings;
use crate::model::{Device, DeviceName, ProvisioningResponse, TelemetryBatch};

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Connection, timeout or body read failure
    Transport(reqwest::Error),
    /// The configured host cannot be used as a base URL
    InvalidUrl(String),
    /// Status outside the expected set for the operation
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },
    /// Response body could not be decoded
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "Transport error: {}", e),
            ApiError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            ApiError::UnexpectedStatus {
                operation,
                status,
                body,
            } => write!(f, "{} returned unexpected status {}: {}", operation, status, body),
            ApiError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e)
    }
}

/// Result of `PUT /api/devices/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// 201 with the device's one-time provisioning material
    Created(ProvisioningResponse),
    /// 409, the device already exists
    Conflict,
}

/// Result of `DELETE /api/devices/{name}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// 204
    Deleted,
    /// 404, nothing to delete
    NotFound,
}

/// Raw read of a sensor's current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub status: u16,
    pub body: String,
}

/// Authenticated client for one scenario
#[derive(Clone)]
pub struct DeviceClient {
    http: Client,
    base: Url,
    token: String,
}

impl fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl DeviceClient {
    /// Build a client for the configured host and token
    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        let base_url = settings.base_url();
        let base = Url::parse(&base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{} cannot be a base", base_url)));
        }

        let http = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            base,
            token: settings.token.clone(),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded
    pub fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// `GET /api/devices`
    pub async fn list(&self) -> Result<Vec<Device>, ApiError> {
        let url = self.url(&["api", "devices"])?;
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = field::display(status), "list devices");

        if status != StatusCode::OK {
            return Err(unexpected("list devices", status, body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("device list: {}", e)))
    }

    /// `PUT /api/devices/{name}`
    pub async fn create(&self, name: &DeviceName) -> Result<CreateOutcome, ApiError> {
        let url = self.url(&["api", "devices", name.as_str()])?;
        let response = self.request(Method::PUT, url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(device = %name, status = field::display(status), "create device");

        match status {
            StatusCode::CREATED => {
                let provisioning = if body.trim().is_empty() {
                    ProvisioningResponse::default()
                } else {
                    serde_json::from_str(&body)
                        .map_err(|e| ApiError::Decode(format!("provisioning response: {}", e)))?
                };
                Ok(CreateOutcome::Created(provisioning))
            }
            StatusCode::CONFLICT => Ok(CreateOutcome::Conflict),
            _ => Err(unexpected("create device", status, body)),
        }
    }

    /// `DELETE /api/devices/{name}`
    pub async fn delete(&self, name: &DeviceName) -> Result<DeleteOutcome, ApiError> {
        let url = self.url(&["api", "devices", name.as_str()])?;
        let response = self.request(Method::DELETE, url).send().await?;
        let status = response.status();
        debug!(device = %name, status = field::display(status), "delete device");

        match status {
            StatusCode::NO_CONTENT => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            _ => {
                let body = response.text().await?;
                Err(unexpected("delete device", status, body))
            }
        }
    }

    /// `POST /api/devices/{name}/ingress`
    pub async fn ingest(&self, name: &DeviceName, batch: &TelemetryBatch) -> Result<(), ApiError> {
        let url = self.url(&["api", "devices", name.as_str(), "ingress"])?;
        let response = self
            .request(Method::POST, url)
            .json(batch)
            .send()
            .await?;
        let status = response.status();
        debug!(
            device = %name,
            measurements = batch.measurements.len(),
            status = field::display(status),
            "http ingress"
        );

        if status != StatusCode::NO_CONTENT {
            let body = response.text().await?;
            return Err(unexpected("ingest telemetry", status, body));
        }
        Ok(())
    }

    /// `GET /api/devices/{name}/sensors/{sensor}/current`
    ///
    /// The status is returned as-is; interpreting it is up to the caller.
    pub async fn current(&self, name: &DeviceName, sensor: &str) -> Result<Snapshot, ApiError> {
        let url = self.url(&["api", "devices", name.as_str(), "sensors", sensor, "current"])?;
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(Snapshot { status, body })
    }
}

fn unexpected(operation: &'static str, status: StatusCode, body: String) -> ApiError {
    warn!(
        operation,
        response = field::display(status),
        "received unexpected response"
    );
    ApiError::UnexpectedStatus {
        operation,
        status: status.as_u16(),
        body,
    }
}
