//! In-process fake of the device-management service
//!
//! Serves the REST surface over plain HTTP/1.1 on an ephemeral port with an
//! in-memory inventory. Ingested readings become visible only after a
//! configurable number of `current` reads, to exercise convergence polling.
//! Optionally runs a mutual-TLS MQTT broker whose PUBLISH batches feed the
//! same readings.

#![allow(dead_code)]

pub mod broker;
pub mod pki;

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use telemetry_conformance::protocol::{Packet, ProtocolVersion, ReasonCode};
use telemetry_conformance::{Settings, TelemetryBatch};

use broker::FakeBroker;
use pki::Authority;

pub const TOKEN: &str = "test-token";

/// Name the broker certificate is issued for
pub const BROKER_HOST: &str = "localhost";

#[derive(Default)]
struct Reading {
    values: Vec<f64>,
    /// `current` reads left before the values show up
    hidden_reads: u32,
}

/// Certificate material handed out on device creation
#[derive(Default, Clone)]
struct Issued {
    pem: String,
    private_key: String,
    root_ca: String,
}

#[derive(Default)]
pub struct State {
    /// Device name to ARN
    devices: BTreeMap<String, String>,
    readings: HashMap<(String, String), Reading>,
    convergence_reads: u32,
    current_reads: u32,
    created_total: u32,
    issued: Issued,
    /// PUBLISH packets received by the broker
    published: u32,
}

impl State {
    /// Store a batch for a known device
    fn record(&mut self, device: &str, batch: TelemetryBatch) -> bool {
        if !self.devices.contains_key(device) {
            return false;
        }
        let delay = self.convergence_reads;
        for m in batch.measurements {
            let reading = self
                .readings
                .entry((device.to_string(), m.name))
                .or_default();
            reading.values.push(m.value);
            reading.hidden_reads = delay;
        }
        true
    }
}

/// Handle to a running fake service
pub struct FakeService {
    pub addr: SocketAddr,
    /// Port of the MQTT broker, when one runs
    pub mqtt_port: Option<u16>,
    state: Arc<Mutex<State>>,
}

impl FakeService {
    /// Start a service where readings appear after `convergence_reads` reads
    pub async fn start(convergence_reads: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State {
            convergence_reads,
            ..Default::default()
        }));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let io = TokioIo::new(stream);
                let state = Arc::clone(&shared);

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(req, state).await }
                    });
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });

        Self {
            addr,
            mqtt_port: None,
            state,
        }
    }

    /// Start a service with a broker on `BROKER_HOST`. Created devices get a
    /// client certificate from a fresh CA that also signs the broker.
    pub async fn start_with_broker(convergence_reads: u32) -> Self {
        let mut service = Self::start(convergence_reads).await;

        let ca = Authority::new("conformance test CA");
        let server = ca.issue_server(BROKER_HOST);
        let client = ca.issue_client("conformance-device");
        service.set_issued(Issued {
            pem: client.cert_pem,
            private_key: client.key_pem,
            root_ca: ca.cert_pem(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        service.mqtt_port = Some(listener.local_addr().unwrap().port());
        let acceptor = TlsAcceptor::from(ca.server_config(&server));
        tokio::spawn(serve_broker(listener, acceptor, Arc::clone(&service.state)));

        service
    }

    /// Settings pointing at this service with fast polling
    pub fn settings(&self) -> Settings {
        let mut settings = Settings {
            host: format!("http://{}", self.addr),
            token: TOKEN.to_string(),
            poll_max_attempts: 5,
            poll_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..Settings::default()
        };
        if let Some(port) = self.mqtt_port {
            settings.broker = BROKER_HOST.to_string();
            settings.mqtt_port = port;
        }
        settings
    }

    fn set_issued(&self, issued: Issued) {
        self.state.lock().unwrap().issued = issued;
    }

    /// Hand out `pem` as the root CA instead of the broker's own
    pub fn issue_root_ca(&self, pem: String) {
        self.state.lock().unwrap().issued.root_ca = pem;
    }

    pub fn published(&self) -> u32 {
        self.state.lock().unwrap().published
    }

    pub fn device_names(&self) -> Vec<String> {
        self.state.lock().unwrap().devices.keys().cloned().collect()
    }

    pub fn insert_device(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(name.to_string(), format!("arn:fake:device/{}", name));
    }

    pub fn current_reads(&self) -> u32 {
        self.state.lock().unwrap().current_reads
    }

    pub fn created_total(&self) -> u32 {
        self.state.lock().unwrap().created_total
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap()
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Mutex<State>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let authorized = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false);
    if !authorized {
        return Ok(respond(StatusCode::UNAUTHORIZED, "unauthorized"));
    }

    let method = req.method().clone();
    let segments: Vec<String> = req
        .uri()
        .path()
        .trim_start_matches('/')
        .split('/')
        .map(str::to_string)
        .collect();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(respond(StatusCode::BAD_REQUEST, "bad body")),
    };

    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    let mut state = state.lock().unwrap();

    let response = match (method, segments.as_slice()) {
        (Method::GET, ["api", "devices"]) => {
            let list: Vec<_> = state
                .devices
                .keys()
                .map(|name| json!({ "name": name }))
                .collect();
            respond(StatusCode::OK, serde_json::to_vec(&list).unwrap())
        }
        (Method::PUT, ["api", "devices", name]) => {
            if state.devices.contains_key(*name) {
                respond(StatusCode::CONFLICT, "exists")
            } else {
                let arn = format!("arn:fake:device/{}", name);
                state.devices.insert(name.to_string(), arn.clone());
                state.created_total += 1;
                let issued = state.issued.clone();
                let provisioning = json!({
                    "name": name,
                    "arn": arn,
                    "pem": issued.pem,
                    "public_key": "",
                    "private_key": issued.private_key,
                    "root_ca": issued.root_ca,
                });
                respond(StatusCode::CREATED, provisioning.to_string())
            }
        }
        (Method::DELETE, ["api", "devices", name]) => {
            if state.devices.remove(*name).is_some() {
                state.readings.retain(|(device, _), _| device != name);
                respond(StatusCode::NO_CONTENT, Bytes::new())
            } else {
                respond(StatusCode::NOT_FOUND, "not found")
            }
        }
        (Method::POST, ["api", "devices", name, "ingress"]) => {
            if !state.devices.contains_key(*name) {
                respond(StatusCode::NOT_FOUND, "not found")
            } else {
                match serde_json::from_slice::<TelemetryBatch>(&body) {
                    Ok(batch) => {
                        state.record(name, batch);
                        respond(StatusCode::NO_CONTENT, Bytes::new())
                    }
                    Err(_) => respond(StatusCode::BAD_REQUEST, "bad batch"),
                }
            }
        }
        (Method::GET, ["api", "devices", name, "sensors", sensor, "current"]) => {
            state.current_reads += 1;
            let key = (name.to_string(), sensor.to_string());
            let body = match state.readings.get_mut(&key) {
                Some(reading) if reading.hidden_reads > 0 => {
                    reading.hidden_reads -= 1;
                    "[]".to_string()
                }
                Some(reading) => {
                    let values: Vec<_> = reading
                        .values
                        .iter()
                        .map(|v| json!({ "name": sensor, "value": v }))
                        .collect();
                    serde_json::to_string(&values).unwrap()
                }
                None => "[]".to_string(),
            };
            respond(StatusCode::OK, body)
        }
        _ => respond(StatusCode::NOT_FOUND, "no route"),
    };

    Ok(response)
}

async fn serve_broker(listener: TcpListener, acceptor: TlsAcceptor, state: Arc<Mutex<State>>) {
    loop {
        let Ok((tcp, _)) = listener.accept().await else {
            return;
        };
        let acceptor = acceptor.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            // Clients that reject the broker certificate end here
            let Ok(stream) = acceptor.accept(tcp).await else {
                return;
            };
            serve_publisher(FakeBroker::new(stream, ProtocolVersion::V311), state).await;
        });
    }
}

/// Accept one publisher and record every batch it sends to `<device>/data`
async fn serve_publisher<S>(mut broker: FakeBroker<S>, state: Arc<Mutex<State>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !matches!(broker.recv().await, Some(Packet::Connect(_))) {
        return;
    }
    broker.send_connack(ReasonCode::Success).await;

    while let Some(packet) = broker.recv().await {
        match packet {
            Packet::Publish(publish) => {
                {
                    let mut state = state.lock().unwrap();
                    state.published += 1;
                    let device = publish.topic.strip_suffix("/data").unwrap_or(&publish.topic);
                    if let Ok(batch) = serde_json::from_slice::<TelemetryBatch>(&publish.payload) {
                        state.record(device, batch);
                    }
                }
                if let Some(id) = publish.packet_id {
                    broker.send_puback(id, ReasonCode::Success).await;
                }
            }
            Packet::Disconnect(_) => return,
            _ => {}
        }
    }
}
