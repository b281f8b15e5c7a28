//! Façade de haut niveau sur une caméra Sony.
//!
//! La construction se fait en deux phases :
//! 1. [`Camera::connect`] : découverte SSDP, lecture de la description,
//!    récupération de la liste des API disponibles ;
//! 2. [`Camera::init_rec_mode`] : passage en mode enregistrement si la caméra
//!    le propose.
//!
//! [`Camera::open`] enchaîne les deux, comme le ferait un client pressé.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use ureq::{Agent, Timeout};

use crate::config::CameraConfig;
use crate::description::{DeviceDescriptor, fetch_descriptor};
use crate::errors::{CameraError, Result};
use crate::jsonrpc::JsonRpcClient;
use crate::ssdp::SsdpDiscovery;

pub const CAMERA_SERVICE: &str = "camera";
const GET_AVAILABLE_API_LIST: &str = "getAvailableApiList";
const START_REC_MODE: &str = "startRecMode";

/// Summary of a connected camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    pub name: String,
    pub api_version: String,
    pub supported_services: Vec<String>,
    pub available_apis: Vec<String>,
}

/// A camera reachable through its `camera` service endpoint.
pub struct Camera {
    descriptor: DeviceDescriptor,
    endpoint: String,
    available_apis: Vec<String>,
    client: JsonRpcClient,
    probe_timeout: Duration,
}

impl Camera {
    /// Discovers and opens the first camera answering on `network_interface`,
    /// with the default settings.
    pub fn new(network_interface: Option<&str>) -> Result<Self> {
        let config = CameraConfig {
            network_interface: network_interface.map(str::to_string),
            ..CameraConfig::default()
        };
        Self::open(&config)
    }

    /// Connects, then switches to rec mode unless `auto_rec_mode` is off.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let camera = Self::connect(config)?;
        if config.auto_rec_mode {
            camera.init_rec_mode()?;
        }
        Ok(camera)
    }

    /// First phase: discovery, description and API list.
    pub fn connect(config: &CameraConfig) -> Result<Self> {
        let location =
            SsdpDiscovery::from_config(&config.discovery, config.network_interface.as_deref())
                .discover()?;
        Self::connect_to(&location, config)
    }

    /// Same as [`Camera::connect`] for an already known description URL.
    pub fn connect_to(location: &str, config: &CameraConfig) -> Result<Self> {
        let descriptor = fetch_descriptor(location)?;
        Self::from_descriptor(descriptor, config)
    }

    pub fn from_descriptor(descriptor: DeviceDescriptor, config: &CameraConfig) -> Result<Self> {
        let endpoint = control_endpoint(&descriptor)?;
        let client = JsonRpcClient::new(config.command_timeout());

        let apis = client.call(&endpoint, GET_AVAILABLE_API_LIST, Value::Array(vec![]))?;
        let available_apis = api_names(&apis)?;

        info!(
            "📷 Connected to {} (API {}), {} methods available",
            descriptor.name,
            descriptor.api_version,
            available_apis.len()
        );
        debug!("Available methods: {:?}", available_apis);

        Ok(Self {
            descriptor,
            endpoint,
            available_apis,
            client,
            probe_timeout: config.probe_timeout(),
        })
    }

    /// Second phase: issues `startRecMode` when the camera offers it.
    ///
    /// Returns whether the call was made.
    pub fn init_rec_mode(&self) -> Result<bool> {
        if !self.has_api(START_REC_MODE) {
            debug!("{} does not offer {}", self.descriptor.name, START_REC_MODE);
            return Ok(false);
        }
        self.call(START_REC_MODE)?;
        info!("🎬 {} switched to rec mode", self.descriptor.name);
        Ok(true)
    }

    /// Whether the control endpoint answers at all.
    ///
    /// Any HTTP answer counts, whatever its status, and so does an endpoint
    /// that accepts the connection but is too busy to answer in time.
    /// Failures other than an unreachable endpoint are logged and reported
    /// as `false`.
    pub fn connected(&self) -> bool {
        match self.probe() {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Connectivity probe on {} failed: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Probes the control endpoint with a short timeout on each phase.
    ///
    /// `Ok(false)` means the endpoint could not be reached: connection
    /// refused, host or network unreachable, or no connection within the
    /// probe timeout. A timeout once the connection is open means the camera
    /// is there but slow, which is `Ok(true)`. Other failures are returned
    /// as errors.
    pub fn probe(&self) -> Result<bool> {
        let timeout = Some(self.probe_timeout);
        let agent: Agent = Agent::config_builder()
            .timeout_resolve(timeout)
            .timeout_connect(timeout)
            .timeout_send_request(timeout)
            .timeout_recv_response(timeout)
            .http_status_as_error(false)
            .build()
            .into();

        match agent.get(&self.endpoint).call() {
            Ok(response) => {
                debug!("Probe on {}: HTTP {}", self.endpoint, response.status());
                Ok(true)
            }
            Err(ureq::Error::Timeout(phase)) if is_connected_phase(phase) => {
                debug!("Probe on {}: connected, no answer yet ({})", self.endpoint, phase);
                Ok(true)
            }
            Err(e) if is_unreachable(&e) => {
                debug!("Probe on {}: unreachable ({})", self.endpoint, e);
                Ok(false)
            }
            Err(e) => Err(CameraError::Http(e)),
        }
    }

    pub fn info(&self) -> CameraInfo {
        CameraInfo {
            name: self.descriptor.name.clone(),
            api_version: self.descriptor.api_version.clone(),
            supported_services: self.descriptor.service_types(),
            available_apis: self.available_apis.clone(),
        }
    }

    /// Calls `method` without parameters.
    pub fn call(&self, method: &str) -> Result<Value> {
        self.call_with(method, Value::Array(vec![]))
    }

    /// Calls `method` with `params`; a non-array value is sent as the only
    /// parameter.
    pub fn call_with(&self, method: &str, params: impl Into<Value>) -> Result<Value> {
        self.client.call(&self.endpoint, method, params.into())
    }

    pub fn has_api(&self, method: &str) -> bool {
        self.available_apis.iter().any(|m| m == method)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn api_version(&self) -> &str {
        &self.descriptor.api_version
    }

    pub fn services(&self) -> &BTreeMap<String, String> {
        &self.descriptor.services
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn available_apis(&self) -> &[String] {
        &self.available_apis
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

/// `services["camera"] + "/camera"`
fn control_endpoint(descriptor: &DeviceDescriptor) -> Result<String> {
    descriptor
        .service_url(CAMERA_SERVICE)
        .map(|url| format!("{}/camera", url))
        .ok_or_else(|| CameraError::MissingService(CAMERA_SERVICE.to_string()))
}

/// Method names out of a normalized `getAvailableApiList` result.
fn api_names(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    CameraError::MalformedResponse(format!(
                        "{} returned a non-string entry: {}",
                        GET_AVAILABLE_API_LIST, item
                    ))
                })
            })
            .collect(),
        Value::String(method) => Ok(vec![method.clone()]),
        Value::Bool(true) => Ok(vec![]),
        other => Err(CameraError::MalformedResponse(format!(
            "unexpected {} result: {}",
            GET_AVAILABLE_API_LIST, other
        ))),
    }
}

/// Errors meaning nothing accepted the connection.
fn is_unreachable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => true,
        ureq::Error::Timeout(phase) => matches!(phase, Timeout::Resolve | Timeout::Connect),
        ureq::Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::HostUnreachable
                | io::ErrorKind::NetworkUnreachable
        ),
        _ => false,
    }
}

/// Timeout phases reached only once the connection is open.
fn is_connected_phase(phase: Timeout) -> bool {
    matches!(
        phase,
        Timeout::SendRequest | Timeout::SendBody | Timeout::RecvResponse | Timeout::RecvBody
    )
}
