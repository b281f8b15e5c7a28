//! JSON-RPC dispatcher for the ScalarWebAPI.
//!
//! Sony cameras speak a JSON-RPC 1.0 dialect: every request is a
//! `{method, params, id, version}` object POSTed to a service endpoint, and
//! every answer is either `{"result": [...]}` or `{"error": [code, ..., message]}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use ureq::Agent;

use crate::errors::{CameraError, Result, RpcError};

pub const JSONRPC_VERSION: &str = "1.0";
pub const REQUEST_ID: u64 = 1;

/// Request envelope, built fresh for every call.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub method: &'a str,
    pub params: &'a [Value],
    pub id: u64,
    pub version: &'static str,
}

impl<'a> RpcRequest<'a> {
    pub fn new(method: &'a str, params: &'a [Value]) -> Self {
        Self {
            method,
            params,
            id: REQUEST_ID,
            version: JSONRPC_VERSION,
        }
    }
}

/// Response envelope as sent back by the camera.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<Vec<Value>>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// Turns call parameters into the positional list sent on the wire.
///
/// Arrays are kept as they are; any other value becomes a one-element list.
pub fn normalize_params(params: Value) -> Vec<Value> {
    match params {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Unwraps a response into its result value.
///
/// * an `error` member becomes an [`RpcError`] built from its first
///   (code) and last (message) entries;
/// * an empty (or absent) `result` means plain success: `true`;
/// * a single result is returned unwrapped;
/// * several results are returned as an array.
pub fn normalize_response(response: RpcResponse, params: &[Value]) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(rpc_error(&error, params));
    }

    let mut result = response.result.unwrap_or_default();
    match result.len() {
        0 => Ok(Value::Bool(true)),
        1 => Ok(result.remove(0)),
        _ => Ok(Value::Array(result)),
    }
}

fn rpc_error(error: &[Value], params: &[Value]) -> CameraError {
    let code = match error.first().and_then(Value::as_i64) {
        Some(code) => code,
        None => {
            return CameraError::MalformedResponse(format!(
                "error member without numeric code: {}",
                Value::Array(error.to_vec())
            ));
        }
    };

    let message = match error.last() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    RpcError::new(code, message, params.to_vec()).into()
}

/// Blocking JSON-RPC client over HTTP.
#[derive(Clone)]
pub struct JsonRpcClient {
    agent: Agent,
}

impl Default for JsonRpcClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl JsonRpcClient {
    /// `timeout` bounds a whole call; `None` waits as long as the camera needs.
    pub fn new(timeout: Option<Duration>) -> Self {
        // Le corps décide du succès : un statut 4xx/5xx ne doit pas masquer
        // l'erreur JSON-RPC qu'il transporte.
        let agent = Agent::config_builder()
            .timeout_global(timeout)
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }

    /// Calls `method` on `endpoint` and returns the normalized result.
    pub fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value> {
        let params = normalize_params(params);
        let response = self.post(endpoint, &RpcRequest::new(method, &params))?;
        normalize_response(response, &params)
    }

    fn post(&self, endpoint: &str, request: &RpcRequest<'_>) -> Result<RpcResponse> {
        let body = serde_json::to_string(request)?;
        debug!("➡️ {} {}", endpoint, body);

        let mut response = self
            .agent
            .post(endpoint)
            .header("Content-Type", "application/json")
            .send(body)?;

        let status = response.status();
        let raw = response.body_mut().read_to_string()?;
        debug!("⬅️ {} {}", status, raw);

        serde_json::from_str(&raw).map_err(|e| {
            CameraError::MalformedResponse(format!(
                "{} answered HTTP {} with a non JSON-RPC body ({}): {}",
                endpoint, status, e, raw
            ))
        })
    }
}
