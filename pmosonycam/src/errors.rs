//! Gestion des erreurs pour le client ScalarWebAPI

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Type Result personnalisé pour pmosonycam
pub type Result<T> = std::result::Result<T, CameraError>;

/// Erreurs possibles lors de la découverte ou du pilotage d'une caméra
#[derive(Error, Debug)]
pub enum CameraError {
    /// Aucune caméra n'a répondu, ou la caméra est injoignable
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Un noeud attendu manque dans la description UPnP
    #[error("Invalid device description: {0}")]
    DescriptorParse(String),

    /// Le device n'annonce pas le service requis
    #[error("Device does not expose the '{0}' service")]
    MissingService(String),

    /// Erreur renvoyée par la caméra dans l'enveloppe JSON-RPC
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Réponse JSON-RPC inexploitable
    #[error("Malformed JSON-RPC response: {0}")]
    MalformedResponse(String),

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    /// Erreur d'entrée/sortie (socket SSDP)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de parsing XML
    #[error("XML parsing error: {0}")]
    Xml(#[from] xmltree::ParseError),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CameraError {
    pub fn descriptor_parse(path: &str) -> Self {
        CameraError::DescriptorParse(format!("missing {}", path))
    }

    /// Kind of the camera-side error, if this is one.
    pub fn rpc_kind(&self) -> Option<RpcErrorKind> {
        match self {
            CameraError::Rpc(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// Catégories d'erreurs ScalarWebAPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    NotAvailable,
    IllegalArgument,
    InvalidAction,
    Forbidden,
    OperationFailed,
    LongShooting,
    Generic,
}

impl RpcErrorKind {
    /// Maps a ScalarWebAPI error code to its kind.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::NotAvailable,
            3 => Self::IllegalArgument,
            12 => Self::InvalidAction,
            403 => Self::Forbidden,
            500 => Self::OperationFailed,
            40403 => Self::LongShooting,
            _ => Self::Generic,
        }
    }
}

/// Error returned by the camera for a single call.
///
/// `params` holds the normalized parameters of the call that failed; they are
/// rendered in the message of [`RpcErrorKind::IllegalArgument`] errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub code: i64,
    pub message: String,
    pub params: Vec<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            kind: RpcErrorKind::from_code(code),
            code,
            message: message.into(),
            params,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RpcErrorKind::IllegalArgument => {
                let params = serde_json::to_string(&self.params).unwrap_or_default();
                write!(f, "{}: {}", self.message, params)
            }
            RpcErrorKind::InvalidAction => write!(f, "Invalid action: {}", self.message),
            RpcErrorKind::Generic => write!(f, "Error {}: {}", self.code, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RpcError {}
