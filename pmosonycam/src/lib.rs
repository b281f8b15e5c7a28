//! # pmosonycam - Remote control of Sony ScalarWebAPI cameras
//!
//! Cette crate pilote les caméras Sony (QX, Alpha, Action Cam…) à travers leur
//! API « ScalarWebAPI » :
//!
//! - découverte de la caméra par SSDP ([`ssdp`])
//! - lecture de la description UPnP et des services exposés ([`description`])
//! - appels JSON-RPC sur l'endpoint `camera` ([`jsonrpc`])
//! - façade [`Camera`] qui enchaîne le tout
//!
//! ## Usage
//!
//! ```no_run
//! use pmosonycam::Camera;
//!
//! let camera = Camera::new(Some("wlan0"))?;
//! println!("{:?}", camera.info());
//!
//! let picture = camera.call("actTakePicture")?;
//! println!("{}", picture);
//! # Ok::<(), pmosonycam::CameraError>(())
//! ```

pub mod camera;
pub mod config;
pub mod description;
pub mod errors;
pub mod jsonrpc;
pub mod ssdp;

pub use camera::{Camera, CameraInfo};
pub use config::{CameraConfig, DiscoveryConfig, LogConfig, Settings};
pub use description::{DeviceDescriptor, fetch_descriptor, parse_descriptor};
pub use errors::{CameraError, Result, RpcError, RpcErrorKind};
pub use jsonrpc::JsonRpcClient;
pub use ssdp::{SsdpDiscovery, discover};
