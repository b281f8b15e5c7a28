//! # Configuration de pmosonycam
//!
//! La configuration est construite en trois couches :
//! - la configuration par défaut intégrée au binaire (`pmosonycam.yaml`)
//! - le fichier `config.yaml` du répertoire de configuration, s'il existe
//! - les variables d'environnement `PMOSONYCAM_CONFIG__SECTION__KEY=value`
//!
//! ## Usage
//!
//! ```no_run
//! use pmosonycam::Settings;
//!
//! let settings = Settings::load(None)?;
//! println!("SSDP timeout: {:?}", settings.camera.discovery.timeout());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosonycam.yaml");

const CONFIG_FILE: &str = "config.yaml";
const CONFIG_DIR_NAME: &str = ".pmosonycam";
const ENV_CONFIG_DIR: &str = "PMOSONYCAM_CONFIG";
const ENV_PREFIX: &str = "PMOSONYCAM_CONFIG__";

pub const DEFAULT_MULTICAST_ADDRESS: &str = "239.255.255.250:1900";
pub const DEFAULT_SEARCH_TARGET: &str = "urn:schemas-sony-com:service:ScalarWebAPI:1";
const DEFAULT_MX: u32 = 2;
const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 2000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 200;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Root of the configuration tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraConfig,
    pub log: LogConfig,
}

/// Camera connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Interface used to scope the SSDP socket (name such as `wlan0`, or an IPv4 address).
    pub network_interface: Option<String>,
    /// Issue `startRecMode` right after connecting when the camera offers it.
    pub auto_rec_mode: bool,
    pub probe_timeout_ms: u64,
    /// `None` means JSON-RPC calls wait as long as the camera needs.
    pub command_timeout_ms: Option<u64>,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub multicast_address: String,
    pub search_target: String,
    pub mx: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            network_interface: None,
            auto_rec_mode: true,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            command_timeout_ms: None,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_address: DEFAULT_MULTICAST_ADDRESS.to_string(),
            search_target: DEFAULT_SEARCH_TARGET.to_string(),
            mx: DEFAULT_MX,
            timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl CameraConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Loads the configuration.
    ///
    /// The directory holding `config.yaml` is searched in the following order:
    /// 1. The provided `directory`
    /// 2. The `PMOSONYCAM_CONFIG` environment variable
    /// 3. `.pmosonycam` in the current directory
    /// 4. `.pmosonycam` in the user's home directory
    ///
    /// A missing file is not an error: the embedded defaults are used. Any
    /// other read failure is.
    /// Environment overrides are applied last. Nothing is written to disk.
    pub fn load(directory: Option<&Path>) -> Result<Self> {
        let external = match Self::find_config_dir(directory) {
            Some(dir) => {
                let path = dir.join(CONFIG_FILE);
                match fs::read_to_string(&path) {
                    Ok(data) => {
                        info!(config_file=%path.display(), "Loaded config file");
                        Some(data)
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        info!(config_file=%path.display(), "Config file not found, using default embedded config");
                        None
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("Cannot read config file {}", path.display())
                        });
                    }
                }
            }
            None => {
                debug!("No config directory found, using default embedded config");
                None
            }
        };

        Self::build(external.as_deref(), env::vars())
    }

    /// Builds the configuration from a YAML document merged over the defaults,
    /// without looking at the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::build(Some(yaml), std::iter::empty())
    }

    fn find_config_dir(directory: Option<&Path>) -> Option<PathBuf> {
        if let Some(dir) = directory {
            return Some(dir.to_path_buf());
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return Some(PathBuf::from(env_path));
        }

        let local = Path::new(CONFIG_DIR_NAME);
        if local.is_dir() {
            return Some(local.to_path_buf());
        }

        home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME))
            .filter(|dir| dir.is_dir())
    }

    fn build<I>(external: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value = lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        if let Some(yaml) = external {
            let external: Value =
                serde_yaml::from_str(yaml).context("Invalid YAML in configuration file")?;
            // Un fichier vide se lit comme Null : on garde les valeurs par défaut
            if !external.is_null() {
                merge_yaml(&mut value, &lower_keys_value(external));
            }
        }

        apply_env_overrides(&mut value, vars);

        serde_yaml::from_value(value).context("Invalid pmosonycam configuration")
    }
}

fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            debug!(key = %key, "Applying environment override");
            if let Err(e) = set_value_internal(config, &key_path, convert_env_value(&value)) {
                warn!(key = %key, error = %e, "Ignoring environment override");
            }
        }
    }
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(k, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Mappings are merged key by key; scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
