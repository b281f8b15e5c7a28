//! pmosonycam - command line remote for Sony ScalarWebAPI cameras.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmosonycam::{Camera, CameraConfig, Settings, SsdpDiscovery, fetch_descriptor};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pmosonycam")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding config.yaml.
    #[arg(short, long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Network interface (name or IPv4 address) joined to the camera's Wi-Fi.
    #[arg(short, long)]
    interface: Option<String>,

    /// Device description URL; skips SSDP discovery.
    #[arg(short, long, value_name = "URL")]
    location: Option<String>,

    /// Do not switch the camera to rec mode after connecting.
    #[arg(long)]
    no_rec_mode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the device description URL found by SSDP.
    Discover,
    /// Print the parsed device description.
    Describe,
    /// Print name, API version, services and available methods.
    Info,
    /// Tell whether the camera endpoint answers.
    Status,
    /// List the available API methods.
    Apis,
    /// Call a method; each PARAM is parsed as JSON, or taken as a string.
    ///
    /// Numeric-looking values become JSON numbers: quote them (`'"400"'`)
    /// or use `--string` for setters expecting strings.
    Call {
        /// Send every PARAM as a JSON string, as typed
        #[arg(short, long)]
        string: bool,
        method: String,
        params: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config_dir.as_deref())?;
    init_logging(&settings.log.level);

    if args.interface.is_some() {
        settings.camera.network_interface = args.interface.clone();
    }
    if args.no_rec_mode {
        settings.camera.auto_rec_mode = false;
    }
    let config = settings.camera;

    match &args.command {
        Command::Discover => {
            let location = locate(&args, &config)?;
            println!("{}", location);
        }
        Command::Describe => {
            let location = locate(&args, &config)?;
            let descriptor = fetch_descriptor(&location)
                .with_context(|| format!("Cannot read device description at {}", location))?;
            print_json(&descriptor)?;
        }
        Command::Info => print_json(&open(&args, &config)?.info())?,
        Command::Status => {
            let camera = open(&args, &config)?;
            print_json(&serde_json::json!({ "connected": camera.connected() }))?;
        }
        Command::Apis => print_json(&open(&args, &config)?.available_apis())?,
        Command::Call {
            string,
            method,
            params,
        } => {
            let camera = open(&args, &config)?;
            let result = camera
                .call_with(method, parse_params(params, *string))
                .with_context(|| format!("{} failed", method))?;
            print_json(&result)?;
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn locate(args: &Args, config: &CameraConfig) -> Result<String> {
    match &args.location {
        Some(location) => Ok(location.clone()),
        None => Ok(SsdpDiscovery::from_config(
            &config.discovery,
            config.network_interface.as_deref(),
        )
        .discover()?),
    }
}

fn open(args: &Args, config: &CameraConfig) -> Result<Camera> {
    let camera = match &args.location {
        Some(location) => Camera::connect_to(location, config)?,
        None => Camera::connect(config)?,
    };
    if config.auto_rec_mode {
        camera.init_rec_mode()?;
    }
    Ok(camera)
}

/// One PARAM is sent as-is, several are sent as an array.
fn parse_params(raw: &[String], as_strings: bool) -> Value {
    let mut values: Vec<Value> = raw
        .iter()
        .map(|p| {
            if as_strings {
                Value::String(p.clone())
            } else {
                serde_json::from_str(p).unwrap_or_else(|_| Value::String(p.clone()))
            }
        })
        .collect();

    match values.len() {
        0 => Value::Array(vec![]),
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
