/*!
SSDP discovery of ScalarWebAPI cameras.

The client is a one-shot *control point*: it sends a single M-SEARCH to the
multicast group and waits for the first unicast HTTP/200 reply that carries a
`LOCATION` header. It never binds to UDP port 1900; an ephemeral port is enough
to receive search responses.

The socket may be scoped to a network interface (typically the one joined to
the camera's Wi-Fi access point). Scoping is best-effort:

* on Linux-like systems the socket is bound to the device (`SO_BINDTODEVICE`);
* otherwise, or if the kernel refuses, the interface hint is resolved to an
  IPv4 address which becomes the bind and multicast-out address;
* if neither works the search goes out unscoped.
*/

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::errors::{CameraError, Result};

const MAX_DATAGRAM: usize = 65507;

/// One-shot SSDP search for a single device type.
#[derive(Debug, Clone)]
pub struct SsdpDiscovery {
    target: String,
    search_target: String,
    mx: u32,
    timeout: Duration,
    network_interface: Option<String>,
}

impl Default for SsdpDiscovery {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default(), None)
    }
}

impl SsdpDiscovery {
    pub fn from_config(config: &DiscoveryConfig, network_interface: Option<&str>) -> Self {
        Self {
            target: config.multicast_address.clone(),
            search_target: config.search_target.clone(),
            mx: config.mx,
            timeout: config.timeout(),
            network_interface: network_interface.map(str::to_string),
        }
    }

    /// Address the M-SEARCH is sent to (`host:port`).
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interface(mut self, network_interface: Option<&str>) -> Self {
        self.network_interface = network_interface.map(str::to_string);
        self
    }

    fn msearch_payload(&self) -> String {
        // MX doit être >= 1
        let mx = self.mx.max(1);
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             \r\n",
            self.target, mx, self.search_target
        )
    }

    /// Sends the M-SEARCH and returns the device description URL of the first
    /// responder.
    ///
    /// # Errors
    ///
    /// [`CameraError::Connectivity`] if nothing answers before the timeout,
    /// usually because the host is not on the camera's Wi-Fi.
    pub fn discover(&self) -> Result<String> {
        let target = resolve_target(&self.target)?;
        let socket = self.open_socket()?;

        let msg = self.msearch_payload();
        socket.send_to(msg.as_bytes(), target)?;
        info!("📤 M-SEARCH sent to {} (ST={})", target, self.search_target);
        debug!("M-SEARCH payload:\n{}", msg);

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout_error());
            }
            socket.set_read_timeout(Some(remaining))?;

            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    if let Some(location) = parse_location(&data) {
                        info!("📥 Camera answered from {}: {}", from, location);
                        return Ok(location);
                    }
                    trace!("SSDP datagram from {} without LOCATION:\n{}", from, data);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(self.timeout_error());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn timeout_error(&self) -> CameraError {
        CameraError::Connectivity(format!(
            "no SSDP answer for {} within {:?}, is this host connected to the camera's Wi-Fi?",
            self.search_target, self.timeout
        ))
    }

    fn open_socket(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        let mut bind_ip = Ipv4Addr::UNSPECIFIED;
        if let Some(iface) = self.network_interface.as_deref() {
            if !bind_to_device(&socket, iface) {
                match interface_ipv4(iface) {
                    Some(ip) => {
                        if let Err(e) = socket.set_multicast_if_v4(&ip) {
                            warn!("SSDP: cannot use {} as multicast interface: {}", ip, e);
                        }
                        debug!("SSDP: scoping search to {} ({})", iface, ip);
                        bind_ip = ip;
                    }
                    None => {
                        warn!(
                            "SSDP: interface {} not found, searching on all interfaces",
                            iface
                        );
                    }
                }
            }
        }

        let bind_addr = SocketAddr::from((bind_ip, 0));
        socket.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket.into();
        socket.set_multicast_ttl_v4(4)?;
        Ok(socket)
    }
}

/// Discovers a camera with the default search parameters.
pub fn discover(network_interface: Option<&str>) -> Result<String> {
    SsdpDiscovery::default()
        .with_interface(network_interface)
        .discover()
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_to_device(socket: &Socket, iface: &str) -> bool {
    match socket.bind_device(Some(iface.as_bytes())) {
        Ok(()) => {
            debug!("SSDP: socket bound to device {}", iface);
            true
        }
        Err(e) => {
            warn!("SSDP: SO_BINDTODEVICE({}) failed: {}", iface, e);
            false
        }
    }
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_to_device(_socket: &Socket, iface: &str) -> bool {
    debug!("SSDP: device binding unsupported on this platform ({})", iface);
    false
}

/// Resolves an interface hint (IPv4 literal or interface name) to an address.
fn interface_ipv4(iface: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = iface.parse::<Ipv4Addr>() {
        return Some(ip);
    }

    let interfaces = match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("SSDP: cannot list network interfaces: {}", e);
            return None;
        }
    };

    interfaces
        .into_iter()
        .filter(|i| i.name == iface)
        .find_map(|i| match i.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
}

fn resolve_target(target: &str) -> Result<SocketAddr> {
    target
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| CameraError::Connectivity(format!("cannot resolve SSDP target {}", target)))
}

/// Extracts the device description URL from an SSDP response.
///
/// The first header line named `LOCATION` (any case) wins; its value is the
/// first whitespace-delimited token after the colon.
pub fn parse_location(data: &str) -> Option<String> {
    data.lines().find_map(|line| {
        let line = line.trim();
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("LOCATION") {
            return None;
        }
        value.split_whitespace().next().map(str::to_string)
    })
}
