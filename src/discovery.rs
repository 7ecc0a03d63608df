//! Network device discovery
//!
//! Broadcasts `<query>id</query>` on every broadcast-capable IPv4 interface and
//! collects `<id>..</id>` replies as `"{address} {id}"` device names, which
//! select the UDP transport when chosen.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::protocol::udp::{encode_request, parse_identity, COMMAND_PORT};
use crate::protocol::Request;

/// How long replies are collected after each probe
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Inner {
    devices: Vec<String>,
    seen: HashSet<String>,
    reported: usize,
}

/// Deduplicated set of discovered device names, in discovery order
#[derive(Clone, Default)]
pub struct DiscoveredDevices {
    inner: Arc<Mutex<Inner>>,
}

impl DiscoveredDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device; false when it was already known
    pub fn insert(&self, name: String) -> bool {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(name.clone()) {
            return false;
        }
        inner.devices.push(name);
        true
    }

    pub fn list(&self) -> Vec<String> {
        self.inner.lock().devices.clone()
    }

    /// Devices found since the previous call
    pub fn take_new(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        let new = inner.devices[inner.reported..].to_vec();
        inner.reported = inner.devices.len();
        new
    }
}

/// Broadcast addresses of all non-loopback IPv4 interfaces
pub fn broadcast_addresses() -> io::Result<Vec<Ipv4Addr>> {
    let mut out = Vec::new();
    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if let if_addrs::IfAddr::V4(v4) = iface.addr {
            if let Some(broadcast) = v4.broadcast {
                debug!("Interface {} ({}) broadcast {}", iface.name, v4.ip, broadcast);
                if !out.contains(&broadcast) {
                    out.push(broadcast);
                }
            }
        }
    }
    Ok(out)
}

/// Send one identity probe to `target` and collect replies for `window`.
///
/// Returns how many new devices were recorded.
pub async fn probe(
    target: SocketAddrV4,
    devices: &DiscoveredDevices,
    window: Duration,
) -> io::Result<usize> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let query = encode_request(&Request::IdentityQuery)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    socket.send_to(&query, target).await?;

    let deadline = Instant::now() + window;
    let mut buf = [0u8; 1024];
    let mut found = 0;
    while let Ok(result) = timeout_at(deadline, socket.recv_from(&mut buf)).await {
        let (n, from) = match result {
            Ok(r) => r,
            Err(e) => {
                debug!("Discovery receive error on {}: {}", target, e);
                break;
            }
        };
        let Some(id) = parse_identity(&buf[..n]) else {
            continue;
        };
        let addr = match from {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => v6.ip().to_string(),
        };
        let name = format!("{} {}", addr, id);
        if devices.insert(name.clone()) {
            info!("Discovered device: {}", name);
            found += 1;
        }
    }
    Ok(found)
}

/// Probe every broadcast-capable interface in the background
pub fn spawn_discovery(devices: DiscoveredDevices) -> Vec<JoinHandle<()>> {
    let addresses = match broadcast_addresses() {
        Ok(a) => a,
        Err(e) => {
            warn!("Couldn't list network interfaces: {}", e);
            return Vec::new();
        }
    };

    addresses
        .into_iter()
        .map(|broadcast| {
            let devices = devices.clone();
            tokio::spawn(async move {
                let target = SocketAddrV4::new(broadcast, COMMAND_PORT);
                if let Err(e) = probe(target, &devices, DISCOVERY_WINDOW).await {
                    warn!("Discovery on {} failed: {}", broadcast, e);
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_and_take_new() {
        let devices = DiscoveredDevices::new();
        assert!(devices.insert("10.0.0.5 LP2".to_string()));
        assert!(!devices.insert("10.0.0.5 LP2".to_string()));
        assert!(devices.insert("10.0.0.6 LP2".to_string()));

        assert_eq!(devices.list(), vec!["10.0.0.5 LP2", "10.0.0.6 LP2"]);
        assert_eq!(devices.take_new().len(), 2);
        assert!(devices.take_new().is_empty());

        devices.insert("10.0.0.7 LP2".to_string());
        assert_eq!(devices.take_new(), vec!["10.0.0.7 LP2"]);
    }

    #[tokio::test]
    async fn test_probe_collects_replies() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_addr = match device.local_addr().unwrap() {
            SocketAddr::V4(a) => a,
            other => panic!("unexpected {}", other),
        };

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, from) = device.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"<query>id</query>\0");
            device.send_to(b"<id>LP2</id>\0", from).await.unwrap();
            // Duplicate reply is collapsed
            device.send_to(b"<id>LP2</id>\0", from).await.unwrap();
            device.send_to(b"noise", from).await.unwrap();
        });

        let devices = DiscoveredDevices::new();
        let found = probe(device_addr, &devices, Duration::from_millis(300))
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(found, 1);
        assert_eq!(devices.list(), vec!["127.0.0.1 LP2"]);
    }

    #[tokio::test]
    async fn test_unanswered_discovery_ends_at_window() {
        // Bound then dropped, so nothing listens there
        let target = {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            match socket.local_addr().unwrap() {
                SocketAddr::V4(a) => a,
                other => panic!("unexpected {}", other),
            }
        };

        let devices = DiscoveredDevices::new();
        let started = std::time::Instant::now();
        let found = probe(target, &devices, Duration::from_millis(200))
            .await
            .unwrap();

        assert_eq!(found, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(devices.list().is_empty());
    }
}
