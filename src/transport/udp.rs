//! UDP transport
//!
//! One socket is used for the command port and the upgrade port. A receiver
//! task forwards every datagram from the device into the inbound channel,
//! dropping frames the channel has no room for; its receive wait is bounded
//! so it notices cancellation promptly.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use super::{EndpointKind, InboundFrame, RawChannel, Transport, TransportError};
use crate::midi::format_hex;
use crate::protocol::udp::{encode_request, COMMAND_PORT, UPGRADE_PORT};
use crate::protocol::Request;

/// Longest a single receive waits before re-checking for shutdown
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

const RECEIVE_BUFFER: usize = 2048;

pub struct UdpTransport {
    command_addr: SocketAddrV4,
    upgrade_addr: SocketAddrV4,
    socket: Arc<UdpSocket>,
    cancel: watch::Sender<bool>,
    receiver: Option<JoinHandle<()>>,
}

impl UdpTransport {
    /// Open a transport to a device on the standard ports
    pub async fn open(
        device: Ipv4Addr,
        inbound: mpsc::Sender<InboundFrame>,
    ) -> Result<Self, TransportError> {
        Self::open_with_ports(
            SocketAddrV4::new(device, COMMAND_PORT),
            SocketAddrV4::new(device, UPGRADE_PORT),
            inbound,
        )
        .await
    }

    pub async fn open_with_ports(
        command_addr: SocketAddrV4,
        upgrade_addr: SocketAddrV4,
        inbound: mpsc::Sender<InboundFrame>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| TransportError::Open {
                endpoint: command_addr.ip().to_string(),
                reason: e.to_string(),
            })?;
        let socket = Arc::new(socket);

        let (cancel, cancel_rx) = watch::channel(false);
        let receiver = tokio::spawn(receive_loop(
            socket.clone(),
            *command_addr.ip(),
            inbound,
            cancel_rx,
        ));

        info!(
            "UDP transport open - device {} (local {})",
            command_addr.ip(),
            socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".to_string())
        );

        Ok(Self {
            command_addr,
            upgrade_addr,
            socket,
            cancel,
            receiver: Some(receiver),
        })
    }

    async fn send_to(&self, addr: SocketAddrV4, data: &[u8]) -> Result<(), TransportError> {
        trace!("UDP out {}: {}", addr, format_hex(data));
        self.socket.send_to(data, addr).await?;
        Ok(())
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    device: Ipv4Addr,
    inbound: mpsc::Sender<InboundFrame>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECEIVE_BUFFER];
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            result = timeout(RECEIVE_TIMEOUT, socket.recv_from(&mut buf)) => match result {
                Err(_) => continue,
                Ok(Ok((n, from))) => {
                    if !from_device(from, device) {
                        debug!("Ignoring datagram from {}", from);
                        continue;
                    }
                    trace!("UDP in {}: {}", from, format_hex(&buf[..n]));
                    // A stalled engine must not keep the receiver from seeing cancellation
                    match inbound.try_send(InboundFrame::new(buf[..n].to_vec())) {
                        Ok(()) => {}
                        Err(TrySendError::Full(frame)) => {
                            debug!("Inbound channel full, dropped: {}", format_hex(&frame.bytes));
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Ok(Err(e)) => {
                    // ICMP unreachable surfaces here on some platforms
                    debug!("UDP receive error: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
    debug!("UDP receiver stopped");
}

fn from_device(from: SocketAddr, device: Ipv4Addr) -> bool {
    match from {
        SocketAddr::V4(v4) => *v4.ip() == device,
        SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped() == Some(device),
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Udp
    }

    fn describe(&self) -> String {
        self.command_addr.ip().to_string()
    }

    async fn send(&mut self, request: &Request) -> Result<(), TransportError> {
        let bytes = encode_request(request)?;
        self.send_to(self.command_addr, &bytes).await
    }

    async fn send_raw(&mut self, channel: RawChannel, data: &[u8]) -> Result<(), TransportError> {
        let addr = match channel {
            RawChannel::Primary => self.command_addr,
            RawChannel::Upgrade => self.upgrade_addr,
        };
        self.send_to(addr, data).await
    }

    async fn close(&mut self) {
        let _ = self.cancel.send(true);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.await;
        }
        info!("UDP transport closed");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}
