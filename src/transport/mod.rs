//! Device transports
//!
//! A transport owns the channel to one device. Requests go out through
//! [`Transport::send`]; everything the device sends back is pushed as raw
//! [`InboundFrame`]s into the channel handed to [`open`], and decoded by the
//! engine.

mod midi;
mod udp;

pub use midi::MidiTransport;
pub use udp::{UdpTransport, RECEIVE_TIMEOUT};

use async_trait::async_trait;
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::endpoint::DeviceEndpoint;
use crate::protocol::{CodecError, Request};

/// Capacity of the inbound frame channel
pub const INBOUND_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Midi,
    Udp,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Midi => write!(f, "MIDI"),
            EndpointKind::Udp => write!(f, "UDP"),
        }
    }
}

/// Raw bytes received from the device
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub bytes: Vec<u8>,
    pub received_at: Instant,
}

impl InboundFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            received_at: Instant::now(),
        }
    }
}

/// Destination for unencoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawChannel {
    /// Normal request path (MIDI output, UDP command port)
    Primary,
    /// Upgrade block port (UDP only)
    Upgrade,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("couldn't open {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("{0} is not supported on this transport")]
    Unsupported(&'static str),

    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Channel to one device
///
/// Exclusively owned by the polling engine, so methods take `&mut self`.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> EndpointKind;

    /// Human readable endpoint identity for logs
    fn describe(&self) -> String;

    /// Encode and send one request
    async fn send(&mut self, request: &Request) -> Result<(), TransportError>;

    /// Send pre-encoded bytes
    async fn send_raw(&mut self, channel: RawChannel, data: &[u8]) -> Result<(), TransportError>;

    /// Release the channel; inbound delivery stops
    async fn close(&mut self);
}

/// Open a transport for `endpoint`, delivering inbound frames to `inbound`
pub async fn open(
    endpoint: &DeviceEndpoint,
    inbound: mpsc::Sender<InboundFrame>,
) -> Result<Box<dyn Transport>, TransportError> {
    match endpoint {
        DeviceEndpoint::Midi { input, output } => {
            let transport = MidiTransport::open(input, output, inbound).await?;
            Ok(Box::new(transport))
        }
        DeviceEndpoint::Udp { addr, .. } => {
            let transport = UdpTransport::open(*addr, inbound).await?;
            Ok(Box::new(transport))
        }
    }
}
