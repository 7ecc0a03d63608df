//! Firmware upgrade jobs
//!
//! MIDI devices take a `.syx` file replayed message by message; network
//! devices take a raw image in acknowledged 512-byte blocks. Either way the
//! polling engine drives the job one step per iteration.

pub mod block;
pub mod progress;
pub mod sysex_stream;

pub use block::{BlockStep, BlockTransfer, MAX_BLOCK_ATTEMPTS};
pub use progress::Progress;
pub use sysex_stream::SysexStream;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::midi::{parse_syx, SyxError};
use crate::transport::{EndpointKind, TransportError};

/// Delays and timeouts used while upgrading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeTiming {
    /// Pause after each replayed sysex message
    pub message_delay: Duration,
    pub handshake_timeout: Duration,
    pub ack_timeout: Duration,
}

impl Default for UpgradeTiming {
    fn default() -> Self {
        Self {
            message_delay: Duration::from_millis(70),
            handshake_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("couldn't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Syx(#[from] SyxError),

    #[error("no response to upgrade request")]
    NoResponse,

    #[error("bad response to upgrade request")]
    BadResponse,

    #[error("block {block} not acknowledged after {attempts} attempts")]
    TooManyAttempts { block: u16, attempts: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl UpgradeError {
    /// Line reported through the device log
    pub fn log_line(&self) -> String {
        match self {
            UpgradeError::Read { .. } => "Error reading upgrade file\n".to_string(),
            UpgradeError::Syx(_) => "Error reading MIDI Sysex file\n".to_string(),
            UpgradeError::NoResponse => "Upgrade response timeout\n".to_string(),
            UpgradeError::BadResponse => "Bad response to upgrade\n".to_string(),
            UpgradeError::TooManyAttempts { .. } => "Upgrade too many tries\n".to_string(),
            UpgradeError::Transport(e) => format!("Upgrade failed: {}\n", e),
        }
    }

    pub fn result(&self) -> UpgradeResult {
        match self {
            UpgradeError::NoResponse | UpgradeError::TooManyAttempts { .. } => {
                UpgradeResult::Timeout
            }
            _ => UpgradeResult::Failure,
        }
    }
}

/// How an upgrade ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeResult {
    Success,
    Failure,
    Timeout,
}

/// Operations an upgrade needs from the engine
#[async_trait]
pub trait UpgradeLink: Send {
    /// Send a sysex message on the normal request path
    async fn send_message(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait, still handling inbound traffic
    async fn pause(&mut self, duration: Duration);

    /// Send to the command port
    async fn send_control(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Next command-port frame that reads as an upgrade reply, ignoring
    /// polling traffic
    async fn wait_control_reply(&mut self, timeout: Duration) -> Option<Vec<u8>>;

    /// Send to the upgrade port
    async fn send_block(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next block ack
    async fn wait_ack(&mut self, timeout: Duration) -> Option<u16>;

    /// Append to the device log
    fn log(&mut self, text: &str);

    /// True once the engine was stopped or lost its transport mid-step, so
    /// waits that came back empty say nothing about the device
    fn interrupted(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
enum Mode {
    SysexStream(SysexStream),
    BlockAck {
        transfer: BlockTransfer,
        handshaken: bool,
    },
}

/// Where a job stands after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished(UpgradeResult),
}

#[derive(Debug, Clone)]
pub struct UpgradeJob {
    source: PathBuf,
    mode: Mode,
}

impl UpgradeJob {
    /// Read an upgrade file for the given transport kind
    pub async fn load(path: &Path, kind: EndpointKind) -> Result<Self, UpgradeError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| UpgradeError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let job = match kind {
            EndpointKind::Midi => Self::sysex_stream(path, parse_syx(&content)?),
            EndpointKind::Udp => Self::block_ack(path, content),
        };
        info!("Upgrade loaded from {}", path.display());
        Ok(job)
    }

    pub fn sysex_stream(source: &Path, messages: Vec<Vec<u8>>) -> Self {
        Self {
            source: source.to_path_buf(),
            mode: Mode::SysexStream(SysexStream::new(messages)),
        }
    }

    pub fn block_ack(source: &Path, data: Vec<u8>) -> Self {
        Self {
            source: source.to_path_buf(),
            mode: Mode::BlockAck {
                transfer: BlockTransfer::new(data),
                handshaken: false,
            },
        }
    }

    /// Do one unit of work: one sysex message, the handshake, or one block attempt
    pub async fn step<L>(&mut self, link: &mut L, timing: &UpgradeTiming) -> JobStatus
    where
        L: UpgradeLink + ?Sized,
    {
        let outcome = self.advance(link, timing).await;
        if link.interrupted() {
            warn!("Upgrade from {} interrupted", self.source.display());
            return JobStatus::Finished(UpgradeResult::Failure);
        }
        match outcome {
            Ok(false) => JobStatus::Running,
            Ok(true) => {
                info!("Upgrade from {} completed", self.source.display());
                link.log("Completed\n");
                JobStatus::Finished(UpgradeResult::Success)
            }
            Err(e) => {
                warn!("Upgrade from {} aborted: {}", self.source.display(), e);
                link.log(&e.log_line());
                JobStatus::Finished(e.result())
            }
        }
    }

    /// Returns true once everything was delivered
    async fn advance<L>(&mut self, link: &mut L, timing: &UpgradeTiming) -> Result<bool, UpgradeError>
    where
        L: UpgradeLink + ?Sized,
    {
        match &mut self.mode {
            Mode::SysexStream(stream) => {
                let Some(message) = stream.current() else {
                    return Ok(true);
                };
                link.send_message(message).await?;
                link.pause(timing.message_delay).await;
                for milestone in stream.mark_sent() {
                    link.log(&progress::milestone_line(milestone));
                }
                Ok(stream.is_complete())
            }
            Mode::BlockAck {
                transfer,
                handshaken,
            } => {
                if !*handshaken {
                    transfer.handshake(link, timing.handshake_timeout).await?;
                    *handshaken = true;
                    return Ok(transfer.is_complete());
                }
                match transfer.step(link, timing.ack_timeout).await? {
                    BlockStep::Advanced(milestones) => {
                        for milestone in milestones {
                            link.log(&progress::milestone_line(milestone));
                        }
                        Ok(transfer.is_complete())
                    }
                    BlockStep::Retry { .. } => Ok(false),
                    BlockStep::Complete => Ok(true),
                }
            }
        }
    }
}
