//! Acknowledged block transfer over UDP
//!
//! The image is announced on the command port, then sent in 512-byte blocks
//! to the upgrade port. Each block must be acknowledged with its own number
//! before the next one goes out.

use std::time::Duration;
use tracing::{debug, warn};

use super::progress::Progress;
use super::{UpgradeError, UpgradeLink};
use crate::protocol::udp::{block_frame, parse_upgrade_reply, upgrade_command, BLOCK_SIZE};
use crate::protocol::UpgradeReply;

/// Sends per block before the transfer is abandoned
pub const MAX_BLOCK_ATTEMPTS: u32 = 10;

/// Outcome of one block attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStep {
    /// Block acknowledged; milestones crossed by it
    Advanced(Vec<u32>),
    /// No matching ack yet
    Retry { attempts: u32 },
    Complete,
}

#[derive(Debug, Clone)]
pub struct BlockTransfer {
    data: Vec<u8>,
    block: u16,
    offset: usize,
    attempts: u32,
    progress: Progress,
}

impl BlockTransfer {
    pub fn new(data: Vec<u8>) -> Self {
        let blocks = data.len().div_ceil(BLOCK_SIZE);
        Self {
            data,
            block: 1,
            offset: 0,
            attempts: 0,
            progress: Progress::new(blocks),
        }
    }

    /// Block number sent next
    pub fn block(&self) -> u16 {
        self.block
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Announce the image and wait for the device to accept it
    pub async fn handshake<L>(
        &mut self,
        link: &mut L,
        timeout: Duration,
    ) -> Result<UpgradeReply, UpgradeError>
    where
        L: UpgradeLink + ?Sized,
    {
        link.send_control(&upgrade_command(self.data.len())).await?;
        let raw = link
            .wait_control_reply(timeout)
            .await
            .ok_or(UpgradeError::NoResponse)?;
        let reply = parse_upgrade_reply(&raw).ok_or(UpgradeError::BadResponse)?;
        debug!(
            "Upgrade accepted: kind {} '{}' '{}'",
            reply.kind, reply.fields.0, reply.fields.1
        );
        Ok(reply)
    }

    /// Send the current block once and wait for its ack
    pub async fn step<L>(&mut self, link: &mut L, ack_timeout: Duration) -> Result<BlockStep, UpgradeError>
    where
        L: UpgradeLink + ?Sized,
    {
        if self.is_complete() {
            return Ok(BlockStep::Complete);
        }

        let end = (self.offset + BLOCK_SIZE).min(self.data.len());
        let frame = block_frame(self.block, &self.data[self.offset..end]);
        self.attempts += 1;
        link.send_block(&frame).await?;

        match link.wait_ack(ack_timeout).await {
            Some(ack) if ack == self.block => {
                self.block = self.block.wrapping_add(1);
                self.offset = end;
                self.attempts = 0;
                Ok(BlockStep::Advanced(self.progress.advance(1)))
            }
            other => {
                if let Some(ack) = other {
                    warn!("Ack for block {} while sending block {}", ack, self.block);
                }
                if self.attempts >= MAX_BLOCK_ATTEMPTS {
                    return Err(UpgradeError::TooManyAttempts {
                        block: self.block,
                        attempts: self.attempts,
                    });
                }
                Ok(BlockStep::Retry {
                    attempts: self.attempts,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Link scripted with ack behaviour, recording every block sent
    #[derive(Default)]
    struct ScriptedLink {
        blocks: Vec<Vec<u8>>,
        controls: Vec<Vec<u8>>,
        control_reply: Option<Vec<u8>>,
        /// `None` acks the block just sent, `Some(x)` sends `x` instead
        acks: VecDeque<Option<Option<u16>>>,
        ack_everything: bool,
    }

    #[async_trait]
    impl UpgradeLink for ScriptedLink {
        async fn send_message(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn pause(&mut self, _duration: Duration) {}

        async fn send_control(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.controls.push(data.to_vec());
            Ok(())
        }

        async fn wait_control_reply(&mut self, _timeout: Duration) -> Option<Vec<u8>> {
            self.control_reply.take()
        }

        async fn send_block(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.blocks.push(frame.to_vec());
            Ok(())
        }

        async fn wait_ack(&mut self, _timeout: Duration) -> Option<u16> {
            let sent = self
                .blocks
                .last()
                .map(|f| u16::from_be_bytes([f[2], f[3]]));
            if self.ack_everything {
                return sent;
            }
            match self.acks.pop_front() {
                Some(None) => sent,
                Some(Some(ack)) => ack,
                None => None,
            }
        }

        fn log(&mut self, _text: &str) {}
    }

    #[tokio::test]
    async fn test_timeouts_abort_after_ten_attempts() {
        let mut link = ScriptedLink::default();
        let mut transfer = BlockTransfer::new(vec![7u8; 2000]);

        let mut outcome = None;
        for _ in 0..20 {
            match transfer.step(&mut link, Duration::ZERO).await {
                Ok(BlockStep::Retry { .. }) => continue,
                other => {
                    outcome = Some(other);
                    break;
                }
            }
        }

        assert!(matches!(
            outcome,
            Some(Err(UpgradeError::TooManyAttempts { block: 1, attempts: 10 }))
        ));
        assert_eq!(link.blocks.len(), 10);
        assert!(link.blocks.iter().all(|b| b[..4] == [0, 3, 0, 1]));
    }

    #[tokio::test]
    async fn test_blocks_numbered_and_sized() {
        let mut link = ScriptedLink {
            ack_everything: true,
            ..Default::default()
        };
        let mut transfer = BlockTransfer::new(vec![1u8; 1100]);

        let mut milestones = Vec::new();
        loop {
            match transfer.step(&mut link, Duration::ZERO).await.unwrap() {
                BlockStep::Advanced(m) => milestones.extend(m),
                BlockStep::Complete => break,
                BlockStep::Retry { .. } => panic!("unexpected retry"),
            }
        }

        assert_eq!(link.blocks.len(), 3);
        assert_eq!(link.blocks[0][..4], [0, 3, 0, 1]);
        assert_eq!(link.blocks[1][..4], [0, 3, 0, 2]);
        assert_eq!(link.blocks[2][..4], [0, 3, 0, 3]);
        assert_eq!(link.blocks[0].len(), 4 + 512);
        assert_eq!(link.blocks[2].len(), 4 + 76);
        assert_eq!(milestones.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_mismatched_ack_retries_same_block() {
        let mut link = ScriptedLink {
            acks: VecDeque::from(vec![Some(Some(0)), Some(None)]),
            ..Default::default()
        };
        let mut transfer = BlockTransfer::new(vec![0u8; 10]);

        assert_eq!(
            transfer.step(&mut link, Duration::ZERO).await.unwrap(),
            BlockStep::Retry { attempts: 1 }
        );
        assert!(matches!(
            transfer.step(&mut link, Duration::ZERO).await.unwrap(),
            BlockStep::Advanced(_)
        ));
        assert_eq!(link.blocks.len(), 2);
        assert_eq!(link.blocks[0], link.blocks[1]);
        assert!(transfer.is_complete());
    }

    #[tokio::test]
    async fn test_block_number_wraps() {
        let mut link = ScriptedLink {
            ack_everything: true,
            ..Default::default()
        };
        let mut transfer = BlockTransfer::new(vec![0u8; 1024]);
        transfer.block = u16::MAX;

        transfer.step(&mut link, Duration::ZERO).await.unwrap();
        assert_eq!(transfer.block(), 0);
        assert_eq!(link.blocks[0][..4], [0, 3, 0xff, 0xff]);
    }

    #[tokio::test]
    async fn test_handshake() {
        let mut reply = vec![0x00, 0x02];
        reply.extend_from_slice(b"upgrade\0ready\0");
        let mut link = ScriptedLink {
            control_reply: Some(reply),
            ..Default::default()
        };
        let mut transfer = BlockTransfer::new(vec![0u8; 600]);

        let accepted = transfer
            .handshake(&mut link, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(accepted.kind, 2);
        assert_eq!(link.controls, vec![b"<command>upgrade 600</command>".to_vec()]);

        // No reply at all
        assert!(matches!(
            transfer.handshake(&mut link, Duration::ZERO).await,
            Err(UpgradeError::NoResponse)
        ));

        // Garbled reply
        link.control_reply = Some(b"\x00\x02garbage".to_vec());
        assert!(matches!(
            transfer.handshake(&mut link, Duration::ZERO).await,
            Err(UpgradeError::BadResponse)
        ));
    }
}
