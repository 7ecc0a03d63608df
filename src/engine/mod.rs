//! Polling engine
//!
//! One task owns the transport and serializes every exchange with the device:
//! each iteration picks one work item (see [`work`]), sends it, then waits a
//! fixed delay while dispatching whatever the device sends back. The device
//! link is half-duplex and slow, so the delays are part of the protocol.

mod shared;
pub mod work;


pub use shared::EngineShared;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::endpoint::DeviceEndpoint;
use crate::midi::{format_hex, MidiMessage};
use crate::model::{BUTTON_BATCH, BUTTON_ID_COUNT};
use crate::protocol::{sysex, udp, DeviceEvent, Request};
use crate::status::StatusStore;
use crate::transport::{
    self, EndpointKind, InboundFrame, RawChannel, Transport, TransportError, INBOUND_CAPACITY,
};
use crate::upgrade::{JobStatus, UpgradeJob, UpgradeLink, UpgradeTiming};
use work::{WorkItem, WorkView};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Connecting,
    Polling,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Connecting => write!(f, "connecting"),
            EngineState::Polling => write!(f, "polling"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Fixed delays after each kind of send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTiming {
    pub command_delay: Duration,
    pub queued_delay: Duration,
    pub effect_query_delay: Duration,
    pub button_query_delay: Duration,
    pub effect_save_delay: Duration,
    /// Wait after each log query and each status query
    pub poll_delay: Duration,
    /// Wait before the first exchange
    pub startup_delay: Duration,
    pub upgrade: UpgradeTiming,
}

impl EngineTiming {
    pub fn for_kind(kind: EndpointKind) -> Self {
        let (poll_delay, startup_delay) = match kind {
            EndpointKind::Midi => (Duration::from_millis(200), Duration::ZERO),
            EndpointKind::Udp => (Duration::from_millis(100), Duration::from_millis(50)),
        };
        Self {
            command_delay: Duration::from_millis(100),
            queued_delay: Duration::from_millis(100),
            effect_query_delay: Duration::from_millis(100),
            button_query_delay: Duration::from_millis(100),
            effect_save_delay: Duration::from_millis(300),
            poll_delay,
            startup_delay,
            upgrade: UpgradeTiming::default(),
        }
    }
}

/// Why the loop ended
#[derive(Debug)]
enum Halt {
    Cancelled,
    Transport(TransportError),
}

impl From<TransportError> for Halt {
    fn from(e: TransportError) -> Self {
        Halt::Transport(e)
    }
}

pub struct PollingEngine {
    transport: Box<dyn Transport>,
    kind: EndpointKind,
    inbound: mpsc::Receiver<InboundFrame>,
    store: StatusStore,
    shared: EngineShared,
    clock: SharedClock,
    timing: EngineTiming,
    cancel: watch::Receiver<bool>,
    upgrade: Option<UpgradeJob>,
    button_index: u16,
}

impl PollingEngine {
    pub fn new(
        transport: Box<dyn Transport>,
        inbound: mpsc::Receiver<InboundFrame>,
        store: StatusStore,
        shared: EngineShared,
        clock: SharedClock,
        timing: EngineTiming,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let kind = transport.kind();
        Self {
            transport,
            kind,
            inbound,
            store,
            shared,
            clock,
            timing,
            cancel,
            upgrade: None,
            button_index: 0,
        }
    }

    pub async fn run(mut self) {
        info!("Polling {} device {}", self.kind, self.transport.describe());
        self.shared.set_state(EngineState::Polling);
        self.shared.request_effect_refresh();
        self.button_index = 0;

        let result = match self.pause(self.timing.startup_delay).await {
            Ok(()) => self.poll_loop().await,
            Err(halt) => halt,
        };

        match result {
            Halt::Cancelled => info!("Engine for {} stopping", self.transport.describe()),
            Halt::Transport(e) => {
                error!("Transport error on {}: {}", self.transport.describe(), e);
                self.store.append_log(&format!("Transport error: {}\n", e));
            }
        }

        self.transport.close().await;
        self.shared.set_state(EngineState::Stopped);
    }

    async fn poll_loop(&mut self) -> Halt {
        loop {
            if let Err(halt) = self.iteration().await {
                return halt;
            }
        }
    }

    fn view(&self) -> WorkView {
        WorkView {
            upgrade_active: self.upgrade.is_some(),
            upgrade_pending: self.shared.has_upgrade(),
            command_pending: self.shared.has_command(),
            queued_requests: self.shared.queued_len(),
            effect_refresh: self.shared.effect_refresh_pending(),
            button_index: self.button_index,
            effect_save: self.shared.effect_save_pending(),
        }
    }

    async fn iteration(&mut self) -> Result<(), Halt> {
        self.check_cancel()?;

        match work::select(&self.view()) {
            WorkItem::Upgrade => self.upgrade_step().await?,
            WorkItem::Command => {
                if let Some(command) = self.shared.take_command() {
                    info!("Sending command {:?}", command);
                    self.transport.send(&Request::UserCommand(command)).await?;
                    self.pause(self.timing.command_delay).await?;
                }
            }
            WorkItem::QueuedRequest => {
                if let Some(request) = self.shared.pop_request() {
                    debug!("Sending queued {:?}", request);
                    self.transport.send(&request).await?;
                    self.pause(self.timing.queued_delay).await?;
                }
            }
            WorkItem::EffectQuery => {
                self.shared.take_effect_refresh();
                self.transport.send(&Request::EffectConfigQuery).await?;
                self.pause(self.timing.effect_query_delay).await?;
            }
            WorkItem::ButtonQuery => {
                let start = self.button_index;
                let count = BUTTON_BATCH.min(BUTTON_ID_COUNT - start) as u8;
                self.button_index = start + BUTTON_BATCH;
                self.transport
                    .send(&Request::ButtonConfigQuery { start, count })
                    .await?;
                self.pause(self.timing.button_query_delay).await?;
            }
            WorkItem::EffectSave => {
                if let Some(config) = self.shared.take_effect_save() {
                    info!("Saving effect configuration");
                    self.transport.send(&Request::EffectConfigSet(config)).await?;
                    self.pause(self.timing.effect_save_delay).await?;
                }
            }
            WorkItem::Poll => {
                self.transport.send(&Request::LogQuery).await?;
                self.pause(self.timing.poll_delay).await?;
                self.transport.send(&Request::StatusQuery).await?;
                self.pause(self.timing.poll_delay).await?;
            }
        }
        Ok(())
    }

    async fn upgrade_step(&mut self) -> Result<(), Halt> {
        let mut job = match self.upgrade.take() {
            Some(job) => job,
            None => {
                let Some(path) = self.shared.take_upgrade() else {
                    return Ok(());
                };
                match UpgradeJob::load(&path, self.kind).await {
                    Ok(job) => {
                        self.store.append_log(&format!("Upgrading from {}\n", path.display()));
                        job
                    }
                    Err(e) => {
                        warn!("Upgrade from {} not started: {}", path.display(), e);
                        self.store.append_log(&e.log_line());
                        return Ok(());
                    }
                }
            }
        };

        let timing = self.timing.upgrade;
        let mut link = EngineLink {
            engine: &mut *self,
            halted: None,
        };
        let status = job.step(&mut link, &timing).await;
        let halted = link.halted.take();

        if status == JobStatus::Running {
            self.upgrade = Some(job);
        }
        match halted {
            Some(halt) => Err(halt),
            None => Ok(()),
        }
    }

    fn check_cancel(&self) -> Result<(), Halt> {
        if *self.cancel.borrow() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    /// Wait `duration`, dispatching inbound frames as they arrive
    async fn pause(&mut self, duration: Duration) -> Result<(), Halt> {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            self.check_cancel()?;
            tokio::select! {
                _ = self.cancel.changed() => return Err(Halt::Cancelled),
                _ = sleep_until(deadline) => return Ok(()),
                frame = self.inbound.recv() => match frame {
                    Some(frame) => self.dispatch(frame),
                    None => return Err(Halt::Transport(TransportError::Closed)),
                },
            }
        }
    }

    /// Wait up to `timeout` for a frame `claim` accepts; other frames are
    /// dispatched normally
    async fn wait_for<T, F>(&mut self, timeout: Duration, mut claim: F) -> Result<Option<T>, Halt>
    where
        F: FnMut(&[u8]) -> Option<T> + Send,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check_cancel()?;
            tokio::select! {
                _ = self.cancel.changed() => return Err(Halt::Cancelled),
                _ = sleep_until(deadline) => return Ok(None),
                frame = self.inbound.recv() => match frame {
                    Some(frame) => match claim(&frame.bytes) {
                        Some(claimed) => return Ok(Some(claimed)),
                        None => self.dispatch(frame),
                    },
                    None => return Err(Halt::Transport(TransportError::Closed)),
                },
            }
        }
    }

    fn dispatch(&mut self, frame: InboundFrame) {
        match self.kind {
            EndpointKind::Midi => match MidiMessage::parse(&frame.bytes) {
                Some(MidiMessage::SysEx(data)) => match sysex::decode(&data) {
                    Some(event) => self.apply(event),
                    None => debug!("Ignoring sysex: {}", format_hex(&data)),
                },
                Some(MidiMessage::TimingClock) => self.clock.lock().pulse(frame.received_at),
                _ => {}
            },
            EndpointKind::Udp => match udp::decode_datagram(&frame.bytes) {
                Some(event) => self.apply(event),
                None => debug!("Ignoring datagram of {} bytes", frame.bytes.len()),
            },
        }
    }

    fn apply(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Status(status) => self.store.publish(status),
            DeviceEvent::Log(text) => self.store.append_log(&text),
            DeviceEvent::EffectConfig(config) => {
                debug!("Effect configuration received");
                self.shared.apply_effect_config(config);
            }
            DeviceEvent::ButtonConfig(batch) => {
                debug!("Button configuration from {} ({} ids)", batch.start, batch.entries.len());
                self.shared.apply_button_batch(batch);
            }
            DeviceEvent::ButtonPress(id) => {
                debug!("Button pressed: {}", id);
                self.shared.record_button_press(id);
            }
            DeviceEvent::Identity(id) => debug!("Identity reply: {}", id),
            DeviceEvent::BlockAck(block) => debug!("Ack for block {} outside an upgrade", block),
        }
    }
}

/// Upgrade access to the engine's transport and waits
struct EngineLink<'a> {
    engine: &'a mut PollingEngine,
    halted: Option<Halt>,
}

impl<'a> EngineLink<'a> {
    fn note(&mut self, result: Result<(), TransportError>) -> Result<(), TransportError> {
        if let Err(e) = &result {
            self.halted = Some(Halt::Transport(TransportError::Send(e.to_string())));
        }
        result
    }

    fn note_wait<T>(&mut self, result: Result<Option<T>, Halt>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(halt) => {
                self.halted = Some(halt);
                None
            }
        }
    }
}

#[async_trait]
impl<'a> UpgradeLink for EngineLink<'a> {
    async fn send_message(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = self.engine.transport.send_raw(RawChannel::Primary, data).await;
        self.note(result)
    }

    async fn pause(&mut self, duration: Duration) {
        if self.halted.is_some() {
            return;
        }
        if let Err(halt) = self.engine.pause(duration).await {
            self.halted = Some(halt);
        }
    }

    async fn send_control(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = self.engine.transport.send_raw(RawChannel::Primary, data).await;
        self.note(result)
    }

    async fn wait_control_reply(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let result = self
            .engine
            .wait_for(timeout, |bytes| {
                udp::decode_upgrade_reply(bytes).map(|_| bytes.to_vec())
            })
            .await;
        self.note_wait(result)
    }

    async fn send_block(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let result = self.engine.transport.send_raw(RawChannel::Upgrade, frame).await;
        self.note(result)
    }

    async fn wait_ack(&mut self, timeout: Duration) -> Option<u16> {
        let result = self.engine.wait_for(timeout, udp::parse_ack).await;
        self.note_wait(result)
    }

    fn log(&mut self, text: &str) {
        self.engine.store.append_log(text);
    }

    fn interrupted(&self) -> bool {
        self.halted.is_some()
    }
}

/// Running engine task
pub struct EngineHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal the engine and wait for it to close its transport
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            warn!("Engine task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Open a transport for `endpoint` and poll it until stopped.
///
/// An open failure ends the engine immediately; it is logged with the
/// endpoint identity and not retried.
pub fn spawn(
    endpoint: DeviceEndpoint,
    store: StatusStore,
    shared: EngineShared,
    clock: SharedClock,
    timing: Option<EngineTiming>,
) -> EngineHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        shared.set_state(EngineState::Connecting);
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let transport = match transport::open(&endpoint, tx).await {
            Ok(t) => t,
            Err(e) => {
                error!("Couldn't open {}: {}", endpoint, e);
                store.append_log(&format!("Couldn't open {}\n", endpoint));
                shared.set_state(EngineState::Stopped);
                return;
            }
        };
        let timing = timing.unwrap_or_else(|| EngineTiming::for_kind(transport.kind()));
        PollingEngine::new(transport, rx, store, shared, clock, timing, cancel_rx)
            .run()
            .await;
    });
    EngineHandle { cancel, task }
}

/// Poll over an already open transport
pub fn spawn_with_transport(
    transport: Box<dyn Transport>,
    inbound: mpsc::Receiver<InboundFrame>,
    store: StatusStore,
    shared: EngineShared,
    clock: SharedClock,
    timing: EngineTiming,
) -> EngineHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(
        PollingEngine::new(transport, inbound, store, shared, clock, timing, cancel_rx).run(),
    );
    EngineHandle { cancel, task }
}
