//! MIDI transport
//!
//! Holds the midir connections directly. The input callback forwards raw
//! bytes into the inbound channel; sends go through the locked output.

use async_trait::async_trait;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{EndpointKind, InboundFrame, RawChannel, Transport, TransportError};
use crate::midi::{find_input_port, find_output_port, format_hex};
use crate::protocol::{sysex, Request};

const CLIENT_NAME: &str = "lpmidimon";

pub struct MidiTransport {
    input_name: String,
    output_name: String,
    input_conn: Option<MidiInputConnection<()>>,
    output_conn: Option<Arc<Mutex<MidiOutputConnection>>>,
}

impl MidiTransport {
    /// Open both ports, failing if either can't be found or connected
    pub async fn open(
        input: &str,
        output: &str,
        inbound: mpsc::Sender<InboundFrame>,
    ) -> Result<Self, TransportError> {
        let describe = format!("{} / {}", input, output);
        let open_error = |reason: String| TransportError::Open {
            endpoint: describe.clone(),
            reason,
        };

        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| open_error(e.to_string()))?;
        // Sysex replies and clock pulses are both needed
        midi_in.ignore(Ignore::None);

        let (in_port, in_name) = find_input_port(&midi_in, input)
            .ok_or_else(|| open_error(format!("input port '{}' not found", input)))?;

        let input_conn = midi_in
            .connect(
                &in_port,
                "lpmidimon-in",
                move |_timestamp, data, _| {
                    // Never block the MIDI callback
                    if inbound.try_send(InboundFrame::new(data.to_vec())).is_err() {
                        warn!("Inbound MIDI dropped: {}", format_hex(data));
                    }
                },
                (),
            )
            .map_err(|e| open_error(format!("{}: {}", in_name, e)))?;

        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| open_error(e.to_string()))?;
        let (out_port, out_name) = find_output_port(&midi_out, output)
            .ok_or_else(|| open_error(format!("output port '{}' not found", output)))?;
        let output_conn = midi_out
            .connect(&out_port, "lpmidimon-out")
            .map_err(|e| open_error(format!("{}: {}", out_name, e)))?;

        debug!("MIDI ports connected: '{}' -> '{}'", in_name, out_name);
        info!("MIDI transport open - Input: '{}', Output: '{}'", input, output);
        Ok(Self {
            input_name: input.to_string(),
            output_name: output.to_string(),
            input_conn: Some(input_conn),
            output_conn: Some(Arc::new(Mutex::new(output_conn))),
        })
    }

    fn send_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let output = self.output_conn.as_ref().ok_or(TransportError::Closed)?;
        output
            .lock()
            .send(bytes)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        debug!("MIDI out: {}", format_hex(bytes));
        Ok(())
    }
}

#[async_trait]
impl Transport for MidiTransport {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Midi
    }

    fn describe(&self) -> String {
        if self.input_name == self.output_name {
            self.input_name.clone()
        } else {
            format!("{} / {}", self.input_name, self.output_name)
        }
    }

    async fn send(&mut self, request: &Request) -> Result<(), TransportError> {
        let bytes = sysex::encode_request(request)?;
        self.send_bytes(&bytes)
    }

    async fn send_raw(&mut self, channel: RawChannel, data: &[u8]) -> Result<(), TransportError> {
        match channel {
            RawChannel::Primary => self.send_bytes(data),
            RawChannel::Upgrade => Err(TransportError::Unsupported("block upgrade over MIDI")),
        }
    }

    async fn close(&mut self) {
        if let Some(conn) = self.input_conn.take() {
            conn.close();
        }
        self.output_conn = None;
        info!("MIDI transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected(input: &str, output: &str) -> MidiTransport {
        MidiTransport {
            input_name: input.to_string(),
            output_name: output.to_string(),
            input_conn: None,
            output_conn: None,
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let mut transport = disconnected("Looper", "Looper");
        transport.close().await;

        let result = transport.send_raw(RawChannel::Primary, &[0xF0, 0xF7]).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        let result = transport.send(&Request::StatusQuery).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_block_upgrade_unsupported() {
        let mut transport = disconnected("Looper", "Looper");
        let result = transport.send_raw(RawChannel::Upgrade, &[0, 1, 0, 1]).await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[test]
    fn test_describe() {
        assert_eq!(disconnected("Looper", "Looper").describe(), "Looper");
        assert_eq!(disconnected("In A", "Out B").describe(), "In A / Out B");
        assert_eq!(disconnected("In A", "Out B").kind(), EndpointKind::Midi);
    }
}
