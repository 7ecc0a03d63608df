//! Device endpoint selection
//!
//! A device name starting with a dotted-quad address (as listed by discovery,
//! e.g. `"10.0.0.5 Looper"`) is a UDP device; anything else names MIDI ports.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;

static IP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+\.\d+\.\d+\.\d+)(?:\s|$)").unwrap_or_else(|e| panic!("ip pattern: {e}"))
});

/// Leading IPv4 address of a device name, if any
pub fn ip_prefix(name: &str) -> Option<Ipv4Addr> {
    IP_PREFIX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Where the device lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEndpoint {
    Midi { input: String, output: String },
    Udp { addr: Ipv4Addr, label: String },
}

impl DeviceEndpoint {
    /// Endpoint for a single device name used in both directions
    pub fn parse(name: &str) -> Self {
        match ip_prefix(name) {
            Some(addr) => DeviceEndpoint::Udp {
                addr,
                label: name.to_string(),
            },
            None => DeviceEndpoint::Midi {
                input: name.to_string(),
                output: name.to_string(),
            },
        }
    }

    /// Endpoint for separate input/output names; an address in the output wins,
    /// then one in the input
    pub fn from_ports(input: &str, output: &str) -> Self {
        if let Some(addr) = ip_prefix(output) {
            return DeviceEndpoint::Udp {
                addr,
                label: output.to_string(),
            };
        }
        if let Some(addr) = ip_prefix(input) {
            return DeviceEndpoint::Udp {
                addr,
                label: input.to_string(),
            };
        }
        DeviceEndpoint::Midi {
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, DeviceEndpoint::Udp { .. })
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEndpoint::Midi { input, output } if input == output => f.write_str(input),
            DeviceEndpoint::Midi { input, output } => write!(f, "{} / {}", input, output),
            DeviceEndpoint::Udp { addr, .. } => write!(f, "{}", addr),
        }
    }
}

/// Selected input and output device names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSelection {
    pub input: String,
    pub output: String,
}

impl EndpointSelection {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Select the input device; the output follows when it is empty or when
    /// a differing network device was picked
    pub fn select_input(&mut self, name: &str) {
        self.input = name.to_string();
        if self.output.is_empty() || (ip_prefix(name).is_some() && self.output != self.input) {
            self.output = self.input.clone();
        }
    }

    /// Select the output device; mirror of [`select_input`](Self::select_input)
    pub fn select_output(&mut self, name: &str) {
        self.output = name.to_string();
        if self.input.is_empty() || (ip_prefix(name).is_some() && self.output != self.input) {
            self.input = self.output.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    pub fn endpoint(&self) -> Option<DeviceEndpoint> {
        if self.is_empty() {
            return None;
        }
        Some(DeviceEndpoint::from_ports(&self.input, &self.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_prefix() {
        assert_eq!(ip_prefix("10.0.0.5"), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            ip_prefix("192.168.1.20 Looperlative LP2"),
            Some(Ipv4Addr::new(192, 168, 1, 20))
        );
        assert_eq!(ip_prefix("10.0.0.5x"), None);
        assert_eq!(ip_prefix("999.0.0.1 bogus"), None);
        assert_eq!(ip_prefix("USB MIDI 10.0.0.5"), None);
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            DeviceEndpoint::parse("10.0.0.5"),
            DeviceEndpoint::Udp {
                addr: Ipv4Addr::new(10, 0, 0, 5),
                label: "10.0.0.5".to_string(),
            }
        );
        assert_eq!(
            DeviceEndpoint::parse("LP2 MIDI"),
            DeviceEndpoint::Midi {
                input: "LP2 MIDI".to_string(),
                output: "LP2 MIDI".to_string(),
            }
        );
    }

    #[test]
    fn test_output_address_wins() {
        let ep = DeviceEndpoint::from_ports("10.0.0.9 A", "10.0.0.5 B");
        assert!(matches!(ep, DeviceEndpoint::Udp { addr, .. } if addr == Ipv4Addr::new(10, 0, 0, 5)));

        let ep = DeviceEndpoint::from_ports("10.0.0.9 A", "USB");
        assert!(matches!(ep, DeviceEndpoint::Udp { addr, .. } if addr == Ipv4Addr::new(10, 0, 0, 9)));
    }

    #[test]
    fn test_selection_fills_empty_side() {
        let mut sel = EndpointSelection::default();
        sel.select_input("USB In");
        assert_eq!(sel, EndpointSelection::new("USB In", "USB In"));

        // MIDI selection leaves the other side alone
        sel.select_output("USB Out");
        assert_eq!(sel, EndpointSelection::new("USB In", "USB Out"));
    }

    #[test]
    fn test_selection_network_device_overrides() {
        let mut sel = EndpointSelection::new("USB In", "USB Out");
        sel.select_input("10.0.0.5 Looper");
        assert_eq!(sel.output, "10.0.0.5 Looper");

        let mut sel = EndpointSelection::new("USB In", "USB Out");
        sel.select_output("10.0.0.7 Looper");
        assert_eq!(sel.input, "10.0.0.7 Looper");
        assert!(sel.endpoint().unwrap().is_udp());
    }
}
