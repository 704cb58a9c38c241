//! Command channel wire format.
//!
//! The control port speaks newline-terminated ASCII. Replies start with `R:`,
//! unsolicited pushes with `S:` and event-log lines with `EL: `. Fields are
//! separated by whitespace and carry no request id.
//!
//! Lines with a recognized prefix but an unparseable numeric field are dropped
//! as a whole rather than emitted with partial data.

use crate::types::{Iid, Vid};
use std::fmt;

/// Ramp mode argument the controller expects for `Load.Ramp`
const LOAD_RAMP_MODE: u8 = 6;

/// Event decoded from the command channel
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Load level changed (`S:LOAD` push or `R:GETLOAD` reply)
    LoadStatus { vid: Vid, level: i32 },

    /// Button pressed or released (`S:BTN`)
    ButtonStatus { vid: Vid, action: String },

    /// Outdoor temperature reported in degrees Celsius
    OutdoorTemperature { vid: Vid, celsius: f64 },

    /// Indoor temperature reported in degrees Celsius
    IndoorTemperature { vid: Vid, celsius: f64 },

    /// Reply to an `Object.IsInterfaceSupported` probe
    InterfaceSupport { vid: Vid, iid: Iid, supported: bool },

    /// The command socket was closed or failed
    Disconnected,
}

impl Event {
    /// Object the event refers to, if any
    pub fn vid(&self) -> Option<Vid> {
        match self {
            Event::LoadStatus { vid, .. }
            | Event::ButtonStatus { vid, .. }
            | Event::OutdoorTemperature { vid, .. }
            | Event::IndoorTemperature { vid, .. }
            | Event::InterfaceSupport { vid, .. } => Some(*vid),
            Event::Disconnected => None,
        }
    }
}

/// Longest unterminated line kept before it is dropped
const MAX_LINE_LEN: usize = 8 * 1024;

/// Splits an arbitrarily chunked byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Skipping the rest of an overlong line
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line terminated so far
    ///
    /// The trailing unterminated part stays buffered for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let chunk = if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            chunk
        };
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }

        if self.pending.len() > MAX_LINE_LEN {
            tracing::warn!("Dropping unterminated line of {} bytes", self.pending.len());
            self.pending.clear();
            self.discarding = true;
        }
        lines
    }

    /// Bytes received but not yet terminated by a newline
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

/// Decode a single complete line into an event
///
/// Returns `None` for unrecognized or malformed lines.
pub fn parse_line(line: &str) -> Option<Event> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let field = |i: usize| fields.get(i).copied();

    if line.starts_with("S:LOAD ") || line.starts_with("R:GETLOAD ") {
        return Some(Event::LoadStatus {
            vid: parse_vid(field(1)?)?,
            level: parse_int(field(2)?)?,
        });
    }

    if line.starts_with("S:BTN ") {
        return Some(Event::ButtonStatus {
            vid: parse_vid(field(1)?)?,
            action: field(2)?.to_string(),
        });
    }

    if line.starts_with("EL: ") {
        return match field(3)? {
            "Thermostat.SetOutdoorTemperatureSW" => Some(Event::OutdoorTemperature {
                vid: parse_vid(field(2)?)?,
                celsius: parse_milli(field(4)?)?,
            }),
            "Thermostat.SetIndoorTemperatureSW" => Some(Event::IndoorTemperature {
                vid: parse_vid(field(2)?)?,
                celsius: parse_milli(field(4)?)?,
            }),
            _ => None,
        };
    }

    if line.starts_with("R:INVOKE") {
        if field(3) == Some("Thermostat.GetOutdoorTemperature") {
            return Some(Event::OutdoorTemperature {
                vid: parse_vid(field(1)?)?,
                celsius: field(2)?.parse().ok()?,
            });
        }
        if line.contains("Object.IsInterfaceSupported") {
            return Some(Event::InterfaceSupport {
                vid: parse_vid(field(1)?)?,
                iid: parse_vid(field(4)?)?,
                supported: parse_int(field(2)?)? != 0,
            });
        }
    }

    None
}

fn parse_vid(token: &str) -> Option<Vid> {
    token.parse().ok()
}

/// Integer part of a numeric token; the controller reports levels as `95.000`
fn parse_int(token: &str) -> Option<i32> {
    token
        .parse::<i32>()
        .ok()
        .or_else(|| token.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i32))
}

fn parse_milli(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().map(|raw| raw / 1000.0)
}

/// Channel selected by a `STATUS` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Load,
    Button,
}

/// Outbound command for the control port
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Enable live push notifications for a channel
    Status(StatusKind),

    /// Ask for the current level of a load
    GetLoad { vid: Vid },

    /// Ramp a load to `level` over `seconds`
    Ramp { vid: Vid, seconds: u32, level: u8 },

    /// Set a load level immediately
    SetLevel { vid: Vid, level: u8 },

    /// Fade an RGB load to the given hue/saturation/lightness
    DissolveHsl {
        vid: Vid,
        hue: f64,
        saturation: f64,
        lightness: f64,
        duration_ms: u32,
    },

    /// Request the outdoor temperature of a thermostat
    GetOutdoorTemperature { vid: Vid },

    /// Capability probe
    IsInterfaceSupported { vid: Vid, iid: Iid },
}

impl Command {
    /// Render the command as a newline-terminated wire line
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Status(StatusKind::Load) => write!(f, "STATUS LOAD"),
            Command::Status(StatusKind::Button) => write!(f, "STATUS BTN"),
            Command::GetLoad { vid } => write!(f, "GETLOAD {}", vid),
            Command::Ramp { vid, seconds, level } => {
                write!(f, "INVOKE {} Load.Ramp {} {} {}", vid, LOAD_RAMP_MODE, seconds, level)
            }
            Command::SetLevel { vid, level } => write!(f, "INVOKE {} Load.SetLevel {}", vid, level),
            Command::DissolveHsl {
                vid,
                hue,
                saturation,
                lightness,
                duration_ms,
            } => write!(
                f,
                "INVOKE {} RGBLoad.DissolveHSL {} {} {} {}",
                vid,
                hue,
                saturation,
                lightness * 1000.0,
                duration_ms
            ),
            Command::GetOutdoorTemperature { vid } => {
                write!(f, "INVOKE {} Thermostat.GetOutdoorTemperature", vid)
            }
            Command::IsInterfaceSupported { vid, iid } => {
                write!(f, "INVOKE {} Object.IsInterfaceSupported {}", vid, iid)
            }
        }
    }
}
