//! Configuration channel wire format.
//!
//! The config port streams XML responses with no length header or delimiter,
//! so a response is considered complete as soon as the accumulated bytes form
//! a well-formed document. A partial response that happens to be well-formed
//! is misread as complete; the protocol offers nothing better.
//!
//! Embedded files are wrapped in a non-standard processing-instruction-like
//! marker that is rewritten into a plain `<File>` element before parsing.

use crate::error::{InfusionError, Result};
use crate::types::{Iid, InterfaceTable};
use base64::{engine::general_purpose, Engine as _};
use roxmltree::{Document, Node};

const FILE_MARKER_OPEN: &str = "<?File Encode=\"Base64\" /";
const FILE_MARKER_CLOSE: &str = "?>";
const BYTE_ORDER_MARK: char = '\u{feff}';

/// Request listing every interface the controller knows about
pub const GET_INTERFACES_REQUEST: &str =
    "<IIntrospection><GetInterfaces><call></call></GetInterfaces></IIntrospection>\n";

/// Request for the project backup stored on the controller
pub const GET_BACKUP_REQUEST: &str =
    "<IBackup><GetFile><call>Backup\\Project.dc</call></GetFile></IBackup>\n";

/// Rewrite the vendor file marker into well-formed `<File>` tags
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find(FILE_MARKER_OPEN) {
        out.push_str(&rest[..start]);
        out.push_str("<File>");
        rest = &rest[start + FILE_MARKER_OPEN.len()..];

        match rest.find(FILE_MARKER_CLOSE) {
            Some(end) => {
                out.push_str(&rest[..end]);
                out.push_str("</File>");
                rest = &rest[end + FILE_MARKER_CLOSE.len()..];
            }
            None => break,
        }
    }

    out.push_str(rest);
    out
}

/// Accumulates config channel chunks until they form a complete document
#[derive(Debug, Default)]
pub struct XmlAccumulator {
    raw: Vec<u8>,
}

impl XmlAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and try to frame a complete response
    ///
    /// Returns the normalized document once the buffer is well-formed and
    /// resets the buffer. Otherwise the bytes stay buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.raw.extend_from_slice(chunk);
        if !self.may_be_complete() {
            return None;
        }

        let text = String::from_utf8_lossy(&self.raw).replace(BYTE_ORDER_MARK, "");
        let candidate = normalize(&text);

        // Only well-formedness matters here; the document is re-parsed by the consumer
        let parsed = Document::parse(&candidate).map(|_| ());
        match parsed {
            Ok(()) => {
                self.raw.clear();
                Some(candidate)
            }
            Err(e) => {
                tracing::trace!("Config buffer incomplete ({} bytes): {}", self.raw.len(), e);
                None
            }
        }
    }

    /// A complete document ends with `>`, optionally followed by whitespace
    ///
    /// Chunks ending inside the base64 body of a backup are skipped without
    /// re-parsing the whole buffer.
    fn may_be_complete(&self) -> bool {
        self.raw
            .iter()
            .rev()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'>')
    }

    /// Number of bytes waiting for the rest of a response
    pub fn buffered(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// A complete response decoded from the config channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigResponse {
    /// Answer to `IIntrospection/GetInterfaces`
    Interfaces(InterfaceTable),

    /// Answer to `IBackup/GetFile`, with the embedded file already decoded
    Backup(String),

    /// Any other well-formed response, identified by its root element
    Other(String),
}

impl ConfigResponse {
    pub fn parse(document: &str) -> Result<Self> {
        let doc = Document::parse(document)?;
        let root = doc.root_element();

        match root.tag_name().name() {
            "IIntrospection" => Ok(ConfigResponse::Interfaces(parse_interfaces(root))),
            "IBackup" => {
                let file = root
                    .descendants()
                    .find(|n| n.has_tag_name("File"))
                    .ok_or_else(|| InfusionError::InvalidResponse("No File in backup response".to_string()))?;
                Ok(ConfigResponse::Backup(decode_file(&text_content(file))?))
            }
            other => Ok(ConfigResponse::Other(other.to_string())),
        }
    }
}

fn parse_interfaces(root: Node) -> InterfaceTable {
    let mut table = InterfaceTable::new();

    for interface in root.descendants().filter(|n| n.has_tag_name("Interface")) {
        let name = field(interface, "Name");
        let iid = field(interface, "IID").and_then(|v| v.trim().parse::<Iid>().ok());

        match (name, iid) {
            (Some(name), Some(iid)) => table.insert(name, iid),
            _ => tracing::warn!("Skipping interface entry without Name/IID"),
        }
    }

    table
}

fn decode_file(payload: &str) -> Result<String> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = general_purpose::STANDARD.decode(compact)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Concatenated text of every text node below `node`
pub(crate) fn text_content(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Value of an attribute or a child element with the given name
///
/// The controller uses both forms for scalar properties.
pub(crate) fn field(node: Node, name: &str) -> Option<String> {
    if let Some(value) = node.attribute(name) {
        return Some(value.to_string());
    }
    node.children()
        .find(|n| n.is_element() && n.has_tag_name(name))
        .map(text_content)
}
