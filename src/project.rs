use crate::error::{InfusionError, Result};
use crate::types::Vid;
use crate::xml::field;
use roxmltree::{Document, Node};

/// Object record read from a downloaded project file
///
/// Only lives for the classification pass; the registry keeps the resulting
/// device, not the raw object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectObject {
    /// Runtime type tag (element name inside `<Object>`, e.g. `Load`)
    pub kind: String,
    pub vid: Vid,
    pub name: String,
    /// Override display name (`DName`)
    pub display_name: Option<String>,
    pub device_category: Option<String>,
    pub load_type: Option<String>,
    pub power_profile: Option<String>,
    pub exclude_from_widgets: bool,
}

impl ProjectObject {
    /// Display name, preferring a non-empty override
    pub fn effective_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(dname) if !dname.is_empty() => dname,
            _ => &self.name,
        }
    }
}

/// Parse the flat object list of a project file
///
/// Objects without a numeric VID are skipped.
pub fn parse_project(xml: &str) -> Result<Vec<ProjectObject>> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    if !root.has_tag_name("Project") {
        return Err(InfusionError::InvalidResponse(format!(
            "Expected <Project> root, found <{}>",
            root.tag_name().name()
        )));
    }

    let objects = root
        .children()
        .find(|n| n.has_tag_name("Objects"))
        .ok_or_else(|| InfusionError::InvalidResponse("No <Objects> in project".to_string()))?;

    let mut parsed = Vec::new();
    for wrapper in objects.children().filter(|n| n.has_tag_name("Object")) {
        let Some(item) = wrapper.children().find(|n| n.is_element()) else {
            continue;
        };
        match parse_object(item) {
            Some(object) => parsed.push(object),
            None => tracing::debug!("Skipping <{}> without a valid VID", item.tag_name().name()),
        }
    }

    tracing::debug!("Parsed {} project object(s)", parsed.len());
    Ok(parsed)
}

fn parse_object(item: Node) -> Option<ProjectObject> {
    let vid = field(item, "VID")?.trim().parse().ok()?;

    Some(ProjectObject {
        kind: item.tag_name().name().to_string(),
        vid,
        name: field(item, "Name").unwrap_or_default(),
        display_name: field(item, "DName"),
        device_category: field(item, "DeviceCategory"),
        load_type: field(item, "LoadType"),
        power_profile: field(item, "PowerProfile"),
        exclude_from_widgets: field(item, "ExcludeFromWidgets")
            .is_some_and(|v| !v.trim().eq_ignore_ascii_case("false")),
    })
}
