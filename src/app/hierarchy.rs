use std::fmt::Write;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::error::AppError;

/// Tag used when a node has no usable `type` attribute.
pub const DEFAULT_TAG: &str = "Layout";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Geometry {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Geometry {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyChild {
    Element(HierarchyNode),
    Text { text: String },
}

/// One element of an annotated window hierarchy.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HierarchyNode {
    pub tag: String,
    /// Device attributes in dump order, followed by any derived geometry attributes.
    pub attributes: Vec<(String, String)>,
    pub geometry: Option<Geometry>,
    pub children: Vec<HierarchyChild>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    children: Vec<RawNode>,
}

/// Parses a `uitest dumpLayout` document into an annotated tree.
pub fn parse_layout(raw: &str, trace_id: &str) -> Result<HierarchyNode, AppError> {
    let root: RawNode = serde_json::from_str(raw)
        .map_err(|err| AppError::parse(format!("Malformed layout dump: {err}"), trace_id))?;
    Ok(annotate(root))
}

fn annotate(raw: RawNode) -> HierarchyNode {
    let mut attributes: Vec<(String, String)> = raw
        .attributes
        .into_iter()
        .map(|(name, value)| (name, attribute_text(value)))
        .collect();

    let tag = attributes
        .iter()
        .position(|(name, _)| name == "type")
        .map(|index| attributes.remove(index).1)
        .filter(|tag| is_xml_name(tag))
        .unwrap_or_else(|| DEFAULT_TAG.to_string());

    let geometry = find_attr(&attributes, "bounds").and_then(parse_bounds);
    if let Some(geometry) = geometry {
        set_attr(&mut attributes, "x", geometry.x.to_string());
        set_attr(&mut attributes, "y", geometry.y.to_string());
        set_attr(&mut attributes, "width", geometry.width.to_string());
        set_attr(&mut attributes, "height", geometry.height.to_string());
    }

    let children = if raw.children.is_empty() {
        match find_attr(&attributes, "text") {
            Some(text) if !text.is_empty() => vec![HierarchyChild::Text {
                text: text.to_string(),
            }],
            _ => Vec::new(),
        }
    } else {
        raw.children
            .into_iter()
            .map(|child| HierarchyChild::Element(annotate(child)))
            .collect()
    };

    HierarchyNode {
        tag,
        attributes,
        geometry,
        children,
    }
}

fn attribute_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn find_attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(attr_name, _)| attr_name == name)
        .map(|(_, value)| value.as_str())
}

fn set_attr(attrs: &mut Vec<(String, String)>, name: &str, value: String) {
    match attrs.iter_mut().find(|(attr_name, _)| attr_name == name) {
        Some(entry) => entry.1 = value,
        None => attrs.push((name.to_string(), value)),
    }
}

fn xml_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("static regex"))
}

/// Whether `name` can be written as an XML element or attribute name.
pub fn is_xml_name(name: &str) -> bool {
    xml_name_regex().is_match(name)
}

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d+),(\d+)\]\[(\d+),(\d+)\]").expect("static regex")
    })
}

/// `[left,top][right,bottom]`; anything else yields `None`.
pub fn parse_bounds(bounds: &str) -> Option<Geometry> {
    let caps = bounds_regex().captures(bounds)?;
    let mut values = [0i64; 4];
    for (slot, index) in values.iter_mut().zip(1..=4) {
        *slot = caps.get(index)?.as_str().parse().ok()?;
    }
    let [left, top, right, bottom] = values;
    Some(Geometry {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}

pub(crate) fn escape_markup(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

impl HierarchyNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        find_attr(&self.attributes, name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.children.iter().filter_map(|child| match child {
            HierarchyChild::Element(node) => Some(node),
            HierarchyChild::Text { .. } => None,
        })
    }

    /// Compact XML, children nested in document order. Attributes whose names are not valid
    /// XML names are left out.
    pub fn to_xml(&self) -> String {
        let mut output = String::new();
        self.write_xml(&mut output);
        output
    }

    fn write_xml(&self, output: &mut String) {
        output.push('<');
        output.push_str(&self.tag);
        for (name, value) in self.attributes.iter().filter(|(name, _)| is_xml_name(name)) {
            let _ = write!(output, " {}=\"{}\"", name, escape_markup(value));
        }
        output.push('>');
        for child in &self.children {
            match child {
                HierarchyChild::Element(node) => node.write_xml(output),
                HierarchyChild::Text { text } => output.push_str(&escape_markup(text)),
            }
        }
        output.push_str("</");
        output.push_str(&self.tag);
        output.push('>');
    }

    /// Deepest element containing the point. Later siblings are drawn on top and win.
    pub fn hit_test(&self, x: i64, y: i64) -> Option<&HierarchyNode> {
        for child in self.elements().collect::<Vec<_>>().into_iter().rev() {
            if let Some(hit) = child.hit_test(x, y) {
                return Some(hit);
            }
        }
        self.geometry
            .filter(|geometry| geometry.contains(x, y))
            .map(|_| self)
    }

    pub fn find_by_attribute(&self, name: &str, value: &str) -> Vec<&HierarchyNode> {
        let mut found = Vec::new();
        self.collect_matching(name, value, &mut found);
        found
    }

    fn collect_matching<'a>(&'a self, name: &str, value: &str, found: &mut Vec<&'a HierarchyNode>) {
        if self.attribute(name) == Some(value) {
            found.push(self);
        }
        for child in self.elements() {
            child.collect_matching(name, value, found);
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.elements().map(HierarchyNode::node_count).sum::<usize>()
    }
}
