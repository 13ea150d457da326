use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use qapilot_core_types::{NodeId, TabId};
use serde::{Deserialize, Serialize};

/// Layout box of a node in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

fn default_visible() -> bool {
    true
}

fn default_bounds() -> Option<Bounds> {
    Some(Bounds::new(0.0, 0.0, 120.0, 24.0))
}

/// One node of the raw accessibility/DOM tree returned by a snapshot.
///
/// `text` holds the node's own text only; descendant text lives on the
/// children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub node_id: NodeId,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "default_bounds")]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub children: Vec<RawNode>,
}

impl RawNode {
    pub fn new(node_id: u64, tag: impl Into<String>) -> Self {
        Self {
            node_id: NodeId(node_id),
            tag: tag.into().to_ascii_lowercase(),
            role: None,
            text: String::new(),
            attributes: BTreeMap::new(),
            visible: true,
            bounds: default_bounds(),
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: RawNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = RawNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn without_bounds(mut self) -> Self {
        self.bounds = None;
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_disabled(&self) -> bool {
        self.attributes.contains_key("disabled")
            || self.attr("aria-disabled") == Some("true")
    }

    /// Visible, enabled and laid out with a non-empty box.
    pub fn is_interactable(&self) -> bool {
        self.visible && !self.is_disabled() && self.bounds.map_or(false, |b| b.has_area())
    }

    pub fn accepts_text(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.attr("type"),
                Some("checkbox" | "radio" | "submit" | "button" | "reset" | "file" | "hidden")
            ),
            _ => {
                self.attr("contenteditable") == Some("true")
                    || matches!(self.role.as_deref(), Some("textbox" | "searchbox"))
            }
        }
    }

    pub fn find(&self, node: NodeId) -> Option<&RawNode> {
        if self.node_id == node {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(node))
    }

    pub fn find_mut(&mut self, node: NodeId) -> Option<&mut RawNode> {
        if self.node_id == node {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(node))
    }

    /// Looks a node up by its DOM `id` attribute.
    pub fn find_by_dom_id(&self, dom_id: &str) -> Option<&RawNode> {
        if self.attr("id") == Some(dom_id) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_dom_id(dom_id))
    }

    /// Detaches `node` from the subtree. Returns false when it was not present.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let before = self.children.len();
        self.children.retain(|child| child.node_id != node);
        if self.children.len() != before {
            return true;
        }
        self.children.iter_mut().any(|child| child.remove(node))
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        let mut ids = BTreeSet::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut BTreeSet<NodeId>) {
        ids.insert(self.node_id);
        for child in &self.children {
            child.collect_ids(ids);
        }
    }

    /// Own text followed by all descendant text, whitespace-normalised.
    pub fn text_content(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, parts: &mut Vec<&'a str>) {
        let own = self.text.trim();
        if !own.is_empty() {
            parts.push(own);
        }
        for child in &self.children {
            child.collect_text(parts);
        }
    }

    /// Depth-first, document-order walk.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a RawNode, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a RawNode, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visit);
        }
    }
}

/// A complete reading of the active tab.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub tab: TabId,
    pub root: RawNode,
}

/// Network and DOM activity probe used by the stability gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub inflight_requests: u32,
    /// Bumped by the session on every DOM mutation it observes.
    pub mutation_seq: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickOutcome {
    pub opened_tab: Option<TabId>,
}

/// Destination of a tab switch: an existing tab or a fresh one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TabTarget {
    Existing(TabId),
    New,
}

impl From<String> for TabTarget {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("new") {
            TabTarget::New
        } else {
            TabTarget::Existing(TabId(value))
        }
    }
}

impl From<TabTarget> for String {
    fn from(value: TabTarget) -> Self {
        match value {
            TabTarget::Existing(id) => id.0,
            TabTarget::New => "new".to_string(),
        }
    }
}

impl fmt::Display for TabTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabTarget::Existing(id) => write!(f, "{id}"),
            TabTarget::New => f.write_str("new"),
        }
    }
}
