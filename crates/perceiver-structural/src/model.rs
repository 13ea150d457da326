use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use qapilot_core_types::{Generation, Handle, NodeId, TabId};
use serde::{Deserialize, Serialize};

/// Synthetic hint attached by an annotator.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Annotation {
    /// Expected date pattern, e.g. `DD/MM/YYYY`.
    DateFormat(String),
    /// ISO 4217 code the field is denominated in.
    Currency(String),
    /// Non-native dropdown: list the options first, then choose one.
    TwoStepSelect,
    NativeSelect,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::DateFormat(pattern) => write!(f, "date: {pattern}"),
            Annotation::Currency(code) => write!(f, "currency: {code}"),
            Annotation::TwoStepSelect => f.write_str("two-step-select"),
            Annotation::NativeSelect => f.write_str("native-select"),
        }
    }
}

/// Structural state of an element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementAttributes {
    pub enabled: bool,
    pub expanded: Option<bool>,
    pub readonly: bool,
    pub checked: Option<bool>,
    pub required: bool,
    /// DOM attributes worth showing to the oracle, already truncated.
    pub dom: BTreeMap<String, String>,
}

impl ElementAttributes {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.dom.get(key).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub handle: Handle,
    pub node_id: NodeId,
    pub tag: String,
    pub role: Option<String>,
    pub text: String,
    pub attributes: ElementAttributes,
    pub annotations: BTreeSet<Annotation>,
    /// Nearest indexed ancestor.
    pub parent: Option<Handle>,
    pub depth: usize,
    /// Selected because it can be acted on, not only for its text.
    pub interactive: bool,
    /// Absent from the previous generation.
    pub fresh: bool,
}

impl ElementDescriptor {
    pub fn role_or_tag(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.tag)
    }

    /// Human-facing name: visible text, then aria-label, placeholder or name.
    pub fn label(&self) -> &str {
        if !self.text.is_empty() {
            return &self.text;
        }
        ["aria-label", "placeholder", "name", "title"]
            .iter()
            .find_map(|key| self.attributes.get(key))
            .unwrap_or_default()
    }

    pub fn has_annotation(&self, annotation: &Annotation) -> bool {
        self.annotations.contains(annotation)
    }

    /// Driven through the list-options / choose-option pair.
    pub fn is_select_like(&self) -> bool {
        self.has_annotation(&Annotation::TwoStepSelect)
            || self.has_annotation(&Annotation::NativeSelect)
    }
}

/// One published generation of the element index. Read-only once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementIndex {
    generation: Generation,
    url: String,
    title: String,
    tab: TabId,
    elements: BTreeMap<Handle, ElementDescriptor>,
    /// Elements whose node was absent from the previous generation.
    #[serde(default)]
    added: usize,
    truncated: bool,
}

impl ElementIndex {
    pub(crate) fn new(
        generation: Generation,
        url: String,
        title: String,
        tab: TabId,
        elements: BTreeMap<Handle, ElementDescriptor>,
        added: usize,
        truncated: bool,
    ) -> Self {
        Self {
            generation,
            url,
            title,
            tab,
            elements,
            added,
            truncated,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tab(&self) -> &TabId {
        &self.tab
    }

    /// More elements qualified than the configured cap allowed.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn get(&self, handle: Handle) -> Option<&ElementDescriptor> {
        self.elements.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Descriptors in handle order, which is document order.
    pub fn iter(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.elements.values()
    }

    /// Number of elements that appeared since the previous generation.
    /// Unlike [`fresh`](Self::fresh), this is zero when a rebuild finds the
    /// same node set.
    pub fn added(&self) -> usize {
        self.added
    }

    pub fn fresh(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.elements.values().filter(|el| el.fresh)
    }

    pub fn mapping(&self) -> &BTreeMap<Handle, ElementDescriptor> {
        &self.elements
    }

    /// Case-insensitive search over labels.
    pub fn find_text(&self, needle: &str) -> Vec<&ElementDescriptor> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.iter()
            .filter(|el| el.label().to_lowercase().contains(&needle))
            .collect()
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        !self.find_text(needle).is_empty()
    }
}
