use std::collections::{BTreeMap, BTreeSet, HashMap};

use browser_port::{BrowserSession, PageSnapshot, RawNode};
use parking_lot::Mutex;
use qapilot_core_types::{Generation, Handle, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::annotators::{AnnotatorPipeline, Neighborhood};
use crate::errors::PerceiverError;
use crate::model::{ElementAttributes, ElementDescriptor, ElementIndex};
use crate::render::truncate_text;

/// Interactive element tags that should be indexed.
const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "option", "label", "summary", "details",
];

/// Tags with implicit interactivity based on attributes.
const POTENTIALLY_INTERACTIVE_TAGS: &[&str] = &["div", "span", "li", "tr", "td", "th", "img"];

/// Attributes that indicate interactivity.
const INTERACTIVE_ATTRIBUTES: &[&str] = &[
    "onclick",
    "onmousedown",
    "ontouchstart",
    "role",
    "tabindex",
    "contenteditable",
];

/// ARIA roles that indicate interactivity.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "textbox",
    "combobox",
    "listbox",
    "option",
    "menuitem",
    "tab",
    "switch",
    "slider",
    "spinbutton",
    "searchbox",
];

/// DOM attributes copied onto descriptors.
const KEPT_ATTRIBUTES: &[&str] = &[
    "id",
    "type",
    "name",
    "value",
    "placeholder",
    "href",
    "title",
    "aria-label",
    "aria-haspopup",
    "aria-controls",
    "inputmode",
];

const MAX_SIBLING_HINTS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum number of elements to index.
    pub max_elements: usize,
    /// Maximum depth to traverse.
    pub max_depth: usize,
    /// Maximum text length per element.
    pub max_text_length: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_elements: 500,
            max_depth: 50,
            max_text_length: 100,
        }
    }
}

impl IndexConfig {
    pub fn new(max_elements: usize) -> Self {
        Self {
            max_elements,
            ..Default::default()
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_text_length(mut self, len: usize) -> Self {
        self.max_text_length = len;
        self
    }
}

#[derive(Default)]
struct History {
    generation: Generation,
    previous: Option<PreviousGeneration>,
}

struct PreviousGeneration {
    nodes: BTreeSet<NodeId>,
    fresh: BTreeSet<NodeId>,
}

/// Builds and publishes element index generations for one session.
pub struct IndexBuilder {
    config: IndexConfig,
    pipeline: AnnotatorPipeline,
    history: Mutex<History>,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            pipeline: AnnotatorPipeline::default(),
            history: Mutex::new(History::default()),
        }
    }

    pub fn with_pipeline(mut self, pipeline: AnnotatorPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Generation of the most recently published index; zero before the first.
    pub fn current_generation(&self) -> Generation {
        self.history.lock().generation
    }

    /// Snapshots the session and publishes the next generation.
    ///
    /// Either a complete generation is published or the builder state is left
    /// untouched.
    pub async fn build(&self, session: &dyn BrowserSession) -> Result<ElementIndex, PerceiverError> {
        let snapshot = session.snapshot().await.map_err(|err| {
            warn!(session = %session.session_id(), error = %err, "snapshot failed");
            PerceiverError::from(err)
        })?;
        Ok(self.publish(snapshot))
    }

    /// Indexes an already captured snapshot as the next generation.
    pub fn publish(&self, snapshot: PageSnapshot) -> ElementIndex {
        let (drafts, truncated) = self.collect(&snapshot.root);
        let nodes: BTreeSet<NodeId> = drafts.iter().map(|el| el.node_id).collect();

        let mut history = self.history.lock();
        let added = match &history.previous {
            None => 0,
            Some(prev) => nodes.difference(&prev.nodes).count(),
        };
        let fresh = match &history.previous {
            None => BTreeSet::new(),
            Some(prev) if prev.nodes == nodes => prev.fresh.clone(),
            Some(prev) => nodes.difference(&prev.nodes).copied().collect(),
        };
        let generation = history.generation.next();

        let elements: BTreeMap<Handle, ElementDescriptor> = drafts
            .into_iter()
            .map(|mut el| {
                el.fresh = fresh.contains(&el.node_id);
                (el.handle, el)
            })
            .collect();

        debug!(
            generation = %generation,
            elements = elements.len(),
            fresh = fresh.len(),
            added,
            truncated,
            url = %snapshot.url,
            "published element index"
        );

        history.generation = generation;
        history.previous = Some(PreviousGeneration { nodes, fresh });

        ElementIndex::new(
            generation,
            snapshot.url,
            snapshot.title,
            snapshot.tab,
            elements,
            added,
            truncated,
        )
    }

    fn collect(&self, root: &RawNode) -> (Vec<ElementDescriptor>, bool) {
        let mut labels = HashMap::new();
        root.walk(&mut |node, _| {
            if node.tag == "label" {
                if let Some(target) = node.attr("for") {
                    labels.insert(target.to_string(), node.text_content());
                }
            }
        });

        let mut collector = Collector {
            config: &self.config,
            pipeline: &self.pipeline,
            labels,
            out: Vec::new(),
            next: Handle::FIRST,
            truncated: false,
        };
        collector.visit(
            root,
            Frame {
                depth: 0,
                parent: None,
                siblings: std::slice::from_ref(root),
                enclosing_label: None,
                inside_interactive: false,
            },
        );
        (collector.out, collector.truncated)
    }
}

#[derive(Clone, Copy)]
struct Frame<'a> {
    depth: usize,
    parent: Option<Handle>,
    siblings: &'a [RawNode],
    enclosing_label: Option<&'a RawNode>,
    inside_interactive: bool,
}

struct Collector<'a> {
    config: &'a IndexConfig,
    pipeline: &'a AnnotatorPipeline,
    labels: HashMap<String, String>,
    out: Vec<ElementDescriptor>,
    next: Handle,
    truncated: bool,
}

impl<'a> Collector<'a> {
    fn visit(&mut self, node: &'a RawNode, frame: Frame<'a>) {
        if !node.visible || frame.depth > self.config.max_depth {
            return;
        }

        let interactive = is_interactive(node) && node.is_interactable();
        let significant = !interactive && !frame.inside_interactive && is_text_significant(node);
        let mut parent = frame.parent;

        if interactive || significant {
            if self.out.len() >= self.config.max_elements {
                self.truncated = true;
                return;
            }
            let handle = self.next;
            self.next = handle.next();

            let draft = self.describe(node, handle, &frame, interactive);
            let context = Neighborhood {
                label: self.label_for(node, frame.enclosing_label),
                siblings: self.sibling_hints(node, frame.siblings),
            };
            let annotated = self.pipeline.run(draft, &context);
            self.out.push(annotated);
            parent = Some(handle);
        }

        // Native options are reached through list/choose, not handles.
        if interactive && node.tag == "select" {
            return;
        }

        let enclosing_label = if node.tag == "label" {
            Some(node)
        } else {
            frame.enclosing_label
        };
        for child in &node.children {
            self.visit(
                child,
                Frame {
                    depth: frame.depth + 1,
                    parent,
                    siblings: &node.children,
                    enclosing_label,
                    inside_interactive: frame.inside_interactive || interactive,
                },
            );
        }
    }

    fn describe(
        &self,
        node: &RawNode,
        handle: Handle,
        frame: &Frame<'_>,
        interactive: bool,
    ) -> ElementDescriptor {
        let raw_text = if interactive {
            node.text_content()
        } else {
            node.text.clone()
        };
        let text = truncate_text(&collapse_whitespace(&raw_text), self.config.max_text_length);

        ElementDescriptor {
            handle,
            node_id: node.node_id,
            tag: node.tag.clone(),
            role: node
                .role
                .clone()
                .or_else(|| node.attr("role").map(str::to_string)),
            text,
            attributes: self.structural_attributes(node),
            annotations: Default::default(),
            parent: frame.parent,
            depth: frame.depth,
            interactive,
            fresh: false,
        }
    }

    fn structural_attributes(&self, node: &RawNode) -> ElementAttributes {
        let is_toggle = matches!(node.attr("type"), Some("checkbox" | "radio"));
        ElementAttributes {
            enabled: !node.is_disabled(),
            expanded: node.attr("aria-expanded").map(|v| v == "true"),
            readonly: node.attributes.contains_key("readonly")
                || node.attr("aria-readonly") == Some("true"),
            checked: match node.attr("aria-checked") {
                Some(value) => Some(value == "true"),
                None if is_toggle => Some(node.attributes.contains_key("checked")),
                None => None,
            },
            required: node.attributes.contains_key("required")
                || node.attr("aria-required") == Some("true"),
            dom: KEPT_ATTRIBUTES
                .iter()
                .filter_map(|key| {
                    node.attr(key).map(|value| {
                        (
                            key.to_string(),
                            truncate_text(value, self.config.max_text_length),
                        )
                    })
                })
                .collect(),
        }
    }

    fn label_for(&self, node: &RawNode, enclosing: Option<&RawNode>) -> Option<String> {
        node.attr("id")
            .and_then(|id| self.labels.get(id).cloned())
            .or_else(|| enclosing.map(RawNode::text_content))
            .filter(|text| !text.is_empty())
    }

    fn sibling_hints(&self, node: &RawNode, siblings: &[RawNode]) -> Vec<String> {
        siblings
            .iter()
            .filter(|sibling| sibling.node_id != node.node_id && sibling.visible)
            .map(|sibling| collapse_whitespace(&sibling.text_content()))
            .filter(|text| !text.is_empty())
            .take(MAX_SIBLING_HINTS)
            .map(|text| truncate_text(&text, self.config.max_text_length))
            .collect()
    }
}

fn is_interactive(node: &RawNode) -> bool {
    let tag = node.tag.as_str();
    if INTERACTIVE_TAGS.contains(&tag) {
        return true;
    }

    for attr in INTERACTIVE_ATTRIBUTES {
        if let Some(value) = node.attr(attr) {
            if *attr == "tabindex" && value == "-1" {
                continue;
            }
            if *attr == "role" && !INTERACTIVE_ROLES.contains(&value.to_lowercase().as_str()) {
                continue;
            }
            return true;
        }
    }

    if let Some(role) = &node.role {
        if INTERACTIVE_ROLES.contains(&role.to_lowercase().as_str()) {
            return true;
        }
    }

    POTENTIALLY_INTERACTIVE_TAGS.contains(&tag)
        && (node.attributes.contains_key("data-action")
            || node.attr("class").map_or(false, |c| c.contains("btn")))
}

fn is_text_significant(node: &RawNode) -> bool {
    node.text.chars().filter(|c| !c.is_whitespace()).count() >= 2
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactivity_follows_tags_roles_and_attributes() {
        assert!(is_interactive(&RawNode::new(1, "button")));
        assert!(is_interactive(&RawNode::new(1, "input")));
        assert!(!is_interactive(&RawNode::new(1, "div")));
        assert!(is_interactive(
            &RawNode::new(1, "div").with_attr("onclick", "go()")
        ));
        assert!(is_interactive(&RawNode::new(1, "div").with_role("combobox")));
        assert!(!is_interactive(
            &RawNode::new(1, "div").with_attr("tabindex", "-1")
        ));
        assert!(!is_interactive(
            &RawNode::new(1, "div").with_attr("role", "presentation")
        ));
        assert!(is_interactive(
            &RawNode::new(1, "span").with_attr("class", "btn btn-primary")
        ));
    }

    #[test]
    fn text_significance_needs_two_visible_chars() {
        assert!(is_text_significant(&RawNode::new(1, "p").with_text("Hi")));
        assert!(!is_text_significant(&RawNode::new(1, "p").with_text(" x ")));
    }
}
