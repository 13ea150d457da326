//! Text rendering of an [`ElementIndex`] for the planning oracle.

use crate::model::{ElementDescriptor, ElementIndex};

/// Attributes shown inside the pseudo-HTML tag, in this order.
const SHOWN_ATTRIBUTES: &[&str] = &[
    "id",
    "type",
    "name",
    "value",
    "placeholder",
    "href",
    "title",
    "aria-label",
];

#[derive(Debug, Clone)]
pub struct IndexRenderer {
    include_attributes: bool,
    max_text_length: usize,
}

impl Default for IndexRenderer {
    fn default() -> Self {
        Self {
            include_attributes: true,
            max_text_length: 100,
        }
    }
}

impl IndexRenderer {
    pub fn with_attributes(mut self, include: bool) -> Self {
        self.include_attributes = include;
        self
    }

    pub fn with_max_text_length(mut self, len: usize) -> Self {
        self.max_text_length = len;
        self
    }

    /// Header followed by one line per descriptor, indented by depth.
    /// Fresh elements are prefixed with `*`.
    pub fn render(&self, index: &ElementIndex) -> String {
        let mut out = format!(
            "Current URL: {}\nTitle: {}\nTab: {}\nGeneration: {}\n",
            index.url(),
            index.title(),
            index.tab(),
            index.generation()
        );
        if index.is_empty() {
            out.push_str("(no interactive elements)");
            return out;
        }
        out.push_str("Elements (* = new since last step):\n");

        let min_depth = index.iter().map(|el| el.depth).min().unwrap_or(0);
        let lines: Vec<String> = index
            .iter()
            .map(|el| {
                let indent = "  ".repeat(el.depth.saturating_sub(min_depth));
                let marker = if el.fresh { "*" } else { "" };
                format!("{indent}{marker}[{}]{}", el.handle.get(), self.element_repr(el))
            })
            .collect();
        out.push_str(&lines.join("\n"));
        if index.is_truncated() {
            out.push_str("\n... (more elements not shown)");
        }
        out
    }

    fn element_repr(&self, el: &ElementDescriptor) -> String {
        let mut parts = vec![format!("<{}", el.tag)];
        if self.include_attributes {
            for attr in SHOWN_ATTRIBUTES {
                if let Some(value) = el.attributes.get(attr) {
                    let truncated = truncate_text(value, self.max_text_length);
                    if !truncated.is_empty() {
                        parts.push(format!(" {}=\"{}\"", attr, escape_html(&truncated)));
                    }
                }
            }
            if let Some(role) = &el.role {
                parts.push(format!(" role=\"{}\"", escape_html(role)));
            }
            if !el.attributes.enabled {
                parts.push(" disabled".to_string());
            }
            if let Some(expanded) = el.attributes.expanded {
                parts.push(format!(" aria-expanded=\"{expanded}\""));
            }
        }
        parts.push(">".to_string());
        parts.push(escape_html(&truncate_text(&el.text, self.max_text_length)));
        parts.push(format!("</{}>", el.tag));

        if !el.annotations.is_empty() {
            let hints: Vec<String> = el.annotations.iter().map(ToString::to_string).collect();
            parts.push(format!(" {{{}}}", hints.join("; ")));
        }
        parts.join("")
    }
}

/// Trims and truncates on a char boundary, ending in `...` when shortened.
pub(crate) fn truncate_text(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let truncated: String = trimmed.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
