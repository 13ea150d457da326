//! Ordered pipeline of predicate-guarded annotators.
//!
//! Each stage is a pure function over a descriptor and its neighborhood. A
//! stage only runs when its predicate holds, so stages compose without
//! knowing about each other.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Annotation, ElementDescriptor};

static DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:dd|mm|yyyy)[/.\-](?:dd|mm)[/.\-](?:dd|yyyy|yy)\b")
        .expect("date pattern regex")
});

static CURRENCY_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(USD|EUR|GBP|JPY|CNY|CHF|CAD|AUD|NZD|INR|SEK|NOK|DKK|PLN|CZK|BRL|MXN|ZAR|SGD|HKD)\b",
    )
    .expect("currency code regex")
});

static AMOUNT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(amount|price|cost|total|salary|fee|budget)").expect("amount name regex")
});

const CURRENCY_SYMBOLS: &[(char, &str)] = &[('€', "EUR"), ('£', "GBP"), ('$', "USD"), ('¥', "JPY")];

/// Text around an element that annotators may consult.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Neighborhood {
    /// Text of an associated `<label>`.
    pub label: Option<String>,
    /// Text of the element's siblings, in document order.
    pub siblings: Vec<String>,
}

impl Neighborhood {
    fn texts(&self) -> impl Iterator<Item = &str> {
        self.label
            .iter()
            .map(String::as_str)
            .chain(self.siblings.iter().map(String::as_str))
    }
}

pub trait Annotator: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, element: &ElementDescriptor, context: &Neighborhood) -> bool;

    fn annotate(&self, element: ElementDescriptor, context: &Neighborhood) -> ElementDescriptor;
}

pub struct AnnotatorPipeline {
    stages: Vec<Box<dyn Annotator>>,
}

impl AnnotatorPipeline {
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn with(mut self, stage: impl Annotator + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run(&self, element: ElementDescriptor, context: &Neighborhood) -> ElementDescriptor {
        self.stages.iter().fold(element, |element, stage| {
            if stage.applies(&element, context) {
                stage.annotate(element, context)
            } else {
                element
            }
        })
    }
}

impl Default for AnnotatorPipeline {
    fn default() -> Self {
        Self::empty()
            .with(DateFormatAnnotator)
            .with(CurrencyAnnotator)
            .with(TwoStepSelectAnnotator)
            .with(NativeSelectAnnotator)
    }
}

fn is_text_entry(element: &ElementDescriptor) -> bool {
    match element.tag.as_str() {
        "input" => !matches!(
            element.attributes.get("type"),
            Some("checkbox" | "radio" | "submit" | "button" | "reset" | "file" | "hidden")
        ),
        "textarea" => true,
        _ => matches!(element.role.as_deref(), Some("textbox" | "spinbutton")),
    }
}

fn own_hints(element: &ElementDescriptor) -> impl Iterator<Item = &str> {
    ["placeholder", "aria-label", "title", "name", "id"]
        .into_iter()
        .filter_map(|key| element.attributes.get(key))
}

/// Input whose expected date pattern can be determined.
pub struct DateFormatAnnotator;

impl DateFormatAnnotator {
    fn pattern(element: &ElementDescriptor, context: &Neighborhood) -> Option<String> {
        match element.attributes.get("type") {
            Some("date") => return Some("YYYY-MM-DD".to_string()),
            Some("month") => return Some("YYYY-MM".to_string()),
            Some("datetime-local") => return Some("YYYY-MM-DDTHH:MM".to_string()),
            _ => {}
        }
        own_hints(element)
            .chain(context.texts())
            .find_map(|text| DATE_PATTERN.find(text))
            .map(|m| m.as_str().to_uppercase())
    }
}

impl Annotator for DateFormatAnnotator {
    fn name(&self) -> &'static str {
        "date-format"
    }

    fn applies(&self, element: &ElementDescriptor, context: &Neighborhood) -> bool {
        is_text_entry(element) && Self::pattern(element, context).is_some()
    }

    fn annotate(&self, mut element: ElementDescriptor, context: &Neighborhood) -> ElementDescriptor {
        if let Some(pattern) = Self::pattern(&element, context) {
            element.annotations.insert(Annotation::DateFormat(pattern));
        }
        element
    }
}

/// Numeric input whose name or nearby text mentions a currency.
pub struct CurrencyAnnotator;

impl CurrencyAnnotator {
    fn is_numeric(element: &ElementDescriptor) -> bool {
        matches!(element.attributes.get("type"), Some("number"))
            || matches!(
                element.attributes.get("inputmode"),
                Some("decimal" | "numeric")
            )
            || own_hints(element).any(|hint| AMOUNT_NAME.is_match(hint))
    }

    fn code(element: &ElementDescriptor, context: &Neighborhood) -> Option<String> {
        let texts: Vec<&str> = own_hints(element).chain(context.texts()).collect();
        if let Some(code) = texts
            .iter()
            .find_map(|text| CURRENCY_CODE.captures(text))
            .and_then(|caps| caps.get(1))
        {
            return Some(code.as_str().to_string());
        }
        texts.iter().find_map(|text| {
            CURRENCY_SYMBOLS
                .iter()
                .find(|(symbol, _)| text.contains(*symbol))
                .map(|(_, code)| code.to_string())
        })
    }
}

impl Annotator for CurrencyAnnotator {
    fn name(&self) -> &'static str {
        "currency"
    }

    fn applies(&self, element: &ElementDescriptor, context: &Neighborhood) -> bool {
        is_text_entry(element) && Self::is_numeric(element) && Self::code(element, context).is_some()
    }

    fn annotate(&self, mut element: ElementDescriptor, context: &Neighborhood) -> ElementDescriptor {
        if let Some(code) = Self::code(&element, context) {
            element.annotations.insert(Annotation::Currency(code));
        }
        element
    }
}

/// Custom dropdown widgets that need list-then-choose.
pub struct TwoStepSelectAnnotator;

impl Annotator for TwoStepSelectAnnotator {
    fn name(&self) -> &'static str {
        "two-step-select"
    }

    fn applies(&self, element: &ElementDescriptor, _context: &Neighborhood) -> bool {
        if !element.interactive || element.tag == "select" {
            return false;
        }
        matches!(element.role.as_deref(), Some("combobox" | "listbox"))
            || matches!(
                element.attributes.get("aria-haspopup"),
                Some("listbox" | "menu" | "true")
            )
    }

    fn annotate(&self, mut element: ElementDescriptor, _context: &Neighborhood) -> ElementDescriptor {
        element.annotations.insert(Annotation::TwoStepSelect);
        element
    }
}

pub struct NativeSelectAnnotator;

impl Annotator for NativeSelectAnnotator {
    fn name(&self) -> &'static str {
        "native-select"
    }

    fn applies(&self, element: &ElementDescriptor, _context: &Neighborhood) -> bool {
        element.interactive && element.tag == "select"
    }

    fn annotate(&self, mut element: ElementDescriptor, _context: &Neighborhood) -> ElementDescriptor {
        element.annotations.insert(Annotation::NativeSelect);
        element
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementAttributes;
    use qapilot_core_types::{Handle, NodeId};

    fn input(attrs: &[(&str, &str)]) -> ElementDescriptor {
        ElementDescriptor {
            handle: Handle(1),
            node_id: NodeId(1),
            tag: "input".to_string(),
            role: None,
            text: String::new(),
            attributes: ElementAttributes {
                enabled: true,
                dom: attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            },
            annotations: Default::default(),
            parent: None,
            depth: 0,
            interactive: true,
            fresh: false,
        }
    }

    #[test]
    fn date_pattern_comes_from_placeholder() {
        let el = DateFormatAnnotator.annotate(
            input(&[("placeholder", "dd/mm/yyyy")]),
            &Neighborhood::default(),
        );
        assert!(el.has_annotation(&Annotation::DateFormat("DD/MM/YYYY".into())));
    }

    #[test]
    fn date_annotator_skips_inputs_without_a_pattern() {
        let el = input(&[("name", "start_date")]);
        assert!(!DateFormatAnnotator.applies(&el, &Neighborhood::default()));
    }

    #[test]
    fn currency_from_sibling_text() {
        let el = input(&[("type", "number"), ("name", "amount")]);
        let ctx = Neighborhood {
            label: None,
            siblings: vec!["Amount in EUR".to_string()],
        };
        assert!(CurrencyAnnotator.applies(&el, &ctx));
        let el = CurrencyAnnotator.annotate(el, &ctx);
        assert!(el.has_annotation(&Annotation::Currency("EUR".into())));
    }

    #[test]
    fn currency_requires_a_numeric_field() {
        let el = input(&[("name", "comment")]);
        let ctx = Neighborhood {
            label: Some("Price (USD)".to_string()),
            siblings: vec![],
        };
        assert!(!CurrencyAnnotator.applies(&el, &ctx));
    }

    #[test]
    fn currency_symbol_maps_to_code() {
        let el = input(&[("inputmode", "decimal")]);
        let ctx = Neighborhood {
            label: Some("Total £".to_string()),
            siblings: vec![],
        };
        let el = AnnotatorPipeline::default().run(el, &ctx);
        assert!(el.has_annotation(&Annotation::Currency("GBP".into())));
    }

    #[test]
    fn combobox_needs_two_steps() {
        let mut el = input(&[("aria-haspopup", "listbox")]);
        el.tag = "div".to_string();
        el.role = Some("combobox".to_string());
        let el = AnnotatorPipeline::default().run(el, &Neighborhood::default());
        assert!(el.is_select_like());
        assert!(el.has_annotation(&Annotation::TwoStepSelect));
    }

    #[test]
    fn pipeline_runs_in_declared_order() {
        assert_eq!(
            AnnotatorPipeline::default().names(),
            vec!["date-format", "currency", "two-step-select", "native-select"]
        );
    }
}
