//! Decision parsing with a single local repair attempt.
//!
//! Oracles wrap JSON in code fences, leave trailing commas and use
//! `element_index` or the `done` action from older prompt formats. One
//! repair pass normalises those before the output is validated against the
//! closed action schema; whatever still fails is a planner error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::types::AgentDecision;
use crate::errors::AgentError;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[a-zA-Z]*").expect("fence pattern is valid"));

const HANDLE_ALIASES: &[&str] = &["index", "element_index"];

/// Parses raw oracle output into a decision.
///
/// An empty action list is rejected: a decision must either act or
/// terminate.
pub fn parse_decision(raw: &str) -> Result<AgentDecision, AgentError> {
    let decision = match serde_json::from_str::<AgentDecision>(raw.trim()) {
        Ok(decision) => decision,
        Err(first) => {
            debug!(error = %first, "Decision did not parse, attempting repair");
            repair(raw)?
        }
    };
    if decision.actions.is_empty() {
        return Err(AgentError::planner("decision contains no actions"));
    }
    Ok(decision)
}

fn repair(raw: &str) -> Result<AgentDecision, AgentError> {
    let unfenced = CODE_FENCE.replace_all(raw, "");
    let body = outermost_object(&unfenced)
        .ok_or_else(|| AgentError::planner("no JSON object in oracle output"))?;
    let body = strip_trailing_commas(body);

    let mut value: Value = serde_json::from_str(&body)
        .map_err(|err| AgentError::planner(format!("invalid decision JSON: {err}")))?;
    if let Some(actions) = value.get_mut("actions").and_then(Value::as_array_mut) {
        for action in actions.iter_mut().filter_map(Value::as_object_mut) {
            normalise_action(action);
        }
    }
    serde_json::from_value(value)
        .map_err(|err| AgentError::planner(format!("decision does not match schema: {err}")))
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Drops commas that directly precede `}` or `]`, leaving string literals
/// untouched.
fn strip_trailing_commas(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    for (at, ch) in body.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = body[at + 1..].trim_start().chars().next();
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn normalise_action(action: &mut Map<String, Value>) {
    if !action.contains_key("handle") {
        if let Some(handle) = HANDLE_ALIASES.iter().find_map(|alias| action.remove(*alias)) {
            action.insert("handle".to_string(), handle);
        }
    }
    if action.get("action").and_then(Value::as_str) == Some("done") {
        action.insert("action".to_string(), Value::from("terminate"));
        if let Some(success) = action.remove("done_success") {
            action.insert("success".to_string(), success);
        }
        if let Some(summary) = action.remove("done_text") {
            action.insert("summary".to_string(), summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::{ActionKind, SelectTarget};
    use qapilot_core_types::{Generation, Handle};

    #[test]
    fn test_clean_decision_parses() {
        let raw = r#"{
            "thinking": "Submit is [7]",
            "next_goal": "submit",
            "actions": [{"action": "click", "handle": 7}],
            "expect": {"all": ["url_changes"]}
        }"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(
            decision.actions[0].kind,
            ActionKind::Click { handle: Handle(7) }
        );
        assert!(decision.expect.is_some());
    }

    #[test]
    fn test_repair_fences_commas_and_aliases() {
        let raw = "Here you go:\n```json\n{\"thinking\": \"t\", \"actions\": [\
                   {\"action\": \"click\", \"element_index\": 4, \"generation\": 2},\
                   {\"action\": \"list_options\", \"target\": \"Gender\"},\
                   ],}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.actions[0].generation, Some(Generation(2)));
        assert_eq!(
            decision.actions[0].kind,
            ActionKind::Click { handle: Handle(4) }
        );
        assert_eq!(
            decision.actions[1].kind,
            ActionKind::ListOptions {
                target: SelectTarget::Label("Gender".into())
            }
        );
    }

    #[test]
    fn test_repair_leaves_string_contents_alone() {
        let raw = "```json\n{\"thinking\": \"list is [a, ] and map is {b, }\", \
                   \"actions\": [{\"action\": \"scroll\", \"amount\": 100},],}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.thinking, "list is [a, ] and map is {b, }");
        assert_eq!(decision.actions.len(), 1);

        assert_eq!(
            strip_trailing_commas(r#"{"a": "x\", ]", "b": [1, 2, ],}"#),
            r#"{"a": "x\", ]", "b": [1, 2 ]}"#
        );
    }

    #[test]
    fn test_done_maps_to_terminate() {
        let raw = r#"{"actions": [{"action": "done", "done_success": true, "done_text": "ok"}]}"#;
        let decision = parse_decision(&format!("{raw}\n")).unwrap();
        assert_eq!(decision.terminate(), Some((true, "ok")));
        assert!(decision.terminates_immediately());
    }

    #[test]
    fn test_unrepairable_output_is_planner_error() {
        for raw in [
            "I think we should click the button",
            r#"{"actions": [{"action": "hover", "handle": 3}]}"#,
            r#"{"actions": []}"#,
            r#"{"actions": [{"action": "click"}]}"#,
        ] {
            let err = parse_decision(raw).unwrap_err();
            assert!(matches!(err, AgentError::Planner(_)), "{raw}: {err}");
        }
    }
}
