//! Tolerant parsing of planner output.
//!
//! Planner models wrap their JSON in reasoning blocks, code fences or prose,
//! and sometimes split one plan across several objects. [`parse_plan`]
//! recovers whatever JSON objects are present and folds them into a [`Plan`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::Payload;

use super::text::strip_reasoning;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex"));

/// Section used when a proposal does not name one.
pub const DEFAULT_PROFILE_SECTION: &str = "Personal";

/// One planned bus emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub event: String,
    pub data: Payload,
    pub description: String,
}

/// A proposed profile change awaiting user confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub field: String,
    pub value: String,
    pub section: String,
}

/// Parsed planner output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub thinking: String,
    pub steps: Vec<PlanStep>,
    pub response: String,
    pub profile_update: Option<ProfileUpdate>,
}

/// Parse a planner completion.
///
/// Reasoning blocks are removed, fenced blocks replace the text when
/// present, and every balanced `{...}` span that parses as a JSON object is
/// collected. A single object with a `steps` key is used as is. Otherwise
/// steps are concatenated in order, the first non-empty `thinking` and the
/// last non-empty `response` and `profile_update` win. Returns `None` when
/// no object parsed or the merge has neither steps nor a response.
///
/// # Example
/// ```
/// use nexus_agent::orchestrator::parse_plan;
///
/// let raw = "<think>hmm</think>\n```json\n{\"steps\": [], \"response\": \"hola\"}\n```";
/// let plan = parse_plan(raw).unwrap();
/// assert_eq!(plan.response, "hola");
/// assert!(plan.steps.is_empty());
/// ```
pub fn parse_plan(content: &str) -> Option<Plan> {
    let stripped = strip_reasoning(content.trim());

    let blocks: Vec<&str> = CODE_FENCE
        .captures_iter(&stripped)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let joined;
    let raw: &str = if blocks.is_empty() {
        &stripped
    } else {
        joined = blocks.join("\n");
        &joined
    };

    let objects = json_objects(raw);
    match objects.as_slice() {
        [] => None,
        [only] if only.contains_key("steps") => Some(plan_from_object(only)),
        _ => merge_objects(&objects),
    }
}

/// Parse every top-level balanced brace span of `text` that is a JSON object.
///
/// Inside a span, braces within string literals (escapes honoured) do not
/// count. Quotes outside any span are ordinary prose.
fn json_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(Value::Object(obj)) = serde_json::from_str(&text[s..=i]) {
                            objects.push(obj);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn plan_from_object(obj: &Map<String, Value>) -> Plan {
    Plan {
        thinking: string_field(obj, "thinking"),
        steps: obj.get("steps").map(parse_steps).unwrap_or_default(),
        response: string_field(obj, "response"),
        profile_update: obj.get("profile_update").and_then(parse_profile_update),
    }
}

fn merge_objects(objects: &[Map<String, Value>]) -> Option<Plan> {
    let mut plan = Plan::default();

    for obj in objects {
        if let Some(steps) = obj.get("steps") {
            plan.steps.extend(parse_steps(steps));
        }
        let thinking = string_field(obj, "thinking");
        if plan.thinking.is_empty() && !thinking.is_empty() {
            plan.thinking = thinking;
        }
        let response = string_field(obj, "response");
        if !response.is_empty() {
            plan.response = response;
        }
        if let Some(update) = obj.get("profile_update").and_then(parse_profile_update) {
            plan.profile_update = Some(update);
        }
    }

    (!plan.steps.is_empty() || !plan.response.is_empty()).then_some(plan)
}

fn parse_steps(value: &Value) -> Vec<PlanStep> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|step| PlanStep {
            event: string_field(step, "event"),
            data: step
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            description: string_field(step, "description"),
        })
        .collect()
}

/// Empty objects and non-objects are not proposals.
fn parse_profile_update(value: &Value) -> Option<ProfileUpdate> {
    let obj = value.as_object().filter(|o| !o.is_empty())?;
    let section = match string_field(obj, "section") {
        s if s.is_empty() && !obj.contains_key("section") => DEFAULT_PROFILE_SECTION.to_string(),
        s => s,
    };
    Some(ProfileUpdate {
        field: string_field(obj, "field"),
        value: string_field(obj, "value"),
        section,
    })
}

/// String value of `key`; numbers and booleans are stringified, anything else is empty.
fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        _ => String::new(),
    }
}
