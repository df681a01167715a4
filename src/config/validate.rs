//! Configuration validation with unknown field detection.

use serde_json::{Map, Value};

/// Known top-level config sections.
const KNOWN_TOP_LEVEL: &[&str] = &["agent", "bus", "plugins", "providers", "logging", "catalog"];

/// Known fields of each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    (
        "agent",
        &[
            "name",
            "timezone",
            "utc_offset_hours",
            "history_limit",
            "context_turns",
            "planner_temperature",
            "retry_temperature",
            "synthesis_temperature",
            "max_tokens",
            "query_term_limit",
            "data_dir",
        ],
    ),
    ("bus", &["history_size"]),
    ("plugins", &["dir", "hot_reload", "config"]),
    ("providers", &["default", "openai", "ollama"]),
    ("logging", &["format", "level", "file"]),
    ("catalog", &["modules", "rules", "output_format", "examples"]),
];

const KNOWN_PROVIDER_FIELDS: &[&str] = &["api_key", "api_base", "model"];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Levenshtein distance over chars, for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        prev = row;
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn check_keys(obj: &Map<String, Value>, known: &[&str], prefix: &str, out: &mut Vec<Diagnostic>) -> bool {
    let mut clean = true;
    for key in obj.keys() {
        if known.contains(&key.as_str()) {
            continue;
        }
        clean = false;
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let message = match suggest_field(key, known) {
            Some(hint) => format!("Unknown field '{}' ({})", key, hint),
            None => format!("Unknown field '{}'", key),
        };
        out.push(Diagnostic::new(DiagnosticLevel::Error, path, message));
    }
    clean
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let Some(obj) = raw.as_object() else {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "",
            "Config must be a JSON object",
        ));
        return diagnostics;
    };
    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let mut clean = check_keys(obj, KNOWN_TOP_LEVEL, "", &mut diagnostics);
    for (section, fields) in KNOWN_SECTIONS {
        if let Some(inner) = obj.get(*section).and_then(Value::as_object) {
            clean &= check_keys(inner, fields, section, &mut diagnostics);
        }
    }

    let providers = obj.get("providers").and_then(Value::as_object);
    for name in ["openai", "ollama"] {
        if let Some(entry) = providers.and_then(|p| p.get(name)).and_then(Value::as_object) {
            clean &= check_keys(entry, KNOWN_PROVIDER_FIELDS, &format!("providers.{}", name), &mut diagnostics);
        }
    }

    if clean {
        diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "All fields recognized"));
    }

    if let Some(providers) = providers {
        let has_key = providers
            .get("openai")
            .and_then(|o| o.get("api_key"))
            .and_then(Value::as_str)
            .is_some_and(|k| !k.is_empty());
        if providers.contains_key("openai") && !has_key {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                "providers.openai.api_key",
                "Missing (the provider will not be registered)",
            ));
        }
        if let Some(default) = providers.get("default").and_then(Value::as_str) {
            let configured = match default {
                "openai" => has_key,
                other => providers.contains_key(other),
            };
            if !configured {
                diagnostics.push(Diagnostic::new(
                    DiagnosticLevel::Error,
                    "providers.default",
                    format!("'{}' is not a configured provider", default),
                ));
            }
        }
    }

    if let Some(agent) = obj.get("agent").and_then(Value::as_object) {
        let limit = agent.get("history_limit").and_then(Value::as_u64);
        let turns = agent.get("context_turns").and_then(Value::as_u64);
        if let (Some(limit), Some(turns)) = (limit, turns) {
            if turns > limit {
                diagnostics.push(Diagnostic::new(
                    DiagnosticLevel::Warn,
                    "agent.context_turns",
                    format!("Larger than history_limit ({}); only {} turns are kept", limit, limit),
                ));
            }
        }
    }

    diagnostics
}
