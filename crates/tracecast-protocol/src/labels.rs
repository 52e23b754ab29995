use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use tracecast_types::{basename, truncate_line};

/// Maximum code points in a tool label's detail part.
pub const LABEL_MAX: usize = 80;

#[derive(Debug, Clone, Copy)]
enum RenderMode {
    /// Single-line truncation of the field value
    Truncate,
    /// Last path segment of the field value
    Basename,
}

#[derive(Debug, Clone, Copy)]
struct LabelRule {
    input_field: &'static str,
    secondary_field: Option<&'static str>,
    mode: RenderMode,
}

impl LabelRule {
    const fn truncate(input_field: &'static str) -> Self {
        Self {
            input_field,
            secondary_field: None,
            mode: RenderMode::Truncate,
        }
    }

    const fn file(input_field: &'static str) -> Self {
        Self {
            input_field,
            secondary_field: None,
            mode: RenderMode::Basename,
        }
    }

    const fn with_secondary(input_field: &'static str, secondary: &'static str) -> Self {
        Self {
            input_field,
            secondary_field: Some(secondary),
            mode: RenderMode::Truncate,
        }
    }
}

static RULES: Lazy<HashMap<&'static str, LabelRule>> = Lazy::new(|| {
    HashMap::from([
        ("Bash", LabelRule::truncate("command")),
        ("Read", LabelRule::file("file_path")),
        ("Write", LabelRule::file("file_path")),
        ("Edit", LabelRule::file("file_path")),
        ("NotebookEdit", LabelRule::file("notebook_path")),
        ("Glob", LabelRule::with_secondary("pattern", "path")),
        ("Grep", LabelRule::with_secondary("pattern", "path")),
        ("WebFetch", LabelRule::truncate("url")),
        ("WebSearch", LabelRule::truncate("query")),
        ("Task", LabelRule::truncate("description")),
        ("TodoWrite", LabelRule::truncate("todos")),
    ])
});

/// Derive the human label for a tool call from its name and input.
///
/// Known tools pick a field per the rule table; unknown tools fall back to
/// the truncated JSON of the whole input.
pub fn tool_label(name: &str, input: &Value) -> String {
    let Some(rule) = RULES.get(name) else {
        return format!("{}: {}", name, render_json(input));
    };

    let detail = match input.get(rule.input_field) {
        Some(Value::String(value)) => match rule.mode {
            RenderMode::Truncate => truncate_line(value, LABEL_MAX),
            RenderMode::Basename => basename(value).to_string(),
        },
        Some(other) => render_json(other),
        None => return name.to_string(),
    };

    let secondary = rule
        .secondary_field
        .and_then(|field| input.get(field))
        .and_then(|v| v.as_str());

    match secondary {
        Some(extra) => format!("{}: {} ({})", name, detail, truncate_line(extra, LABEL_MAX)),
        None => format!("{}: {}", name, detail),
    }
}

fn render_json(value: &Value) -> String {
    truncate_line(&value.to_string(), LABEL_MAX)
}
