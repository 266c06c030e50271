//! Heuristic argument repair.
//!
//! Some models request a tool with an empty argument object. For a handful of
//! well-known tools the missing arguments can be guessed from the user's
//! message. This is a narrow fallback, not an inference mechanism: it only
//! runs when the parsed arguments are empty and the tool is one of
//! [`REPAIRABLE_TOOLS`].

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

/// Tools whose empty arguments may be reconstructed.
pub const REPAIRABLE_TOOLS: &[&str] = &["format_code", "calculate", "echo"];

static FENCE_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static EXPRESSION_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static QUOTED_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static ECHO_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Try to rebuild arguments for `tool_name` from the raw user message.
///
/// Returns `None` when the tool is not repairable or nothing usable was found.
pub fn repair_arguments(tool_name: &str, user_message: &str) -> Option<Map<String, Value>> {
    let repaired = match tool_name {
        "format_code" => repair_format_code(user_message),
        "calculate" => repair_calculate(user_message),
        "echo" => repair_echo(user_message),
        _ => return None,
    };
    if repaired.is_some() {
        debug!(tool = %tool_name, "Repaired empty tool arguments from user message");
    }
    repaired
}

fn repair_format_code(message: &str) -> Option<Map<String, Value>> {
    let re = compiled(&FENCE_REGEX, r"(?s)```([A-Za-z0-9_+#-]*)[ \t]*\r?\n(.*?)```")?;
    let caps = re.captures(message)?;
    let code = caps.get(2)?.as_str().trim_end();
    if code.trim().is_empty() {
        return None;
    }

    let mut args = Map::new();
    args.insert("code".to_string(), Value::String(code.to_string()));
    if let Some(language) = caps.get(1).map(|m| m.as_str()).filter(|l| !l.is_empty()) {
        args.insert("language".to_string(), Value::String(language.to_lowercase()));
    }
    Some(args)
}

fn repair_calculate(message: &str) -> Option<Map<String, Value>> {
    let re = compiled(
        &EXPRESSION_REGEX,
        r"[-(]?\d+(?:\.\d+)?(?:\s*[-+*/%^]\s*\(?\s*-?\d+(?:\.\d+)?\s*\)?)+",
    )?;
    let expression = re.find(message)?.as_str().trim();

    let mut args = Map::new();
    args.insert(
        "expression".to_string(),
        Value::String(expression.to_string()),
    );
    Some(args)
}

fn repair_echo(message: &str) -> Option<Map<String, Value>> {
    let quoted = compiled(&QUOTED_REGEX, r#""([^"]+)"|'([^']+)'"#)?;
    let text = match quoted.captures(message) {
        Some(caps) => caps.get(1).or_else(|| caps.get(2))?.as_str().to_string(),
        None => {
            let re = compiled(&ECHO_REGEX, r"(?i)\becho\b[:,]?\s+(.+)")?;
            re.captures(message)?.get(1)?.as_str().trim().to_string()
        }
    };
    if text.is_empty() {
        return None;
    }

    let mut args = Map::new();
    args.insert("message".to_string(), Value::String(text));
    Some(args)
}
