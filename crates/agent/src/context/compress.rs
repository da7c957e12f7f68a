//! Tool-result compression.
//!
//! Bulky tool output (command logs, file dumps, JSON payloads) is replaced by
//! a one-paragraph summary that starts with a shape marker:
//!
//! - `Command result:` shell-style output, with the command and exit status
//! - `File read:` file contents, with the path and line/byte counts
//! - `JSON result:` a JSON document, with its top-level shape
//! - `Tool result:` anything else
//!
//! A compressed result is always shorter than half the original.

use std::collections::HashMap;

use aegis_core::message::{Message, Role};
use serde_json::Value;

/// Tool output at or below this many characters is left alone.
pub const COMPRESS_THRESHOLD_CHARS: usize = 200;

const EXCERPT_CHARS: usize = 120;
const MAX_KEYS_LISTED: usize = 5;

const COMMAND_TOOLS: &[&str] = &["shell", "bash", "exec", "run_command", "terminal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Command,
    File,
    Json,
    Other,
}

/// Compress every tool turn in `messages`. Other turns pass through unchanged.
///
/// The arguments of the call that produced each tool turn are looked up
/// through `tool_call_id` so the summary can name the command or path.
pub fn compress_tool_results(messages: &[Message]) -> Vec<Message> {
    let arguments: HashMap<&str, Value> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter())
        .map(|tc| {
            let args = serde_json::from_str(&tc.arguments).unwrap_or(Value::Null);
            (tc.id.as_str(), args)
        })
        .collect();

    messages
        .iter()
        .map(|m| {
            if m.role != Role::Tool {
                return m.clone();
            }
            let args = m
                .tool_call_id
                .as_deref()
                .and_then(|id| arguments.get(id));
            match compress_tool_output(&m.content, m.tool_name.as_deref(), args) {
                Some(compressed) => m.with_content(compressed),
                None => m.clone(),
            }
        })
        .collect()
}

/// Summarize one tool output. `None` when the output is short enough to keep.
pub fn compress_tool_output(
    content: &str,
    tool_name: Option<&str>,
    arguments: Option<&Value>,
) -> Option<String> {
    let original_chars = content.chars().count();
    if original_chars <= COMPRESS_THRESHOLD_CHARS {
        return None;
    }

    // Largest length that is still strictly less than half the original.
    let limit = (original_chars - 1) / 2;
    let lines = content.lines().count();
    let bytes = content.len();
    let arg = |key: &str| arguments.and_then(|a| a.get(key)).and_then(Value::as_str);

    let (header, excerpt) = match detect_shape(content, tool_name, arguments) {
        Shape::Command => {
            let command = arg("command").or_else(|| arg("cmd"));
            let status = exit_status(content)
                .map(|code| format!("exit status {code}"))
                .unwrap_or_else(|| "exit status 0".to_string());
            let header = match command {
                Some(cmd) => format!("Command result: `{cmd}` finished with {status}; {lines} lines, {bytes} bytes."),
                None => format!("Command result: {status}; {lines} lines, {bytes} bytes."),
            };
            (header, Some(("Tail", tail_line(content))))
        }
        Shape::File => {
            let path = arg("path")
                .or_else(|| arg("file_path"))
                .or_else(|| arg("file"))
                .unwrap_or("unknown path");
            let header = format!("File read: {path}; {lines} lines, {bytes} bytes.");
            (header, Some(("Head", head_line(content))))
        }
        Shape::Json => (json_header(content, bytes), None),
        Shape::Other => {
            let name = tool_name.unwrap_or("tool");
            let header = format!("Tool result: {name} returned {lines} lines, {bytes} bytes.");
            (header, Some(("Head", head_line(content))))
        }
    };

    let mut summary = clip_chars(&header, limit).to_string();
    if let Some((label, text)) = excerpt {
        let used = summary.chars().count();
        let overhead = label.len() + 3;
        let room = limit.saturating_sub(used + overhead).min(EXCERPT_CHARS);
        let text = clip_chars(text.trim(), room);
        if !text.is_empty() {
            summary.push_str(&format!(" {label}: {text}"));
        }
    }
    Some(summary)
}

fn detect_shape(content: &str, tool_name: Option<&str>, arguments: Option<&Value>) -> Shape {
    let trimmed = content.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(content.trim()).is_ok()
    {
        return Shape::Json;
    }

    let name = tool_name.unwrap_or_default();
    let has_arg = |key: &str| arguments.and_then(|a| a.get(key)).is_some();

    if COMMAND_TOOLS.contains(&name) || has_arg("command") || exit_status(content).is_some() {
        Shape::Command
    } else if name.contains("file") || has_arg("path") || has_arg("file_path") {
        Shape::File
    } else {
        Shape::Other
    }
}

fn json_header(content: &str, bytes: usize) -> String {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => {
            let keys: Vec<&str> = map.keys().take(MAX_KEYS_LISTED).map(String::as_str).collect();
            let more = if map.len() > MAX_KEYS_LISTED { ", ..." } else { "" };
            format!(
                "JSON result: object with {} keys ({}{more}); {bytes} bytes.",
                map.len(),
                keys.join(", ")
            )
        }
        Ok(Value::Array(items)) => {
            format!("JSON result: array of {} items; {bytes} bytes.", items.len())
        }
        _ => format!("JSON result: {bytes} bytes."),
    }
}

/// Exit status reported in the output, e.g. `[exit code: 2]` or `exit status 1`.
fn exit_status(content: &str) -> Option<i64> {
    let lower = content.to_ascii_lowercase();
    ["exit code", "exit status", "exited with"]
        .iter()
        .find_map(|marker| {
            let pos = lower.rfind(marker)?;
            let rest = lower[pos + marker.len()..]
                .trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace());
            let end = rest
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            rest[..end].parse().ok()
        })
}

fn head_line(content: &str) -> &str {
    content.lines().find(|l| !l.trim().is_empty()).unwrap_or_default()
}

fn tail_line(content: &str) -> &str {
    content
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
}

fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
