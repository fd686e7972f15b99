//! Output extraction.
//!
//! Turns an executor's free-text response into values for a job's declared
//! outputs. Each name is tried against a fixed list of strategies and the
//! first non-empty match wins:
//!
//! 1. `<output name="X">value</output>`
//! 2. `<X>value</X>`
//! 3. `**X**: value`, `X: value` at line start, `- X: value`
//! 4. `the X is value`, `X = value`, ``X: `value` ``
//!
//! When a job has a scratch directory, the executor is asked to write
//! `outputs.json` there instead; [`extract_with_sidecar`] prefers that file.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the sidecar written into a job's scratch directory.
pub const SIDECAR_FILE: &str = "outputs.json";

/// Inline values this long or longer are assumed to be mismatches.
const MAX_INLINE_LEN: usize = 500;

type Strategy = fn(&str, &str) -> Option<String>;

const STRATEGIES: [Strategy; 4] = [structured, tagged, key_value, inline];

/// Extracts declared outputs from response text.
///
/// Names with no non-empty match are absent from the result.
#[must_use]
pub fn extract(response: &str, declared: &[String]) -> BTreeMap<String, String> {
    declared
        .iter()
        .filter_map(|name| {
            STRATEGIES
                .iter()
                .find_map(|strategy| strategy(name, response))
                .map(|value| (name.clone(), value))
        })
        .collect()
}

/// Extracts declared outputs, preferring `<scratch_dir>/outputs.json`.
///
/// The sidecar is used when it exists and holds a JSON object; only its
/// declared keys are kept. Otherwise the response text is searched.
pub async fn extract_with_sidecar(
    response: &str,
    declared: &[String],
    scratch_dir: Option<&Path>,
) -> BTreeMap<String, String> {
    if let Some(dir) = scratch_dir
        && let Some(outputs) = read_sidecar(&dir.join(SIDECAR_FILE), declared).await
    {
        return outputs;
    }
    extract(response, declared)
}

async fn read_sidecar(path: &Path, declared: &[String]) -> Option<BTreeMap<String, String>> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let data: serde_json::Map<String, JsonValue> = match serde_json::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed outputs file");
            return None;
        }
    };
    Some(
        data.iter()
            .filter(|(key, _)| declared.contains(*key))
            .map(|(key, value)| (key.clone(), json_text(value)))
            .collect(),
    )
}

/// Extracts every output from a fenced `json` block or an object with an
/// `outputs` key.
#[must_use]
pub fn extract_json_block(response: &str) -> Option<BTreeMap<String, String>> {
    let fenced = captures(r"(?s)```json\s*\n(.*?)\n```", response)
        .and_then(|json| serde_json::from_str::<JsonValue>(&json).ok())
        .and_then(|data| outputs_object(&data, true));
    if fenced.is_some() {
        return fenced;
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    let candidate = response.get(start..=end)?;
    if !candidate.contains("\"outputs\"") {
        return None;
    }
    serde_json::from_str::<JsonValue>(candidate)
        .ok()
        .and_then(|data| outputs_object(&data, false))
}

fn outputs_object(data: &JsonValue, whole_object_fallback: bool) -> Option<BTreeMap<String, String>> {
    let object = data.as_object()?;
    let outputs = match object.get("outputs") {
        Some(outputs) => outputs.as_object()?,
        None if whole_object_fallback => object,
        None => return None,
    };
    Some(
        outputs
            .iter()
            .map(|(key, value)| (key.clone(), json_text(value)))
            .collect(),
    )
}

/// Text form of a JSON value: strings verbatim, null empty, others as JSON.
fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Prompt text asking for outputs in the tagged format.
#[must_use]
pub fn output_instructions(names: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let tags: Vec<String> = names
        .iter()
        .map(|n| format!("<{n}>your value here</{n}>"))
        .collect();
    let list: Vec<String> = names.iter().map(|n| format!("- {n}")).collect();
    format!(
        "\n\nIMPORTANT: At the end of your response, provide the following outputs in this exact format:\n\n{}\n\nRequired outputs:\n{}\n",
        tags.join("\n"),
        list.join("\n")
    )
}

/// Prompt text asking for outputs to be written to the sidecar file.
#[must_use]
pub fn sidecar_instructions(names: &[String], scratch_dir: &Path) -> String {
    let output_file = scratch_dir.join(SIDECAR_FILE);
    let mut text = String::from("\n## Required Outputs\n");
    text.push_str("After completing the goals, write your outputs to a JSON file.\n\n");
    text.push_str(&format!("**Output file:** `{}`\n\n", output_file.display()));
    text.push_str("The JSON should have these keys:\n");
    for name in names {
        text.push_str(&format!("- `{name}`: (string value)\n"));
    }
    text.push_str("\nExample:\n```json\n{\n");
    for (i, name) in names.iter().enumerate() {
        let comma = if i + 1 < names.len() { "," } else { "" };
        text.push_str(&format!("  \"{name}\": \"your value here\"{comma}\n"));
    }
    text.push_str("}\n```\n");
    text
}

/// First capture group of the first match, trimmed.
fn captures(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn structured(name: &str, response: &str) -> Option<String> {
    let name = regex::escape(name);
    non_empty(captures(
        &format!(r#"(?is)<output\s+name\s*=\s*["']?{name}["']?\s*>(.*?)</output>"#),
        response,
    ))
}

fn tagged(name: &str, response: &str) -> Option<String> {
    let name = regex::escape(name);
    non_empty(captures(&format!(r"(?is)<{name}>(.*?)</{name}>"), response))
}

fn key_value(name: &str, response: &str) -> Option<String> {
    let name = regex::escape(name);
    [
        format!(r"(?i)\*\*{name}\*\*\s*:\s*(.+?)(?:\n|$)"),
        format!(r"(?i)(?:^|\n){name}\s*:\s*(.+?)(?:\n|$)"),
        format!(r"(?i)[-•]\s*{name}\s*:\s*(.+?)(?:\n|$)"),
    ]
    .iter()
    .find_map(|pattern| non_empty(captures(pattern, response)))
}

fn inline(name: &str, response: &str) -> Option<String> {
    let name = regex::escape(name);
    [
        format!(r#"(?i)the\s+{name}\s+is\s+[`"']?(.+?)[`"']?(?:\.|,|\n|$)"#),
        format!(r#"(?i){name}\s*=\s*[`"']?(.+?)[`"']?(?:\.|,|\n|$)"#),
        format!(r"(?i){name}:\s*`(.+?)`"),
    ]
    .iter()
    .find_map(|pattern| {
        captures(pattern, response).filter(|v| !v.is_empty() && v.chars().count() < MAX_INLINE_LEN)
    })
}
