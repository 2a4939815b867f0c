// src/decision/parser.rs
//! Turns a free-form model answer into a [`DecisionBatch`].
//!
//! Expected shape is a `<reasoning>` block followed by a `<decision>` block
//! holding a JSON array, optionally inside a ```json fence. Nothing here
//! fails: whatever cannot be read becomes a hold-all batch.

use super::types::{Decision, DecisionBatch};
use serde_json::Value;
use tracing::warn;

const REASONING_OPEN: &str = "<reasoning>";
const REASONING_CLOSE: &str = "</reasoning>";
const DECISION_OPEN: &str = "<decision>";
const DECISION_CLOSE: &str = "</decision>";

pub fn parse_response(response: &str) -> DecisionBatch {
    let cleaned = remove_invisible(response);
    let reasoning = extract_reasoning(&cleaned);

    let decisions = match extract_json_array(&cleaned) {
        Some(raw) => {
            let json = repair_punctuation(&raw);
            match validate_json_text(&json).and_then(|_| parse_decisions(&json)) {
                Ok(decisions) => decisions,
                Err(reason) => {
                    warn!(%reason, "decision block rejected, holding");
                    return hold_all_with(reasoning, format!("unreadable decision block: {reason}"));
                }
            }
        }
        None => {
            return hold_all_with(reasoning, "no decision block in response".to_string());
        }
    };

    DecisionBatch {
        reasoning,
        decisions,
    }
}

fn hold_all_with(reasoning: String, reason: String) -> DecisionBatch {
    let mut batch = DecisionBatch::hold_all(reason);
    if !reasoning.trim().is_empty() {
        batch.reasoning = reasoning;
    }
    batch
}

/// Zero-width space, non-joiner, joiner and the byte order mark.
pub(crate) fn remove_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .collect()
}

/// Fullwidth and CJK punctuation that models emit inside JSON.
pub(crate) fn repair_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '［' | '【' => '[',
            '］' | '】' => ']',
            '｛' => '{',
            '｝' => '}',
            '：' => ':',
            '，' => ',',
            '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

/// Text of the `<reasoning>` block, else everything before `<decision>`,
/// else the whole response.
pub(crate) fn extract_reasoning(text: &str) -> String {
    if let Some(inner) = between(text, REASONING_OPEN, REASONING_CLOSE) {
        return inner.trim().to_string();
    }
    if let Some(idx) = text.find(DECISION_OPEN) {
        return text[..idx].trim().to_string();
    }
    text.trim().to_string()
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

/// The decision array: `<decision>` block first, then a ```json fence
/// anywhere, then the first bare `[{` array.
pub(crate) fn extract_json_array(text: &str) -> Option<String> {
    let scope = between(text, DECISION_OPEN, DECISION_CLOSE)
        .or_else(|| text.find(DECISION_OPEN).map(|i| &text[i + DECISION_OPEN.len()..]));

    let candidate = match scope {
        Some(block) => strip_fence(block).unwrap_or(block),
        None => match strip_fence(text) {
            Some(fenced) => fenced,
            None => bare_array(text)?,
        },
    };
    let trimmed = candidate.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn strip_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body = after.strip_prefix("json").unwrap_or(after);
    let end = body.find("```")?;
    Some(&body[..end])
}

fn bare_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = (0..bytes.len()).find(|&i| {
        bytes[i] == b'[' && text[i + 1..].trim_start().starts_with('{')
    })?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Rejects shapes that would otherwise deserialize into wrong numbers.
pub(crate) fn validate_json_text(json: &str) -> Result<(), String> {
    let trimmed = json.trim_start();
    if !trimmed.starts_with('[') {
        return Err("decision payload is not an array".to_string());
    }
    let inner = trimmed[1..].trim_start();
    if !(inner.starts_with('{') || inner.starts_with(']')) {
        return Err("decision payload is not an array of objects".to_string());
    }
    if json.contains('~') {
        return Err("range values are not allowed, use a single number".to_string());
    }
    if has_thousands_separator(json) {
        return Err("numbers must not contain thousands separators".to_string());
    }
    Ok(())
}

fn has_thousands_separator(json: &str) -> bool {
    let bytes = json.as_bytes();
    bytes.windows(5).enumerate().any(|(i, w)| {
        w[0].is_ascii_digit()
            && w[1] == b','
            && w[2].is_ascii_digit()
            && w[3].is_ascii_digit()
            && w[4].is_ascii_digit()
            && bytes.get(i + 5).map_or(true, |b| !b.is_ascii_digit())
    })
}

/// Entries that fail to deserialize (unknown action, wrong types) are dropped.
fn parse_decisions(json: &str) -> Result<Vec<Decision>, String> {
    let values: Vec<Value> = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let mut decisions = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<Decision>(value.clone()) {
            Ok(decision) => decisions.push(decision),
            Err(e) => warn!(entry = %value, error = %e, "dropping malformed decision"),
        }
    }
    Ok(decisions)
}
