//! Turning a model's free-form reply into structured fields.
//!
//! Models are asked for JSON but often wrap it in a fenced block, return tags
//! as a comma string instead of a list, or ignore the format entirely. The
//! parser accepts all of these and falls back to scanning for labelled lines.

use serde_json::Value;

use super::ApiError;

/// Characters a fallback description is cut to.
const FALLBACK_DESCRIPTION_CHARS: usize = 200;

const LIST_DELIMITERS: [char; 5] = [',', '，', '、', ';', '\n'];

/// Fields recovered from a reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionReply {
    pub description: String,
    pub objects: Vec<String>,
    pub colors: Vec<String>,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

/// Strip an optional ```` ``` ```` / ```` ```json ```` fence around the reply.
pub fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        if let Some(start) = trimmed.find('\n') {
            let after_first_line = &trimmed[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim();
            }
        }
    }

    trimmed
}

/// Split a delimited string into trimmed, non-empty, de-duplicated items.
/// The first occurrence of a repeated item keeps its position.
pub fn normalize_list(text: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in text.split(LIST_DELIMITERS) {
        push_unique(&mut items, item);
    }
    items
}

/// Like [`normalize_list`] but for a JSON value that may be a string, a list
/// of strings, or missing.
pub fn normalize_value(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => normalize_list(s),
        Some(Value::Array(values)) => {
            let mut items: Vec<String> = Vec::new();
            for value in values {
                match value {
                    Value::String(s) => push_unique(&mut items, s),
                    Value::Number(n) => push_unique(&mut items, &n.to_string()),
                    _ => {}
                }
            }
            items
        }
        _ => Vec::new(),
    }
}

fn push_unique(items: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if !item.is_empty() && !items.iter().any(|existing| existing == item) {
        items.push(item.to_string());
    }
}

fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a reply, trying JSON first and the labelled-line scan second.
pub fn parse_reply(content: &str) -> Result<VisionReply, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::Parse("empty reply".to_string()));
    }

    let reply = match serde_json::from_str::<Value>(extract_json(content)) {
        Ok(Value::Object(object)) => VisionReply {
            description: string_field(&object, "description").unwrap_or_default(),
            objects: normalize_value(object.get("objects")),
            colors: normalize_value(object.get("colors")),
            mood: string_field(&object, "mood"),
            tags: normalize_value(object.get("tags")),
            category: string_field(&object, "category"),
        },
        _ => parse_lines(content).ok_or_else(|| {
            ApiError::Refusal(format!(
                "unstructured reply: {}",
                content.trim().chars().take(80).collect::<String>()
            ))
        })?,
    };

    if reply.description.is_empty() && reply.tags.is_empty() {
        return Err(ApiError::Parse(
            "reply carried neither a description nor tags".to_string(),
        ));
    }
    Ok(reply)
}

/// Permissive scan for `description:` and `tags:` lines. `None` when the
/// reply has neither label, which is how prose refusals read.
fn parse_lines(content: &str) -> Option<VisionReply> {
    let mut description = String::new();
    let mut tags = Vec::new();
    let mut labelled = false;

    for line in content.lines() {
        let lower = line.to_lowercase();
        let value = || {
            line.split_once([':', '：'])
                .map(|(_, rest)| rest.trim())
                .unwrap_or("")
        };
        if lower.contains("description") || line.contains("描述") {
            description = value().to_string();
            labelled = true;
        } else if lower.contains("tags") || line.contains("标签") {
            tags = normalize_list(value());
            labelled = true;
        }
    }
    if !labelled {
        return None;
    }

    if description.is_empty() {
        description = content
            .trim()
            .chars()
            .take(FALLBACK_DESCRIPTION_CHARS)
            .collect();
    }

    Some(VisionReply {
        description,
        tags,
        ..Default::default()
    })
}
