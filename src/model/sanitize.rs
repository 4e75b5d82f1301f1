//! Lenient conversion of stored or imported JSON into prompt records.
//!
//! Legacy data was written by several app versions, so individual fields may
//! be missing or carry the wrong type. A record is only rejected when it has
//! no usable identity or content; everything else is coerced or defaulted.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::prompt::{
    normalize_tags, Example, Prompt, PromptConfig, PromptVersion, SavedRun, DEFAULT_CATEGORY,
    MAX_HISTORY, MAX_SAVED_RUNS,
};

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}

fn tags_field(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => {
            normalize_tags(items.iter().filter_map(Value::as_str))
        }
        Some(Value::String(joined)) => normalize_tags(joined.split(',')),
        _ => Vec::new(),
    }
}

fn string_map_field(obj: &Map<String, Value>, key: &str) -> BTreeMap<String, String> {
    match obj.get(key) {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k.clone(), s.clone())),
                Value::Number(n) => Some((k.clone(), n.to_string())),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Deserialize each element of an array field, dropping elements that do not fit
fn array_field<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Vec<T> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Convert one raw record into a valid [`Prompt`].
///
/// Fails when the value is not an object, has no id, or has no string content.
pub fn sanitize_prompt(raw: &Value, now: i64) -> Result<Prompt, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("expected object, got {}", json_type(raw)))?;

    let id = string_field(obj, "id")
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| "missing id".to_string())?;
    let content = match obj.get("content") {
        Some(Value::String(content)) => content.clone(),
        Some(other) => return Err(format!("{id}: content must be a string, got {}", json_type(other))),
        None => return Err(format!("{id}: missing content")),
    };

    let created_at = timestamp_field(obj, "createdAt").unwrap_or(now);
    let updated_at = timestamp_field(obj, "updatedAt").unwrap_or(created_at);

    let mut history: Vec<PromptVersion> = array_field(obj, "history");
    history.truncate(MAX_HISTORY);

    let mut prompt = Prompt {
        id,
        title: string_field(obj, "title").unwrap_or_else(|| "Untitled".to_string()),
        description: string_field(obj, "description").unwrap_or_default(),
        content,
        title_en: string_field(obj, "titleEn"),
        content_en: string_field(obj, "contentEn"),
        title_zh: string_field(obj, "titleZh"),
        content_zh: string_field(obj, "contentZh"),
        system_instruction: string_field(obj, "systemInstruction"),
        examples: array_field::<Example>(obj, "examples"),
        category: string_field(obj, "category").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        tags: tags_field(obj, "tags"),
        secondary_tags: tags_field(obj, "secondaryTags"),
        created_at,
        updated_at: updated_at.max(created_at),
        deleted_at: timestamp_field(obj, "deletedAt"),
        collected_at: timestamp_field(obj, "collectedAt"),
        is_favorite: obj
            .get("isFavorite")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        config: obj
            .get("config")
            .and_then(|c| serde_json::from_value::<PromptConfig>(c.clone()).ok()),
        history,
        saved_runs: Vec::new(),
        last_variable_values: string_map_field(obj, "lastVariableValues"),
    };

    // Re-push oldest first so bounding and the single-checkpoint rule apply
    let runs: Vec<SavedRun> = array_field(obj, "savedRuns");
    for run in runs.into_iter().rev() {
        prompt.push_run(run, MAX_SAVED_RUNS);
    }
    Ok(prompt)
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_record_gets_defaults() {
        let prompt = sanitize_prompt(&json!({"id": "a", "content": "hello"}), 42).unwrap();
        assert_eq!(prompt.title, "Untitled");
        assert_eq!(prompt.category, DEFAULT_CATEGORY);
        assert_eq!(prompt.created_at, 42);
        assert_eq!(prompt.updated_at, 42);
        assert!(prompt.tags.is_empty());
    }

    #[test]
    fn test_present_blank_fields_are_kept() {
        let prompt = sanitize_prompt(
            &json!({"id": "a", "title": "", "content": "", "category": "", "systemInstruction": ""}),
            0,
        )
        .unwrap();
        assert_eq!(prompt.title, "");
        assert_eq!(prompt.category, "");
        assert_eq!(prompt.system_instruction.as_deref(), Some(""));
    }

    #[test]
    fn test_rejects_malformed_records() {
        assert!(sanitize_prompt(&json!("text"), 0).is_err());
        assert!(sanitize_prompt(&json!({"content": "x"}), 0).is_err());
        assert!(sanitize_prompt(&json!({"id": "a"}), 0).is_err());
        let err = sanitize_prompt(&json!({"id": "a", "content": 5}), 0).unwrap_err();
        assert!(err.contains("content"));
    }

    #[test]
    fn test_coerces_legacy_field_shapes() {
        let prompt = sanitize_prompt(
            &json!({
                "id": 17,
                "content": "c",
                "tags": "b, a,b",
                "createdAt": "2024-01-01T00:00:00Z",
                "isFavorite": "yes",
                "examples": [{"input": "i", "output": "o"}, {"bogus": true}],
                "lastVariableValues": {"n": 3, "skip": null}
            }),
            0,
        )
        .unwrap();
        assert_eq!(prompt.id, "17");
        assert_eq!(prompt.tags, vec!["a", "b"]);
        assert_eq!(prompt.created_at, 1_704_067_200_000);
        assert!(!prompt.is_favorite);
        assert_eq!(prompt.examples.len(), 1);
        assert_eq!(prompt.last_variable_values.get("n").map(String::as_str), Some("3"));
        assert_eq!(prompt.last_variable_values.len(), 1);
    }

    #[test]
    fn test_bounds_history_and_runs() {
        let history: Vec<Value> = (0..14)
            .map(|i| json!({"id": format!("h{i}"), "timestamp": i, "title": "t", "content": "c"}))
            .collect();
        let runs: Vec<Value> = (0..55)
            .map(|i| json!({"id": format!("r{i}"), "timestamp": i, "model": "m", "isCheckpoint": true}))
            .collect();
        let prompt = sanitize_prompt(
            &json!({"id": "a", "content": "c", "history": history, "savedRuns": runs}),
            0,
        )
        .unwrap();
        assert_eq!(prompt.history.len(), MAX_HISTORY);
        assert_eq!(prompt.history[0].id, "h0");
        assert_eq!(prompt.saved_runs.len(), MAX_SAVED_RUNS);
        assert_eq!(prompt.saved_runs[0].id, "r0");
        assert_eq!(
            prompt.saved_runs.iter().filter(|r| r.is_checkpoint).count(),
            1
        );
    }
}
