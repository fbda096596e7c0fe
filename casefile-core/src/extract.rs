//! Tolerant extraction of structured candidates from raw model output.
//!
//! Model output is supposed to be a JSON object carrying an item array, but it
//! regularly arrives wrapped in a fenced code block, surrounded by commentary, or
//! truncated. Extraction tries progressively looser readings and falls back to an
//! empty list; it never fails.

use crate::document;
use crate::model::{as_text, Candidate};
use serde_json::{Map, Value};

/// Keys that may hold the item array, in priority order.
const ITEM_KEYS: [&str; 4] = ["items", "candidates", "suggestions", "roles"];

/// Extract every candidate from `raw`.
///
/// Returns an empty list when no parseable structure is found.
pub fn extract_candidates(raw: &str) -> Vec<Candidate> {
    let Some(value) = parse_structure(raw) else {
        return Vec::new();
    };

    item_list(&value)
        .iter()
        .enumerate()
        .map(|(index, item)| normalize(index, item))
        .collect()
}

/// Find the first JSON object or array in `raw`.
fn parse_structure(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    parse_container(trimmed)
        .or_else(|| fenced_block(trimmed).and_then(parse_container))
        .or_else(|| outer_braces(trimmed).and_then(parse_container))
}

fn parse_container(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

/// Interior of the first ```` ``` ```` fence, with any language tag dropped.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // The rest of the opening line is the language tag ("json", "JSON", or nothing).
    let body_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_ticks[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(&body[..close])
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn item_list(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => ITEM_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    }
}

/// Turn one raw item into a candidate. Total over every JSON value.
fn normalize(index: usize, item: &Value) -> Candidate {
    let empty = Map::new();
    let (attrs, loose_summary) = match item {
        Value::Object(map) => (map, None),
        Value::String(s) => (&empty, Some(s.clone())),
        _ => (&empty, None),
    };

    let title = first_text(attrs, &["title", "name"])
        .unwrap_or_else(|| format!("候选{}", index + 1));

    let summary = first_text(attrs, &["summary", "detail", "description"]).or(loose_summary);

    let content = match attrs.get("content") {
        Some(obj @ Value::Object(_)) => obj.clone(),
        Some(Value::String(s)) => document::paragraph(s),
        _ => document::paragraph(summary.as_deref().unwrap_or(&title)),
    };

    let risk_flags = attrs
        .get("risk_flags")
        .or_else(|| attrs.get("riskFlags"))
        .map(string_list)
        .unwrap_or_default();

    let refs = attrs.get("refs").map(string_list).unwrap_or_default();

    Candidate {
        target: None,
        title,
        summary,
        content,
        refs,
        risk_flags,
        attributes: attrs.clone(),
    }
}

/// First key holding non-blank scalar text.
fn first_text(attrs: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        attrs
            .get(*k)
            .and_then(as_text)
            .filter(|t| !t.trim().is_empty())
    })
}

/// Coerce every element to a string; a lone scalar becomes a one-element list.
fn string_list(value: &Value) -> Vec<String> {
    let stringify = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match value {
        Value::Array(items) => items.iter().map(stringify).collect(),
        Value::Null => Vec::new(),
        other => vec![stringify(other)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ITEMS: &str = r#"{"items": [{"title": "管家", "summary": "忠诚的老仆"}, {"title": "医生"}]}"#;

    fn titles(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn test_bare_json() {
        assert_eq!(titles(&extract_candidates(ITEMS)), vec!["管家", "医生"]);
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let raw = format!("好的，以下是角色：\n```json\n{ITEMS}\n```\n希望有帮助。");
        assert_eq!(titles(&extract_candidates(&raw)), vec!["管家", "医生"]);
    }

    #[test]
    fn test_fence_without_language_tag() {
        let raw = format!("```\n{ITEMS}\n```");
        assert_eq!(extract_candidates(&raw).len(), 2);
    }

    #[test]
    fn test_trailing_commentary() {
        let raw = format!("{ITEMS}\n\n注意：第二个角色需要补充动机。");
        assert_eq!(titles(&extract_candidates(&raw)), vec!["管家", "医生"]);
    }

    #[test]
    fn test_gibberish_yields_empty() {
        assert!(extract_candidates("the model refused { to answer").is_empty());
        assert!(extract_candidates("").is_empty());
        assert!(extract_candidates("```json\n{\"items\": [\n```").is_empty());
    }

    #[test]
    fn test_alternate_item_keys_and_top_level_array() {
        let raw = r#"{"suggestions": [{"name": "线索A"}]}"#;
        assert_eq!(titles(&extract_candidates(raw)), vec!["线索A"]);

        let raw = r#"[{"title": "x"}, {"title": "y"}]"#;
        assert_eq!(extract_candidates(raw).len(), 2);
    }

    #[test]
    fn test_items_key_preferred_over_roles() {
        let raw = r#"{"roles": [{"title": "r"}], "items": [{"title": "i"}]}"#;
        assert_eq!(titles(&extract_candidates(raw)), vec!["i"]);
    }

    #[test]
    fn test_name_and_detail_fallback() {
        let candidates = extract_candidates(r#"{"items": [{"name": "女仆", "detail": "案发时在花园"}]}"#);
        let candidate = &candidates[0];
        assert_eq!(candidate.title, "女仆");
        assert_eq!(candidate.summary.as_deref(), Some("案发时在花园"));
        assert_eq!(candidate.content, document::paragraph("案发时在花园"));
        assert_eq!(document::plain_text(&candidate.content), "案发时在花园");
    }

    #[test]
    fn test_placeholder_title_and_title_content() {
        let candidates = extract_candidates(
            r#"{"items": [{}, {"title": "  "}, {"title": "", "name": "n"}, {"title": "t"}]}"#,
        );
        assert_eq!(titles(&candidates), vec!["候选1", "候选2", "n", "t"]);
        assert_eq!(candidates[0].summary, None);
        assert_eq!(candidates[3].content, document::paragraph("t"));
    }

    #[test]
    fn test_content_shapes() {
        let doc = json!({"type": "doc", "content": []});
        let raw = json!({"items": [
            {"title": "a", "content": doc},
            {"title": "b", "content": "正文"},
            {"title": "c", "content": 42, "description": "描述"}
        ]})
        .to_string();
        let candidates = extract_candidates(&raw);
        assert_eq!(candidates[0].content, doc);
        assert_eq!(candidates[1].content, document::paragraph("正文"));
        assert_eq!(candidates[2].content, document::paragraph("描述"));
    }

    #[test]
    fn test_risk_flags_coerced_from_either_key() {
        let raw = r#"{"items": [
            {"title": "a", "risk_flags": ["时间冲突", 3, null]},
            {"title": "b", "riskFlags": "P0"},
            {"title": "c"}
        ]}"#;
        let candidates = extract_candidates(raw);
        assert_eq!(candidates[0].risk_flags, vec!["时间冲突", "3", "null"]);
        assert_eq!(candidates[1].risk_flags, vec!["P0"]);
        assert!(candidates[2].risk_flags.is_empty());
    }

    #[test]
    fn test_non_object_items_are_total() {
        let candidates = extract_candidates(r#"{"items": ["只是一句话", 7, null, [1]]}"#);
        assert_eq!(titles(&candidates), vec!["候选1", "候选2", "候选3", "候选4"]);
        assert_eq!(candidates[0].summary.as_deref(), Some("只是一句话"));
        assert_eq!(candidates[0].content, document::paragraph("只是一句话"));
    }

    #[test]
    fn test_attributes_keep_raw_fields() {
        let candidates =
            extract_candidates(r#"{"items": [{"title": "t", "meta": {"motivation": "贪婪"}}]}"#);
        assert_eq!(candidates[0].attributes["meta"]["motivation"], "贪婪");
    }
}
