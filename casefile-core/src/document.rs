//! Helpers for the rich-text document payload shared with the editor.
//!
//! Documents are ProseMirror-style JSON trees:
//! `{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"…"}]}]}`.

use serde_json::{json, Value};

/// A document with no blocks.
pub fn empty() -> Value {
    json!({"type": "doc", "content": []})
}

/// A document holding a single paragraph of `text`.
pub fn paragraph(text: &str) -> Value {
    if text.is_empty() {
        return json!({"type": "doc", "content": [{"type": "paragraph"}]});
    }
    json!({
        "type": "doc",
        "content": [{
            "type": "paragraph",
            "content": [{"type": "text", "text": text}]
        }]
    })
}

/// Concatenate every text node, separating blocks with newlines.
pub fn plain_text(doc: &Value) -> String {
    let mut blocks = Vec::new();
    if let Some(content) = doc.get("content").and_then(Value::as_array) {
        for block in content {
            let mut text = String::new();
            collect_text(block, &mut text);
            blocks.push(text);
        }
    } else {
        let mut text = String::new();
        collect_text(doc, &mut text);
        blocks.push(text);
    }
    blocks.join("\n")
}

fn collect_text(node: &Value, out: &mut String) {
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if let Some(children) = node.get("content").and_then(Value::as_array) {
        for child in children {
            collect_text(child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_round_trips_through_plain_text() {
        assert_eq!(plain_text(&paragraph("灯灭时管家在厨房")), "灯灭时管家在厨房");
    }

    #[test]
    fn test_plain_text_joins_blocks() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]},
                {"type": "heading", "content": [{"type": "text", "text": "c"}]}
            ]
        });
        assert_eq!(plain_text(&doc), "ab\nc");
        assert_eq!(plain_text(&empty()), "");
    }
}
