//! Hook output rendering.
//!
//! Control flow is carried entirely through the printed payload: a block
//! prints `{"decision":"block","stopReason":...}` to stdout, advisories go
//! to stderr, and the process always exits with the normal success code.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BlockPayload {
    pub decision: &'static str,
    #[serde(rename = "stopReason")]
    pub stop_reason: String,
}

impl BlockPayload {
    pub fn new(stop_reason: String) -> Self {
        Self {
            decision: "block",
            stop_reason,
        }
    }
}

/// Print the final hook outcome: block payload to stdout, advisories to
/// stderr, nothing at all on a silent allow.
pub fn emit(block: Option<&BlockPayload>, advisories: &[String]) {
    for advisory in advisories {
        eprintln!("{advisory}");
    }
    if let Some(payload) = block {
        match serde_json::to_string(payload) {
            Ok(json) => println!("{json}"),
            // Serialization of two strings cannot realistically fail; fall
            // back to a bare reason so the host still sees a block.
            Err(_) => println!(
                "{{\"decision\":\"block\",\"stopReason\":{:?}}}",
                payload.stop_reason
            ),
        }
    }
}

/// Debug-level note, printed only when PHASEGATE_DEBUG is set.
pub fn debug_note(message: &str) {
    if std::env::var_os("PHASEGATE_DEBUG").is_some() {
        eprintln!("[phasegate debug] {message}");
    }
}

/// Collapse newlines/extra whitespace and bound length for display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_line_bounds_length() {
        let long = "word ".repeat(100);
        let out = compact_line(&long, 20);
        assert!(out.len() <= 23);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_compact_line_collapses_whitespace() {
        assert_eq!(compact_line("a\n  b\t c", 100), "a b c");
    }

    #[test]
    fn test_preview_messages_overflow_marker() {
        let msgs: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
        let out = preview_messages(&msgs, 3, 10);
        assert!(out.contains("m0"));
        assert!(out.contains("(+2 more)"));
    }

    #[test]
    fn test_block_payload_shape() {
        let payload = BlockPayload::new("tests are failing".to_string());
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"decision\":\"block\""));
        assert!(json.contains("\"stopReason\":\"tests are failing\""));
    }
}
