//! Hook event input model.
//!
//! One JSON object arrives per intercepted tool call. The shape of
//! `tool_input` depends on the tool, so it stays a raw value with typed
//! accessors rather than a field-per-tool struct.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_result: Option<Value>,
}

/// Coarse classification of the intercepted tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Sub-agent delegation (carries target agent + free-text prompt).
    Delegation,
    /// Shell command execution (carries command string + captured result).
    Shell,
    /// File write or edit (carries target path).
    FileWrite,
    /// Named skill / slash-command invocation.
    Skill,
    Other,
}

impl HookEvent {
    /// Parse one event from raw JSON. `None` on malformed input (fail-open).
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn kind(&self) -> EventKind {
        match self.tool_name.as_str() {
            "Task" => EventKind::Delegation,
            "Bash" => EventKind::Shell,
            "Write" | "Edit" | "MultiEdit" => EventKind::FileWrite,
            "Skill" | "SlashCommand" => EventKind::Skill,
            _ => EventKind::Other,
        }
    }

    fn input_str(&self, key: &str) -> Option<&str> {
        self.tool_input.get(key).and_then(Value::as_str)
    }

    /// Target agent of a delegation call.
    pub fn delegated_agent(&self) -> Option<&str> {
        self.input_str("subagent_type")
            .or_else(|| self.input_str("agent"))
    }

    /// Free text attached to the call: delegation prompt/description,
    /// skill arguments, or the command string itself.
    pub fn prompt_text(&self) -> String {
        let mut parts = Vec::new();
        for key in ["prompt", "description", "args", "command"] {
            if let Some(s) = self.input_str(key) {
                parts.push(s);
            }
        }
        parts.join(" ")
    }

    pub fn command(&self) -> Option<&str> {
        self.input_str("command")
    }

    pub fn file_path(&self) -> Option<&str> {
        self.input_str("file_path").or_else(|| self.input_str("path"))
    }

    pub fn skill_name(&self) -> Option<&str> {
        self.input_str("skill").or_else(|| self.input_str("skill_name"))
    }

    /// Exit code from a captured shell result, if the host supplied one.
    pub fn exit_code(&self) -> Option<i64> {
        let result = self.tool_result.as_ref()?;
        result
            .get("exit_code")
            .or_else(|| result.get("exitCode"))
            .and_then(Value::as_i64)
    }

    /// Captured stdout/stderr text from the tool result.
    pub fn result_output(&self) -> String {
        let Some(result) = self.tool_result.as_ref() else {
            return String::new();
        };
        if let Some(s) = result.as_str() {
            return s.to_string();
        }
        let mut out = String::new();
        for key in ["output", "stdout", "stderr"] {
            if let Some(s) = result.get(key).and_then(Value::as_str) {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(s);
            }
        }
        out
    }
}
