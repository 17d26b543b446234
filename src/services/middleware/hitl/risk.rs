//! Risk Classification
//!
//! Pattern tables that grade pending tool calls as low, medium or high risk:
//!
//! - destructive shell/SQL commands found in command-like arguments
//! - tool names known to modify state or reach outside the process
//! - path arguments that point outside the sandbox virtual root
//!
//! The overall level of a batch is the highest level of any finding.

use std::sync::OnceLock;

use cascade_agent_core::RiskLevel;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::middleware::context::ToolCallRequest;

/// Result of grading a batch of tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reason: String,
    /// One entry per graded call, e.g. `shell: rm -rf build`
    pub operations: Vec<String>,
}

impl RiskAssessment {
    pub fn requires_approval(&self) -> bool {
        self.level.requires_approval()
    }
}

// ============================================================================
// Pattern tables
// ============================================================================

struct CompiledPattern {
    name: &'static str,
    regex: Regex,
}

const DESTRUCTIVE_COMMANDS: &[(&str, &str)] = &[
    ("recursive delete", r"\brm\s+(-[a-zA-Z]*[rRf][a-zA-Z]*\s+)+"),
    ("filesystem format", r"\bmkfs(\.\w+)?\b"),
    ("raw disk write", r"\bdd\s+if="),
    ("power control", r"\b(shutdown|reboot|halt|poweroff)\b"),
    ("world-writable permissions", r"\bchmod\s+(-R\s+)?0?777\b"),
    ("force push", r"\bgit\s+push\b.*(--force\b|\s-f\b)"),
    ("hard reset", r"\bgit\s+reset\s+--hard\b"),
    ("git clean", r"\bgit\s+clean\s+-[a-zA-Z]*f"),
    ("drop table", r"(?i)\bdrop\s+(table|database|schema)\b"),
    ("truncate table", r"(?i)\btruncate\s+table\b"),
    ("unscoped delete", r"(?i)\bdelete\s+from\s+\w+\s*(;|$)"),
    ("fork bomb", r":\(\)\s*\{\s*:\|:&\s*\}\s*;\s*:"),
    ("pipe to shell", r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z)?sh\b"),
    ("device overwrite", r">\s*/dev/(sd[a-z]|nvme\d|disk\d)"),
    ("privilege escalation", r"\bsudo\s+"),
];

fn destructive_patterns() -> &'static Vec<CompiledPattern> {
    static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DESTRUCTIVE_COMMANDS
            .iter()
            .filter_map(|&(name, pattern)| {
                Regex::new(pattern).ok().map(|regex| CompiledPattern { name, regex })
            })
            .collect()
    })
}

/// Argument keys whose values are treated as commands.
const COMMAND_KEYS: &[&str] = &["command", "cmd", "script", "code", "query", "sql"];

/// Argument keys whose values are treated as filesystem paths.
const PATH_KEYS: &[&str] = &[
    "path",
    "paths",
    "file",
    "file_path",
    "files",
    "dir",
    "directory",
    "cwd",
    "source",
    "destination",
    "target",
];

/// Risk carried by the tool name alone.
pub fn tool_name_risk(tool: &str) -> RiskLevel {
    match tool.to_ascii_lowercase().as_str() {
        "delete_file" | "remove_file" | "delete_dir" | "remove_dir" => RiskLevel::High,
        "shell" | "bash" | "execute_command" | "run_command" | "exec" | "terminal" => {
            RiskLevel::Medium
        }
        "write_file" | "edit_file" | "move_file" | "rename_file" | "http_request" | "delegate" => {
            RiskLevel::Medium
        }
        _ => RiskLevel::Low,
    }
}

/// Names of destructive patterns found in `command`.
pub fn destructive_matches(command: &str) -> Vec<&'static str> {
    destructive_patterns()
        .iter()
        .filter(|p| p.regex.is_match(command))
        .map(|p| p.name)
        .collect()
}

/// Whether `raw` stays inside the sandbox rooted at `virtual_root`.
pub fn path_within_sandbox(raw: &str, virtual_root: &str) -> bool {
    let raw = raw.trim();
    let root = virtual_root.trim_end_matches('/');
    if raw.split(['/', '\\']).any(|part| part == "..") {
        return false;
    }
    if raw.starts_with('~') {
        return false;
    }
    if raw.starts_with('/') || raw.starts_with('\\') || raw.get(1..3) == Some(":\\") {
        return raw == root || raw.starts_with(&format!("{root}/"));
    }
    true
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn values_for<'a>(arguments: &'a Value, keys: &[&str]) -> Vec<&'a str> {
    let mut out = Vec::new();
    if let Value::Object(map) = arguments {
        for (key, value) in map {
            if keys.contains(&key.as_str()) {
                collect_strings(value, &mut out);
            }
        }
    }
    out
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() > MAX {
        format!("{}...", line.chars().take(MAX).collect::<String>())
    } else {
        line.to_string()
    }
}

// ============================================================================
// Assessment
// ============================================================================

/// Grade every call in `calls` and fold the findings into one assessment.
pub fn assess_tool_calls(calls: &[ToolCallRequest], virtual_root: &str) -> RiskAssessment {
    let mut level = RiskLevel::Low;
    let mut findings: Vec<String> = Vec::new();
    let mut operations = Vec::with_capacity(calls.len());

    for call in calls {
        let Some(tool) = call.tool_name() else {
            continue;
        };
        let commands = values_for(&call.arguments, COMMAND_KEYS);
        operations.push(match commands.first() {
            Some(command) => format!("{tool}: {}", preview(command)),
            None => tool.to_string(),
        });

        let name_level = tool_name_risk(tool);
        if name_level.requires_approval() {
            findings.push(format!("{tool} is a {} risk tool", name_level.as_str()));
            level = level.max(name_level);
        }

        for command in &commands {
            for name in destructive_matches(command) {
                findings.push(format!("{name} in {tool}"));
                level = RiskLevel::High;
            }
        }

        for path in values_for(&call.arguments, PATH_KEYS) {
            if !path_within_sandbox(path, virtual_root) {
                findings.push(format!("{tool} targets {path} outside the sandbox"));
                level = RiskLevel::High;
            }
        }
    }

    let reason = if findings.is_empty() {
        "no risky operations".to_string()
    } else {
        findings.join("; ")
    };
    RiskAssessment {
        level,
        reason,
        operations,
    }
}
