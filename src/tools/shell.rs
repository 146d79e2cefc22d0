//! Shell 工具：在工作目录中执行命令，默认需要人工审批
//!
//! allowed_commands 非空时只允许首词在白名单内；无论如何都拦截明显危险的子串。
//! 输出过长时截断，避免撑爆上下文。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::llm::truncate_chars;
use crate::tools::Tool;

/// 禁止的子串（即使首词在白名单中）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    ":(){ :|:& };:",
];

/// 单次输出保留的最大字符数
const MAX_OUTPUT_CHARS: usize = 8000;

pub struct ShellTool {
    workdir: PathBuf,
    allowed_commands: HashSet<String>,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(workdir: impl AsRef<Path>, allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            allowed_commands: allowed_commands
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(bad) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("Forbidden pattern: {}", bad));
        }
        let name = lower.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if !self.allowed_commands.is_empty() && !self.allowed_commands.contains(name) {
            return Err(format!("Command '{}' not in allowlist", name));
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory. Requires user approval."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command line to run" }
            },
            "required": ["command"]
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.check(command)?;

        tracing::info!(command = %command, "shell tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.workdir).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "Exit {:?}\nstderr: {}",
                output.status.code(),
                truncate_chars(stderr.trim(), MAX_OUTPUT_CHARS)
            ));
        }
        let combined = if stderr.trim().is_empty() {
            stdout.to_string()
        } else {
            format!("{}\nstderr: {}", stdout.trim(), stderr.trim())
        };
        Ok(truncate_chars(&combined, MAX_OUTPUT_CHARS))
    }
}
