use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use homeagent_core::DeclaredTool;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{safe_truncate, CapabilityProvider, ToolOutcome};

/// Out-of-process capability provider.
///
/// Each call spawns the command, writes `{tool, arguments, config}` as JSON
/// on stdin and reads a `ToolOutcome` from stdout. Any other JSON on stdout
/// is taken as a successful result; plain text becomes `{"output": ...}`.
pub struct ProcessProvider {
    module_id: String,
    command: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    tools: Vec<DeclaredTool>,
    config: Map<String, Value>,
}

impl ProcessProvider {
    pub fn new(module_id: &str, command: impl Into<PathBuf>) -> Self {
        Self {
            module_id: module_id.to_string(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: Duration::from_secs(30),
            tools: Vec::new(),
            config: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tools(mut self, tools: Vec<DeclaredTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    async fn run(&self, input: String) -> ToolOutcome {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolOutcome::unreachable(format!(
                    "failed to spawn '{}': {}",
                    self.command.display(),
                    e
                ))
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                return ToolOutcome::unreachable(format!("failed to write to process stdin: {}", e));
            }
        }

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => return ToolOutcome::unreachable(format!("process execution failed: {}", e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolOutcome::error(format!(
                "process exited with code {:?}: {}",
                output.status.code(),
                safe_truncate(stderr.trim(), 500)
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(stdout.trim())
    }
}

fn parse_output(stdout: &str) -> ToolOutcome {
    match serde_json::from_str::<Value>(stdout) {
        Ok(value) => match serde_json::from_value::<ToolOutcome>(value.clone()) {
            Ok(outcome) => outcome,
            Err(_) => ToolOutcome::success(value),
        },
        Err(_) => ToolOutcome::success(json!({ "output": stdout })),
    }
}

#[async_trait]
impl CapabilityProvider for ProcessProvider {
    fn tools(&self) -> Vec<DeclaredTool> {
        self.tools.clone()
    }

    async fn execute(&self, tool: &str, args: Map<String, Value>) -> ToolOutcome {
        let input = json!({
            "tool": tool,
            "arguments": args,
            "config": self.config,
        })
        .to_string();

        debug!(module = %self.module_id, tool, "Invoking process handler");
        match tokio::time::timeout(self.timeout, self.run(input)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(module = %self.module_id, tool, timeout = ?self.timeout, "Process handler timed out");
                ToolOutcome::unreachable(format!(
                    "'{}' did not answer within {}s",
                    self.module_id,
                    self.timeout.as_secs_f32()
                ))
            }
        }
    }
}
