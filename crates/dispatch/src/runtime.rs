//! Isolated runtime port for code payloads.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use taskloom_core::{node_id, ContainerConfig, NodeFailure};
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything an isolated runtime needs to run one payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Runtime image
    pub image: String,
    /// Wall-clock limit
    pub timeout: Duration,
    /// Memory ceiling in MiB
    pub memory_limit_mb: u64,
    /// Packages to install first
    pub dependencies: Vec<String>,
    /// Payload
    pub code: String,
    /// Gathered inputs, as a JSON object
    pub inputs: Value,
}

impl ContainerRequest {
    /// Build a request from a node's container settings.
    pub fn new(config: &ContainerConfig, code: impl Into<String>, inputs: Value) -> Self {
        Self {
            image: config.image.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            memory_limit_mb: config.memory_limit_mb,
            dependencies: config.dependencies.clone(),
            code: code.into(),
            inputs,
        }
    }
}

/// An isolated, resource-bounded code runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run a payload and return its output.
    async fn run(&self, request: ContainerRequest) -> Result<Value, NodeFailure>;
}

/// Runs payloads with `docker run`.
///
/// Inputs are passed as JSON in `TASKLOOM_INPUTS`. The last stdout line is
/// parsed as JSON when possible, otherwise returned as a string.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerRuntime {
    /// Use a different container CLI (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments of the `run` invocation. The container is named so it can be
    /// killed when the wait times out.
    fn run_args(&self, request: &ContainerRequest, name: &str) -> Vec<String> {
        let mut script = String::new();
        if !request.dependencies.is_empty() {
            script.push_str("pip install -q --disable-pip-version-check ");
            script.push_str(&request.dependencies.join(" "));
            script.push_str(" >/dev/null && ");
        }
        script.push_str("python -c \"$TASKLOOM_CODE\"");

        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            name.into(),
            "--memory".into(),
            format!("{}m", request.memory_limit_mb),
            "-e".into(),
            "TASKLOOM_CODE".into(),
            "-e".into(),
            "TASKLOOM_INPUTS".into(),
        ];
        if request.dependencies.is_empty() {
            args.push("--network".to_string());
            args.push("none".to_string());
        }
        args.push(request.image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(script);
        args
    }

    fn command(&self, request: &ContainerRequest, name: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(self.run_args(request, name))
            .env("TASKLOOM_CODE", &request.code)
            .env("TASKLOOM_INPUTS", request.inputs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Stop a container whose client was abandoned.
    async fn kill(&self, name: &str) {
        let result = Command::new(&self.binary)
            .arg("kill")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {
                debug!(container = name, "Killed timed-out container")
            }
            Ok(status) => warn!(container = name, %status, "Container kill failed"),
            Err(e) => warn!(container = name, "Container kill failed: {}", e),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, request: ContainerRequest) -> Result<Value, NodeFailure> {
        let name = node_id("taskloom");
        debug!(
            image = %request.image,
            container = %name,
            deps = request.dependencies.len(),
            "Starting container"
        );

        let mut command = self.command(&request, &name);
        let output = match tokio::time::timeout(request.timeout, command.output()).await {
            Ok(output) => output.map_err(|e| {
                NodeFailure::new("RuntimeError", format!("failed to start runtime: {}", e))
            })?,
            Err(_) => {
                self.kill(&name).await;
                return Err(NodeFailure::new(
                    "TimeoutError",
                    format!("execution exceeded {}s", request.timeout.as_secs()),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parse_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_output(&stdout))
    }
}

/// Interpret runtime stdout: the last non-empty line, as JSON when it parses.
pub fn parse_output(stdout: &str) -> Value {
    match stdout.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => serde_json::from_str(line.trim())
            .unwrap_or_else(|_| Value::String(line.trim().to_string())),
        None => Value::Null,
    }
}

/// Turn a traceback into a typed failure.
pub fn parse_failure(stderr: &str) -> NodeFailure {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    let (error_re, line_re) = PATTERNS.get_or_init(|| {
        (
            Regex::new(r"^(\w+(?:Error|Exception|Exit|Interrupt|Warning)): ?(.*)$").unwrap(),
            Regex::new(r#"File "<string>", line (\d+)"#).unwrap(),
        )
    });

    let mut failure = stderr
        .lines()
        .rev()
        .find_map(|l| error_re.captures(l.trim()))
        .map(|caps| NodeFailure::new(&caps[1], &caps[2]))
        .unwrap_or_else(|| {
            let message = stderr.trim();
            NodeFailure::new(
                "RuntimeError",
                if message.is_empty() { "runtime exited with an error" } else { message },
            )
        });

    failure.line = line_re
        .captures_iter(stderr)
        .last()
        .and_then(|caps| caps[1].parse().ok());
    failure
}
