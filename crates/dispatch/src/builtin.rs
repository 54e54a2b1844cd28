//! Built-in executors.

use crate::executor::{NodeExecutor, NodeInputs, RunContext};
use crate::runtime::{ContainerRequest, ContainerRuntime};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::{ContainerConfig, NodeDefinition, NodeFailure};
use taskloom_safety::SafetyValidator;
use tracing::debug;

fn inputs_object(inputs: &NodeInputs) -> Value {
    Value::Object(
        inputs
            .iter()
            .map(|(id, value)| (id.clone(), value.clone().unwrap_or(Value::Null)))
            .collect(),
    )
}

/// Emits the run inputs.
pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        _inputs: &NodeInputs,
        ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        Ok(ctx.inputs.clone())
    }
}

/// Collects upstream outputs into one object.
pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        inputs: &NodeInputs,
        _ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        Ok(inputs_object(inputs))
    }
}

/// Reshapes data without running code.
///
/// With `value` in its config the node emits that constant. With `pointer`
/// it emits the JSON-pointer lookup into its inputs object (a missing path is
/// a `KeyError`). Otherwise it passes its inputs through as one object.
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &NodeInputs,
        _ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        if let Some(value) = node.config.get("value") {
            return Ok(value.clone());
        }

        let merged = inputs_object(inputs);
        match node.config_str("pointer") {
            Some(pointer) => merged.pointer(pointer).cloned().ok_or_else(|| {
                NodeFailure::new("KeyError", format!("no value at '{}'", pointer))
            }),
            None => Ok(merged),
        }
    }
}

/// Counts iterations. Continues while `iteration + 1 < times` (config,
/// default 1).
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        _inputs: &NodeInputs,
        ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        let times = node.config_u64("times").unwrap_or(1);
        Ok(json!({
            "iteration": ctx.iteration,
            "continue": u64::from(ctx.iteration) + 1 < times,
        }))
    }
}

/// Performs an HTTP request.
///
/// Config: `url` (required), `method` (default GET), `headers` (object),
/// `body` (JSON), `timeout_secs`.
pub struct HttpExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpExecutor {
    /// Create an executor with a default timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl NodeExecutor for HttpExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        _inputs: &NodeInputs,
        _ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        let url = node
            .config_str("url")
            .ok_or_else(|| NodeFailure::new("ValueError", "http node has no url"))?;
        let method = node.config_str("method").unwrap_or("GET").to_uppercase();
        let timeout = node
            .config_u64("timeout_secs")
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeFailure::new("ValueError", format!("invalid method {}", method)))?;
        let mut request = self.client.request(method, url).timeout(timeout);

        if let Some(headers) = node.config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        if let Some(body) = node.config.get("body") {
            request = request.json(body);
        }

        debug!(node_id = %node.id, url, "Sending HTTP request");
        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() { "TimeoutError" } else { "ConnectionError" };
            NodeFailure::new(kind, e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeFailure::new("ConnectionError", e.to_string()))?;

        if !status.is_success() {
            return Err(NodeFailure::new(
                "HTTPError",
                format!("{} returned {}", url, status),
            ));
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}

/// Runs code payloads in the container runtime after a safety check.
/// Payloads never run in-process.
pub struct CodeExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    validator: SafetyValidator,
    defaults: ContainerConfig,
}

impl CodeExecutor {
    /// Create an executor over a runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            validator: SafetyValidator::default(),
            defaults: ContainerConfig::default(),
        }
    }

    /// Set validator.
    pub fn with_validator(mut self, validator: SafetyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Set container settings used for nodes that carry none.
    pub fn with_defaults(mut self, defaults: ContainerConfig) -> Self {
        self.defaults = defaults;
        self
    }
}

#[async_trait]
impl NodeExecutor for CodeExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &NodeInputs,
        ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        let code = node
            .code
            .as_deref()
            .or_else(|| node.config_str("code"))
            .ok_or_else(|| NodeFailure::new("ValueError", "node has no code payload"))?;

        self.validator
            .check_syntax(code)
            .map_err(|issue| NodeFailure::syntax(issue.message, issue.line, issue.offset))?;
        let report = self.validator.validate(code);
        if !report.is_safe() {
            return Err(NodeFailure::safety(report.to_string()));
        }

        let config = node.container.as_ref().unwrap_or(&self.defaults);
        let mut payload = Map::new();
        payload.insert("inputs".to_string(), inputs_object(inputs));
        payload.insert("run".to_string(), ctx.inputs.clone());
        payload.insert("iteration".to_string(), json!(ctx.iteration));

        self.runtime
            .run(ContainerRequest::new(config, code, Value::Object(payload)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use taskloom_core::NodeType;

    struct RecordingRuntime {
        requests: Mutex<Vec<ContainerRequest>>,
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn run(&self, request: ContainerRequest) -> Result<Value, NodeFailure> {
            self.requests.lock().unwrap().push(request);
            Ok(json!("ran"))
        }
    }

    fn inputs() -> NodeInputs {
        let mut inputs = NodeInputs::new();
        inputs.insert("a".into(), Some(json!({"rows": [1, 2]})));
        inputs.insert("b".into(), None);
        inputs
    }

    #[tokio::test]
    async fn test_start_and_end() {
        let ctx = RunContext::new(json!({"n": 1}));
        let node = NodeDefinition::new("s", NodeType::Start);

        assert_eq!(
            StartExecutor.execute(&node, &NodeInputs::new(), &ctx).await.unwrap(),
            json!({"n": 1})
        );
        assert_eq!(
            EndExecutor.execute(&node, &inputs(), &ctx).await.unwrap(),
            json!({"a": {"rows": [1, 2]}, "b": null})
        );
    }

    #[tokio::test]
    async fn test_transform() {
        let ctx = RunContext::new(Value::Null);

        let constant = NodeDefinition::new("t", NodeType::Transform).with_config("value", json!(7));
        assert_eq!(
            TransformExecutor.execute(&constant, &inputs(), &ctx).await.unwrap(),
            json!(7)
        );

        let pick =
            NodeDefinition::new("t", NodeType::Transform).with_config("pointer", json!("/a/rows/1"));
        assert_eq!(
            TransformExecutor.execute(&pick, &inputs(), &ctx).await.unwrap(),
            json!(2)
        );

        let missing =
            NodeDefinition::new("t", NodeType::Transform).with_config("pointer", json!("/zzz"));
        let failure = TransformExecutor
            .execute(&missing, &inputs(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "KeyError");
    }

    #[tokio::test]
    async fn test_loop_counter() {
        let node = NodeDefinition::new("l", NodeType::Loop).with_config("times", json!(3));
        let ctx = RunContext::new(Value::Null);

        let first = LoopExecutor
            .execute(&node, &NodeInputs::new(), &ctx.at_iteration(1))
            .await
            .unwrap();
        assert_eq!(first["continue"], json!(true));

        let last = LoopExecutor
            .execute(&node, &NodeInputs::new(), &ctx.at_iteration(2))
            .await
            .unwrap();
        assert_eq!(last["continue"], json!(false));
    }

    #[tokio::test]
    async fn test_code_runs_in_runtime() {
        let runtime = Arc::new(RecordingRuntime {
            requests: Mutex::new(Vec::new()),
        });
        let executor = CodeExecutor::new(runtime.clone());
        let node = NodeDefinition::new("c", NodeType::Code).with_code("print(1 + 1)\n");

        let output = executor
            .execute(&node, &inputs(), &RunContext::new(Value::Null))
            .await
            .unwrap();

        assert_eq!(output, json!("ran"));
        let requests = runtime.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].image, "python:3.11-slim");
        assert_eq!(requests[0].inputs["inputs"]["b"], Value::Null);
    }

    #[tokio::test]
    async fn test_code_rejected_before_runtime() {
        let runtime = Arc::new(RecordingRuntime {
            requests: Mutex::new(Vec::new()),
        });
        let executor = CodeExecutor::new(runtime.clone());
        let ctx = RunContext::new(Value::Null);

        let unsafe_node =
            NodeDefinition::new("c", NodeType::Code).with_code("import os\nos.system('ls')\n");
        let failure = executor
            .execute(&unsafe_node, &NodeInputs::new(), &ctx)
            .await
            .unwrap_err();
        assert!(failure.is_safety_violation());

        let broken = NodeDefinition::new("c", NodeType::Code).with_code("def f(:\n");
        let failure = executor
            .execute(&broken, &NodeInputs::new(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "SyntaxError");

        assert!(runtime.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_requires_url() {
        let executor = HttpExecutor::new(Duration::from_secs(1));
        let node = NodeDefinition::new("h", NodeType::Http);
        let failure = executor
            .execute(&node, &NodeInputs::new(), &RunContext::new(Value::Null))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "ValueError");
    }
}
