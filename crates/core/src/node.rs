//! Node definitions - the work units of a workflow graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type tag of a node. Resolves to an executor in the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// Entry point of a run
    Start,
    /// Exit point of a run
    End,
    /// Grouping parent; never executes itself
    Group,
    /// Code executed in an isolated runtime
    Container,
    /// Bounded loop construct
    Loop,
    /// HTTP call
    Http,
    /// Database operation
    Database,
    /// Data transform
    Transform,
    /// Code step without a dedicated parent
    Code,
    /// Model invocation
    Llm,
    /// Any other capability tag
    Custom(String),
}

impl NodeType {
    /// The tag string used for registry lookup.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Group => "group",
            Self::Container => "container",
            Self::Loop => "loop",
            Self::Http => "http",
            Self::Database => "database",
            Self::Transform => "transform",
            Self::Code => "code",
            Self::Llm => "llm",
            Self::Custom(tag) => tag,
        }
    }
}

impl From<&str> for NodeType {
    fn from(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "start" => Self::Start,
            "end" => Self::End,
            "group" | "generic" => Self::Group,
            "container" => Self::Container,
            "loop" => Self::Loop,
            "http" => Self::Http,
            "database" => Self::Database,
            "transform" => Self::Transform,
            "code" => Self::Code,
            "llm" => Self::Llm,
            _ => Self::Custom(tag.to_string()),
        }
    }
}

impl From<String> for NodeType {
    fn from(tag: String) -> Self {
        NodeType::from(tag.as_str())
    }
}

impl From<NodeType> for String {
    fn from(node_type: NodeType) -> Self {
        node_type.as_str().to_string()
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource envelope for isolated code execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Runtime image reference
    pub image: String,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Memory ceiling in MiB
    pub memory_limit_mb: u64,

    /// Runtime dependencies to install before running
    pub dependencies: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            timeout_secs: 300,
            memory_limit_mb: 512,
            dependencies: Vec::new(),
        }
    }
}

impl ContainerConfig {
    /// Merge caller overrides on top of this config. Overrides win per field.
    pub fn merged(mut self, overrides: &ContainerOverrides) -> Self {
        if let Some(image) = &overrides.image {
            self.image = image.clone();
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.timeout_secs = timeout;
        }
        if let Some(memory) = overrides.memory_limit_mb {
            self.memory_limit_mb = memory;
        }
        if let Some(deps) = &overrides.dependencies {
            self.dependencies = deps.clone();
        }
        self
    }
}

/// Caller-supplied overrides for a [`ContainerConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOverrides {
    /// Replacement image
    pub image: Option<String>,
    /// Replacement timeout
    pub timeout_secs: Option<u64>,
    /// Replacement memory ceiling
    pub memory_limit_mb: Option<u64>,
    /// Replacement dependency list
    pub dependencies: Option<Vec<String>>,
}

/// A single node of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within the graph
    pub id: String,

    /// Type tag
    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Free-form configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Code payload, for code-bearing nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Isolation settings, for container nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerConfig>,

    /// Owning parent, if this node is a child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Children owned by this node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDefinition>,

    /// Whether a grouping parent renders collapsed
    #[serde(default)]
    pub collapsed: bool,
}

impl NodeDefinition {
    /// Create a node with an empty configuration.
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeType>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: String::new(),
            config: Map::new(),
            code: None,
            container: None,
            parent_id: None,
            children: Vec::new(),
            collapsed: false,
        }
    }

    /// Set label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set code payload.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set one configuration entry.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Attach a child. The child's parent link is set to this node.
    pub fn with_child(mut self, mut child: NodeDefinition) -> Self {
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        self
    }

    /// A node with children is a grouping construct and never executes itself.
    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether this node is tagged as a bounded loop.
    pub fn is_loop(&self) -> bool {
        self.node_type == NodeType::Loop
    }

    /// Read a string from the configuration.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Read an unsigned integer from the configuration.
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }
}
