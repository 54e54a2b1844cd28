//! Wraps code steps in container-parent groups when they need isolation.

use crate::dependencies::detect_dependencies;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskloom_core::{node_id, ContainerConfig, ContainerOverrides, NodeDefinition, NodeType};
use tracing::debug;

const DEFAULT_KEYWORDS: &[&str] = &[
    "数据处理",
    "数据分析",
    "机器学习",
    "深度学习",
    "图像处理",
    "data processing",
    "data analysis",
    "machine learning",
    "deep learning",
    "image processing",
    "web scraping",
    "pandas",
    "numpy",
    "scikit",
    "sklearn",
    "tensorflow",
    "pytorch",
    "torch",
    "opencv",
];

/// Errors from the decomposer.
#[derive(Debug, thiserror::Error)]
pub enum DecomposeError {
    /// A multi-step group needs at least one step
    #[error("Cannot create a multi-step group without steps")]
    NoSteps,
}

/// Decomposer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    /// Label fragments that route a step to isolated execution
    pub keywords: Vec<String>,

    /// Container defaults before detected dependencies and overrides
    pub container: ContainerConfig,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            container: ContainerConfig::default(),
        }
    }
}

impl DecomposerConfig {
    /// Set keyword list.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Set container defaults.
    pub fn with_container(mut self, container: ContainerConfig) -> Self {
        self.container = container;
        self
    }
}

/// One step of a multi-step group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Display label
    pub label: String,
    /// Code payload
    pub code: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

impl StepSpec {
    /// Create a step.
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
            description: String::new(),
        }
    }
}

/// Hierarchical decomposer.
#[derive(Debug, Clone, Default)]
pub struct Decomposer {
    config: DecomposerConfig,
}

impl Decomposer {
    /// Create a decomposer.
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    /// Whether a step with this label should run isolated.
    pub fn needs_isolation(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.config
            .keywords
            .iter()
            .any(|keyword| label.contains(&keyword.to_lowercase()))
    }

    /// Container settings for a payload: defaults, then detected
    /// dependencies, then caller overrides.
    pub fn container_config(&self, code: &str, overrides: &ContainerOverrides) -> ContainerConfig {
        ContainerConfig {
            dependencies: detect_dependencies(code),
            ..self.config.container.clone()
        }
        .merged(overrides)
    }

    /// Build the node for one code step.
    ///
    /// Steps that need isolation become a collapsed group owning a single
    /// container child. Everything else becomes one plain `code` node.
    pub fn create(
        &self,
        label: &str,
        code: &str,
        description: &str,
        overrides: &ContainerOverrides,
    ) -> NodeDefinition {
        if !self.needs_isolation(label) {
            debug!(label, "Creating ungrouped code node");
            return NodeDefinition::new(node_id("code"), NodeType::Code)
                .with_label(label)
                .with_code(code)
                .with_config("description", Value::String(description.to_string()));
        }

        debug!(label, "Creating isolated container group");
        self.group(label, description)
            .with_child(self.container_child(label, code, description, overrides))
    }

    /// Build one group holding a container child per step, in step order.
    pub fn create_multi_step(
        &self,
        label: &str,
        steps: Vec<StepSpec>,
        overrides: &ContainerOverrides,
    ) -> Result<NodeDefinition, DecomposeError> {
        if steps.is_empty() {
            return Err(DecomposeError::NoSteps);
        }

        debug!(label, steps = steps.len(), "Creating multi-step group");
        let description = format!("{} steps", steps.len());
        let parent = steps.iter().fold(self.group(label, &description), |parent, step| {
            parent.with_child(self.container_child(
                &step.label,
                &step.code,
                &step.description,
                overrides,
            ))
        });
        Ok(parent)
    }

    fn group(&self, label: &str, description: &str) -> NodeDefinition {
        let mut parent = NodeDefinition::new(node_id("group"), NodeType::Group)
            .with_label(label)
            .with_config("description", Value::String(description.to_string()));
        parent.collapsed = true;
        parent
    }

    fn container_child(
        &self,
        label: &str,
        code: &str,
        description: &str,
        overrides: &ContainerOverrides,
    ) -> NodeDefinition {
        let mut child = NodeDefinition::new(node_id("container"), NodeType::Container)
            .with_label(label)
            .with_code(code)
            .with_config("description", Value::String(description.to_string()));
        child.container = Some(self.container_config(code, overrides));
        child
    }
}
