//! Model-assisted repair loop.

use crate::analysis::{analyze, ErrorAnalysis};
use crate::model::{GenerationConstraints, ModelPort};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use taskloom_core::NodeFailure;
use taskloom_safety::SafetyValidator;
use tracing::{debug, info, warn};

/// Repair configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Model calls per repair
    pub max_attempts: u32,
    /// Accept only candidates that pass syntax and safety checks
    pub validate: bool,
    /// Constraints passed to the model port
    pub constraints: GenerationConstraints,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            validate: true,
            constraints: GenerationConstraints::default(),
        }
    }
}

impl RepairConfig {
    /// Set attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set candidate validation.
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

/// Outcome of a repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairResult {
    /// Whether a fix was found
    pub success: bool,
    /// The accepted fix
    pub repaired_code: Option<String>,
    /// The code that failed
    pub original_code: String,
    /// Analysis of the original failure
    pub analysis: ErrorAnalysis,
    /// Model calls made
    pub attempts: u32,
    /// Whether a human has to take over
    pub requires_manual_intervention: bool,
    /// Human-readable summary when no fix was found
    pub error_message: Option<String>,
}

/// Asks a model port for fixes and vets the candidates.
pub struct RepairService {
    model: Option<Arc<dyn ModelPort>>,
    validator: SafetyValidator,
    config: RepairConfig,
}

impl RepairService {
    /// Create a service with the default validator.
    pub fn new(model: Option<Arc<dyn ModelPort>>, config: RepairConfig) -> Self {
        Self {
            model,
            validator: SafetyValidator::default(),
            config,
        }
    }

    /// Set the validator candidates are checked against.
    pub fn with_validator(mut self, validator: SafetyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Whether a model port is configured.
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Try to repair `code`. Returns the first acceptable candidate.
    pub async fn repair(
        &self,
        code: &str,
        failure: &NodeFailure,
        context: &str,
        validate: bool,
    ) -> Option<String> {
        let analysis = analyze(code, failure);
        self.attempt(code, &analysis, context, validate).await.0
    }

    /// Repair with the configured validation flag and report the outcome.
    pub async fn repair_with_result(
        &self,
        code: &str,
        failure: &NodeFailure,
        context: &str,
    ) -> RepairResult {
        let analysis = analyze(code, failure);

        if self.model.is_none() {
            return RepairResult {
                success: false,
                repaired_code: None,
                original_code: code.to_string(),
                analysis,
                attempts: 0,
                requires_manual_intervention: true,
                error_message: Some("No model configured for repair".to_string()),
            };
        }

        let (repaired, attempts) = self
            .attempt(code, &analysis, context, self.config.validate)
            .await;
        let success = repaired.is_some();
        let error_message = (!success).then(|| {
            format!(
                "No valid fix for {} error after {} attempts",
                analysis.category, attempts
            )
        });

        RepairResult {
            success,
            repaired_code: repaired,
            original_code: code.to_string(),
            analysis,
            attempts,
            requires_manual_intervention: !success,
            error_message,
        }
    }

    async fn attempt(
        &self,
        code: &str,
        analysis: &ErrorAnalysis,
        context: &str,
        validate: bool,
    ) -> (Option<String>, u32) {
        let Some(model) = &self.model else {
            return (None, 0);
        };

        let mut feedback: Option<String> = None;
        for attempt in 1..=self.config.max_attempts {
            let prompt = build_prompt(code, analysis, context, feedback.as_deref());
            debug!(attempt, category = %analysis.category, "Requesting repair");

            let response = match model.generate(&prompt, &self.config.constraints).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(attempt, "Repair generation failed: {}", e);
                    feedback = Some(e.to_string());
                    continue;
                }
            };

            let Some(candidate) = extract_code(&response) else {
                feedback = Some("response contained no code".to_string());
                continue;
            };

            if validate {
                if let Err(rejection) = self.validator.accept(&candidate) {
                    debug!(attempt, "Repair candidate rejected: {}", rejection);
                    feedback = Some(rejection.to_string());
                    continue;
                }
            }

            info!(attempt, "Repair accepted");
            return (Some(candidate), attempt);
        }

        warn!(
            attempts = self.config.max_attempts,
            "Repair exhausted without a valid candidate"
        );
        (None, self.config.max_attempts)
    }
}

fn build_prompt(
    code: &str,
    analysis: &ErrorAnalysis,
    context: &str,
    feedback: Option<&str>,
) -> String {
    let mut prompt = format!(
        "The following Python code failed with {}: {}\n",
        analysis.kind, analysis.message
    );
    if let (Some(line), Some(source)) = (analysis.line, &analysis.source_line) {
        prompt.push_str(&format!("Line {}: {}\n", line, source));
    }
    prompt.push_str(&format!("Hint: {}\n", analysis.suggestion));
    if !context.is_empty() {
        prompt.push_str(&format!("Context: {}\n", context));
    }
    if let Some(feedback) = feedback {
        prompt.push_str(&format!("Your previous fix was rejected: {}\n", feedback));
    }
    prompt.push_str(&format!(
        "\n```python\n{}\n```\n\nReply with the complete corrected code in one fenced block.",
        code
    ));
    prompt
}

/// Pull the code out of a model response. Prefers the first fenced block and
/// falls back to the whole response when it has no fences.
pub fn extract_code(response: &str) -> Option<String> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```[\w+-]*[ \t]*\r?\n(.*?)```").unwrap());

    let code = match fence.captures(response) {
        Some(caps) => caps[1].to_string(),
        None if response.contains("```") => return None,
        None => response.to_string(),
    };
    let trimmed = code.trim_matches('\n');
    (!trimmed.trim().is_empty()).then(|| format!("{}\n", trimmed.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GenerationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelPort for ScriptedModel {
        async fn generate(
            &self,
            _prompt: &str,
            _constraints: &GenerationConstraints,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| GenerationError::Unavailable("script exhausted".into()))
        }
    }

    fn name_error() -> NodeFailure {
        NodeFailure::new("NameError", "name 'y' is not defined")
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("Here:\n```python\nx = 1\n```\nDone").as_deref(),
            Some("x = 1\n")
        );
        assert_eq!(extract_code("y = 2").as_deref(), Some("y = 2\n"));
        assert_eq!(extract_code("```\n\n```"), None);
    }

    #[tokio::test]
    async fn test_invalid_then_valid() {
        let model = Arc::new(ScriptedModel::new(&[
            "```python\ndef f(:\n    return 1\n```",
            "```python\ny = 1\nprint(y)\n```",
        ]));
        let service = RepairService::new(Some(model.clone()), RepairConfig::default());

        let fixed = service.repair("print(y)\n", &name_error(), "", true).await;

        assert_eq!(fixed.as_deref(), Some("y = 1\nprint(y)\n"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsafe_candidate_rejected() {
        let model = Arc::new(ScriptedModel::new(&[
            "```python\nimport os\nos.system('ls')\n```",
            "```python\nprint('ok')\n```",
        ]));
        let service = RepairService::new(Some(model.clone()), RepairConfig::default());

        let result = service.repair_with_result("print(y)\n", &name_error(), "").await;

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.repaired_code.as_deref(), Some("print('ok')\n"));
    }

    #[tokio::test]
    async fn test_without_validation_first_candidate_wins() {
        let model = Arc::new(ScriptedModel::new(&["```python\ndef f(:\n```"]));
        let service = RepairService::new(Some(model), RepairConfig::default());

        let fixed = service.repair("print(y)\n", &name_error(), "", false).await;
        assert_eq!(fixed.as_deref(), Some("def f(:\n"));
    }

    #[tokio::test]
    async fn test_exhaustion_requires_manual_intervention() {
        let model = Arc::new(ScriptedModel::new(&["nope(", "still(", "never("]));
        let service = RepairService::new(
            Some(model.clone()),
            RepairConfig::default().with_max_attempts(3),
        );

        let result = service.repair_with_result("print(y)\n", &name_error(), "").await;

        assert!(!result.success);
        assert!(result.requires_manual_intervention);
        assert_eq!(result.attempts, 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert!(result.error_message.unwrap().contains("name"));
        assert_eq!(result.analysis.missing_name.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_no_model() {
        let service = RepairService::new(None, RepairConfig::default());
        let result = service.repair_with_result("print(y)\n", &name_error(), "").await;

        assert!(!result.success);
        assert!(result.requires_manual_intervention);
        assert_eq!(result.attempts, 0);
        assert!(service.repair("x", &name_error(), "", true).await.is_none());
    }
}
