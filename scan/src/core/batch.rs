//! Batch configuration and its submission-time validation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target types that cannot be reached without a transport configuration blob.
const TRANSPORT_TARGET_TYPES: &[&str] = &["http"];

/// Default iteration count when a submission omits it.
pub const DEFAULT_ITERATIONS: u32 = 3;

/// Configuration for one batch, supplied by the caller at submission time.
///
/// Field names follow the submission payload accepted by the HTTP host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub target_model: String,
    #[serde(default)]
    pub target_model_type: String,
    #[serde(default)]
    pub controller_model: Option<String>,
    #[serde(default)]
    pub controller_model_type: Option<String>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Explicit test case names. Takes precedence over `rule_categories`.
    #[serde(default, alias = "selected_rules")]
    pub rules: Vec<String>,
    #[serde(default)]
    pub rule_categories: Vec<String>,
    #[serde(default, alias = "firewall_mode")]
    pub firewall: bool,
    #[serde(default)]
    pub pass_condition: Option<String>,
    /// Transport-specific configuration, opaque to the coordinator.
    #[serde(default)]
    pub http_config: Option<Value>,
    #[serde(default)]
    pub ollama_url: Option<String>,
    #[serde(default)]
    pub system_prompts_path: Option<PathBuf>,
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

impl BatchConfig {
    /// Minimal config naming only a target.
    pub fn for_target(model: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            target_model: model.into(),
            target_model_type: model_type.into(),
            controller_model: None,
            controller_model_type: None,
            iterations: DEFAULT_ITERATIONS,
            rules: Vec::new(),
            rule_categories: Vec::new(),
            firewall: false,
            pass_condition: None,
            http_config: None,
            ollama_url: None,
            system_prompts_path: None,
        }
    }

    /// Check the submission invariants. Returns the first violated field.
    pub fn validate(&self) -> Result<(), ConfigIssue> {
        if self.target_model.trim().is_empty() {
            return Err(ConfigIssue::missing("target_model"));
        }
        if self.target_model_type.trim().is_empty() {
            return Err(ConfigIssue::missing("target_model_type"));
        }
        if self.iterations == 0 {
            return Err(ConfigIssue::new("iterations", "must be > 0"));
        }
        if requires_transport(&self.target_model_type) && self.http_config.is_none() {
            return Err(ConfigIssue::new(
                "http_config",
                format!("required for target type {}", self.target_model_type),
            ));
        }
        if self.firewall
            && self
                .pass_condition
                .as_deref()
                .is_none_or(|cond| cond.trim().is_empty())
        {
            return Err(ConfigIssue::new(
                "pass_condition",
                "required when firewall mode is enabled",
            ));
        }
        Ok(())
    }

    /// Selection scope requested by this config.
    pub fn selection(&self) -> Selection<'_> {
        if !self.rules.is_empty() {
            Selection::Names(&self.rules)
        } else if !self.rule_categories.is_empty() {
            Selection::Categories(&self.rule_categories)
        } else {
            Selection::All
        }
    }

    /// Resolve defaults into the view handed to the executor.
    pub fn resolve(&self) -> ResolvedTarget {
        let target = ModelRef {
            model: self.target_model.trim().to_string(),
            model_type: self.target_model_type.trim().to_string(),
        };
        let controller = ModelRef {
            model: self
                .controller_model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(&target.model)
                .to_string(),
            model_type: self
                .controller_model_type
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(&target.model_type)
                .to_string(),
        };
        ResolvedTarget {
            target,
            controller,
            firewall: self.firewall,
            pass_condition: self.pass_condition.clone(),
            http_config: self.http_config.clone(),
            ollama_url: self.ollama_url.clone(),
            system_prompts_path: self.system_prompts_path.clone(),
        }
    }
}

fn requires_transport(model_type: &str) -> bool {
    TRANSPORT_TARGET_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(model_type.trim()))
}

/// Which test cases a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    All,
    Names(&'a [String]),
    Categories(&'a [String]),
}

/// Model identity and provider type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub model: String,
    pub model_type: String,
}

/// Immutable, defaulted view of a [`BatchConfig`] passed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub target: ModelRef,
    pub controller: ModelRef,
    pub firewall: bool,
    pub pass_condition: Option<String>,
    pub http_config: Option<Value>,
    pub ollama_url: Option<String>,
    pub system_prompts_path: Option<PathBuf>,
}

/// A specific submission field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "is required")
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_target() {
        BatchConfig::for_target("gpt-4o", "openai")
            .validate()
            .expect("valid");
    }

    #[test]
    fn rejects_missing_target_fields() {
        let cfg = BatchConfig::for_target("  ", "openai");
        assert_eq!(cfg.validate().unwrap_err().field, "target_model");

        let cfg = BatchConfig::for_target("gpt-4o", "");
        assert_eq!(cfg.validate().unwrap_err().field, "target_model_type");
    }

    #[test]
    fn rejects_zero_iterations() {
        let cfg = BatchConfig {
            iterations: 0,
            ..BatchConfig::for_target("gpt-4o", "openai")
        };
        assert_eq!(cfg.validate().unwrap_err().field, "iterations");
    }

    #[test]
    fn http_target_requires_transport_config() {
        let mut cfg = BatchConfig::for_target("my-endpoint", "HTTP");
        let issue = cfg.validate().unwrap_err();
        assert_eq!(issue.field, "http_config");

        cfg.http_config = Some(json!({"url": "http://localhost:8080/chat"}));
        cfg.validate().expect("valid with transport config");
    }

    #[test]
    fn firewall_mode_requires_pass_condition() {
        let mut cfg = BatchConfig {
            firewall: true,
            ..BatchConfig::for_target("guard", "openai")
        };
        assert_eq!(cfg.validate().unwrap_err().field, "pass_condition");

        cfg.pass_condition = Some("true".to_string());
        cfg.validate().expect("valid");
    }

    #[test]
    fn explicit_names_win_over_categories() {
        let cfg = BatchConfig {
            rules: vec!["distraction_basic".to_string()],
            rule_categories: vec!["jailbreak".to_string()],
            ..BatchConfig::for_target("gpt-4o", "openai")
        };
        assert!(matches!(cfg.selection(), Selection::Names(names) if names.len() == 1));

        let cfg = BatchConfig {
            rule_categories: vec!["jailbreak".to_string()],
            ..BatchConfig::for_target("gpt-4o", "openai")
        };
        assert!(matches!(cfg.selection(), Selection::Categories(_)));

        let cfg = BatchConfig::for_target("gpt-4o", "openai");
        assert_eq!(cfg.selection(), Selection::All);
    }

    #[test]
    fn controller_defaults_to_target() {
        let resolved = BatchConfig::for_target("llama3", "ollama").resolve();
        assert_eq!(resolved.controller, resolved.target);

        let cfg = BatchConfig {
            controller_model: Some("gpt-4o".to_string()),
            controller_model_type: Some("openai".to_string()),
            ..BatchConfig::for_target("llama3", "ollama")
        };
        let resolved = cfg.resolve();
        assert_eq!(resolved.controller.model, "gpt-4o");
        assert_eq!(resolved.target.model_type, "ollama");
    }

    #[test]
    fn parses_submission_payload_aliases() {
        let payload = json!({
            "target_model": "gpt-4o",
            "target_model_type": "openai",
            "selected_rules": ["a", "b"],
            "firewall_mode": true,
            "pass_condition": "true"
        });
        let cfg: BatchConfig = serde_json::from_value(payload).expect("parse");
        assert_eq!(cfg.rules, vec!["a", "b"]);
        assert!(cfg.firewall);
        assert_eq!(cfg.iterations, DEFAULT_ITERATIONS);
    }
}
