//! Response formatting shared by successful steps and failure reports.
//!
//! Every response goes through a [`ResponseFormatter`]. The production
//! formatter renders an embedded minijinja template; recognised failures are
//! reported as [`FormatError`] so callers can tell them apart from defects.

use anyhow::Result;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::FormatError;

const STEP_RESPONSE_TEMPLATE: &str = include_str!("templates/step_response.md");

/// Final output handed back to the invoking agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub text: String,
    pub is_error: bool,
}

impl Response {
    pub fn ok(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }

    pub fn error(text: String) -> Self {
        Self {
            text,
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub label: String,
    pub value: String,
}

/// Structured content of a response before formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseContent {
    /// Human title of the step or situation.
    pub current_step: String,
    /// Step identifier, e.g. `p1-2`.
    pub step_number: String,
    pub iteration: u32,
    pub instructions: String,
    /// Audit trail of checks this invocation already performed.
    pub steps_completed_by_tool: Vec<String>,
    pub context: Vec<ContextEntry>,
}

impl ResponseContent {
    pub fn new(
        current_step: impl Into<String>,
        step_number: impl Into<String>,
        iteration: u32,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            current_step: current_step.into(),
            step_number: step_number.into(),
            iteration,
            instructions: instructions.into(),
            steps_completed_by_tool: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push(ContextEntry {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_audit(mut self, audit: Vec<String>) -> Self {
        self.steps_completed_by_tool = audit;
        self
    }
}

pub trait ResponseFormatter {
    /// Render `content`. Recognised failures are returned as [`FormatError`].
    fn format(&self, content: &ResponseContent) -> Result<String>;
}

/// Formatter backed by the embedded step response template.
pub struct TemplateFormatter {
    env: Environment<'static>,
}

impl TemplateFormatter {
    pub fn new() -> Result<Self, FormatError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("step_response", STEP_RESPONSE_TEMPLATE)?;
        Ok(Self { env })
    }

    fn render(&self, content: &ResponseContent) -> Result<String, FormatError> {
        for (field, value) in [
            ("current_step", &content.current_step),
            ("step_number", &content.step_number),
            ("instructions", &content.instructions),
        ] {
            if value.trim().is_empty() {
                return Err(FormatError::InvalidContent(format!("{field} is empty")));
            }
        }
        let template = self.env.get_template("step_response")?;
        let mut rendered = template.render(content)?;
        rendered.push('\n');
        Ok(rendered)
    }
}

impl ResponseFormatter for TemplateFormatter {
    fn format(&self, content: &ResponseContent) -> Result<String> {
        Ok(self.render(content)?)
    }
}

/// Format `content` as a successful response.
pub fn success<F: ResponseFormatter + ?Sized>(
    formatter: &F,
    content: &ResponseContent,
) -> Result<Response> {
    Ok(Response::ok(formatter.format(content)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> ResponseContent {
        ResponseContent::new("Code Review", "p1-2", 1, "Run the review.")
            .with_context("Issue", "#12")
            .with_audit(vec!["Checked for uncommitted changes - none found".to_string()])
    }

    #[test]
    fn renders_all_sections() {
        let formatter = TemplateFormatter::new().expect("formatter");
        let text = formatter.format(&content()).expect("format");
        assert!(text.starts_with("## Code Review"));
        assert!(text.contains("**Step:** `p1-2` | **Iteration:** 1"));
        assert!(text.contains("**Issue:** #12"));
        assert!(text.contains("### Instructions\n\nRun the review."));
        assert!(text.contains("- Checked for uncommitted changes - none found"));
    }

    #[test]
    fn omits_empty_audit_section() {
        let formatter = TemplateFormatter::new().expect("formatter");
        let text = formatter
            .format(&ResponseContent::new("Approval", "approval", 0, "Wait."))
            .expect("format");
        assert!(!text.contains("Steps Completed by Tool"));
    }

    #[test]
    fn empty_instructions_is_a_recognised_failure() {
        let formatter = TemplateFormatter::new().expect("formatter");
        let err = formatter
            .format(&ResponseContent::new("Approval", "approval", 0, "  "))
            .expect_err("empty instructions");
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::InvalidContent(_))
        ));
    }

    #[test]
    fn does_not_html_escape_markdown() {
        let formatter = TemplateFormatter::new().expect("formatter");
        let text = formatter
            .format(&ResponseContent::new("A & B", "p1-1", 0, "Use `a < b`"))
            .expect("format");
        assert!(text.contains("A & B"));
        assert!(text.contains("`a < b`"));
    }
}
