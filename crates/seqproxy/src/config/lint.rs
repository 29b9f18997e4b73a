//! Static checks over a loaded test plan.

use super::{TestPlan, PORT_PLACEHOLDER};
use hyper::header::HeaderName;
use serde::Serialize;
use std::fmt;

/// Severity level of a plan issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The plan cannot pass as written.
    Error,
    /// The plan runs, but probably not as intended.
    Warning,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// A single issue found in a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanIssue {
    pub severity: Severity,
    /// Issue code (e.g., "E001", "W001").
    pub code: &'static str,
    pub message: String,
    /// Location within the plan (e.g., "Tests[0].RequiredHeaders.X-Token").
    pub location: Option<String>,
}

impl PlanIssue {
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity.label(), self.code, self.message)?;
        if let Some(ref location) = self.location {
            write!(f, " (at {location})")?;
        }
        Ok(())
    }
}

/// Check a plan for mistakes that would make it fail or hang.
pub fn lint_plan(plan: &TestPlan) -> Vec<PlanIssue> {
    let mut issues = Vec::new();

    for (index, assertion) in plan.assertions.iter().enumerate() {
        if let Some(path) = assertion.path_constraint() {
            if !path.starts_with('/') {
                issues.push(
                    PlanIssue::warning(
                        "W001",
                        format!("expected path {path:?} does not start with '/' and can never match"),
                    )
                    .with_location(format!("Tests[{index}].ExpectedPath")),
                );
            }
        }

        if assertion
            .body_filter
            .as_deref()
            .is_some_and(|filter| !filter.is_empty())
        {
            issues.push(
                PlanIssue::warning("W002", "BodyFilter is accepted but never evaluated")
                    .with_location(format!("Tests[{index}].BodyFilter")),
            );
        }

        for (name, values) in &assertion.required_headers {
            let location = format!("Tests[{index}].RequiredHeaders.{name}");
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                issues.push(
                    PlanIssue::error("E001", format!("{name:?} is not a valid header name"))
                        .with_location(location),
                );
            } else if values.is_empty() {
                issues.push(
                    PlanIssue::warning(
                        "W003",
                        format!("header {name} lists no values and can never match"),
                    )
                    .with_location(location),
                );
            }
        }
    }

    for (index, command) in plan.commands.iter().enumerate() {
        if command.trim().is_empty() {
            issues.push(
                PlanIssue::error("E002", "driver command is empty")
                    .with_location(format!("Commands[{index}]")),
            );
        }
    }

    if plan.target_port == 0 {
        issues.push(
            PlanIssue::error("E003", "TargetPort is not set").with_location("TargetPort"),
        );
    }

    if plan.listen_port == 0
        && !plan.commands.is_empty()
        && !plan.commands.iter().any(|c| c.contains(PORT_PLACEHOLDER))
    {
        issues.push(
            PlanIssue::warning(
                "W004",
                format!(
                    "ListenPort is auto-assigned but no command references {PORT_PLACEHOLDER}"
                ),
            )
            .with_location("Commands"),
        );
    }

    if plan.commands.is_empty() && plan.timeout.is_none() && !plan.is_empty() {
        issues.push(PlanIssue::warning(
            "W005",
            "no commands and no timeout: the run waits indefinitely for requests",
        ));
    }

    issues
}

/// A plan together with its issues, as printed by `--check --output json`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport<'a> {
    pub plan: &'a TestPlan,
    pub issues: Vec<PlanIssue>,
    pub errors: usize,
    pub warnings: usize,
}

impl<'a> PlanReport<'a> {
    pub fn new(plan: &'a TestPlan) -> Self {
        let issues = lint_plan(plan);
        let errors = issues.iter().filter(|i| i.is_error()).count();
        Self {
            plan,
            warnings: issues.len() - errors,
            issues,
            errors,
        }
    }
}
