//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; the caller decides where it goes.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::orchestrator::{ApplyReport, RemoveReport};
use crate::planner::{DeploymentOutputs, DeploymentPlan, DiffType};
use crate::state::{DeploymentState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Resource")]
    resource: String,
}

/// Recorded instance row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Instance")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ARN")]
    arn: String,
}

/// Output row for table display.
#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Output")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan) -> String {
        if plan.is_noop() {
            return format!("{} No changes required - '{}' is up to date.\n", "✓".green(), plan.deployment);
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nDeployment plan for '{}'", plan.deployment.bold());
        let _ = writeln!(
            output,
            "   Resource id: {}   Config hash: {}\n",
            plan.resource_id,
            short(&plan.config_hash)
        );

        let rows: Vec<PlanStepRow> = plan
            .ordered_instances()
            .into_iter()
            .enumerate()
            .map(|(i, instance)| PlanStepRow {
                index: i + 1,
                action: Self::format_diff_type(
                    plan.diff.get(&instance.name).map_or(DiffType::Create, |d| d.diff_type),
                ),
                resource_type: instance.resource_type.to_string(),
                instance: instance.name.clone(),
                resource: instance.resource_name.clone(),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let orphans: Vec<&str> = plan
            .diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Orphan)
            .map(|d| d.name.as_str())
            .collect();
        if !orphans.is_empty() {
            let _ = writeln!(output, "\n{} Recorded but not declared: {}", "⚠".yellow(), orphans.join(", "));
        }

        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged",
            plan.diff.creates.to_string().green(),
            plan.diff.updates.to_string().yellow(),
            plan.diff.unchanged
        );
        output
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Applied {} resource(s) ({})\n\n",
                    "✓".green(),
                    report.applied.len(),
                    report.summary
                );
                output.push_str(&Self::format_outputs_text(&report.outputs));
                output
            }
        }
    }

    /// Formats the result of a teardown.
    #[must_use]
    pub fn format_remove(&self, report: &RemoveReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.removed.is_empty() {
                    return format!("{} Nothing to remove.\n", "✓".green());
                }
                let mut output = format!("{} Removed {} resource(s):\n", "✓".green(), report.removed.len());
                for name in &report.removed {
                    let _ = writeln!(output, "   - {name}");
                }
                output
            }
        }
    }

    /// Formats deployment outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &DeploymentOutputs) -> String {
        match self.format {
            OutputFormat::Json => to_json(outputs),
            OutputFormat::Text => Self::format_outputs_text(outputs),
        }
    }

    fn format_outputs_text(outputs: &DeploymentOutputs) -> String {
        let value = |v: &Option<String>| v.clone().unwrap_or_else(|| String::from("-"));
        let rows = vec![
            OutputRow { key: "bucket", value: value(&outputs.bucket) },
            OutputRow { key: "role", value: value(&outputs.role) },
            OutputRow { key: "function", value: value(&outputs.function) },
            OutputRow { key: "table", value: value(&outputs.table) },
            OutputRow { key: "subscription", value: value(&outputs.subscription) },
        ];
        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = writeln!(output, "\nState: {}\n", state.name.bold());
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Resource id: {}", state.resource_id.as_deref().unwrap_or("-"));
                let _ = writeln!(output, "   Region: {}", state.region.as_deref().unwrap_or("-"));
                let _ = writeln!(output, "   Config hash: {}", short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}\n", state.last_updated);

                if state.is_empty() {
                    output.push_str("   No resources recorded.\n");
                } else {
                    let rows: Vec<InstanceRow> = state
                        .ordered_instances()
                        .into_iter()
                        .map(|i| InstanceRow {
                            name: i.name.clone(),
                            resource_type: i.resource_type.to_string(),
                            resource: i.resource_name.clone(),
                            arn: i.outputs.get("arn").cloned().unwrap_or_default(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(lock),
            OutputFormat::Text => format!(
                "Locked by {} ({}), lock id {}, expires in {}s\n",
                lock.holder,
                lock.operation.as_deref().unwrap_or("manual"),
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let errors: Vec<_> = result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect();
                to_json(&serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": errors,
                    "warnings": result.warnings,
                }))
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid\n", "✓".green())
                } else {
                    format!("{} Configuration has {} error(s):\n", "✗".red(), result.error_count())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    fn format_diff_type(diff_type: DiffType) -> String {
        match diff_type {
            DiffType::Create => "+create".green().to_string(),
            DiffType::Update => "~update".yellow().to_string(),
            DiffType::NoChange => "noop".dimmed().to_string(),
            DiffType::Orphan => "orphan".red().to_string(),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, marker: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    &hash[..8.min(hash.len())]
}

#[derive(Serialize)]
struct PlanJson {
    deployment: String,
    resource_id: String,
    config_hash: String,
    summary: String,
    steps: Vec<StepJson>,
    waves: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct StepJson {
    action: String,
    resource_type: String,
    instance: String,
    resource: String,
    depends_on: Vec<String>,
}

impl From<&DeploymentPlan> for PlanJson {
    fn from(plan: &DeploymentPlan) -> Self {
        Self {
            deployment: plan.deployment.clone(),
            resource_id: plan.resource_id.clone(),
            config_hash: plan.config_hash.clone(),
            summary: plan.summary(),
            steps: plan
                .ordered_instances()
                .into_iter()
                .map(|instance| StepJson {
                    action: plan
                        .diff
                        .get(&instance.name)
                        .map_or(DiffType::Create, |d| d.diff_type)
                        .to_string(),
                    resource_type: instance.resource_type.to_string(),
                    instance: instance.name.clone(),
                    resource: instance.resource_name.clone(),
                    depends_on: instance.dependencies().into_iter().map(String::from).collect(),
                })
                .collect(),
            waves: plan
                .waves()
                .into_iter()
                .map(|wave| wave.into_iter().map(|i| i.name.clone()).collect())
                .collect(),
        }
    }
}
