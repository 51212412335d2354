use std::fmt;

use thiserror::Error;

use crate::spec::{BackoffMode, PatternConfig, Spec};
use crate::tools::ToolRegistry;

/// One rejected or flagged feature: where it lives in the spec, why it was
/// flagged, and what to do about it.
#[derive(Debug, Clone)]
pub struct RemediationEntry {
    pub json_pointer: String,
    pub reason: String,
    pub suggested_fix: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Run cannot proceed.
    Fatal,
    /// Unusual but legal; recorded for the observer, does not block the run.
    Warning,
}

/// The full set of capability issues found while walking a spec.
///
/// Implements [`std::error::Error`] so it composes into
/// [`crate::error::WorkflowError`] via `#[from]`; only constructed (and
/// only ever surfaced as an error) when at least one [`RemediationEntry`]
/// is `Fatal` — callers should check [`RemediationReport::is_fatal`]
/// before treating a non-empty report as abort-worthy, since warning-only
/// reports are informational.
#[derive(Error, Debug, Clone, Default)]
pub struct RemediationReport {
    pub entries: Vec<RemediationEntry>,
}

impl fmt::Display for RemediationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "[{:?}] {}: {} (try: {})",
                entry.severity, entry.json_pointer, entry.reason, entry.suggested_fix
            )?;
        }
        Ok(())
    }
}

impl RemediationReport {
    pub fn is_fatal(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Fatal)
    }

    fn push(&mut self, json_pointer: impl Into<String>, reason: impl Into<String>, suggested_fix: impl Into<String>, severity: Severity) {
        self.entries.push(RemediationEntry {
            json_pointer: json_pointer.into(),
            reason: reason.into(),
            suggested_fix: suggested_fix.into(),
            severity,
        });
    }
}

/// Walks a parsed [`Spec`] and flags every feature this implementation does
/// not support, per §4.2. Called once, before executor dispatch; any fatal
/// entry means the run terminates without side effects.
pub fn check(spec: &Spec, tools: &dyn ToolRegistry) -> RemediationReport {
    let mut report = RemediationReport::default();

    if spec.version != crate::spec::SUPPORTED_VERSION {
        report.push(
            "/version",
            format!("unsupported spec version {}", spec.version),
            "set version: 0",
            Severity::Fatal,
        );
    }

    check_pattern(spec, &mut report);
    check_compaction_provider(spec, &mut report);
    check_tools(spec, tools, &mut report);
    check_secret_sources(spec, &mut report);
    check_graph_multi_target_edges(spec, &mut report);

    report
}

/// Graph edges may schema-carry multiple static targets, but traversal only
/// ever follows the first (§4.8.5, §9 open question: "preserve round-trip
/// loading... do not silently multiplex"). Flag the rest as informational,
/// not fatal — this is a deliberate restriction, not an error.
fn check_graph_multi_target_edges(spec: &Spec, report: &mut RemediationReport) {
    if let PatternConfig::Graph(cfg) = &spec.pattern {
        for node in &cfg.nodes {
            for (edge_idx, edge) in node.edges.iter().enumerate() {
                if edge.targets.len() > 1 {
                    report.push(
                        format!("/pattern/config/nodes/{}/edges/{edge_idx}/targets", node.id),
                        format!(
                            "edge declares {} targets; only the first ('{}') is ever traversed",
                            edge.targets.len(),
                            edge.targets[0]
                        ),
                        "declare a single target per edge, or split into separate conditional edges",
                        Severity::Warning,
                    );
                }
            }
        }
    }
}

fn check_pattern(spec: &Spec, report: &mut RemediationReport) {
    match &spec.pattern {
        PatternConfig::Chain(cfg) => {
            if cfg.steps.is_empty() {
                report.push(
                    "/pattern/config/steps",
                    "empty chain is not a valid pattern",
                    "add at least one step",
                    Severity::Fatal,
                );
            }
        }
        PatternConfig::OrchestratorWorkers(cfg) => {
            if let Some(rounds) = cfg.max_rounds {
                if rounds > 1 {
                    report.push(
                        "/pattern/config/max_rounds",
                        "multi-round orchestration is not supported",
                        "remove max_rounds or set it to 1",
                        Severity::Fatal,
                    );
                }
            }
        }
        _ => {}
    }
}

fn check_compaction_provider(spec: &Spec, report: &mut RemediationReport) {
    if let Some(model) = &spec.context_policy.compaction.summarization_model {
        if !model.is_empty() && !model.starts_with(&spec.runtime.provider) {
            report.push(
                "/context_policy/compaction/summarization_model",
                format!(
                    "summarization model '{model}' does not appear to belong to provider '{}'",
                    spec.runtime.provider
                ),
                "confirm cross-provider summarization is intentional",
                Severity::Warning,
            );
        }
    }
}

fn check_tools(spec: &Spec, tools: &dyn ToolRegistry, report: &mut RemediationReport) {
    for (agent_id, agent) in &spec.agents {
        for tool_name in &agent.tools {
            if tools.lookup(tool_name).is_none() {
                report.push(
                    format!("/agents/{agent_id}/tools"),
                    format!("tool '{tool_name}' is not present in the tool registry"),
                    "register the tool before running, or remove it from the agent",
                    Severity::Fatal,
                );
            }
        }
    }
}

fn check_secret_sources(spec: &Spec, report: &mut RemediationReport) {
    let pattern = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid");
    for (agent_id, agent) in &spec.agents {
        for capture in pattern.captures_iter(&agent.prompt) {
            let interpolation = &capture[1];
            if interpolation.contains("secret_source") && !interpolation.contains("env") {
                report.push(
                    format!("/agents/{agent_id}/prompt"),
                    format!("non-env secret source in interpolation '{interpolation}'"),
                    "only secret_source: env is supported",
                    Severity::Fatal,
                );
            }
        }
    }
}

/// Unused in the current spec surface but documented for completeness: a
/// constant or exponential-jittered backoff mode both translate cleanly to
/// `backoff` crate configuration, so nothing about `BackoffMode` itself is
/// rejected by the gate.
#[allow(dead_code)]
fn accepted_backoff_modes() -> [BackoffMode; 3] {
    [BackoffMode::Constant, BackoffMode::Exponential, BackoffMode::ExponentialJittered]
}
