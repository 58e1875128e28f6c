//! Workflow Validator
//!
//! Builds a petgraph graph of the control flow between steps (linear
//! advance, condition jumps, fallbacks, parallel fan-out) and checks it
//! before a run:
//! - every flow reference names an existing step
//! - parallel sub-steps are device steps on pairwise disjoint devices
//! - fallbacks point at runnable steps
//!
//! Reachability and loops are reported, not rejected: condition loops are
//! a legitimate way to poll until a reading changes.

use crate::error::{Result, WorkflowError};
use crate::workflow::steps::StepRegistry;
use crate::workflow::types::StepType;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Kind of control edge between two steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowEdge {
    Next,
    IfTrue,
    IfFalse,
    Fallback,
    Parallel,
}

/// Outcome of a successful validation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Ids of steps no execution path reaches
    pub unreachable: Vec<String>,
    /// True when condition jumps form a cycle
    pub has_loops: bool,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

/// Ids of steps that only run through a referencing step
///
/// Parallel sub-steps and fallback targets are skipped during linear traversal.
pub fn detached_steps(steps: &StepRegistry) -> HashSet<String> {
    steps
        .iter()
        .flat_map(|bound| {
            let flow = &bound.step().flow;
            flow.parallel_steps.iter().chain(flow.fallback_step.iter()).cloned()
        })
        .collect()
}

/// Positions of main-line (non-detached) steps, in list order
pub fn main_line(steps: &StepRegistry) -> Vec<usize> {
    let detached = detached_steps(steps);
    steps
        .iter()
        .enumerate()
        .filter(|(_, bound)| !detached.contains(bound.id()))
        .map(|(index, _)| index)
        .collect()
}

/// Validate a step list
pub fn validate(steps: &StepRegistry) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    if steps.is_empty() {
        return Ok(report);
    }
    tracing::debug!("🔍 Validating {} steps", steps.len());

    check_references(steps)?;
    check_parallel_steps(steps)?;
    check_fallbacks(steps)?;

    for bound in steps.iter() {
        let flow = &bound.step().flow;
        if bound.step_type() != StepType::Condition && (flow.if_true.is_some() || flow.if_false.is_some()) {
            report.warnings.push(format!(
                "step '{}' has branch targets but is not a condition step; they are ignored",
                bound.name()
            ));
        }
        if bound.step_type() != StepType::Parallel && !flow.parallel_steps.is_empty() {
            report.warnings.push(format!(
                "step '{}' lists parallel sub-steps but is not a parallel step; they are ignored",
                bound.name()
            ));
        }
    }
    for bound in steps.iter() {
        if bound.step_type() == StepType::Parallel && bound.step().flow.parallel_steps.is_empty() {
            report
                .warnings
                .push(format!("parallel step '{}' has no sub-steps", bound.name()));
        }
    }

    let graph = FlowGraph::build(steps);
    report.has_loops = toposort(&graph.graph, None).is_err();
    report.unreachable = graph.unreachable_from_start(steps);

    if report.has_loops {
        tracing::debug!("🔁 Workflow contains condition loops");
    }
    for id in &report.unreachable {
        tracing::warn!("⚠️ Step '{}' is unreachable", id);
    }
    tracing::debug!("✅ Validation passed");
    Ok(report)
}

fn check_references(steps: &StepRegistry) -> Result<()> {
    for bound in steps.iter() {
        for target in bound.step().flow.references() {
            if steps.get(target).is_none() {
                tracing::error!("❌ Step '{}' references missing step '{}'", bound.id(), target);
                return Err(WorkflowError::StepNotFound(target.to_string()));
            }
        }
    }
    Ok(())
}

fn check_parallel_steps(steps: &StepRegistry) -> Result<()> {
    for bound in steps.iter().filter(|b| b.step_type() == StepType::Parallel) {
        let mut owners: HashMap<String, &str> = HashMap::new();
        for sub_id in &bound.step().flow.parallel_steps {
            if sub_id == bound.id() {
                return Err(WorkflowError::InvalidSpec(format!(
                    "parallel step '{}' lists itself as a sub-step",
                    bound.name()
                )));
            }
            let Some(sub) = steps.get(sub_id) else {
                return Err(WorkflowError::StepNotFound(sub_id.clone()));
            };
            if !matches!(
                sub.step_type(),
                StepType::Motion | StepType::Peripheral | StepType::Delay
            ) {
                return Err(WorkflowError::InvalidSpec(format!(
                    "parallel sub-step '{}' must be a motion, peripheral or delay step, not {:?}",
                    sub.name(),
                    sub.step_type()
                )));
            }
            for device in sub.devices() {
                let key = device.to_string();
                if owners.insert(key.clone(), sub.id()).is_some() {
                    return Err(WorkflowError::DeviceConflict {
                        step: bound.name().to_string(),
                        device: key,
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_fallbacks(steps: &StepRegistry) -> Result<()> {
    for bound in steps.iter() {
        let Some(target) = &bound.step().flow.fallback_step else {
            continue;
        };
        if target == bound.id() {
            return Err(WorkflowError::InvalidSpec(format!(
                "step '{}' cannot be its own fallback",
                bound.name()
            )));
        }
        if let Some(fallback) = steps.get(target) {
            if fallback.step_type() == StepType::Condition {
                return Err(WorkflowError::InvalidSpec(format!(
                    "fallback '{}' of step '{}' is a condition step",
                    fallback.name(),
                    bound.name()
                )));
            }
        }
    }
    Ok(())
}

/// Control-flow graph over step ids
#[derive(Debug)]
struct FlowGraph {
    graph: DiGraph<String, FlowEdge>,
    index_of: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    fn build(steps: &StepRegistry) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for bound in steps.iter() {
            let index = graph.add_node(bound.id().to_string());
            index_of.insert(bound.id().to_string(), index);
        }

        let detached = detached_steps(steps);
        let line = main_line(steps);

        for (position, bound) in steps.iter().enumerate() {
            let from = index_of[bound.id()];
            let flow = &bound.step().flow;

            // linear advance lands on the next main-line step after this position
            let next = line
                .iter()
                .find(|&&index| index > position)
                .and_then(|&index| steps.at(index));

            match bound.step_type() {
                StepType::Condition => {
                    let mut falls_through = false;
                    for (target, edge) in [(&flow.if_true, FlowEdge::IfTrue), (&flow.if_false, FlowEdge::IfFalse)] {
                        match target {
                            Some(target) => {
                                if let Some(&to) = index_of.get(target) {
                                    graph.add_edge(from, to, edge);
                                }
                            }
                            None => falls_through = true,
                        }
                    }
                    if falls_through {
                        if let Some(next) = next {
                            graph.add_edge(from, index_of[next.id()], FlowEdge::Next);
                        }
                    }
                }
                StepType::Parallel => {
                    for sub in &flow.parallel_steps {
                        if let Some(&to) = index_of.get(sub) {
                            graph.add_edge(from, to, FlowEdge::Parallel);
                        }
                    }
                }
                _ => {}
            }

            if bound.step_type() != StepType::Condition && !detached.contains(bound.id()) {
                if let Some(next) = next {
                    graph.add_edge(from, index_of[next.id()], FlowEdge::Next);
                }
            }
            if let Some(fallback) = flow.fallback_step.as_ref().and_then(|id| index_of.get(id)) {
                graph.add_edge(from, *fallback, FlowEdge::Fallback);
            }
        }

        Self { graph, index_of }
    }

    /// BFS from the first main-line step
    fn unreachable_from_start(&self, steps: &StepRegistry) -> Vec<String> {
        let Some(start) = main_line(steps).first().and_then(|&index| steps.at(index)) else {
            return steps.iter().map(|bound| bound.id().to_string()).collect();
        };

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        let start = self.index_of[start.id()];
        reachable.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for target in self.graph.neighbors(current) {
                if reachable.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        steps
            .iter()
            .filter(|bound| !reachable.contains(&self.index_of[bound.id()]))
            .map(|bound| bound.id().to_string())
            .collect()
    }
}
