//! Job dependency graph.
//!
//! Dependencies are declared on each job via `needs`. The graph built here
//! points the other way: an edge runs from a dependency to the job that
//! needs it, so successors of a node are the jobs it unblocks.

use crate::definition::Workflow;
use crate::error::GraphError;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Dependency graph of a workflow's jobs, backed by petgraph.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl JobGraph {
    /// Builds the graph for a workflow.
    ///
    /// Dependencies naming unknown jobs still get a node so that the
    /// dependent is never mistaken for a root.
    #[must_use]
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut graph = Self::default();
        for name in workflow.job_names() {
            graph.node(name);
        }
        for (name, job) in &workflow.jobs {
            let dependent = graph.node(name);
            for dependency in &job.needs {
                let dependency = graph.node(dependency);
                graph.graph.add_edge(dependency, dependent, ());
            }
        }
        graph
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(index) = self.index.get(name) {
            return *index;
        }
        let index = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), index);
        index
    }

    /// Number of named nodes, including unknown dependencies.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Nodes with no incoming edges, in lexical order.
    #[must_use]
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .graph
            .node_indices()
            .filter(|i| {
                self.graph
                    .neighbors_directed(*i, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|i| self.graph[i].clone())
            .collect();
        roots.sort();
        roots
    }

    /// Jobs that directly need `name`, in lexical order.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let Some(index) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dependents: Vec<String> = self
            .graph
            .neighbors_directed(*index, Direction::Outgoing)
            .map(|i| self.graph[i].clone())
            .collect();
        dependents.sort();
        dependents.dedup();
        dependents
    }
}

/// Validates a workflow's job graph.
///
/// Jobs are checked in lexical order for an execution mode and for
/// resolvable dependencies, then the whole graph is checked for cycles.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate(workflow: &Workflow) -> Result<(), GraphError> {
    for (name, job) in &workflow.jobs {
        if job.execution_mode().is_none() {
            return Err(GraphError::MissingExecutionMode { job: name.clone() });
        }
        if let Some(dependency) = job.needs.iter().find(|d| !workflow.jobs.contains_key(*d)) {
            return Err(GraphError::UnknownDependency {
                job: name.clone(),
                dependency: dependency.clone(),
            });
        }
    }

    match find_cycle(workflow) {
        Some(path) => Err(GraphError::CycleDetected { path }),
        None => Ok(()),
    }
}

/// Depth-first search over `needs` edges.
///
/// Returns the path from the walk's start to the job that closed a cycle,
/// with that job repeated at the end (`a -> b -> a`).
fn find_cycle(workflow: &Workflow) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();

    for start in workflow.job_names() {
        if visited.contains(start) {
            continue;
        }

        // Each frame is a job and the index of the next dependency to visit.
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut on_stack: HashSet<&str> = HashSet::from([start]);
        visited.insert(start);

        while let Some(frame) = stack.last_mut() {
            let (name, next) = *frame;
            frame.1 += 1;

            let needs = workflow.job(name).map(|j| j.needs.as_slice()).unwrap_or_default();
            let Some(dependency) = needs.get(next).map(String::as_str) else {
                on_stack.remove(name);
                stack.pop();
                continue;
            };

            if on_stack.contains(dependency) {
                let mut path: Vec<String> = stack.iter().map(|(n, _)| (*n).to_string()).collect();
                path.push(dependency.to_string());
                return Some(path);
            }
            if visited.insert(dependency) {
                on_stack.insert(dependency);
                stack.push((dependency, 0));
            }
        }
    }

    None
}

/// Jobs ordered so that every job follows all of its dependencies.
///
/// Deterministic: jobs are taken in lexical order and dependencies in
/// `needs` order. Cycles are not reported here; run `validate` first.
#[must_use]
pub fn topological_order(workflow: &Workflow) -> Vec<String> {
    let mut order = Vec::with_capacity(workflow.jobs.len());
    let mut seen: HashSet<&str> = HashSet::new();

    for start in workflow.job_names() {
        if !seen.insert(start) {
            continue;
        }

        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        while let Some(frame) = stack.last_mut() {
            let (name, next) = *frame;
            frame.1 += 1;

            let needs = workflow.job(name).map(|j| j.needs.as_slice()).unwrap_or_default();
            match needs.get(next) {
                Some(dependency) => {
                    if seen.insert(dependency.as_str()) {
                        stack.push((dependency.as_str(), 0));
                    }
                }
                None => {
                    if workflow.jobs.contains_key(name) {
                        order.push(name.to_string());
                    }
                    stack.pop();
                }
            }
        }
    }

    order
}

/// Jobs with no dependencies, in lexical order.
#[must_use]
pub fn root_jobs(workflow: &Workflow) -> Vec<String> {
    JobGraph::from_workflow(workflow)
        .roots()
        .into_iter()
        .filter(|name| workflow.jobs.contains_key(name))
        .collect()
}

/// Jobs whose `needs` directly contain `name`, in lexical order.
#[must_use]
pub fn dependents(workflow: &Workflow, name: &str) -> Vec<String> {
    JobGraph::from_workflow(workflow).dependents(name)
}
