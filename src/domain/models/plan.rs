//! Dependency graph and batched execution plan.
//!
//! The plan groups specs into batches by dependency depth: a spec's batch
//! index is one past the deepest of its prerequisites, so every batch only
//! contains specs whose prerequisites live in earlier batches.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A dependency edge: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

/// Dependency graph over the specs of one orchestration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Prerequisites per spec, edges restricted to known nodes.
    pub fn prerequisites(&self) -> HashMap<String, Vec<String>> {
        let known: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        let mut deps: HashMap<String, Vec<String>> = self
            .nodes
            .iter()
            .map(|n| (n.clone(), Vec::new()))
            .collect();

        for edge in &self.edges {
            if known.contains(edge.from.as_str()) && known.contains(edge.to.as_str()) {
                if let Some(list) = deps.get_mut(&edge.from) {
                    list.push(edge.to.clone());
                }
            }
        }

        deps
    }

    /// Detect a dependency cycle, returning the nodes on it when present.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let deps = self.prerequisites();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node.as_str())
                && cycle_dfs(node, &deps, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }

        None
    }
}

fn cycle_dfs(
    node: &str,
    deps: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(prereqs) = deps.get(node) {
        for prereq in prereqs {
            if !visited.contains(prereq.as_str()) {
                if cycle_dfs(prereq, deps, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(prereq.as_str()) {
                if let Some(start) = path.iter().position(|n| n == prereq) {
                    path.drain(0..start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Batched execution plan built once per orchestration start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Spec names in user-requested order.
    pub specs: Vec<String>,
    /// Prerequisites per spec.
    pub dependencies: HashMap<String, Vec<String>>,
    /// Batches in execution order; within a batch input order is preserved.
    pub batches: Vec<Vec<String>>,
    pub has_cycle: bool,
    pub cycle_path: Option<Vec<String>>,
}

impl ExecutionPlan {
    /// Build a plan from the requested specs and their dependency graph.
    ///
    /// On a cycle the plan carries `has_cycle` and the offending path and
    /// has no batches.
    pub fn build(specs: &[String], graph: &DependencyGraph) -> Self {
        let dependencies = graph.prerequisites();

        if let Some(cycle) = graph.find_cycle() {
            return Self {
                specs: specs.to_vec(),
                dependencies,
                batches: Vec::new(),
                has_cycle: true,
                cycle_path: Some(cycle),
            };
        }

        // Batch index = 1 + max batch of prerequisites, roots at 0.
        let mut batch_index: HashMap<String, usize> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (spec, prereqs) in &dependencies {
            in_degree.entry(spec.as_str()).or_insert(0);
            for prereq in prereqs {
                *in_degree.entry(spec.as_str()).or_insert(0) += 1;
                dependents.entry(prereq.as_str()).or_default().push(spec);
            }
        }

        let mut queue: VecDeque<&str> = specs
            .iter()
            .map(String::as_str)
            .filter(|s| in_degree.get(s).copied().unwrap_or(0) == 0)
            .collect();
        for spec in &queue {
            batch_index.insert((*spec).to_string(), 0);
        }

        while let Some(spec) = queue.pop_front() {
            let level = batch_index[spec];
            if let Some(deps) = dependents.get(spec) {
                for &dependent in deps {
                    let entry = batch_index.entry(dependent.to_string()).or_insert(0);
                    *entry = (*entry).max(level + 1);
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        let total_batches = batch_index.values().max().map_or(0, |m| m + 1);
        let mut batches = vec![Vec::new(); total_batches];
        for spec in specs {
            if let Some(&idx) = batch_index.get(spec) {
                batches[idx].push(spec.clone());
            }
        }

        Self {
            specs: specs.to_vec(),
            dependencies,
            batches,
            has_cycle: false,
            cycle_path: None,
        }
    }

    /// Batch index of a spec, when planned.
    pub fn batch_of(&self, spec: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|s| s == spec))
    }

    /// All direct and transitive dependents of a spec within this plan.
    pub fn all_dependents(&self, spec: &str) -> HashSet<String> {
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (s, prereqs) in &self.dependencies {
            for prereq in prereqs {
                dependents.entry(prereq.as_str()).or_default().push(s);
            }
        }

        let mut result = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(direct) = dependents.get(spec) {
            queue.extend(direct.iter().copied());
        }

        while let Some(name) = queue.pop_front() {
            if result.insert(name.to_string()) {
                if let Some(next) = dependents.get(name) {
                    queue.extend(next.iter().copied());
                }
            }
        }

        result
    }

    /// All direct and transitive prerequisites of a spec within this plan.
    pub fn all_prerequisites(&self, spec: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(direct) = self.dependencies.get(spec) {
            queue.extend(direct.iter().cloned());
        }

        while let Some(name) = queue.pop_front() {
            if result.insert(name.clone()) {
                if let Some(next) = self.dependencies.get(&name) {
                    queue.extend(next.iter().cloned());
                }
            }
        }

        result
    }
}
