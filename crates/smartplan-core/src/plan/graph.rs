//! Task dependency graph: validation, topological ordering, timeline.
//!
//! Edges are held as indices keyed by task id. An edge `dep -> task` means
//! `dep` must finish before `task` starts.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::Serialize;

use smartplan_db::models::PlannedTask;

use super::normalize::NormalizeError;

/// Tolerance when comparing day arithmetic on `f64` durations.
const EPSILON: f64 = 1e-9;

/// Directed dependency graph over a plan's tasks.
#[derive(Debug)]
pub struct TaskGraph<'a> {
    tasks: &'a [PlannedTask],
    /// `prerequisites[i]`: tasks that must finish before task `i`.
    prerequisites: Vec<Vec<usize>>,
    /// `dependents[i]`: tasks waiting on task `i`.
    dependents: Vec<Vec<usize>>,
}

/// A task placed on the timeline, assuming unlimited parallelism.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask<'a> {
    #[serde(flatten)]
    pub task: &'a PlannedTask,
    /// Earliest start, in days from plan start.
    pub start_day: f64,
    /// Earliest finish, in days from plan start.
    pub finish_day: f64,
    /// Whether delaying this task delays the whole plan.
    pub critical: bool,
}

/// Dependency-aware schedule of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline<'a> {
    /// Tasks in topological order (ties keep the model's order).
    pub tasks: Vec<ScheduledTask<'a>>,
    /// Length of the longest dependency chain.
    pub critical_path_days: f64,
    /// Total if every task ran one after another.
    pub sequential_days: f64,
}

impl<'a> TaskGraph<'a> {
    /// Build the graph, checking ids are unique and every dependency names a
    /// declared task.
    pub fn build(tasks: &'a [PlannedTask]) -> Result<Self, NormalizeError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.as_str(), i).is_some() {
                return Err(NormalizeError::DuplicateTaskId(task.id.clone()));
            }
        }

        let mut prerequisites = vec![Vec::new(); tasks.len()];
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let Some(&d) = index.get(dep.as_str()) else {
                    return Err(NormalizeError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                prerequisites[i].push(d);
                dependents[d].push(i);
            }
        }

        Ok(Self {
            tasks,
            prerequisites,
            dependents,
        })
    }

    /// Task indices in dependency order using Kahn's algorithm.
    ///
    /// Among tasks that are ready at the same time, the one the model listed
    /// first comes first, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<usize>, NormalizeError> {
        let n = self.tasks.len();
        let mut in_degree: Vec<usize> = self.prerequisites.iter().map(Vec::len).collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, deg)| **deg > 0)
                .map(|(i, _)| self.tasks[i].id.as_str())
                .collect();
            return Err(NormalizeError::CycleDetected(stuck.join(", ")));
        }

        Ok(order)
    }

    /// Earliest start/finish for every task and the critical path.
    pub fn timeline(&self) -> Result<Timeline<'a>, NormalizeError> {
        let order = self.topological_order()?;
        let n = self.tasks.len();

        // Forward pass: earliest start is the latest prerequisite finish.
        let mut start = vec![0.0_f64; n];
        let mut finish = vec![0.0_f64; n];
        for &i in &order {
            start[i] = self.prerequisites[i]
                .iter()
                .map(|&d| finish[d])
                .fold(0.0, f64::max);
            finish[i] = start[i] + self.tasks[i].duration_days;
        }
        let critical_path_days = finish.iter().copied().fold(0.0, f64::max);

        // Backward pass: latest finish that does not delay the plan.
        let mut late_finish = vec![critical_path_days; n];
        for &i in order.iter().rev() {
            late_finish[i] = self.dependents[i]
                .iter()
                .map(|&t| late_finish[t] - self.tasks[t].duration_days)
                .fold(critical_path_days, f64::min);
        }

        let tasks = order
            .iter()
            .map(|&i| ScheduledTask {
                task: &self.tasks[i],
                start_day: start[i],
                finish_day: finish[i],
                critical: (late_finish[i] - finish[i]).abs() < EPSILON,
            })
            .collect();

        Ok(Timeline {
            tasks,
            critical_path_days,
            sequential_days: self.tasks.iter().map(|t| t.duration_days).sum(),
        })
    }
}

/// Build the timeline for an already validated task list.
pub fn timeline(tasks: &[PlannedTask]) -> Result<Timeline<'_>, NormalizeError> {
    TaskGraph::build(tasks)?.timeline()
}
