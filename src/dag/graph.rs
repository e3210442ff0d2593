// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::errors::{CrewError, Result};
use crate::model::Task;
use crate::types::TaskId;

/// Dependency graph of one task group, keyed by task id.
///
/// Edge direction: parent -> child. For a task `B` with
/// `parent_ids = ["A"]` we add edge `A -> B`. Parents that are not part of
/// the graph still show up as nodes; callers check presence separately.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
}

impl<'a> TaskGraph<'a> {
    pub fn from_tasks<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut graph = Self::default();
        for task in tasks {
            graph.add_task(task);
        }
        graph
    }

    pub fn add_task(&mut self, task: &'a Task) {
        self.graph.add_node(task.id.as_str());
        for parent in &task.parent_ids {
            self.graph.add_edge(parent.as_str(), task.id.as_str(), ());
        }
    }

    /// `Err(CycleDetected)` naming one task on a cycle, if there is any.
    ///
    /// A task listing itself as parent counts as a cycle.
    pub fn ensure_acyclic(&self) -> Result<()> {
        // A topological sort will fail if there is a cycle.
        match toposort(&self.graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(CrewError::CycleDetected(format!(
                "cycle detected involving task '{}'",
                cycle.node_id()
            ))),
        }
    }

    /// Every task that sits on some cycle.
    pub fn tasks_in_cycles(&self) -> Vec<&'a str> {
        let mut out = Vec::new();
        for component in tarjan_scc(&self.graph) {
            let on_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| self.graph.contains_edge(n, n));
            if on_cycle {
                out.extend(component);
            }
        }
        out.sort_unstable();
        out
    }
}

/// Build the parent -> children back-index from `parent_ids`.
///
/// Children appear in the order the tasks are given. Parents absent from
/// `tasks` still get an entry.
pub fn children_index<'a, I>(tasks: I) -> HashMap<TaskId, Vec<TaskId>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut index: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for task in tasks {
        for parent in &task.parent_ids {
            let children = index.entry(parent.clone()).or_default();
            if !children.contains(&task.id) {
                children.push(task.id.clone());
            }
        }
    }
    index
}
