use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data::MergePolicy;
use crate::error::{Error, Result};
use crate::task::{TaskId, WorkRequest};

/// A dependency: `to` may start only after `from` succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// The predecessor.
    pub from: TaskId,
    /// The dependent task.
    pub to: TaskId,
}

/// A named directed acyclic graph of [`WorkRequest`]s.
///
/// Task order is declaration order; edge order is declaration order, which
/// makes [`Pipeline::predecessors`] deterministic for fan-in merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    name: String,
    tasks: Vec<WorkRequest>,
    edges: Vec<Edge>,
    #[serde(default)]
    merge_policy: MergePolicy,
}

impl Pipeline {
    /// Assembles a pipeline from raw parts without validating it.
    ///
    /// Prefer [`PipelineBuilder`](crate::pipeline::PipelineBuilder), which can
    /// only produce well-formed graphs.
    pub fn from_parts(
        name: impl Into<String>,
        tasks: Vec<WorkRequest>,
        edges: Vec<Edge>,
        merge_policy: MergePolicy,
    ) -> Self {
        Self {
            name: name.into(),
            tasks,
            edges,
            merge_policy,
        }
    }

    pub(crate) fn single(name: String, initial: WorkRequest) -> Self {
        Self {
            name,
            tasks: vec![initial],
            edges: Vec::new(),
            merge_policy: MergePolicy::default(),
        }
    }

    pub(crate) fn push_task(&mut self, task: WorkRequest, after: &[TaskId]) {
        let to = task.id();
        self.tasks.push(task);
        self.edges
            .extend(after.iter().map(|&from| Edge { from, to }));
    }

    pub(crate) fn set_merge_policy(&mut self, policy: MergePolicy) {
        self.merge_policy = policy;
    }

    /// Unique work name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the pipeline has no tasks. A valid pipeline never does.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[WorkRequest] {
        &self.tasks
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// How fan-in outputs are combined.
    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Task ids in declaration order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(WorkRequest::id).collect()
    }

    /// Looks up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&WorkRequest> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    /// Direct predecessors of `id`, in edge declaration order.
    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from)
            .collect()
    }

    /// Direct successors of `id`, in edge declaration order.
    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to)
            .collect()
    }

    /// Tasks with no predecessors.
    pub fn roots(&self) -> Vec<TaskId> {
        let targets: HashSet<TaskId> = self.edges.iter().map(|e| e.to).collect();
        self.tasks
            .iter()
            .map(WorkRequest::id)
            .filter(|id| !targets.contains(id))
            .collect()
    }

    /// Tasks with no successors.
    pub fn leaves(&self) -> Vec<TaskId> {
        let sources: HashSet<TaskId> = self.edges.iter().map(|e| e.from).collect();
        self.tasks
            .iter()
            .map(WorkRequest::id)
            .filter(|id| !sources.contains(id))
            .collect()
    }

    /// Every task reachable from `id`, excluding `id` itself, in breadth-first order.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<TaskId> = self.successors(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                order.push(next);
                queue.extend(self.successors(next));
            }
        }
        order
    }

    /// Groups tasks into layers: every task's predecessors live in earlier
    /// layers. Within a layer, tasks keep declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPipeline`] if the graph has a cycle.
    pub fn layers(&self) -> Result<Vec<Vec<TaskId>>> {
        let mut in_degree: IndexMap<TaskId, usize> =
            self.tasks.iter().map(|t| (t.id(), 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(&edge.to) {
                *degree += 1;
            }
        }

        let mut layers = Vec::new();
        while !in_degree.is_empty() {
            let ready: Vec<TaskId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(&id, _)| id)
                .collect();
            if ready.is_empty() {
                return Err(self.invalid("dependency cycle detected"));
            }
            for id in &ready {
                in_degree.shift_remove(id);
                for successor in self.successors(*id) {
                    if let Some(degree) = in_degree.get_mut(&successor) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            layers.push(ready);
        }
        Ok(layers)
    }

    /// A linear order in which every task follows its predecessors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPipeline`] if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        Ok(self.layers()?.into_iter().flatten().collect())
    }

    /// Returns `true` if every task has at most one predecessor and one
    /// successor, and the tasks form a single chain.
    pub fn is_linear_chain(&self) -> bool {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        let mut out_degree: HashMap<TaskId, usize> = HashMap::new();
        for edge in &self.edges {
            *out_degree.entry(edge.from).or_default() += 1;
            *in_degree.entry(edge.to).or_default() += 1;
        }
        self.edges.len() + 1 == self.tasks.len()
            && in_degree.values().all(|&d| d == 1)
            && out_degree.values().all(|&d| d == 1)
            && self.roots().len() == 1
    }

    /// Checks the structural invariants: at least one task, unique task
    /// ids, edges between known tasks, no cycles and a single connected
    /// component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPipeline`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(self.invalid("pipeline has no tasks"));
        }

        let mut ids = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !ids.insert(task.id()) {
                return Err(self.invalid(format!("duplicate task id {}", task.id())));
            }
        }

        for edge in &self.edges {
            if edge.from == edge.to {
                return Err(self.invalid(format!("task {} depends on itself", edge.from)));
            }
            for end in [edge.from, edge.to] {
                if !ids.contains(&end) {
                    return Err(self.invalid(format!("edge references unknown task {end}")));
                }
            }
        }

        self.layers()?;

        if !self.is_connected() {
            return Err(self.invalid("pipeline is not connected"));
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        let Some(first) = self.tasks.first() else {
            return true;
        };
        let mut neighbours: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for edge in &self.edges {
            neighbours.entry(edge.from).or_default().push(edge.to);
            neighbours.entry(edge.to).or_default().push(edge.from);
        }

        let mut seen = HashSet::from([first.id()]);
        let mut queue = VecDeque::from([first.id()]);
        while let Some(id) = queue.pop_front() {
            for &next in neighbours.get(&id).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.len() == self.tasks.len()
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidPipeline {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StageKind;
    use pretty_assertions::assert_eq;

    fn task(worker: &str) -> WorkRequest {
        WorkRequest::from_worker(StageKind::Transform, worker)
    }

    fn chain(n: usize) -> Pipeline {
        let mut tasks = (0..n).map(|i| task(&format!("w{i}")));
        let mut pipeline = Pipeline::single("chain".to_string(), tasks.next().unwrap());
        for next in tasks {
            let tail = *pipeline.task_ids().last().unwrap();
            pipeline.push_task(next, &[tail]);
        }
        pipeline
    }

    #[test]
    fn chain_has_one_root_and_one_leaf() {
        let pipeline = chain(4);
        let ids = pipeline.task_ids();
        assert!(pipeline.validate().is_ok());
        assert!(pipeline.is_linear_chain());
        assert_eq!(pipeline.roots(), vec![ids[0]]);
        assert_eq!(pipeline.leaves(), vec![ids[3]]);
        assert_eq!(pipeline.topological_order().unwrap(), ids);
        assert_eq!(pipeline.descendants(ids[1]), vec![ids[2], ids[3]]);
    }

    #[test]
    fn fan_out_lands_in_one_layer() {
        let root = task("root");
        let left = task("left");
        let right = task("right");
        let join = task("join");
        let (r, l, rt, j) = (root.id(), left.id(), right.id(), join.id());

        let mut pipeline = Pipeline::single("diamond".to_string(), root);
        pipeline.push_task(left, &[r]);
        pipeline.push_task(right, &[r]);
        pipeline.push_task(join, &[l, rt]);

        assert!(pipeline.validate().is_ok());
        assert!(!pipeline.is_linear_chain());
        assert_eq!(
            pipeline.layers().unwrap(),
            vec![vec![r], vec![l, rt], vec![j]]
        );
        assert_eq!(pipeline.predecessors(j), vec![l, rt]);
    }

    #[test]
    fn cycle_is_rejected() {
        let a = task("a");
        let b = task("b");
        let edges = vec![
            Edge {
                from: a.id(),
                to: b.id(),
            },
            Edge {
                from: b.id(),
                to: a.id(),
            },
        ];
        let pipeline = Pipeline::from_parts("loop", vec![a, b], edges, MergePolicy::default());
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn empty_duplicate_dangling_and_disconnected_are_rejected() {
        let empty = Pipeline::from_parts("empty", vec![], vec![], MergePolicy::default());
        assert!(empty.validate().is_err());

        let a = task("a");
        let dup = Pipeline::from_parts(
            "dup",
            vec![a.clone(), a.clone()],
            vec![],
            MergePolicy::default(),
        );
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));

        let stray = task("stray");
        let dangling = Pipeline::from_parts(
            "dangling",
            vec![a.clone()],
            vec![Edge {
                from: a.id(),
                to: stray.id(),
            }],
            MergePolicy::default(),
        );
        assert!(dangling.validate().unwrap_err().to_string().contains("unknown"));

        let apart = Pipeline::from_parts("apart", vec![a, stray], vec![], MergePolicy::default());
        assert!(apart
            .validate()
            .unwrap_err()
            .to_string()
            .contains("not connected"));
    }

    #[test]
    fn pipeline_serializes() {
        let pipeline = chain(3);
        let json = serde_json::to_string(&pipeline).unwrap();
        let back: Pipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pipeline);
    }
}
