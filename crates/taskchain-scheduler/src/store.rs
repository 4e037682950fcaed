//! Work info records and the live views derived from them.
//!
//! [`WorkInfoStore`] owns one [`WorkInfo`] per task. Every mutation goes
//! through [`WorkInfoStore::transition`], which validates the move against
//! the task state machine, then republishes each view containing the task:
//! the run view, the tag views and the name view. All mutations happen under
//! one lock, so every view observes states in the order they were recorded.

use std::collections::HashMap;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use taskchain::{Error, Pipeline, Result, RunId, RunState, TaskId, TaskState, WorkInfo};
use tokio::sync::watch;
use tracing::trace;

type View = watch::Sender<Vec<WorkInfo>>;

#[derive(Debug)]
struct RunEntry {
    name: String,
    task_ids: Vec<TaskId>,
    leaves: Vec<TaskId>,
    view: View,
}

#[derive(Debug, Default)]
struct Inner {
    infos: IndexMap<TaskId, WorkInfo>,
    runs: IndexMap<RunId, RunEntry>,
    tag_views: HashMap<String, View>,
    name_views: HashMap<String, View>,
}

impl Inner {
    fn run_infos(&self, run_id: RunId) -> Vec<WorkInfo> {
        self.runs
            .get(&run_id)
            .map(|run| {
                run.task_ids
                    .iter()
                    .filter_map(|id| self.infos.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn tagged(&self, tag: &str) -> Vec<WorkInfo> {
        self.infos
            .values()
            .filter(|info| info.has_tag(tag))
            .cloned()
            .collect()
    }

    fn named(&self, name: &str) -> Vec<WorkInfo> {
        self.infos
            .values()
            .filter(|info| info.name == name)
            .cloned()
            .collect()
    }

    /// Republishes every view that can contain a task of `run_id`.
    fn publish_run(&self, run_id: RunId) {
        let Some(run) = self.runs.get(&run_id) else {
            return;
        };
        run.view.send_replace(self.run_infos(run_id));

        let mut tags: Vec<&str> = run
            .task_ids
            .iter()
            .filter_map(|id| self.infos.get(id))
            .flat_map(|info| info.tags.iter().map(String::as_str))
            .collect();
        tags.sort_unstable();
        tags.dedup();
        self.publish_tags(tags);

        if let Some(view) = self.name_views.get(&run.name) {
            view.send_replace(self.named(&run.name));
        }
    }

    fn publish_tags<'a>(&self, tags: impl IntoIterator<Item = &'a str>) {
        for tag in tags {
            if let Some(view) = self.tag_views.get(tag) {
                view.send_replace(self.tagged(tag));
            }
        }
    }
}

/// Thread-safe store of [`WorkInfo`] records.
#[derive(Debug, Default)]
pub struct WorkInfoStore {
    inner: Mutex<Inner>,
}

impl WorkInfoStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every task of `pipeline` as `Enqueued` under `run_id` and
    /// returns the run's live view.
    pub fn insert_run(&self, run_id: RunId, pipeline: &Pipeline) -> watch::Receiver<Vec<WorkInfo>> {
        let mut inner = self.inner.lock();
        for request in pipeline.tasks() {
            inner
                .infos
                .insert(request.id(), WorkInfo::enqueued(run_id, pipeline.name(), request));
        }
        let (view, rx) = watch::channel(Vec::new());
        inner.runs.insert(
            run_id,
            RunEntry {
                name: pipeline.name().to_string(),
                task_ids: pipeline.task_ids(),
                leaves: pipeline.leaves(),
                view,
            },
        );
        inner.publish_run(run_id);
        rx
    }

    /// Returns `true` if the run is still recorded.
    pub fn contains_run(&self, run_id: RunId) -> bool {
        self.inner.lock().runs.contains_key(&run_id)
    }

    /// Subscribes to one run.
    pub fn subscribe_run(&self, run_id: RunId) -> Option<watch::Receiver<Vec<WorkInfo>>> {
        self.inner.lock().runs.get(&run_id).map(|run| run.view.subscribe())
    }

    /// Tasks of `run_id`, in declaration order.
    pub fn run_task_ids(&self, run_id: RunId) -> Vec<TaskId> {
        self.inner
            .lock()
            .runs
            .get(&run_id)
            .map(|run| run.task_ids.clone())
            .unwrap_or_default()
    }

    /// Aggregate state of `run_id`, if recorded.
    pub fn run_state(&self, run_id: RunId) -> Option<RunState> {
        let inner = self.inner.lock();
        inner
            .runs
            .contains_key(&run_id)
            .then(|| RunState::from_infos(&inner.run_infos(run_id)))
    }

    /// Leaf tasks of `run_id`, in declaration order.
    pub fn run_leaves(&self, run_id: RunId) -> Vec<TaskId> {
        self.inner
            .lock()
            .runs
            .get(&run_id)
            .map(|run| run.leaves.clone())
            .unwrap_or_default()
    }

    /// Current record of one task.
    pub fn get(&self, task_id: TaskId) -> Option<WorkInfo> {
        self.inner.lock().infos.get(&task_id).cloned()
    }

    /// Current state of one task.
    pub fn state(&self, task_id: TaskId) -> Option<TaskState> {
        self.inner.lock().infos.get(&task_id).map(|info| info.state)
    }

    /// Moves a task to `next`, applying `update` to its record, and
    /// republishes its views.
    ///
    /// Entering `Running` increments `run_attempt`; leaving `Blocked` clears
    /// `blocked_by`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if the state machine rejects the move,
    /// or [`Error::Scheduler`] for an unknown task.
    pub fn transition(
        &self,
        task_id: TaskId,
        next: TaskState,
        update: impl FnOnce(&mut WorkInfo),
    ) -> Result<WorkInfo> {
        let mut inner = self.inner.lock();
        let info = inner
            .infos
            .get_mut(&task_id)
            .ok_or_else(|| Error::scheduler(format!("unknown task {task_id}")))?;
        info.state.validate_transition(&task_id, &next)?;

        trace!(task_id = %task_id, from = %info.state, to = %next, "transition");
        info.state = next;
        info.updated_at = Utc::now();
        if next == TaskState::Running {
            info.run_attempt += 1;
        }
        if next != TaskState::Blocked {
            info.blocked_by.clear();
        }
        update(info);

        let snapshot = info.clone();
        inner.publish_run(snapshot.run_id);
        Ok(snapshot)
    }

    /// Marks every non-terminal task of `run_id` as `Cancelled`, returning
    /// how many changed.
    pub fn cancel_run(&self, run_id: RunId) -> usize {
        let mut inner = self.inner.lock();
        let Some(task_ids) = inner.runs.get(&run_id).map(|run| run.task_ids.clone()) else {
            return 0;
        };

        let now = Utc::now();
        let mut cancelled = 0;
        for id in task_ids {
            if let Some(info) = inner.infos.get_mut(&id) {
                if !info.state.is_terminal() {
                    info.state = TaskState::Cancelled;
                    info.blocked_by.clear();
                    info.updated_at = now;
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            inner.publish_run(run_id);
        }
        cancelled
    }

    /// Live view of every task carrying `tag`.
    pub fn subscribe_tag(&self, tag: &str) -> watch::Receiver<Vec<WorkInfo>> {
        let mut inner = self.inner.lock();
        if let Some(view) = inner.tag_views.get(tag) {
            return view.subscribe();
        }
        let (view, rx) = watch::channel(inner.tagged(tag));
        inner.tag_views.insert(tag.to_string(), view);
        rx
    }

    /// Live view of every task submitted under `name`.
    pub fn subscribe_name(&self, name: &str) -> watch::Receiver<Vec<WorkInfo>> {
        let mut inner = self.inner.lock();
        if let Some(view) = inner.name_views.get(name) {
            return view.subscribe();
        }
        let (view, rx) = watch::channel(inner.named(name));
        inner.name_views.insert(name.to_string(), view);
        rx
    }

    /// Forgets one run if every task in it is terminal. Returns the number
    /// of task records removed.
    pub fn remove_run_if_terminal(&self, run_id: RunId) -> usize {
        let mut inner = self.inner.lock();
        let terminal = inner
            .run_infos(run_id)
            .iter()
            .all(|info| info.state.is_terminal());
        if !terminal {
            return 0;
        }
        Self::remove_runs(&mut inner, &[run_id])
    }

    /// Forgets every run whose tasks are all terminal. Returns the pruned
    /// run ids and the number of task records removed.
    pub fn prune_terminal(&self) -> (Vec<RunId>, usize) {
        let mut inner = self.inner.lock();
        let finished: Vec<RunId> = inner
            .runs
            .keys()
            .copied()
            .filter(|id| {
                inner
                    .run_infos(*id)
                    .iter()
                    .all(|info| info.state.is_terminal())
            })
            .collect();
        let removed = Self::remove_runs(&mut inner, &finished);
        (finished, removed)
    }

    fn remove_runs(inner: &mut Inner, run_ids: &[RunId]) -> usize {
        let mut removed = 0;
        let mut names = Vec::new();
        let mut tags = Vec::new();
        for run_id in run_ids {
            let Some(run) = inner.runs.shift_remove(run_id) else {
                continue;
            };
            for id in &run.task_ids {
                if let Some(info) = inner.infos.shift_remove(id) {
                    tags.extend(info.tags);
                    removed += 1;
                }
            }
            names.push(run.name);
        }

        tags.sort_unstable();
        tags.dedup();
        inner.publish_tags(tags.iter().map(String::as_str));
        for name in names {
            if let Some(view) = inner.name_views.get(&name) {
                view.send_replace(inner.named(&name));
            }
        }
        removed
    }

    /// Number of task records.
    pub fn len(&self) -> usize {
        self.inner.lock().infos.len()
    }

    /// Returns `true` if no task is recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskchain::{Data, StageKind, WorkRequest};

    fn pipeline(name: &str, tag: &str) -> Pipeline {
        let first = WorkRequest::from_worker(StageKind::Cleanup, "Clean");
        let second = WorkRequest::builder(StageKind::Persist, "Save")
            .tag(tag)
            .build();
        Pipeline::from_parts(
            name,
            vec![first.clone(), second.clone()],
            vec![taskchain::Edge {
                from: first.id(),
                to: second.id(),
            }],
            Default::default(),
        )
    }

    #[test]
    fn insert_publishes_enqueued_snapshot() {
        let store = WorkInfoStore::new();
        let run_id = RunId::new();
        let rx = store.insert_run(run_id, &pipeline("work", "output"));

        let infos = rx.borrow().clone();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.state == TaskState::Enqueued));
        assert_eq!(store.run_state(run_id), Some(RunState::Enqueued));
    }

    #[test]
    fn transitions_are_validated_and_counted() {
        let store = WorkInfoStore::new();
        let p = pipeline("work", "output");
        let id = p.task_ids()[0];
        store.insert_run(RunId::new(), &p);

        store.transition(id, TaskState::Running, |_| {}).unwrap();
        store.transition(id, TaskState::Blocked, |_| {}).unwrap();
        let info = store.transition(id, TaskState::Running, |_| {}).unwrap();
        assert_eq!(info.run_attempt, 2);

        let output = Data::builder().put_string("uri", "x").build().unwrap();
        store
            .transition(id, TaskState::Succeeded, |info| info.output = output.clone())
            .unwrap();
        assert_eq!(store.get(id).unwrap().output, output);

        let err = store
            .transition(id, TaskState::Running, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn tag_and_name_views_follow_changes() {
        let store = WorkInfoStore::new();
        let tagged_rx = store.subscribe_tag("output");
        let named_rx = store.subscribe_name("work");
        assert!(tagged_rx.borrow().is_empty());

        let p = pipeline("work", "output");
        store.insert_run(RunId::new(), &p);
        store.insert_run(RunId::new(), &pipeline("other", "output"));

        assert_eq!(tagged_rx.borrow().len(), 2);
        assert_eq!(named_rx.borrow().len(), 2);

        store
            .transition(p.task_ids()[1], TaskState::Cancelled, |_| {})
            .unwrap();
        let states: Vec<TaskState> = named_rx.borrow().iter().map(|i| i.state).collect();
        assert_eq!(states, vec![TaskState::Enqueued, TaskState::Cancelled]);
    }

    #[test]
    fn cancel_run_touches_only_live_tasks() {
        let store = WorkInfoStore::new();
        let run_id = RunId::new();
        let p = pipeline("work", "output");
        store.insert_run(run_id, &p);
        store
            .transition(p.task_ids()[0], TaskState::Running, |_| {})
            .unwrap();
        store
            .transition(p.task_ids()[0], TaskState::Succeeded, |_| {})
            .unwrap();

        assert_eq!(store.cancel_run(run_id), 1);
        assert_eq!(store.cancel_run(run_id), 0);
        assert_eq!(store.run_state(run_id), Some(RunState::Cancelled));
    }

    #[test]
    fn prune_removes_only_terminal_runs() {
        let store = WorkInfoStore::new();
        let tagged_rx = store.subscribe_tag("output");
        let done = RunId::new();
        let live = RunId::new();
        store.insert_run(done, &pipeline("a", "output"));
        store.insert_run(live, &pipeline("b", "output"));
        store.cancel_run(done);

        let (pruned, removed) = store.prune_terminal();
        assert_eq!(pruned, vec![done]);
        assert_eq!(removed, 2);
        assert!(!store.contains_run(done));
        assert!(store.contains_run(live));
        assert_eq!(tagged_rx.borrow().len(), 1);
    }

    #[test]
    fn run_leaves_are_forgotten_with_the_run() {
        let store = WorkInfoStore::new();
        let run_id = RunId::new();
        let p = pipeline("work", "output");
        store.insert_run(run_id, &p);
        assert_eq!(store.run_leaves(run_id), vec![p.task_ids()[1]]);
        assert!(store.run_leaves(RunId::new()).is_empty());

        for id in p.task_ids() {
            store.transition(id, TaskState::Running, |_| {}).unwrap();
            store.transition(id, TaskState::Succeeded, |_| {}).unwrap();
        }
        assert_eq!(store.remove_run_if_terminal(run_id), 2);
        assert!(store.run_leaves(run_id).is_empty());
    }
}
