//! Parallel plan execution
//!
//! A pool of scoped worker threads receives plan positions over a channel and
//! reports results back. The coordinating thread dispatches a node once every
//! predecessor succeeded, lowest plan position first, so with one worker the
//! execution order is exactly the plan order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};

use super::Plan;
use crate::error::{Error, Result};

/// What happens to the rest of the plan after a node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Start nothing new, let running nodes finish
    #[default]
    FailFast,
    /// Keep running everything that does not depend on a failure
    KeepGoing,
}

/// Cooperative cancellation shared with the coordinator
///
/// Cancelling stops dispatch; nodes that have not started produce nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub jobs: usize,
    pub policy: FailurePolicy,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            policy: FailurePolicy::default(),
            cancel: CancelToken::new(),
        }
    }
}

impl RunOptions {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Final state of one plan node
#[derive(Debug)]
pub enum NodeState<T> {
    Pending,
    Running,
    Succeeded { value: T, duration: Duration },
    Failed { error: Error, duration: Duration },
    /// A predecessor (plan position) failed or was skipped
    Skipped { because: usize },
    /// Stopped by fail-fast or cancellation before it could start
    NotStarted,
}

/// Execute `plan`, calling `work` with each plan position exactly once
pub fn run<T, F>(plan: &Plan, options: &RunOptions, work: F) -> Vec<NodeState<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    let count = plan.len();
    let mut states: Vec<NodeState<T>> = (0..count).map(|_| NodeState::Pending).collect();
    if count == 0 {
        return states;
    }

    let mut waiting: Vec<usize> = plan.nodes().iter().map(|n| n.after.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (pos, node) in plan.nodes().iter().enumerate() {
        for &before in &node.after {
            dependents[before].push(pos);
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&pos| waiting[pos] == 0).collect();
    let jobs = options.jobs.clamp(1, count);

    let (job_tx, job_rx) = unbounded::<usize>();
    let (done_tx, done_rx) = unbounded::<(usize, Result<T>, Duration)>();

    thread::scope(|scope| {
        for _ in 0..jobs {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let work = &work;
            scope.spawn(move || {
                for pos in job_rx.iter() {
                    let start = Instant::now();
                    let result = work(pos);
                    if done_tx.send((pos, result, start.elapsed())).is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);

        let mut in_flight = 0;
        let mut stopping = false;

        loop {
            if options.cancel.is_cancelled() {
                stopping = true;
            }

            while !stopping && in_flight < jobs {
                let Some(pos) = ready.pop_first() else {
                    break;
                };
                if job_tx.send(pos).is_err() {
                    stopping = true;
                    break;
                }
                states[pos] = NodeState::Running;
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let Ok((pos, result, duration)) = done_rx.recv() else {
                break;
            };
            in_flight -= 1;

            match result {
                Ok(value) => {
                    states[pos] = NodeState::Succeeded { value, duration };
                    for &next in &dependents[pos] {
                        waiting[next] -= 1;
                        if waiting[next] == 0 && matches!(states[next], NodeState::Pending) {
                            ready.insert(next);
                        }
                    }
                }
                Err(error) => {
                    states[pos] = NodeState::Failed { error, duration };
                    match options.policy {
                        FailurePolicy::FailFast => stopping = true,
                        FailurePolicy::KeepGoing => skip_dependents(pos, &dependents, &mut states),
                    }
                }
            }
        }

        drop(job_tx);
    });

    // Anything still pending either sits behind a failure or was stopped
    for pos in 0..count {
        if !matches!(states[pos], NodeState::Pending) {
            continue;
        }
        let blocked_by = plan.nodes()[pos].after.iter().copied().find(|&before| {
            matches!(
                states[before],
                NodeState::Failed { .. } | NodeState::Skipped { .. }
            )
        });
        states[pos] = match blocked_by {
            Some(because) => NodeState::Skipped { because },
            None => NodeState::NotStarted,
        };
    }

    states
}

fn skip_dependents<T>(failed: usize, dependents: &[Vec<usize>], states: &mut [NodeState<T>]) {
    let mut queue = vec![failed];
    while let Some(pos) = queue.pop() {
        for &next in &dependents[pos] {
            if matches!(states[next], NodeState::Pending) {
                states[next] = NodeState::Skipped { because: pos };
                queue.push(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGraph;
    use crate::script::GenerationTask;
    use std::sync::Mutex;

    fn gen(id: &str, work_dir: &str) -> GenerationTask {
        GenerationTask::new(id, "s.sh", work_dir, "cache", format!("{id}.dump"))
    }

    /// Log of ("start"|"end", id) events
    type Events = Mutex<Vec<(&'static str, String)>>;

    fn record(plan: &Plan, events: &Events, pos: usize, fail: &[&str]) -> Result<()> {
        let id = plan.nodes()[pos].id.clone();
        events.lock().unwrap().push(("start", id.clone()));
        thread::sleep(Duration::from_millis(20));
        events.lock().unwrap().push(("end", id.clone()));
        if fail.contains(&id.as_str()) {
            Err(Error::ProcessFailed {
                code: Some(1),
                stderr: String::new(),
            })
        } else {
            Ok(())
        }
    }

    fn index_of(events: &[(&'static str, String)], kind: &str, id: &str) -> usize {
        events
            .iter()
            .position(|(k, i)| *k == kind && i == id)
            .unwrap_or_else(|| panic!("no {kind} event for {id}"))
    }

    fn diamond() -> TaskGraph {
        let mut graph = TaskGraph::new();
        for id in ["root", "left", "right", "join"] {
            graph.register(gen(id, id)).unwrap();
        }
        graph.depends_on("left", "root").unwrap();
        graph.depends_on("right", "root").unwrap();
        graph.depends_on("join", "left").unwrap();
        graph.depends_on("join", "right").unwrap();
        graph
    }

    #[test]
    fn test_each_node_runs_once_after_its_dependencies() {
        let plan = diamond().plan_all().unwrap();
        let events = Events::default();

        let states = run(&plan, &RunOptions::default().with_jobs(4), |pos| {
            record(&plan, &events, pos, &[])
        });

        assert!(states
            .iter()
            .all(|s| matches!(s, NodeState::Succeeded { .. })));
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 8);
        assert!(index_of(&events, "end", "root") < index_of(&events, "start", "left"));
        assert!(index_of(&events, "end", "root") < index_of(&events, "start", "right"));
        assert!(index_of(&events, "end", "left") < index_of(&events, "start", "join"));
        assert!(index_of(&events, "end", "right") < index_of(&events, "start", "join"));
    }

    #[test]
    fn test_single_job_follows_plan_order() {
        let plan = diamond().plan_all().unwrap();
        let events = Events::default();

        run(&plan, &RunOptions::default().with_jobs(1), |pos| {
            record(&plan, &events, pos, &[])
        });

        let started: Vec<String> = events
            .into_inner()
            .unwrap()
            .into_iter()
            .filter(|(k, _)| *k == "start")
            .map(|(_, id)| id)
            .collect();
        assert_eq!(started, plan.ids());
    }

    #[test]
    fn test_shared_work_dir_never_overlaps() {
        let mut graph = TaskGraph::new();
        for id in ["a", "b", "c", "d"] {
            graph.register(gen(id, "shared")).unwrap();
        }
        let plan = graph.plan_all().unwrap();
        let events = Events::default();

        run(&plan, &RunOptions::default().with_jobs(4), |pos| {
            record(&plan, &events, pos, &[])
        });

        let events = events.into_inner().unwrap();
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, "start");
            assert_eq!(pair[1].0, "end");
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[test]
    fn test_fail_fast_stops_independent_work() {
        let mut graph = TaskGraph::new();
        graph.register(gen("bad", "w1")).unwrap();
        graph.register(gen("later", "w1")).unwrap();
        graph.register(gen("child", "w2")).unwrap();
        graph.depends_on("child", "bad").unwrap();
        let plan = graph.plan_all().unwrap();
        let events = Events::default();

        let states = run(&plan, &RunOptions::default().with_jobs(1), |pos| {
            record(&plan, &events, pos, &["bad"])
        });

        assert!(matches!(states[0], NodeState::Failed { .. }));
        assert!(matches!(states[1], NodeState::Skipped { because: 0 }));
        assert!(matches!(states[2], NodeState::Skipped { because: 0 }));
        assert_eq!(events.into_inner().unwrap().len(), 2);
    }

    #[test]
    fn test_keep_going_runs_independent_nodes() {
        let mut graph = TaskGraph::new();
        graph.register(gen("bad", "w1")).unwrap();
        graph.register(gen("child", "w2")).unwrap();
        graph.register(gen("grandchild", "w3")).unwrap();
        graph.register(gen("independent", "w4")).unwrap();
        graph.depends_on("child", "bad").unwrap();
        graph.depends_on("grandchild", "child").unwrap();
        let plan = graph.plan_all().unwrap();
        let events = Events::default();

        let states = run(
            &plan,
            &RunOptions::default()
                .with_jobs(1)
                .with_policy(FailurePolicy::KeepGoing),
            |pos| record(&plan, &events, pos, &["bad"]),
        );

        let at = |id: &str| &states[plan.position(id).unwrap()];
        assert!(matches!(at("bad"), NodeState::Failed { .. }));
        assert!(matches!(at("child"), NodeState::Skipped { .. }));
        assert!(matches!(at("grandchild"), NodeState::Skipped { .. }));
        assert!(matches!(at("independent"), NodeState::Succeeded { .. }));
    }

    #[test]
    fn test_cancelled_run_starts_nothing() {
        let plan = diamond().plan_all().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let events = Events::default();

        let states = run(
            &plan,
            &RunOptions::default().with_cancel(cancel),
            |pos| record(&plan, &events, pos, &[]),
        );

        assert!(states.iter().all(|s| matches!(s, NodeState::NotStarted)));
        assert!(events.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_during_run_leaves_rest_pending() {
        let mut graph = TaskGraph::new();
        for id in ["a", "b", "c"] {
            graph.register(gen(id, "shared")).unwrap();
        }
        let plan = graph.plan_all().unwrap();
        let cancel = CancelToken::new();
        let events = Events::default();

        let states = run(
            &plan,
            &RunOptions::default().with_cancel(cancel.clone()),
            |pos| {
                cancel.cancel();
                record(&plan, &events, pos, &[])
            },
        );

        assert!(matches!(states[0], NodeState::Succeeded { .. }));
        assert!(matches!(states[1], NodeState::NotStarted));
        assert!(matches!(states[2], NodeState::NotStarted));
    }
}
