//! Task graph
//!
//! Nodes are bootstrap, generation and post-processing actions; an edge
//! `dependency -> dependent` means the dependent may not start before the
//! dependency succeeded. Besides the declared edges, nodes that share a
//! working directory are chained in planned order, because every script
//! builds on the state the previous one left there.

pub mod scheduler;

pub use scheduler::{CancelToken, FailurePolicy, NodeState, RunOptions};

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::logging::{operations, status};
use crate::postprocess::PostProcessStep;
use crate::report::{RunReport, TaskReport, TaskStatus};
use crate::resource::ResourceSet;
use crate::script::{GenerationTask, ScriptExecutor};
use crate::workspace::Workspace;

/// Something the graph can execute
#[derive(Debug, Clone)]
pub enum Action {
    Bootstrap { id: String, workspace: Workspace },
    Generate(GenerationTask),
    PostProcess(PostProcessStep),
}

impl From<GenerationTask> for Action {
    fn from(task: GenerationTask) -> Self {
        Action::Generate(task)
    }
}

impl From<PostProcessStep> for Action {
    fn from(step: PostProcessStep) -> Self {
        Action::PostProcess(step)
    }
}

impl From<Workspace> for Action {
    fn from(workspace: Workspace) -> Self {
        Action::Bootstrap {
            id: workspace.node_id(),
            workspace,
        }
    }
}

/// What a successful action produced
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub output: Option<PathBuf>,
    pub output_bytes: Option<u64>,
    pub output_sha256: Option<String>,
    pub exit_code: Option<i32>,
}

/// Shared collaborators for executing actions
#[derive(Clone)]
pub struct RunContext {
    pub resources: Arc<ResourceSet>,
    pub executor: ScriptExecutor,
}

impl RunContext {
    pub fn new(resources: Arc<ResourceSet>) -> Self {
        Self {
            resources,
            executor: ScriptExecutor::default(),
        }
    }
}

impl Action {
    pub fn id(&self) -> &str {
        match self {
            Action::Bootstrap { id, .. } => id,
            Action::Generate(task) => &task.id,
            Action::PostProcess(step) => &step.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Bootstrap { .. } => "bootstrap",
            Action::Generate(_) => "generate",
            Action::PostProcess(_) => "post-process",
        }
    }

    /// The mutable working directory this action touches, if any
    pub fn work_dir(&self) -> Option<&Path> {
        match self {
            Action::Bootstrap { workspace, .. } => Some(&workspace.path),
            Action::Generate(task) => Some(&task.work_dir),
            Action::PostProcess(_) => None,
        }
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            Action::Bootstrap { .. } => None,
            Action::Generate(task) => Some(&task.output),
            Action::PostProcess(step) => Some(&step.output),
        }
    }

    pub fn execute(&self, ctx: &RunContext) -> Result<ActionOutcome> {
        match self {
            Action::Bootstrap { workspace, .. } => {
                workspace.prepare()?;
                Ok(ActionOutcome::default())
            }
            Action::Generate(task) => {
                let result = task.execute(&ctx.resources, &ctx.executor)?;
                Ok(ActionOutcome {
                    output: Some(task.output.clone()),
                    output_bytes: Some(result.output_bytes),
                    output_sha256: Some(result.output_sha256),
                    exit_code: Some(result.exit_code),
                })
            }
            Action::PostProcess(step) => {
                let result = step.execute()?;
                Ok(ActionOutcome {
                    output: Some(step.output.clone()),
                    output_bytes: Some(result.output_bytes),
                    output_sha256: Some(result.output_sha256),
                    exit_code: None,
                })
            }
        }
    }
}

/// One node of a [`Plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub index: NodeIndex,
    pub id: String,
    /// Plan positions that must complete first
    pub after: Vec<usize>,
    /// The previous user of the same working directory, if any
    pub shares_work_dir_with: Option<usize>,
}

/// A validated, deterministic execution order
#[derive(Debug, Clone, Default)]
pub struct Plan {
    nodes: Vec<PlannedNode>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[PlannedNode] {
        &self.nodes
    }

    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }
}

#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: DiGraph<Action, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.index.get(id).map(|&i| &self.graph[i])
    }

    /// Node ids in registration order
    pub fn ids(&self) -> Vec<&str> {
        self.graph.node_indices().map(|i| self.graph[i].id()).collect()
    }

    pub fn register(&mut self, action: impl Into<Action>) -> Result<()> {
        let action = action.into();
        let id = action.id().to_string();
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateTask(id));
        }
        let node = self.graph.add_node(action);
        self.index.insert(id, node);
        Ok(())
    }

    /// Declare that `task` may not start before `dependency` succeeded
    pub fn depends_on(&mut self, task: &str, dependency: &str) -> Result<()> {
        let task = self.node(task)?;
        let dependency = self.node(dependency)?;
        self.graph.update_edge(dependency, task, ());
        Ok(())
    }

    /// Declared dependencies of `id`, in registration order
    pub fn dependencies_of(&self, id: &str) -> Result<Vec<&str>> {
        let node = self.node(id)?;
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        deps.sort();
        Ok(deps.into_iter().map(|i| self.graph[i].id()).collect())
    }

    fn node(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownTask(id.to_string()))
    }

    /// Fail with [`Error::CycleDetected`] if the declared edges form a cycle
    pub fn validate(&self) -> Result<()> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let path = self
                    .cycle_through(cycle.node_id())
                    .into_iter()
                    .map(|i| self.graph[i].id().to_string())
                    .collect();
                Err(Error::CycleDetected { path })
            }
        }
    }

    /// Walk "depends on" edges from `start` until a node repeats
    ///
    /// Returns the cycle as `a, b, ..., a` where each node depends on the next.
    fn cycle_through(&self, start: NodeIndex) -> Vec<NodeIndex> {
        fn visit(
            graph: &DiGraph<Action, ()>,
            node: NodeIndex,
            stack: &mut Vec<NodeIndex>,
            done: &mut HashSet<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            if let Some(pos) = stack.iter().position(|&n| n == node) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            if done.contains(&node) {
                return None;
            }
            stack.push(node);
            let mut deps: Vec<NodeIndex> =
                graph.neighbors_directed(node, Direction::Incoming).collect();
            deps.sort();
            for dep in deps {
                if let Some(cycle) = visit(graph, dep, stack, done) {
                    return Some(cycle);
                }
            }
            stack.pop();
            done.insert(node);
            None
        }

        visit(&self.graph, start, &mut Vec::new(), &mut HashSet::new())
            .unwrap_or_else(|| vec![start])
    }

    /// Topological order of the declared edges, ties broken by registration order
    fn stable_order(&self, include: &HashSet<NodeIndex>) -> Vec<NodeIndex> {
        let mut waiting: HashMap<NodeIndex, usize> = include
            .iter()
            .map(|&i| {
                let count = self
                    .graph
                    .neighbors_directed(i, Direction::Incoming)
                    .filter(|dep| include.contains(dep))
                    .count();
                (i, count)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = waiting
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(include.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(count) = waiting.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }
        order
    }

    /// Plan every registered node
    pub fn plan_all(&self) -> Result<Plan> {
        self.validate()?;
        let all: HashSet<NodeIndex> = self.graph.node_indices().collect();
        Ok(self.build_plan(&all))
    }

    /// Plan `targets`, with their transitive dependencies when requested
    pub fn plan<S: AsRef<str>>(&self, targets: &[S], include_dependencies: bool) -> Result<Plan> {
        self.validate()?;

        let mut include = HashSet::new();
        let mut queue = Vec::new();
        for target in targets {
            queue.push(self.node(target.as_ref())?);
        }
        while let Some(node) = queue.pop() {
            if !include.insert(node) || !include_dependencies {
                continue;
            }
            queue.extend(self.graph.neighbors_directed(node, Direction::Incoming));
        }

        Ok(self.build_plan(&include))
    }

    fn build_plan(&self, include: &HashSet<NodeIndex>) -> Plan {
        let order = self.stable_order(include);
        let position: HashMap<NodeIndex, usize> =
            order.iter().enumerate().map(|(pos, &i)| (i, pos)).collect();

        let mut last_user: HashMap<PathBuf, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(order.len());

        for (pos, &index) in order.iter().enumerate() {
            let action = &self.graph[index];
            let mut after: BTreeSet<usize> = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|dep| position.get(&dep).copied())
                .collect();

            let shares_work_dir_with = action
                .work_dir()
                .and_then(|dir| last_user.insert(normalize(dir), pos));
            after.extend(shares_work_dir_with);

            nodes.push(PlannedNode {
                index,
                id: action.id().to_string(),
                after: after.into_iter().collect(),
                shares_work_dir_with,
            });
        }

        debug!(
            operation = operations::PLAN,
            nodes = nodes.len(),
            "plan built"
        );

        Plan { nodes }
    }

    pub fn run_all(&self, ctx: &RunContext, options: &RunOptions) -> Result<RunReport> {
        let plan = self.plan_all()?;
        Ok(self.execute_plan(&plan, ctx, options))
    }

    /// Run `id` after its transitive dependencies
    pub fn run(&self, id: &str, ctx: &RunContext, options: &RunOptions) -> Result<RunReport> {
        let plan = self.plan(&[id], true)?;
        Ok(self.execute_plan(&plan, ctx, options))
    }

    pub fn execute_plan(&self, plan: &Plan, ctx: &RunContext, options: &RunOptions) -> RunReport {
        let started_at = Utc::now();

        info!(
            nodes = plan.len(),
            jobs = options.jobs,
            policy = ?options.policy,
            "running plan"
        );

        let ctx = RunContext {
            resources: Arc::clone(&ctx.resources),
            executor: ctx.executor.clone().with_cancel(options.cancel.clone()),
        };

        let states = scheduler::run(plan, options, |pos| {
            let action = &self.graph[plan.nodes()[pos].index];
            debug!(task = %action.id(), kind = action.kind(), "starting");
            action.execute(&ctx).map_err(|e| {
                let outcome = match e.root() {
                    Error::TimedOut { .. } => status::TIMED_OUT,
                    Error::Cancelled => status::CANCELLED,
                    _ => status::FAILED,
                };
                error!(
                    task = %action.id(),
                    status = outcome,
                    error = %e,
                    "task failed"
                );
                e.in_task(action.id())
            })
        });

        let mut report = RunReport::new(started_at);
        for (node, state) in plan.nodes().iter().zip(states) {
            let action = &self.graph[node.index];
            let mut entry = TaskReport::new(action.id(), action.kind());
            match state {
                NodeState::Succeeded { value, duration } => {
                    entry.status = TaskStatus::Succeeded;
                    entry.duration_ms = Some(duration.as_millis() as u64);
                    entry.output = value.output;
                    entry.output_bytes = value.output_bytes;
                    entry.output_sha256 = value.output_sha256;
                    entry.exit_code = value.exit_code;
                }
                NodeState::Failed { error, duration } => {
                    entry.status = TaskStatus::Failed;
                    entry.duration_ms = Some(duration.as_millis() as u64);
                    entry.error = Some(error.root().to_string());
                    if let Error::ProcessFailed { code, .. } = error.root() {
                        entry.exit_code = *code;
                    }
                    report.push_error(error);
                }
                NodeState::Skipped { because } => {
                    entry.status = TaskStatus::Skipped;
                    entry.skipped_because = Some(plan.nodes()[because].id.clone());
                    info!(task = %action.id(), status = status::SKIPPED, "skipped");
                }
                NodeState::Pending | NodeState::Running | NodeState::NotStarted => {
                    entry.status = TaskStatus::NotStarted;
                }
            }
            report.push(entry);
        }
        report.finish();
        report
    }
}

/// Lexical normalization so `work/./svn` and `work/svn/` compare equal
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
