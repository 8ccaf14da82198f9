use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::graph::{normalize, TaskGraph};
use crate::postprocess::{Edit, Occurrence, PostProcessStep};
use crate::resource::{DirectoryProvider, ResourceSet};
use crate::script::{GenerationTask, DEFAULT_INTERPRETER};
use crate::workspace::{Bootstrap, BootstrapKind, Workspace};

/// Manifest file name looked up by discovery
pub const MANIFEST_FILE: &str = "fixturegen.toml";

/// Complete fixture manifest (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    /// Resource roots, searched in order; the first root holding a name wins
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default, rename = "workspace")]
    pub workspaces: Vec<WorkspaceConfig>,

    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<ScenarioConfig>,

    #[serde(default)]
    pub post_process: Vec<PostProcessConfig>,
}

/// Values shared by every scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Where resources are materialized
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Working directory for scenarios that do not name one
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Directory that scenario and post-process outputs are relative to
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Per-scenario timeout (e.g., "30s", "5m", "250ms")
    #[serde(default)]
    pub timeout: Option<String>,

    /// Resources materialized before every scenario's own dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Worker threads (default: number of CPUs)
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            cache_dir: default_cache_dir(),
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            timeout: None,
            dependencies: Vec::new(),
            jobs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub path: String,

    #[serde(default)]
    pub bootstrap: BootstrapKind,

    /// Template directory, required for `local-path`
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,

    /// Script resource name (default: "bash/<name>.sh")
    #[serde(default)]
    pub script: Option<String>,

    /// Output file (default: "<name>.dump")
    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra resources, materialized after the defaults
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Tasks that must succeed first
    #[serde(default)]
    pub after: Vec<String>,

    /// Reminder logged whenever the scenario runs
    #[serde(default)]
    pub note: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub work_dir: Option<String>,

    /// One task per variant, in file order
    #[serde(default, rename = "variant")]
    pub variants: Vec<VariantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub name: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostProcessConfig {
    pub name: String,
    pub input: String,
    pub output: String,

    /// Inferred from `input` when omitted
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default, rename = "edit")]
    pub edits: Vec<EditConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EditConfig {
    Substitute {
        pattern: String,
        replacement: String,
        #[serde(default)]
        occurrence: Occurrence,
        #[serde(default = "default_true")]
        strict: bool,
    },
    EditLine {
        line: usize,
        old: String,
        new: String,
    },
}

impl From<&EditConfig> for Edit {
    fn from(config: &EditConfig) -> Self {
        match config {
            EditConfig::Substitute {
                pattern,
                replacement,
                occurrence,
                strict,
            } => Edit::Substitute {
                pattern: pattern.clone(),
                replacement: replacement.clone(),
                occurrence: *occurrence,
                strict: *strict,
            },
            EditConfig::EditLine { line, old, new } => Edit::EditLine {
                line: *line,
                old: old.clone(),
                new: new.clone(),
            },
        }
    }
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}

fn default_cache_dir() -> String {
    ".fixturegen/cache".to_string()
}

fn default_work_dir() -> String {
    ".fixturegen/work".to_string()
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

/// A manifest turned into an executable graph
pub struct Project {
    /// Directory relative paths were resolved against
    pub root: PathBuf,
    pub graph: TaskGraph,
    pub resources: Arc<ResourceSet>,
    pub jobs: Option<usize>,
    /// Scenario names that expand to several variant tasks
    groups: BTreeMap<String, Vec<String>>,
}

impl Project {
    /// Expand a user-facing name into task ids
    ///
    /// A scenario with variants stands for all of its variant tasks.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        if let Some(ids) = self.groups.get(name) {
            return Ok(ids.clone());
        }
        if self.graph.contains(name) {
            return Ok(vec![name.to_string()]);
        }
        Err(Error::UnknownTask(name.to_string()))
    }
}

impl FixtureConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Example manifest written by `fixturegen init`
    pub fn example() -> &'static str {
        EXAMPLE
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.defaults.interpreter.is_empty() {
            return config_error("defaults.interpreter must be set");
        }
        if self.defaults.jobs == Some(0) {
            return config_error("defaults.jobs must be at least 1");
        }
        if let Some(timeout) = &self.defaults.timeout {
            parse_duration(timeout)?;
        }

        for workspace in &self.workspaces {
            if workspace.path.trim().is_empty() {
                return config_error("workspace.path must not be empty");
            }
            if workspace.bootstrap == BootstrapKind::LocalPath && workspace.source.is_none() {
                return config_error(format!(
                    "workspace {}: bootstrap = \"local-path\" requires source",
                    workspace.path
                ));
            }
        }

        for scenario in &self.scenarios {
            if scenario.name.is_empty() {
                return config_error("scenario.name must not be empty");
            }
            if let Some(timeout) = &scenario.timeout {
                parse_duration(timeout)?;
            }
            for variant in &scenario.variants {
                if variant.name.is_empty() {
                    return config_error(format!(
                        "scenario {}: variant name must not be empty",
                        scenario.name
                    ));
                }
                if variant.args.is_empty() && scenario.args.is_empty() {
                    return config_error(format!(
                        "scenario {}: variant {} has no args",
                        scenario.name, variant.name
                    ));
                }
            }
        }

        for step in &self.post_process {
            if step.name.is_empty() {
                return config_error("post_process.name must not be empty");
            }
            if step.edits.is_empty() {
                return config_error(format!("post_process {}: no edits", step.name));
            }
            for edit in &step.edits {
                Edit::from(edit).validate()?;
            }
        }

        Ok(())
    }

    /// Build the task graph, resolving relative paths against `root`
    pub fn into_project(&self, root: &Path) -> Result<Project> {
        self.validate()?;

        let mut resources = ResourceSet::new();
        for dir in &self.resources {
            resources.push(Box::new(DirectoryProvider::new(root.join(dir))));
        }

        let cache_dir = root.join(&self.defaults.cache_dir);
        let output_dir = root.join(&self.defaults.output_dir);
        let default_timeout = self
            .defaults
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        let mut graph = TaskGraph::new();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut workspace_ids: HashMap<PathBuf, String> = HashMap::new();
        // Output path -> the task that writes it last
        let mut producers: HashMap<PathBuf, String> = HashMap::new();
        let mut pending_after: Vec<(String, String, Vec<String>)> = Vec::new();

        let protected: Vec<(String, PathBuf)> = std::iter::once((
            MANIFEST_FILE.to_string(),
            root.join(MANIFEST_FILE),
        ))
        .chain(
            self.resources
                .iter()
                .map(|dir| (format!("resource root {dir}"), root.join(dir))),
        )
        .chain([
            ("cache_dir".to_string(), cache_dir.clone()),
            ("output_dir".to_string(), output_dir.clone()),
        ])
        .collect();

        for workspace in &self.workspaces {
            let path = root.join(&workspace.path);
            let normalized = normalize(&path);
            if let Some((what, _)) = protected
                .iter()
                .find(|(_, kept)| normalize(kept).starts_with(&normalized))
            {
                return config_error(format!(
                    "workspace {}: would contain {}; bootstrapping it could delete project files",
                    workspace.path, what
                ));
            }
            let bootstrap = match workspace.bootstrap {
                BootstrapKind::None => Bootstrap::None,
                BootstrapKind::Clean => Bootstrap::Clean,
                BootstrapKind::LocalPath => Bootstrap::LocalPath {
                    source: root.join(workspace.source.as_deref().unwrap_or_default()),
                },
            };
            let workspace = Workspace::new(path.clone(), bootstrap);
            workspace_ids.insert(normalized, workspace.node_id());
            graph.register(workspace)?;
        }

        for scenario in &self.scenarios {
            let script = scenario
                .script
                .clone()
                .unwrap_or_else(|| format!("bash/{}.sh", scenario.name));
            let work_dir = root.join(scenario.work_dir.as_deref().unwrap_or(&self.defaults.work_dir));
            let timeout = match &scenario.timeout {
                Some(timeout) => Some(parse_duration(timeout)?),
                None => default_timeout,
            };
            let dependencies: Vec<String> = self
                .defaults
                .dependencies
                .iter()
                .chain(&scenario.dependencies)
                .cloned()
                .collect();

            let expansions: Vec<(String, String, Vec<String>)> = if scenario.variants.is_empty() {
                let output = scenario
                    .output
                    .clone()
                    .unwrap_or_else(|| format!("{}.dump", scenario.name));
                vec![(scenario.name.clone(), output, scenario.args.clone())]
            } else {
                scenario
                    .variants
                    .iter()
                    .map(|variant| {
                        let id = format!("{}.{}", scenario.name, variant.name);
                        let output = format!("{id}.dump");
                        let args = scenario
                            .args
                            .iter()
                            .chain(&variant.args)
                            .cloned()
                            .collect();
                        (id, output, args)
                    })
                    .collect()
            };

            if !scenario.variants.is_empty() {
                groups.insert(
                    scenario.name.clone(),
                    expansions.iter().map(|(id, _, _)| id.clone()).collect(),
                );
            }

            for (id, output, args) in expansions {
                let output = output_dir.join(output);
                let mut task =
                    GenerationTask::new(&id, &script, &work_dir, &cache_dir, &output)
                        .with_dependencies(dependencies.iter().cloned())
                        .with_args(args)
                        .with_interpreter(&self.defaults.interpreter)
                        .with_timeout(timeout);
                if let Some(note) = &scenario.note {
                    task = task.with_note(note);
                }

                if let Some(other) = producers.insert(normalize(&output), id.clone()) {
                    return config_error(format!(
                        "{} is written by both {} and {}",
                        output.display(),
                        other,
                        id
                    ));
                }
                pending_after.push((
                    format!("scenario {}", scenario.name),
                    id.clone(),
                    scenario.after.clone(),
                ));
                graph.register(task)?;

                if let Some(bootstrap) = workspace_ids.get(&normalize(&work_dir)) {
                    graph.depends_on(&id, bootstrap)?;
                }
            }
        }

        for step in &self.post_process {
            let input = output_dir.join(&step.input);
            let output = output_dir.join(&step.output);
            let mut node = PostProcessStep::new(&step.name, &input, &output);
            for edit in &step.edits {
                node = node.with_edit(edit.into());
            }

            let after = if step.after.is_empty() {
                producers
                    .get(&normalize(&input))
                    .map(|producer| vec![producer.clone()])
                    .unwrap_or_default()
            } else {
                step.after.clone()
            };

            // An in-place edit takes over its input; later readers wait for it
            let in_place = normalize(&input) == normalize(&output);
            if let Some(other) = producers.insert(normalize(&output), step.name.clone()) {
                if !in_place {
                    return config_error(format!(
                        "{} is written by both {} and {}",
                        output.display(),
                        other,
                        step.name
                    ));
                }
            }
            pending_after.push((format!("post_process {}", step.name), step.name.clone(), after));
            graph.register(node)?;
        }

        for (owner, id, after) in pending_after {
            for name in after {
                let targets = match groups.get(&name) {
                    Some(ids) => ids.clone(),
                    None if graph.contains(&name) => vec![name.clone()],
                    None => {
                        return config_error(format!("{owner}: unknown task in after: {name}"));
                    }
                };
                for target in targets {
                    graph.depends_on(&id, &target)?;
                }
            }
        }

        Ok(Project {
            root: root.to_path_buf(),
            graph,
            resources: Arc::new(resources),
            jobs: self.defaults.jobs,
            groups,
        })
    }
}

fn config_error<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::Config(message.into()))
}

/// Parse duration string (e.g., "250ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return config_error("Empty duration string");
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("Missing duration unit: {s}. Use: ms, s, m, h")))?;
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration: {s}")))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(scaled(num, 60, s)?),
        "h" => Duration::from_secs(scaled(num, 3600, s)?),
        _ => {
            return config_error(format!("Invalid duration unit: {unit}. Use: ms, s, m, h"));
        }
    };

    Ok(duration)
}

fn scaled(num: u64, factor: u64, s: &str) -> Result<u64> {
    num.checked_mul(factor)
        .ok_or_else(|| Error::Config(format!("Invalid duration: {s} is too large")))
}

const EXAMPLE: &str = r#"# fixturegen manifest
#
# Every scenario runs one script from the resource roots below. The script's
# standard output becomes the fixture file.

resources = ["scripts"]

[defaults]
interpreter = "bash"
cache_dir = ".fixturegen/cache"
work_dir = ".fixturegen/work"
output_dir = "fixtures"
timeout = "5m"
dependencies = ["bash/setup.sh"]

[[workspace]]
path = ".fixturegen/work"
bootstrap = "clean"

[[scenario]]
name = "empty"

[[scenario]]
name = "first_commit"
after = ["empty"]

[[scenario]]
name = "file_content"
after = ["first_commit"]

[[scenario.variant]]
name = "before"
args = ["this is some file content"]

[[scenario.variant]]
name = "after"
args = ["i replaced the content"]

[[post_process]]
name = "first_commit_fixed"
input = "first_commit.dump"
output = "first_commit_fixed.dump"

[[post_process.edit]]
kind = "substitute"
pattern = "UUID: .*"
replacement = "UUID: 00000000-0000-0000-0000-000000000000"
occurrence = "first-per-line"
"#;
