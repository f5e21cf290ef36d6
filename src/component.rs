// src/component.rs
//
// =============================================================================
// ESMRUN: COMPUTE COMPONENT & PHASE ENGINE (v 0.1 )
// =============================================================================
//
// The lifecycle of one component inside one batch job.
//
//   created -> preparing -> prepared -> working -> worked -> cleaning -> cleaned
//
// Phases:
// 1. prepare: resolve the file tables and stage inputs into the experiment tree.
// 2. work:    move staged files into the work directory (manifest is drained).
// 3. cleanup: collect model output from the work directory into the tree.
//
// Every step is a slot in the StepRegistry with optional pre/post hooks.
// Model-specific behaviour is plugged in as a ComputeBehavior strategy.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::anyhow;
use chrono::NaiveDate;

use crate::config::ComponentConfig;
use crate::context::{EnvSource, RunContext, TableLayer, TableStage, OUTDATA};
use crate::error::{EngineError, Result};
use crate::files::{base_name, CopyMethod, FileDescriptor, FileManifest};
use crate::interpolate::Interpolator;
use crate::steps::{HookPosition, StepKey, StepRegistry};

// ============================================================================
// 1. PHASES & STATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Prepare,
    Work,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Prepare, Phase::Work, Phase::Cleanup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Work => "work",
            Phase::Cleanup => "cleanup",
        }
    }

    pub fn default_steps(&self) -> &'static [&'static str] {
        match self {
            Phase::Prepare => &[
                "read_filetables",
                "modify_filetables",
                "override_filetables_from_env",
                "copy_files_to_exp_tree",
                "modify_files",
            ],
            Phase::Work => &["copy_files", "modify_files", "modify_namelists"],
            Phase::Cleanup => &["copy_files"],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Preparing,
    Prepared,
    Working,
    Worked,
    Cleaning,
    Cleaned,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Created => "created",
            LifecycleState::Preparing => "preparing",
            LifecycleState::Prepared => "prepared",
            LifecycleState::Working => "working",
            LifecycleState::Worked => "worked",
            LifecycleState::Cleaning => "cleaning",
            LifecycleState::Cleaned => "cleaned",
        })
    }
}

/// Prepare steps that rebuild the work manifest of an already prepared tree.
const RESTORE_STEPS: [&str; 4] = [
    "read_filetables",
    "modify_filetables",
    "override_filetables_from_env",
    "stage_from_exp_tree",
];

// ============================================================================
// 2. THE STRATEGY (Model-specific behaviour)
// ============================================================================

/// Callbacks a concrete model supplies. Every method defaults to a no-op, so
/// a model only implements what it actually needs to touch.
pub trait ComputeBehavior {
    /// Edit files after they were staged into the experiment tree.
    fn prepare_modify_files(&self, _ws: &mut Workspace) -> anyhow::Result<()> {
        Ok(())
    }

    /// Edit files after they arrived in the work directory.
    fn work_modify_files(&self, _ws: &mut Workspace) -> anyhow::Result<()> {
        Ok(())
    }

    /// Edit namelists in the work directory before the model starts.
    fn work_modify_namelists(&self, _ws: &mut Workspace) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A component with no model-specific behaviour.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericBehavior;

impl ComputeBehavior for GenericBehavior {}

// ============================================================================
// 3. WORKSPACE (What steps and hooks operate on)
// ============================================================================

#[derive(Debug)]
pub struct Workspace {
    context: RunContext,
    interpolator: Interpolator,
    table_dir: PathBuf,
    env: EnvSource,

    /// Built by prepare from the default, modify and environment layers.
    pub prepare_files: FileManifest,
    /// Handed from prepare to work; emptied as work copies it.
    pub work_files: FileManifest,
    /// Built by cleanup from its own tables.
    pub cleanup_files: FileManifest,
}

impl Workspace {
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn table_dir(&self) -> &Path {
        &self.table_dir
    }

    pub fn env(&self) -> &EnvSource {
        &self.env
    }

    pub fn table_path(&self, stage: TableStage, layer: TableLayer) -> PathBuf {
        self.table_dir
            .join(self.context.identity().table_file_name(stage, layer))
    }

    /// The default table of a stage. Must exist.
    fn load_default_layer(&self, stage: TableStage) -> Result<FileManifest> {
        let path = self.table_path(stage, TableLayer::Default);
        let manifest = FileManifest::load(&path, stage)?;
        log::info!(
            "Read {} file(s) for {} from {}",
            manifest.len(),
            self.context.name(),
            path.display()
        );
        Ok(manifest)
    }

    /// Merges the modify table of a stage over `manifest`, if there is one.
    fn apply_modify_layer(&self, stage: TableStage, manifest: &mut FileManifest) -> Result<()> {
        let path = self.table_path(stage, TableLayer::Modify);
        if !path.exists() {
            log::debug!("No modify table at {}", path.display());
            return Ok(());
        }
        log::debug!("Modify table for {} found, merging", self.context.name());
        manifest.merge_from(&FileManifest::load(&path, stage)?);
        Ok(())
    }

    fn load_layered_table(&self, stage: TableStage) -> Result<FileManifest> {
        let mut manifest = self.load_default_layer(stage)?;
        self.apply_modify_layer(stage, &mut manifest)?;
        Ok(manifest)
    }
}

// ============================================================================
// 4. THE COMPONENT
// ============================================================================

#[derive(Debug)]
pub struct ComputeComponent {
    workspace: Workspace,
    registry: StepRegistry,
    steps: BTreeMap<Phase, Vec<String>>,
    state: LifecycleState,
}

impl ComputeComponent {
    pub fn new(context: RunContext, table_dir: impl Into<PathBuf>) -> Self {
        Self::with_behavior(context, table_dir, GenericBehavior)
    }

    pub fn with_behavior<B>(context: RunContext, table_dir: impl Into<PathBuf>, behavior: B) -> Self
    where
        B: ComputeBehavior + 'static,
    {
        let workspace = Workspace {
            interpolator: Interpolator::new(&context),
            context,
            table_dir: table_dir.into(),
            env: EnvSource::default(),
            prepare_files: FileManifest::new(),
            work_files: FileManifest::new(),
            cleanup_files: FileManifest::new(),
        };

        let steps = Phase::ALL
            .iter()
            .map(|p| (*p, p.default_steps().iter().map(|s| s.to_string()).collect()))
            .collect();

        let mut component = Self {
            workspace,
            registry: StepRegistry::new(),
            steps,
            state: LifecycleState::Created,
        };
        component.install_builtin_steps(Rc::new(behavior));
        component
    }

    /// Builds a component from its YAML configuration, including the private
    /// tokens of the selected variant.
    pub fn from_config(
        cfg: &ComponentConfig,
        expid: &str,
        date: NaiveDate,
        parent_dir: impl AsRef<Path>,
    ) -> Self {
        let ctx = RunContext::new(
            expid,
            cfg.identity(),
            date,
            parent_dir,
            cfg.categories.as_slice(),
        );
        let table_dir = cfg.table_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let mut component = Self::new(ctx, table_dir);

        if let Some((name, variant)) = cfg.active_variant() {
            log::info!("{} uses variant {}", cfg.name, name);
            for (token, value) in variant.interpolation_tokens() {
                component = component.with_token(token, value);
            }
        }
        component
    }

    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.workspace.env = env;
        self
    }

    /// Adds a private `@<name>@` token for cleanup file names.
    pub fn with_token(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let interpolator = std::mem::take(&mut self.workspace.interpolator);
        self.workspace.interpolator = interpolator.with_token(name, value);
        self
    }

    /// Picks the lifecycle up where an earlier job left it, e.g. cleanup in
    /// the job that runs after the model finished.
    pub fn resume_from(mut self, state: LifecycleState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.workspace.context
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Binds a hook or step body. Hooks registered any time before the phase
    /// runs are picked up.
    pub fn register<F>(&mut self, phase: &str, step: &str, position: HookPosition, f: F)
    where
        F: FnMut(&mut Workspace) -> anyhow::Result<()> + 'static,
    {
        self.registry.register(phase, step, position, f);
    }

    pub fn unregister(&mut self, phase: &str, step: &str, position: HookPosition) -> bool {
        self.registry.unregister(phase, step, position)
    }

    /// Replaces the step list of a built-in phase.
    pub fn set_steps<S: Into<String>>(&mut self, phase: Phase, steps: impl IntoIterator<Item = S>) {
        self.steps
            .insert(phase, steps.into_iter().map(Into::into).collect());
    }

    pub fn steps(&self, phase: Phase) -> &[String] {
        self.steps.get(&phase).map_or(&[], Vec::as_slice)
    }

    // ------------------------------------------------------------------------
    // PHASES
    // ------------------------------------------------------------------------

    pub fn prepare(&mut self) -> Result<()> {
        self.advance("prepare", LifecycleState::Created, LifecycleState::Preparing)?;
        self.workspace.context.ensure_layout()?;
        self.run_phase(Phase::Prepare)?;
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    pub fn work(&mut self) -> Result<()> {
        self.advance("work", LifecycleState::Prepared, LifecycleState::Working)?;
        self.run_phase(Phase::Work)?;
        self.state = LifecycleState::Worked;
        Ok(())
    }

    pub fn cleanup(&mut self) -> Result<()> {
        self.advance("cleanup", LifecycleState::Worked, LifecycleState::Cleaning)?;
        self.run_phase(Phase::Cleanup)?;
        self.state = LifecycleState::Cleaned;
        Ok(())
    }

    /// Brings a fresh component to `Prepared` when prepare ran in an earlier
    /// job: the prepare tables are resolved again and the work manifest is
    /// rebuilt from the experiment tree, without transferring anything.
    pub fn restore_prepared(&mut self) -> Result<()> {
        self.advance("restore", LifecycleState::Created, LifecycleState::Preparing)?;
        self.run_steps(Phase::Prepare.as_str(), &RESTORE_STEPS)?;
        self.state = LifecycleState::Prepared;
        Ok(())
    }

    /// Runs each step's pre-hook, body and post-hook, in declared order.
    /// The first error aborts the remaining steps.
    pub fn run_steps<S: AsRef<str>>(&mut self, phase: &str, steps: &[S]) -> Result<()> {
        for step in steps {
            let step = step.as_ref();
            for position in HookPosition::ORDER {
                let key = StepKey::new(phase, step, position);
                let Some(f) = self.registry.get_mut(&key) else {
                    if position == HookPosition::Step {
                        log::debug!("{} has no body, skipping", key);
                    }
                    continue;
                };

                log::debug!("Calling {}", key);
                f(&mut self.workspace).map_err(|source| EngineError::Step {
                    phase: phase.to_string(),
                    step: step.to_string(),
                    position,
                    source,
                })?;
            }
        }
        Ok(())
    }

    fn run_phase(&mut self, phase: Phase) -> Result<()> {
        let steps = self.steps(phase).to_vec();
        log::info!(
            "▶ {} {} for {}: {}",
            phase,
            self.workspace.context.name(),
            self.workspace.context.expid(),
            steps.join(" -> ")
        );
        self.run_steps(phase.as_str(), &steps)
    }

    fn advance(
        &mut self,
        action: &'static str,
        expected: LifecycleState,
        next: LifecycleState,
    ) -> Result<()> {
        if self.state != expected {
            return Err(EngineError::State {
                action,
                expected,
                found: self.state,
            });
        }
        self.state = next;
        Ok(())
    }

    fn install_builtin_steps(&mut self, behavior: Rc<dyn ComputeBehavior>) {
        use HookPosition::Step;
        let r = &mut self.registry;

        r.register("prepare", "read_filetables", Step, read_filetables);
        r.register("prepare", "modify_filetables", Step, modify_filetables);
        r.register("prepare", "override_filetables_from_env", Step, override_filetables_from_env);
        r.register("prepare", "copy_files_to_exp_tree", Step, copy_files_to_exp_tree);
        r.register("prepare", "stage_from_exp_tree", Step, stage_from_exp_tree);
        let b = Rc::clone(&behavior);
        r.register("prepare", "modify_files", Step, move |ws| b.prepare_modify_files(ws));

        r.register("work", "copy_files", Step, copy_files_to_work_dir);
        let b = Rc::clone(&behavior);
        r.register("work", "modify_files", Step, move |ws| b.work_modify_files(ws));
        let b = behavior;
        r.register("work", "modify_namelists", Step, move |ws| b.work_modify_namelists(ws));

        r.register("cleanup", "copy_files", Step, copy_files_from_work_dir);
    }
}

// ============================================================================
// 5. BUILT-IN STEPS
// ============================================================================

fn read_filetables(ws: &mut Workspace) -> anyhow::Result<()> {
    ws.prepare_files = ws.load_default_layer(TableStage::Prepare)?;
    Ok(())
}

fn modify_filetables(ws: &mut Workspace) -> anyhow::Result<()> {
    let mut manifest = std::mem::take(&mut ws.prepare_files);
    let merged = ws.apply_modify_layer(TableStage::Prepare, &mut manifest);
    ws.prepare_files = manifest;
    Ok(merged?)
}

fn override_filetables_from_env(ws: &mut Workspace) -> anyhow::Result<()> {
    let count = ws.prepare_files.override_from_environment(&ws.env);
    log::debug!("{} source(s) overridden from the environment", count);
    Ok(())
}

/// Places every non-outdata file under its category directory, then hands the
/// work phase a fresh manifest pointing from there into the work directory.
fn copy_files_to_exp_tree(ws: &mut Workspace) -> anyhow::Result<()> {
    let (placed, staged) = plan_exp_tree(ws)?;
    placed.digest()?;
    ws.prepare_files = placed;
    ws.work_files = staged;
    Ok(())
}

/// Same hand-over as `copy_files_to_exp_tree` for files an earlier job
/// already placed. Touches nothing on disk.
fn stage_from_exp_tree(ws: &mut Workspace) -> anyhow::Result<()> {
    let (placed, staged) = plan_exp_tree(ws)?;
    log::info!(
        "{} file(s) staged from {} for the work phase",
        staged.len(),
        ws.context.root().display()
    );
    ws.prepare_files = placed;
    ws.work_files = staged;
    Ok(())
}

/// Where each prepare entry lands in the tree (`placed`) and the work
/// manifest that copies it on into the work directory (`staged`).
fn plan_exp_tree(ws: &Workspace) -> anyhow::Result<(FileManifest, FileManifest)> {
    let mut placed = FileManifest::new();
    let mut staged = FileManifest::new();

    for (category, file) in ws.prepare_files.iter() {
        if category == OUTDATA {
            continue;
        }
        let name = base_name(file.dest()).ok_or_else(|| {
            anyhow!(
                "{}/{}: destination '{}' has no file name",
                category,
                file.id(),
                file.dest().display()
            )
        })?;

        let target = ws.context.category_dir(category).join(name);
        if file.dest() != Path::new(name) {
            log::warn!(
                "You gave a full path for {}; it will be re-set to go to {}",
                file.dest().display(),
                target.display()
            );
        }

        staged.insert(
            category,
            FileDescriptor::new(
                file.id(),
                &target,
                ws.context.work_dir().join(name),
                CopyMethod::Copy,
            ),
        );
        placed.insert(category, file.with_dest(target));
    }
    Ok((placed, staged))
}

fn copy_files_to_work_dir(ws: &mut Workspace) -> anyhow::Result<()> {
    let count = ws.work_files.digest_and_drain()?;
    log::info!("{} file(s) in {}", count, ws.context.work_dir().display());
    Ok(())
}

/// Collects model output: sources always come from the work directory,
/// destinations always go under the category directory with tokens resolved.
fn copy_files_from_work_dir(ws: &mut Workspace) -> anyhow::Result<()> {
    let table = ws.load_layered_table(TableStage::Cleanup)?;
    let mut resolved = FileManifest::new();

    for (category, file) in table.iter() {
        let (Some(src_name), Some(dest_name)) = (base_name(file.src()), base_name(file.dest()))
        else {
            return Err(anyhow!(
                "{}/{}: cleanup entries must name files, got '{}' -> '{}'",
                category,
                file.id(),
                file.src().display(),
                file.dest().display()
            ));
        };

        let dest = ws
            .context
            .category_dir(category)
            .join(ws.interpolator.interpolate(dest_name));
        resolved.insert(
            category,
            FileDescriptor::new(
                file.id(),
                ws.context.work_dir().join(src_name),
                dest,
                CopyMethod::Copy,
            ),
        );
    }

    ws.cleanup_files = resolved;
    ws.cleanup_files.digest()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ComponentIdentity, DEFAULT_CATEGORIES};
    use std::cell::RefCell;

    fn component(parent: &Path) -> ComputeComponent {
        let ctx = RunContext::new(
            "test",
            ComponentIdentity::new("component", "0.0.0", "generic"),
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            parent,
            &DEFAULT_CATEGORIES,
        );
        ComputeComponent::new(ctx, parent.join("tables"))
    }

    #[test]
    fn default_steps_are_bound() {
        let c = component(Path::new("/nonexistent"));
        for phase in Phase::ALL {
            for step in phase.default_steps() {
                assert!(
                    c.registry().contains(phase.as_str(), step, HookPosition::Step),
                    "{phase}/{step}"
                );
            }
        }
        assert_eq!(c.state(), LifecycleState::Created);
    }

    #[test]
    fn out_of_order_phases_are_rejected() {
        let mut c = component(Path::new("/nonexistent"));

        let err = c.work().unwrap_err();
        assert!(matches!(
            err,
            EngineError::State {
                expected: LifecycleState::Prepared,
                found: LifecycleState::Created,
                ..
            }
        ));
        assert!(matches!(c.cleanup(), Err(EngineError::State { .. })));
        assert_eq!(c.state(), LifecycleState::Created);
    }

    #[test]
    fn missing_step_body_is_a_noop() {
        let mut c = component(Path::new("/nonexistent"));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        c.register("post", "tar_output", HookPosition::Post, move |_| {
            s.borrow_mut().push("post");
            Ok(())
        });
        c.run_steps("post", &["postprocess", "tar_output"]).unwrap();
        assert_eq!(*seen.borrow(), vec!["post"]);
    }

    #[test]
    fn hook_error_aborts_remaining_steps() {
        let mut c = component(Path::new("/nonexistent"));
        let seen = Rc::new(RefCell::new(Vec::new()));

        c.register("custom", "first", HookPosition::Step, |_| {
            Err(anyhow!("model blew up"))
        });
        let s = Rc::clone(&seen);
        c.register("custom", "first", HookPosition::Post, move |_| {
            s.borrow_mut().push("first post");
            Ok(())
        });
        let s = Rc::clone(&seen);
        c.register("custom", "second", HookPosition::Step, move |_| {
            s.borrow_mut().push("second");
            Ok(())
        });

        let err = c.run_steps("custom", &["first", "second"]).unwrap_err();
        match err {
            EngineError::Step {
                phase,
                step,
                position,
                source,
            } => {
                assert_eq!(phase, "custom");
                assert_eq!(step, "first");
                assert_eq!(position, HookPosition::Step);
                assert_eq!(source.to_string(), "model blew up");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn custom_step_lists() {
        let mut c = component(Path::new("/nonexistent"));
        c.set_steps(Phase::Work, ["copy_files"]);
        assert_eq!(c.steps(Phase::Work), ["copy_files".to_string()]);
        assert_eq!(c.steps(Phase::Cleanup).len(), 1);
    }
}
