// src/context.rs
//
// =============================================================================
// ESMRUN: RUN CONTEXT & EXPERIMENT LAYOUT (v 0.1 )
// =============================================================================
//
// The identifying values of one execution.
//
// Layout of an experiment tree:
//   <parent_dir>/<expid>/                     (root)
//   <parent_dir>/<expid>/<category>/<NAME>/   (one per file category)
//   <parent_dir>/<expid>/work/                (shared work directory)
//
// Built once per execution and never mutated afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Categories every component gets a directory for unless configured otherwise.
pub const DEFAULT_CATEGORIES: [&str; 7] =
    ["config", "forcing", "input", "log", "mon", "outdata", "restart"];

/// Files produced by the model; staged on the way out (cleanup), never on the way in.
pub const OUTDATA: &str = "outdata";

pub const WORK_DIR: &str = "work";

/// Token form of the simulation date.
pub const DATE_FORMAT: &str = "%Y%m%d";

// ============================================================================
// 1. COMPONENT IDENTITY
// ============================================================================

/// Which of the two table families a file table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStage {
    Prepare,
    Cleanup,
}

impl TableStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStage::Prepare => "prepare",
            TableStage::Cleanup => "cleanup",
        }
    }
}

/// Default table first, modify table merged over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayer {
    Default,
    Modify,
}

impl TableLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableLayer::Default => "default",
            TableLayer::Modify => "modify",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentIdentity {
    pub name: String,
    pub version: String,
    /// Category label, e.g. "atmosphere", "ocean".
    pub kind: String,
}

impl ComponentIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// `<name>_<version>_<stage>_<layer>_files.json`
    pub fn table_file_name(&self, stage: TableStage, layer: TableLayer) -> String {
        format!(
            "{}_{}_{}_{}_files.json",
            self.name,
            self.version,
            stage.as_str(),
            layer.as_str()
        )
    }
}

// ============================================================================
// 2. RUN CONTEXT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunContext {
    expid: String,
    identity: ComponentIdentity,
    date: NaiveDate,
    root: PathBuf,
    work_dir: PathBuf,
    dirs: BTreeMap<String, PathBuf>,
}

impl RunContext {
    pub fn new<S: AsRef<str>>(
        expid: impl Into<String>,
        identity: ComponentIdentity,
        date: NaiveDate,
        parent_dir: impl AsRef<Path>,
        categories: &[S],
    ) -> Self {
        let expid = expid.into();
        let root = parent_dir.as_ref().join(&expid);
        let work_dir = root.join(WORK_DIR);

        let dirs = categories
            .iter()
            .map(|c| {
                let c = c.as_ref();
                (c.to_string(), root.join(c).join(&identity.name))
            })
            .collect();

        Self {
            expid,
            identity,
            date,
            root,
            work_dir,
            dirs,
        }
    }

    pub fn expid(&self) -> &str {
        &self.expid
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &ComponentIdentity {
        &self.identity
    }

    pub fn date_token(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Directory for a category. Categories are free-form, so one that was not
    /// declared up front still resolves to the same `<root>/<category>/<NAME>` shape.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.dirs
            .get(category)
            .cloned()
            .unwrap_or_else(|| self.root.join(category).join(&self.identity.name))
    }

    /// Creates the work directory and every declared category directory.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in self.dirs.values().chain(std::iter::once(&self.work_dir)) {
            fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;
        }
        log::debug!(
            "Experiment tree for {} ready under {}",
            self.identity.name,
            self.root.display()
        );
        Ok(())
    }
}

// ============================================================================
// 3. ENVIRONMENT SOURCE
// ============================================================================

/// Where `override_from_environment` looks identifiers up.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    pub fn fixed<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        EnvSource::Fixed(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self {
            EnvSource::Process => std::env::var(key).ok(),
            EnvSource::Fixed(vars) => vars.get(key).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocean() -> ComponentIdentity {
        ComponentIdentity::new("fesom", "2.0", "ocean")
    }

    #[test]
    fn table_names_follow_convention() {
        let id = ocean();
        assert_eq!(
            id.table_file_name(TableStage::Prepare, TableLayer::Default),
            "fesom_2.0_prepare_default_files.json"
        );
        assert_eq!(
            id.table_file_name(TableStage::Cleanup, TableLayer::Modify),
            "fesom_2.0_cleanup_modify_files.json"
        );
    }

    #[test]
    fn layout_paths() {
        let date = NaiveDate::from_ymd_opt(1850, 1, 1).unwrap();
        let ctx = RunContext::new("exp001", ocean(), date, "/scratch", &DEFAULT_CATEGORIES);

        assert_eq!(ctx.root(), Path::new("/scratch/exp001"));
        assert_eq!(ctx.work_dir(), Path::new("/scratch/exp001/work"));
        assert_eq!(
            ctx.category_dir("restart"),
            PathBuf::from("/scratch/exp001/restart/fesom")
        );
        // Undeclared categories resolve the same way.
        assert_eq!(
            ctx.category_dir("bathymetry"),
            PathBuf::from("/scratch/exp001/bathymetry/fesom")
        );
        assert_eq!(ctx.date_token(), "18500101");
    }

    #[test]
    fn fixed_env_lookup() {
        let env = EnvSource::fixed([("first_input", "/tmp/x")]);
        assert_eq!(env.get("first_input").as_deref(), Some("/tmp/x"));
        assert_eq!(env.get("second_input"), None);
    }
}
