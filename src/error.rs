// src/error.rs
//
// =============================================================================
// ESMRUN: ERROR TAXONOMY (v 0.1 )
// =============================================================================
//
// Every failure the engine can report to its caller.
//
// Propagation:
// 1. Parse / MissingField / TypeGuard abort table loading before any file is touched.
// 2. Transfer is collected per file; one failure still fails the whole digest.
// 3. Step wraps whatever a hook or step body raised and aborts the phase.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::component::LifecycleState;
use crate::steps::HookPosition;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// One file that could not be copied or linked during a digest.
#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub id: String,
    pub src: PathBuf,
    pub dest: PathBuf,
    pub reason: String,
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {}): {}",
            self.id,
            self.src.display(),
            self.dest.display(),
            self.reason
        )
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed file table {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("file table {path}: entry '{category}/{id}' is missing required field '{field}'")]
    MissingField {
        path: String,
        category: String,
        id: String,
        field: &'static str,
    },

    #[error("manifest entry '{category}/{id}' must be a file descriptor, got {found}")]
    TypeGuard {
        category: String,
        id: String,
        found: String,
    },

    #[error("{} file transfer(s) failed:\n{}", .failures.len(), summarize(.failures))]
    Transfer { failures: Vec<TransferFailure> },

    #[error("{phase} step '{step}' ({position}) failed: {source}")]
    Step {
        phase: String,
        step: String,
        position: HookPosition,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot {action}: component is {found}, expected {expected}")]
    State {
        action: &'static str,
        expected: LifecycleState,
        found: LifecycleState,
    },

    #[error("invalid component configuration: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Digs the original error out of a `Step` failure.
    ///
    /// Built-in steps raise `EngineError`s themselves; this hands the caller
    /// the untouched inner error (e.g. the `Transfer` a copy step produced).
    pub fn step_cause(&self) -> Option<&EngineError> {
        match self {
            Self::Step { source, .. } => source.downcast_ref::<EngineError>(),
            _ => None,
        }
    }
}

fn summarize(failures: &[TransferFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}
