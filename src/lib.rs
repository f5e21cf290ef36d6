// src/lib.rs
//
// =============================================================================
// ESMRUN: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod interpolate;
pub mod steps;

// 2. Re-exports (The Public API)
// These allow `use esmrun::ComputeComponent` or `use esmrun::FileManifest` to work elsewhere.

pub use component::{ComputeBehavior, ComputeComponent, LifecycleState, Phase, Workspace};
pub use config::{ComponentConfig, VariantConfig};
pub use context::{ComponentIdentity, EnvSource, RunContext, TableLayer, TableStage};
pub use error::{EngineError, TransferFailure};
pub use files::{CopyMethod, FileDescriptor, FileManifest};
pub use interpolate::Interpolator;
pub use steps::{HookPosition, StepRegistry};
