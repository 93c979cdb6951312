//! # Touch Designer Core
//!
//! Project model, widget schemas and the compile/deploy pipeline for
//! ESPHome LVGL touch panels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               designer-core                 │
//! ├─────────────────────────────────────────────┤
//! │  Project model   │  Schema registry         │
//! │  - Migrations    │  - Builtin widgets       │
//! │  - Canonical form│  - Override directory    │
//! ├─────────────────────────────────────────────┤
//! │  Compiler        │  Deployment              │
//! │  - Validation    │  - Hash-gated commits    │
//! │  - YAML render   │  - Per-device locking    │
//! ├─────────────────────────────────────────────┤
//! │  Recipes  │  Capabilities  │  Assets/Devices│
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod asset;
pub mod capability;
pub mod compiler;
pub mod deploy;
pub mod error;
pub mod migrate;
pub mod project;
pub mod recipe;
pub mod registry;
pub mod store;
pub mod widget;

pub use asset::{AssetIndex, AssetInfo, AssetKind, AssetStore};
pub use capability::{
    CapabilityResolver, CapabilitySet, StaticCapabilities, UnconfiguredResolver, ValueKind,
};
pub use compiler::{
    CompileIssue, CompileReport, CompileTarget, CompiledArtifact, Compiler, IssueKind, Severity,
};
pub use deploy::{DeployCoordinator, DeployOutcome, DeployRecord, PreviewOutcome};
pub use error::{
    AssetError, DeployError, MigrationError, RecipeError, RegistryError, ResolveError, StoreError,
};
pub use project::{
    Binding, Link, LinkAction, LinkSource, LinkSourceKind, LinkTarget, Page, ProjectModel, Widget,
    CURRENT_MODEL_VERSION,
};
pub use recipe::{
    HardwareProfile, HardwareRecipe, RecipeCatalog, RecipeExport, RecipeMetadata, RecipeReport,
    SavedRecipe,
};
pub use registry::SchemaRegistry;
pub use store::{DeviceStore, DeviceSummary};
pub use widget::{FieldKind, WidgetSchema};

/// Designer core version, written into generated configurations.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
