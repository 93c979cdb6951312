//! Project compiler: document in, ESPHome YAML artifact out.
//!
//! The pipeline runs in fixed stages. Issues are collected exhaustively
//! inside each stage; fatal issues stop the pipeline, and rendering only
//! happens when no stage produced a blocking issue.
//!
//! ```text
//! version gate -> structure -> properties -> bindings -> hardware -> render -> hash
//! ```

mod binding;
mod issue;
mod render;
mod validate;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::asset::AssetIndex;
use crate::capability::CapabilityResolver;
use crate::error::{MigrationError, RecipeError};
use crate::migrate::canonicalize;
use crate::recipe::{validate_recipe, RecipeCatalog, RecipeSeverity};
use crate::registry::SchemaRegistry;

pub use binding::{check_bindings, read_compatible, service_call, DEFAULT_SERVICE};
pub use issue::{CompileIssue, IssueKind, Severity};
pub use render::{entity_slug, safe_id, ASSET_PREFIX};
pub use validate::is_identifier;

/// Device-specific compile inputs.
#[derive(Debug, Clone, Default)]
pub struct CompileTarget {
    /// Device the artifact is for.
    pub device_id: String,
    /// ESPHome node name.
    pub slug: String,
    /// Recipe used when the project does not name one.
    pub fallback_recipe_id: Option<String>,
    /// Assets the project may reference.
    pub assets: AssetIndex,
}

impl CompileTarget {
    /// Create a target with no fallback recipe and no assets.
    #[must_use]
    pub fn new(device_id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            slug: slug.into(),
            fallback_recipe_id: None,
            assets: AssetIndex::default(),
        }
    }

    /// Set the fallback recipe.
    #[must_use]
    pub fn with_recipe(mut self, recipe_id: impl Into<String>) -> Self {
        self.fallback_recipe_id = Some(recipe_id.into());
        self
    }

    /// Set the asset index.
    #[must_use]
    pub fn with_assets(mut self, assets: AssetIndex) -> Self {
        self.assets = assets;
        self
    }
}

/// Rendered configuration and its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledArtifact {
    /// ESPHome YAML.
    pub yaml: String,
    /// Lowercase hex SHA-256 of `yaml`.
    pub hash: String,
}

impl CompiledArtifact {
    /// Wrap rendered YAML, computing its hash.
    #[must_use]
    pub fn new(yaml: String) -> Self {
        let hash = hex::encode(Sha256::digest(yaml.as_bytes()));
        Self { yaml, hash }
    }

    /// Artifact bytes as written to disk.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.yaml.as_bytes()
    }
}

/// Outcome of a compile.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileReport {
    /// Present only when no blocking issue was found.
    pub artifact: Option<CompiledArtifact>,
    /// All issues, in stage order.
    pub issues: Vec<CompileIssue>,
}

impl CompileReport {
    fn failed(issues: Vec<CompileIssue>) -> Self {
        Self {
            artifact: None,
            issues,
        }
    }

    /// True if any issue blocks the artifact.
    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.issues.iter().any(CompileIssue::is_blocking)
    }

    /// True if the compile failed only because the resolver was unreachable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.kind == IssueKind::BindingResolutionDeferred)
    }
}

/// Compiler bound to a schema registry, capability resolver and recipe
/// catalog.
pub struct Compiler<'a> {
    registry: &'a SchemaRegistry,
    resolver: &'a dyn CapabilityResolver,
    recipes: &'a RecipeCatalog,
}

impl<'a> Compiler<'a> {
    /// Create a compiler.
    #[must_use]
    pub fn new(
        registry: &'a SchemaRegistry,
        resolver: &'a dyn CapabilityResolver,
        recipes: &'a RecipeCatalog,
    ) -> Self {
        Self {
            registry,
            resolver,
            recipes,
        }
    }

    /// Compile a raw stored document. The document is not modified.
    #[tracing::instrument(name = "compile", skip(self, document, target), fields(device_id = %target.device_id))]
    pub async fn compile(&self, document: &Value, target: &CompileTarget) -> CompileReport {
        let model = match canonicalize(document) {
            Ok(model) => model,
            Err(e) => {
                let kind = match e {
                    MigrationError::UnsupportedVersion { .. } => IssueKind::UnsupportedVersion,
                    MigrationError::Malformed(_) => IssueKind::MalformedDocument,
                };
                tracing::info!("Document rejected at version gate: {e}");
                return CompileReport::failed(vec![CompileIssue::new(kind, e.to_string())]);
            }
        };

        let mut issues = validate::check_structure(&model, self.registry);
        issues.extend(validate::check_properties(&model, self.registry));
        issues.extend(check_bindings(&model, self.registry, self.resolver).await);

        let recipe_id = model
            .device
            .hardware_recipe_id
            .as_deref()
            .or(target.fallback_recipe_id.as_deref());
        let recipe = match recipe_id {
            Some(id) => match self.recipes.get(id) {
                Ok(recipe) => Some(recipe),
                Err(RecipeError::NotFound(_)) => {
                    issues.push(CompileIssue::new(
                        IssueKind::MissingRecipe,
                        format!("recipe '{id}' does not exist"),
                    ));
                    return CompileReport::failed(issues);
                }
                Err(e) => {
                    tracing::warn!("Recipe lookup for '{id}' failed: {e}");
                    issues.push(CompileIssue::new(
                        IssueKind::MissingRecipe,
                        format!("recipe '{id}' could not be read"),
                    ));
                    return CompileReport::failed(issues);
                }
            },
            None => {
                if validate::needs_hardware(&model, self.registry) {
                    issues.push(CompileIssue::new(
                        IssueKind::MissingRecipe,
                        "project uses hardware widgets but names no recipe",
                    ));
                    return CompileReport::failed(issues);
                }
                None
            }
        };

        if let Some(recipe) = &recipe {
            let report = validate_recipe(recipe);
            for finding in &report.issues {
                let kind = match finding.severity {
                    RecipeSeverity::Error => IssueKind::InvalidRecipe,
                    RecipeSeverity::Warning => IssueKind::RecipeWarning,
                };
                issues.push(CompileIssue::new(
                    kind,
                    format!("recipe '{}': {} ({})", recipe.id, finding.message, finding.code),
                ));
            }
            if !report.is_usable() {
                return CompileReport::failed(issues);
            }
            if let Some(profile) = &report.profile {
                issues.extend(validate::check_hardware(&model, self.registry, profile));
            }
        }

        if issues.iter().any(CompileIssue::is_blocking) {
            tracing::debug!("Compile blocked with {} issue(s)", issues.len());
            return CompileReport::failed(issues);
        }

        match render::render(&model, self.registry, recipe.as_ref(), target) {
            Ok(yaml) => {
                let artifact = CompiledArtifact::new(yaml);
                tracing::info!(hash = %artifact.hash, bytes = artifact.yaml.len(), "Compiled artifact");
                CompileReport {
                    artifact: Some(artifact),
                    issues,
                }
            }
            Err(render_issues) => {
                issues.extend(render_issues);
                CompileReport::failed(issues)
            }
        }
    }
}
