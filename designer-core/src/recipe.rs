//! Hardware recipes.
//!
//! A recipe is the hardware half of an ESPHome configuration: board, display,
//! touch and pins, with an `lvgl:` block the compiler fills in. The catalog
//! serves builtin recipes embedded in the binary plus user recipes from a
//! directory. [`RecipeCatalog::validate`] checks a recipe and derives the
//! [`HardwareProfile`] the compiler cross-checks widgets against.
//!
//! User recipes live flat in the user directory as `<id>.yaml`, with an
//! optional `<id>.meta.json` sidecar holding the label and clone origin.
//! Builtins are read-only; [`RecipeCatalog::clone_recipe`] copies one into
//! the user directory for editing. Every write goes through a temp file and
//! a rename.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as Yaml};
use sha2::{Digest, Sha256};

use crate::error::RecipeError;

/// Comment line replaced by the rendered LVGL pages.
pub const PAGES_MARKER: &str = "#__LVGL_PAGES__";

/// Comment line replaced by the rendered Home Assistant sensors.
pub const BINDINGS_MARKER: &str = "#__HA_BINDINGS__";

const BUILTIN_RECIPES: &[(&str, &str)] = &[
    (
        "guition_jc4827w543_480x272",
        include_str!("../recipes/guition_jc4827w543_480x272.yaml"),
    ),
    (
        "sunton_2432s028r_320x240",
        include_str!("../recipes/sunton_2432s028r_320x240.yaml"),
    ),
];

const PLATFORM_KEYS: &[&str] = &["esp32", "esp32_s3", "esp32_p4", "esp8266", "rp2040"];

const META_SUFFIX: &str = ".meta.json";

/// Top-level sections dropped on import; the compiler supplies its own.
const IMPORT_STRIPPED_KEYS: &[&str] = &[
    "wifi",
    "captive_portal",
    "api",
    "ota",
    "logger",
    "web_server",
    "improv_serial",
    "dashboard_import",
    "esp32_improv",
    "bluetooth_proxy",
    "packages",
    "substitutions",
];

/// Where a recipe comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeSource {
    /// Embedded in the binary.
    Builtin,
    /// Loaded from the user recipe directory.
    User,
}

/// A recipe and its YAML text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRecipe {
    /// Recipe id (file stem).
    pub id: String,
    /// Origin.
    pub source: RecipeSource,
    /// ESPHome YAML text.
    pub text: String,
}

/// Capabilities derived from a recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Platform component, e.g. `esp32`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Board name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    /// Display resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Top-level components present in the recipe.
    pub peripherals: BTreeSet<String>,
    /// GPIO pins referenced by the recipe, normalized to `GPIO<n>`.
    pub pins: BTreeSet<String>,
    /// The board has PSRAM configured.
    pub psram: bool,
}

/// Display resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Severity of a recipe issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeSeverity {
    /// Recipe cannot be compiled against.
    Error,
    /// Recipe is usable but likely incomplete.
    Warning,
}

/// One finding of the recipe validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeIssue {
    /// Severity.
    pub severity: RecipeSeverity,
    /// Machine-stable code.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl RecipeIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: RecipeSeverity::Error,
            code,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: RecipeSeverity::Warning,
            code,
            message: message.into(),
        }
    }
}

/// Result of validating a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeReport {
    /// Recipe id.
    pub recipe_id: String,
    /// Findings, errors first.
    pub issues: Vec<RecipeIssue>,
    /// Derived profile, absent when the YAML could not be read.
    pub profile: Option<HardwareProfile>,
}

impl RecipeReport {
    /// True if no error-severity issue was found.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == RecipeSeverity::Error)
    }
}

/// Catalog listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeSummary {
    /// Recipe id.
    pub id: String,
    /// Origin.
    pub source: RecipeSource,
    /// Platform component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Board name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    /// Display resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// User-facing label from the recipe metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Sidecar metadata of a user recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    /// User-facing label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Recipe this one was cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<String>,
}

/// A recipe as handed out for backup or sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeExport {
    /// Recipe id.
    pub id: String,
    /// Origin.
    pub source: RecipeSource,
    /// User-facing label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// ESPHome YAML text.
    pub yaml: String,
    /// Sidecar metadata, empty for builtins.
    pub metadata: RecipeMetadata,
}

/// Outcome of a write to the user recipe directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedRecipe {
    /// Id the recipe was stored under.
    pub id: String,
    /// User-facing label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Validation of the stored text.
    pub report: RecipeReport,
}

/// Builtin and user recipes.
#[derive(Debug, Clone)]
pub struct RecipeCatalog {
    builtin: BTreeMap<String, String>,
    user_dir: Option<PathBuf>,
    writes: Arc<Mutex<()>>,
}

impl Default for RecipeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RecipeCatalog {
    /// Catalog with only the embedded recipes.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            builtin: BUILTIN_RECIPES
                .iter()
                .map(|(id, text)| ((*id).to_string(), (*text).to_string()))
                .collect(),
            user_dir: None,
            writes: Arc::default(),
        }
    }

    /// Catalog with no embedded recipes.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            builtin: BTreeMap::new(),
            user_dir: None,
            writes: Arc::default(),
        }
    }

    /// Also serve `*.yaml` files from `dir`.
    #[must_use]
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    /// Add an in-memory builtin recipe.
    #[must_use]
    pub fn with_recipe(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.builtin.insert(id.into(), text.into());
        self
    }

    /// List recipes: builtin first, then user, each ordered by id.
    ///
    /// User recipes whose id matches a builtin are hidden.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::Io`] if the user directory exists but cannot
    /// be read.
    pub fn list(&self) -> Result<Vec<RecipeSummary>, RecipeError> {
        let mut out: Vec<RecipeSummary> = self
            .builtin
            .iter()
            .map(|(id, text)| summarize(id, RecipeSource::Builtin, text, None))
            .collect();
        for id in self.user_ids()? {
            if self.builtin.contains_key(&id) {
                continue;
            }
            if let Ok(recipe) = self.get(&id) {
                let label = self.metadata(&id).label;
                out.push(summarize(&recipe.id, recipe.source, &recipe.text, label));
            }
        }
        Ok(out)
    }

    /// Look up a recipe. Builtin ids take precedence.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::NotFound`] if no recipe has that id.
    pub fn get(&self, recipe_id: &str) -> Result<HardwareRecipe, RecipeError> {
        if let Some(text) = self.builtin.get(recipe_id) {
            return Ok(HardwareRecipe {
                id: recipe_id.to_string(),
                source: RecipeSource::Builtin,
                text: text.clone(),
            });
        }
        let not_found = || RecipeError::NotFound(recipe_id.to_string());
        if !is_valid_recipe_id(recipe_id) {
            return Err(not_found());
        }
        let Some(dir) = &self.user_dir else {
            return Err(not_found());
        };
        let path = dir.join(format!("{recipe_id}.yaml"));
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(HardwareRecipe {
                id: recipe_id.to_string(),
                source: RecipeSource::User,
                text,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(RecipeError::Io(e)),
        }
    }

    /// Validate a recipe by id.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::NotFound`] if no recipe has that id.
    pub fn validate(&self, recipe_id: &str) -> Result<RecipeReport, RecipeError> {
        let recipe = self.get(recipe_id)?;
        Ok(validate_recipe(&recipe))
    }

    fn user_ids(&self) -> Result<Vec<String>, RecipeError> {
        let Some(dir) = &self.user_dir else {
            return Ok(Vec::new());
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if is_valid_recipe_id(stem) {
                        ids.push(stem.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl RecipeCatalog {
    /// Sidecar metadata of a recipe; empty for builtins and for user recipes
    /// without a readable sidecar.
    #[must_use]
    pub fn metadata(&self, recipe_id: &str) -> RecipeMetadata {
        if self.builtin.contains_key(recipe_id) || !is_valid_recipe_id(recipe_id) {
            return RecipeMetadata::default();
        }
        let Some(dir) = &self.user_dir else {
            return RecipeMetadata::default();
        };
        let path = meta_path(dir, recipe_id);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable recipe metadata {}: {e}", path.display());
                RecipeMetadata::default()
            }),
            Err(_) => RecipeMetadata::default(),
        }
    }

    /// Recipe text plus metadata, for backup or sharing.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::NotFound`] if no recipe has that id.
    pub fn export(&self, recipe_id: &str) -> Result<RecipeExport, RecipeError> {
        let recipe = self.get(recipe_id)?;
        let metadata = self.metadata(recipe_id);
        Ok(RecipeExport {
            id: recipe.id,
            source: recipe.source,
            label: metadata.label.clone(),
            yaml: recipe.text,
            metadata,
        })
    }

    /// Import a full ESPHome config as a user recipe.
    ///
    /// Device-level sections are dropped, an `lvgl:` block is ensured and
    /// the pages marker placed under it. The id
    /// is slugified from `recipe_id`, else the label; a taken id gets a
    /// content-hash suffix, then a numeric one.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::InvalidYaml`] if the text is empty or not a
    /// YAML mapping, [`RecipeError::NoUserDirectory`] without a user
    /// directory, and [`RecipeError::Io`] if the write fails.
    #[tracing::instrument(skip(self, yaml))]
    pub fn import(
        &self,
        yaml: &str,
        recipe_id: Option<&str>,
        label: Option<&str>,
    ) -> Result<SavedRecipe, RecipeError> {
        let dir = self.user_dir()?;
        let (text, profile) = normalize_import(yaml)?;
        let label = clean_label(label).unwrap_or_else(|| default_label(&profile));
        let base = recipe_slug(clean_label(recipe_id).as_deref().unwrap_or(&label));

        let _writes = self.lock_writes();
        let id = if self.is_taken(&base) {
            let digest = hex::encode(Sha256::digest(text.as_bytes()));
            self.free_id(&format!("{base}_{}", &digest[..6]))
        } else {
            base
        };
        write_atomic(&dir.join(format!("{id}.yaml")), text.as_bytes())?;
        let metadata = RecipeMetadata {
            label: Some(label.clone()),
            cloned_from: None,
        };
        write_atomic(&meta_path(dir, &id), &serde_json::to_vec_pretty(&metadata)?)?;
        tracing::info!("Imported recipe '{id}'");
        Ok(saved(id, Some(label), text))
    }

    /// Copy a builtin or user recipe into a new user recipe.
    ///
    /// The new id is slugified from `new_id`, else the source id, and
    /// suffixed `_2`, `_3`, ... while taken.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::NotFound`] for an unknown source,
    /// [`RecipeError::NoUserDirectory`] without a user directory, and
    /// [`RecipeError::Io`] if the write fails.
    #[tracing::instrument(skip(self))]
    pub fn clone_recipe(
        &self,
        source_id: &str,
        new_id: Option<&str>,
        label: Option<&str>,
    ) -> Result<SavedRecipe, RecipeError> {
        let dir = self.user_dir()?;
        let source = self.get(source_id)?;
        let label = clean_label(label).or_else(|| self.metadata(source_id).label);
        let base = recipe_slug(clean_label(new_id).as_deref().unwrap_or(source_id));

        let _writes = self.lock_writes();
        let id = self.free_id(&base);
        write_atomic(&dir.join(format!("{id}.yaml")), source.text.as_bytes())?;
        let metadata = RecipeMetadata {
            label: label.clone(),
            cloned_from: Some(source.id),
        };
        write_atomic(&meta_path(dir, &id), &serde_json::to_vec_pretty(&metadata)?)?;
        tracing::info!("Cloned recipe '{source_id}' to '{id}'");
        Ok(saved(id, label, source.text))
    }

    /// Replace the text and/or label of a user recipe.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::ReadOnly`] for a builtin,
    /// [`RecipeError::NotFound`] for an unknown id,
    /// [`RecipeError::InvalidYaml`] for blank text, and
    /// [`RecipeError::Io`] if the write fails.
    #[tracing::instrument(skip(self, yaml))]
    pub fn save(
        &self,
        recipe_id: &str,
        yaml: Option<&str>,
        label: Option<&str>,
    ) -> Result<SavedRecipe, RecipeError> {
        if yaml.is_some_and(|y| y.trim().is_empty()) {
            return Err(RecipeError::InvalidYaml("recipe text is empty".to_string()));
        }
        let _writes = self.lock_writes();
        let path = self.user_recipe_path(recipe_id)?;
        let text = match yaml {
            Some(text) => {
                write_atomic(&path, text.as_bytes())?;
                text.to_string()
            }
            None => std::fs::read_to_string(&path)?,
        };
        let mut metadata = self.metadata(recipe_id);
        if let Some(label) = clean_label(label) {
            metadata.label = Some(label);
            let dir = self.user_dir()?;
            write_atomic(&meta_path(dir, recipe_id), &serde_json::to_vec_pretty(&metadata)?)?;
        }
        Ok(saved(recipe_id.to_string(), metadata.label, text))
    }

    /// Delete a user recipe and its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::ReadOnly`] for a builtin,
    /// [`RecipeError::NotFound`] for an unknown id, and
    /// [`RecipeError::Io`] if removal fails.
    #[tracing::instrument(skip(self))]
    pub fn delete(&self, recipe_id: &str) -> Result<(), RecipeError> {
        let _writes = self.lock_writes();
        let path = self.user_recipe_path(recipe_id)?;
        std::fs::remove_file(&path)?;
        let dir = self.user_dir()?;
        match std::fs::remove_file(meta_path(dir, recipe_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("Deleted recipe '{recipe_id}'");
        Ok(())
    }

    fn user_dir(&self) -> Result<&Path, RecipeError> {
        self.user_dir.as_deref().ok_or(RecipeError::NoUserDirectory)
    }

    fn user_recipe_path(&self, recipe_id: &str) -> Result<PathBuf, RecipeError> {
        if self.builtin.contains_key(recipe_id) {
            return Err(RecipeError::ReadOnly(recipe_id.to_string()));
        }
        let not_found = || RecipeError::NotFound(recipe_id.to_string());
        if !is_valid_recipe_id(recipe_id) {
            return Err(not_found());
        }
        let dir = self.user_dir.as_deref().ok_or_else(not_found)?;
        let path = dir.join(format!("{recipe_id}.yaml"));
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }

    fn is_taken(&self, recipe_id: &str) -> bool {
        self.builtin.contains_key(recipe_id)
            || self
                .user_dir
                .as_ref()
                .is_some_and(|dir| dir.join(format!("{recipe_id}.yaml")).exists())
    }

    fn free_id(&self, base: &str) -> String {
        if !self.is_taken(base) {
            return base.to_string();
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.is_taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

}

fn saved(id: String, label: Option<String>, text: String) -> SavedRecipe {
    let report = validate_recipe(&HardwareRecipe {
        id: id.clone(),
        source: RecipeSource::User,
        text,
    });
    SavedRecipe { id, label, report }
}

fn meta_path(dir: &Path, recipe_id: &str) -> PathBuf {
    dir.join(format!("{recipe_id}{META_SUFFIX}"))
}

/// Write through a sibling temp file and rename it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("recipe");
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    let result = write_and_rename(&tmp, path, bytes);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(tmp, path)
}

fn clean_label(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Lowercase `[a-z0-9_-]`, other runs collapsed to `_`, `recipe` if empty.
fn recipe_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut gap = false;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            if gap && !out.is_empty() {
                out.push('_');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "recipe".to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_label(profile: &HardwareProfile) -> String {
    let mut parts = Vec::new();
    if let Some(board) = &profile.board {
        parts.push(board.clone());
    }
    if let Some(res) = profile.resolution {
        parts.push(format!("{}x{}", res.width, res.height));
    }
    if parts.is_empty() {
        "Custom recipe".to_string()
    } else {
        parts.join(" • ")
    }
}

/// Strip device-level sections and make sure the pages marker has a home.
fn normalize_import(raw: &str) -> Result<(String, HardwareProfile), RecipeError> {
    if raw.trim().is_empty() {
        return Err(RecipeError::InvalidYaml("recipe text is empty".to_string()));
    }
    let doc: Yaml =
        serde_yaml::from_str(raw).map_err(|e| RecipeError::InvalidYaml(e.to_string()))?;
    let Yaml::Mapping(mut root) = doc else {
        return Err(RecipeError::InvalidYaml(
            "top-level YAML must be a mapping".to_string(),
        ));
    };
    for key in IMPORT_STRIPPED_KEYS {
        root.remove(*key);
    }
    let has_pages = root
        .get("lvgl")
        .is_some_and(|lvgl| lvgl.get("pages").is_some());
    let lvgl_empty = root
        .get("lvgl")
        .map_or(true, |lvgl| lvgl.is_null() || lvgl.as_mapping().is_some_and(Mapping::is_empty));
    if lvgl_empty {
        root.insert(Yaml::from("lvgl"), Yaml::Null);
    }
    let dumped = serde_yaml::to_string(&Yaml::Mapping(root))
        .map_err(|e| RecipeError::InvalidYaml(e.to_string()))?;

    let mut text = String::with_capacity(dumped.len() + PAGES_MARKER.len() + 4);
    for line in dumped.lines() {
        let is_lvgl = matches!(line, "lvgl:" | "lvgl: null" | "lvgl: {}");
        if is_lvgl && !has_pages {
            text.push_str("lvgl:\n  ");
            text.push_str(PAGES_MARKER);
        } else {
            text.push_str(line);
        }
        text.push('\n');
    }
    let reparsed: Yaml =
        serde_yaml::from_str(&text).map_err(|e| RecipeError::InvalidYaml(e.to_string()))?;
    let profile = extract_profile("", &text, &reparsed);
    Ok((text, profile))
}

fn is_valid_recipe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn summarize(id: &str, source: RecipeSource, text: &str, label: Option<String>) -> RecipeSummary {
    let profile = serde_yaml::from_str::<Yaml>(text)
        .ok()
        .map(|doc| extract_profile(id, text, &doc));
    RecipeSummary {
        id: id.to_string(),
        source,
        platform: profile.as_ref().and_then(|p| p.platform.clone()),
        board: profile.as_ref().and_then(|p| p.board.clone()),
        resolution: profile.and_then(|p| p.resolution),
        label,
    }
}

/// Validate recipe text and derive its profile.
#[must_use]
pub fn validate_recipe(recipe: &HardwareRecipe) -> RecipeReport {
    let text = recipe.text.as_str();
    let mut issues = Vec::new();
    let report = |issues: Vec<RecipeIssue>, profile| RecipeReport {
        recipe_id: recipe.id.clone(),
        issues,
        profile,
    };

    if text.trim().is_empty() {
        issues.push(RecipeIssue::error("empty_recipe", "Recipe is empty."));
        return report(issues, None);
    }
    let doc: Yaml = match serde_yaml::from_str(text) {
        Ok(doc) => doc,
        Err(e) => {
            issues.push(RecipeIssue::error(
                "yaml_parse_failed",
                format!("Recipe YAML parse failed: {e}"),
            ));
            return report(issues, None);
        }
    };
    let Some(root) = doc.as_mapping() else {
        issues.push(RecipeIssue::error(
            "not_a_mapping",
            "Top-level YAML must be a mapping.",
        ));
        return report(issues, None);
    };

    match root.get("lvgl") {
        None => issues.push(RecipeIssue::error(
            "missing_lvgl_block",
            "Missing top-level `lvgl:` block.",
        )),
        Some(lvgl) => {
            let has_pages = lvgl.get("pages").is_some();
            if !text.contains(PAGES_MARKER) && !has_pages {
                issues.push(RecipeIssue::warning(
                    "missing_pages_marker",
                    format!("Missing `{PAGES_MARKER}` marker; pages will be appended under `lvgl:`."),
                ));
            }
        }
    }
    if root.get("display").is_none() {
        issues.push(RecipeIssue::warning(
            "missing_display",
            "No `display:` section (is this a full hardware recipe?).",
        ));
    }
    if root.get("touchscreen").is_none() {
        issues.push(RecipeIssue::warning(
            "missing_touchscreen",
            "No `touchscreen:` section (touch may not be configured).",
        ));
    }
    issues.sort_by_key(|i| i.severity);
    let profile = extract_profile(&recipe.id, text, &doc);
    report(issues, Some(profile))
}

fn extract_profile(recipe_id: &str, text: &str, doc: &Yaml) -> HardwareProfile {
    let mut profile = HardwareProfile::default();
    let Some(root) = doc.as_mapping() else {
        return profile;
    };
    for key in root.keys().filter_map(Yaml::as_str) {
        profile.peripherals.insert(key.to_string());
    }
    for key in PLATFORM_KEYS {
        if let Some(block) = root.get(*key) {
            profile.platform = Some((*key).to_string());
            profile.board = block.get("board").and_then(Yaml::as_str).map(str::to_string);
            break;
        }
    }
    profile.resolution = root
        .get("display")
        .and_then(display_resolution)
        .or_else(|| resolution_from_id(recipe_id));
    collect_pins(doc, &mut profile.pins);
    profile.psram = root.contains_key("psram") || text.to_ascii_lowercase().contains("psram");
    profile
}

fn display_resolution(display: &Yaml) -> Option<Resolution> {
    let first = match display {
        Yaml::Sequence(items) => items.first()?,
        other => other,
    };
    let dims = first.get("dimensions");
    let width = first
        .get("width")
        .or_else(|| dims.and_then(|d| d.get("width")))
        .and_then(Yaml::as_u64);
    let height = first
        .get("height")
        .or_else(|| dims.and_then(|d| d.get("height")))
        .and_then(Yaml::as_u64);
    match (width, height) {
        (Some(w), Some(h)) => Some(Resolution {
            width: u32::try_from(w).ok()?,
            height: u32::try_from(h).ok()?,
        }),
        _ => dims.and_then(Yaml::as_str).and_then(parse_wxh),
    }
}

fn resolution_from_id(recipe_id: &str) -> Option<Resolution> {
    recipe_id.split(['_', '-']).find_map(parse_wxh)
}

fn parse_wxh(s: &str) -> Option<Resolution> {
    let (w, h) = s.split_once(['x', 'X'])?;
    Some(Resolution {
        width: w.trim().parse().ok()?,
        height: h.trim().parse().ok()?,
    })
}

fn collect_pins(node: &Yaml, pins: &mut BTreeSet<String>) {
    match node {
        Yaml::Mapping(map) => {
            for (key, value) in map {
                let is_pin_key = key
                    .as_str()
                    .is_some_and(|k| k == "pin" || k.ends_with("_pin") || k.ends_with("_pins"));
                if is_pin_key {
                    pin_values(value, pins);
                } else {
                    collect_pins(value, pins);
                }
            }
        }
        Yaml::Sequence(items) => {
            for item in items {
                collect_pins(item, pins);
            }
        }
        Yaml::Tagged(tagged) => collect_pins(&tagged.value, pins),
        _ => {}
    }
}

fn pin_values(value: &Yaml, pins: &mut BTreeSet<String>) {
    match value {
        Yaml::Sequence(items) => {
            for item in items {
                pin_values(item, pins);
            }
        }
        Yaml::Mapping(map) => {
            if let Some(number) = map.get("number") {
                pin_values(number, pins);
            }
        }
        other => {
            if let Some(pin) = normalize_pin_yaml(other) {
                pins.insert(pin);
            }
        }
    }
}

fn normalize_pin_yaml(value: &Yaml) -> Option<String> {
    match value {
        Yaml::Number(n) => n.as_u64().map(|n| format!("GPIO{n}")),
        Yaml::String(s) => normalize_pin(s),
        _ => None,
    }
}

/// Normalize a pin reference (`4`, `gpio4`, `GPIO04`) to `GPIO4`.
#[must_use]
pub fn normalize_pin(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    let digits = upper.strip_prefix("GPIO").unwrap_or(&upper);
    let n: u32 = digits.parse().ok()?;
    Some(format!("GPIO{n}"))
}
