//! Device registry and stored project documents.
//!
//! Provides a thread-safe [`DeviceStore`] shared by the HTTP routes. Projects
//! are kept as raw JSON so documents written by older editors survive until
//! the compiler migrates them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::project::ProjectModel;

/// Registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Stable identifier.
    pub device_id: String,
    /// ESPHome node name; derived from the id when empty.
    #[serde(default)]
    pub slug: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Recipe used when the project does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_recipe_id: Option<String>,
}

impl DeviceSummary {
    /// Create a summary with the slug derived from the id.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            slug: slugify(&device_id),
            device_id,
            name: None,
            hardware_recipe_id: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the ESPHome node name; it is normalized with [`slugify`].
    #[must_use]
    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slugify(slug);
        self
    }

    /// Set the fallback recipe.
    #[must_use]
    pub fn with_recipe(mut self, recipe_id: impl Into<String>) -> Self {
        self.hardware_recipe_id = Some(recipe_id.into());
        self
    }
}

/// Normalize a string into an ESPHome node name: lowercase, whitespace
/// runs become `_`, and characters outside `[a-z0-9_-]` are dropped.
#[must_use]
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            pending_sep = true;
            continue;
        }
        let c = c.to_ascii_lowercase();
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push(c);
    }
    if out.is_empty() {
        "device".to_string()
    } else {
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceEntry {
    summary: DeviceSummary,
    project: Value,
}

/// Thread-safe device storage with optional JSON persistence.
///
/// # Example
///
/// ```
/// use designer_core::store::{DeviceStore, DeviceSummary};
///
/// let store = DeviceStore::new();
/// store.upsert(DeviceSummary::new("Kitchen Panel"), None).unwrap();
///
/// let device = store.get("Kitchen Panel").unwrap();
/// assert_eq!(device.slug, "kitchen_panel");
/// assert_eq!(device.name.as_deref(), Some("Kitchen Panel"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeviceStore {
    devices: Arc<RwLock<HashMap<String, DeviceEntry>>>,
    /// Optional data directory for filesystem persistence.
    data_dir: Option<PathBuf>,
}

impl DeviceStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store persisted under `data_dir`, loading any devices
    /// already saved there. Unreadable files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created or read.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let mut devices = HashMap::new();
        for entry in std::fs::read_dir(&data_dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match load_entry(&path) {
                Ok(entry) => {
                    devices.insert(entry.summary.device_id.clone(), entry);
                }
                Err(e) => tracing::warn!("Skipping device file {}: {e}", path.display()),
            }
        }
        tracing::debug!("Loaded {} device(s) from {}", devices.len(), data_dir.display());
        Ok(Self {
            devices: Arc::new(RwLock::new(devices)),
            data_dir: Some(data_dir),
        })
    }

    /// All devices, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<DeviceSummary> {
        let devices = self
            .devices
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut out: Vec<DeviceSummary> = devices.values().map(|e| e.summary.clone()).collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }

    /// Get a device by id.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<DeviceSummary> {
        let devices = self
            .devices
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        devices.get(device_id).map(|e| e.summary.clone())
    }

    /// Create or update a device.
    ///
    /// An empty slug or name is derived from the device id. With `project` absent,
    /// an existing device keeps its project and a new one starts from
    /// [`ProjectModel::default`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidDeviceId`] for an empty id,
    /// [`StoreError::InvalidProject`] if `project` is not an object, or a
    /// persistence error.
    pub fn upsert(
        &self,
        mut summary: DeviceSummary,
        project: Option<Value>,
    ) -> Result<DeviceSummary, StoreError> {
        validate_device_id(&summary.device_id)?;
        if project.as_ref().is_some_and(|p| !p.is_object()) {
            return Err(StoreError::InvalidProject);
        }
        summary.slug = if summary.slug.trim().is_empty() {
            slugify(&summary.device_id)
        } else {
            slugify(&summary.slug)
        };
        if summary.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            summary.name = Some(summary.device_id.clone());
        }

        // Persisted under the write lock; memory changes only after the file does.
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let project = match (project, devices.get(&summary.device_id)) {
            (Some(project), _) => project,
            (None, Some(existing)) => existing.project.clone(),
            (None, None) => default_project()?,
        };
        let entry = DeviceEntry {
            summary: summary.clone(),
            project,
        };
        self.persist(&entry)?;
        devices.insert(summary.device_id.clone(), entry);
        drop(devices);
        tracing::info!("Upserted device {} (slug {})", summary.device_id, summary.slug);
        Ok(summary)
    }

    /// Remove a device and its stored project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeviceNotFound`] if the device does not exist.
    pub fn delete(&self, device_id: &str) -> Result<(), StoreError> {
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        devices
            .remove(device_id)
            .ok_or_else(|| StoreError::DeviceNotFound(device_id.to_string()))?;
        self.delete_file(device_id);
        drop(devices);
        tracing::info!("Deleted device {device_id}");
        Ok(())
    }

    /// Stored project document of a device.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeviceNotFound`] if the device does not exist.
    pub fn project(&self, device_id: &str) -> Result<Value, StoreError> {
        let devices = self
            .devices
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        devices
            .get(device_id)
            .map(|e| e.project.clone())
            .ok_or_else(|| StoreError::DeviceNotFound(device_id.to_string()))
    }

    /// Replace the stored project of a device.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidProject`] if `project` is not an object,
    /// [`StoreError::DeviceNotFound`] if the device does not exist, or a
    /// persistence error.
    pub fn set_project(&self, device_id: &str, project: Value) -> Result<(), StoreError> {
        if !project.is_object() {
            return Err(StoreError::InvalidProject);
        }
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::DeviceNotFound(device_id.to_string()))?;
        let updated = DeviceEntry {
            summary: entry.summary.clone(),
            project,
        };
        self.persist(&updated)?;
        *entry = updated;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn file_path(&self, device_id: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_filename(device_id))))
    }

    /// Save a device to disk. No-op without a data directory.
    fn persist(&self, entry: &DeviceEntry) -> Result<(), StoreError> {
        let Some(path) = self.file_path(&entry.summary.device_id) else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete_file(&self, device_id: &str) {
        let Some(path) = self.file_path(device_id) else {
            return;
        };
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to delete device file {}: {e}", path.display());
            }
        }
    }
}

fn validate_device_id(device_id: &str) -> Result<(), StoreError> {
    if device_id.trim().is_empty() || device_id.chars().any(char::is_control) {
        return Err(StoreError::InvalidDeviceId(device_id.to_string()));
    }
    Ok(())
}

fn default_project() -> Result<Value, StoreError> {
    serde_json::to_value(ProjectModel::default())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn load_entry(path: &Path) -> Result<DeviceEntry, StoreError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Sanitize a device id for use as a filename.
///
/// Replaces any character that is not alphanumeric, `-`, or `_` with `_`.
fn sanitize_filename(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
