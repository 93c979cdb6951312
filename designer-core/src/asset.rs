//! Uploaded binary assets (images and fonts).
//!
//! Assets are addressed by caller-supplied file name. Uploading an existing
//! name replaces it atomically. The compiler only sees an [`AssetIndex`]
//! snapshot of the names present.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AssetError;

/// Maximum asset name length in characters.
pub const MAX_ASSET_NAME_LEN: usize = 128;

/// Default maximum upload size (8 MiB).
pub const DEFAULT_MAX_ASSET_BYTES: usize = 8 * 1024 * 1024;

/// Broad class of an asset, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// TrueType or OpenType font.
    Font,
    /// Bitmap image.
    Image,
    /// Anything else.
    File,
}

impl AssetKind {
    /// Classify a file name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "ttf" | "otf" | "pcf" | "bdf" => Self::Font,
            "png" | "jpg" | "jpeg" | "webp" | "bmp" | "gif" | "svg" => Self::Image,
            _ => Self::File,
        }
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetInfo {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Asset class.
    pub kind: AssetKind,
}

/// Names available to the compiler plus the path prefix they render under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetIndex {
    names: BTreeSet<String>,
    root: String,
}

impl AssetIndex {
    /// Build an index from names; `root` is the directory written into
    /// rendered `file:` entries.
    pub fn new<I, S>(root: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            root: root.into(),
        }
    }

    /// True if the asset exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Path of an asset as rendered into the configuration.
    #[must_use]
    pub fn file_path(&self, name: &str) -> String {
        if self.root.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.root.trim_end_matches('/'))
        }
    }
}

/// Directory-backed asset store.
#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl AssetStore {
    /// Open a store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AssetError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_bytes: DEFAULT_MAX_ASSET_BYTES,
        })
    }

    /// Override the upload size limit.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Directory holding the assets.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List assets ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Io`] if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<AssetInfo>, AssetError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_asset_name(&name).is_err() {
                continue;
            }
            out.push(AssetInfo {
                kind: AssetKind::from_name(&name),
                name,
                size: meta.len(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Snapshot of asset names for a compile.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Io`] if the directory cannot be read.
    pub fn index(&self) -> Result<AssetIndex, AssetError> {
        let names = self.list()?.into_iter().map(|a| a.name);
        Ok(AssetIndex::new(self.dir.display().to_string(), names))
    }

    /// Store an asset, replacing any asset with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidName`] or [`AssetError::TooLarge`] for
    /// bad input and [`AssetError::Io`] if the write fails.
    pub fn upload(&self, name: &str, bytes: &[u8]) -> Result<AssetInfo, AssetError> {
        validate_asset_name(name)?;
        if bytes.len() > self.max_bytes {
            return Err(AssetError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::info!(asset = name, size = bytes.len(), "Stored asset");
        Ok(AssetInfo {
            name: name.to_string(),
            size: bytes.len() as u64,
            kind: AssetKind::from_name(name),
        })
    }
}

/// Check that a name is a plain, visible file name.
///
/// # Errors
///
/// Returns [`AssetError::InvalidName`] describing the problem.
pub fn validate_asset_name(name: &str) -> Result<(), AssetError> {
    let invalid = |why: &str| Err(AssetError::InvalidName(format!("{name:?}: {why}")));
    if name.is_empty() {
        return invalid("empty");
    }
    if name.chars().count() > MAX_ASSET_NAME_LEN {
        return invalid("too long");
    }
    if name.starts_with('.') {
        return invalid("hidden names are not allowed");
    }
    if name.contains(['/', '\\', ':']) || name.chars().any(char::is_control) {
        return invalid("must be a plain file name");
    }
    Ok(())
}
