//! Widget schema registry.
//!
//! Built once at startup from the builtin definitions plus an optional
//! override directory, then shared read-only. Later sources replace earlier
//! ones type by type.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::RegistryError;
use crate::widget::{SchemaIndexItem, WidgetSchema, SCHEMA_FORMAT_VERSION};

const BUILTIN_SCHEMAS: &[(&str, &str)] = &[
    ("arc.json", include_str!("../schemas/widgets/arc.json")),
    (
        "backlight_slider.json",
        include_str!("../schemas/widgets/backlight_slider.json"),
    ),
    ("bar.json", include_str!("../schemas/widgets/bar.json")),
    ("button.json", include_str!("../schemas/widgets/button.json")),
    ("checkbox.json", include_str!("../schemas/widgets/checkbox.json")),
    ("image.json", include_str!("../schemas/widgets/image.json")),
    ("label.json", include_str!("../schemas/widgets/label.json")),
    ("led.json", include_str!("../schemas/widgets/led.json")),
    ("obj.json", include_str!("../schemas/widgets/obj.json")),
    (
        "relay_button.json",
        include_str!("../schemas/widgets/relay_button.json"),
    ),
    ("slider.json", include_str!("../schemas/widgets/slider.json")),
    ("switch.json", include_str!("../schemas/widgets/switch.json")),
];

/// Immutable lookup table of widget schemas keyed by type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, WidgetSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry holding the builtin widget set.
    ///
    /// # Errors
    ///
    /// Returns an error if a builtin definition fails to parse.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        registry.extend_from_source(BUILTIN_SCHEMAS.iter().copied())?;
        Ok(registry)
    }

    /// Add one source of definitions, given as `(origin, json_text)` pairs.
    ///
    /// A type defined in an earlier source is replaced. Returns the number
    /// of definitions read.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateType`] if the source defines a type
    /// twice, or a parse/version error for a bad definition. The registry is
    /// left unchanged on error.
    pub fn extend_from_source<'a, I>(&mut self, entries: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut seen = BTreeSet::new();
        let mut parsed = Vec::new();
        for (origin, text) in entries {
            let schema = parse_schema(origin, text)?;
            if !seen.insert(schema.widget_type.clone()) {
                return Err(RegistryError::DuplicateType(schema.widget_type));
            }
            parsed.push(schema);
        }
        let count = parsed.len();
        for schema in parsed {
            if self.schemas.contains_key(&schema.widget_type) {
                tracing::debug!(widget_type = %schema.widget_type, "Overriding widget schema");
            }
            self.schemas.insert(schema.widget_type.clone(), schema);
        }
        Ok(count)
    }

    /// Load every `*.json` file in `dir` as one source, in file name order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] if the directory cannot be read, or the
    /// errors of [`Self::extend_from_source`].
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, RegistryError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let text = std::fs::read_to_string(&path)?;
                files.push((name, text));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        let count =
            self.extend_from_source(files.iter().map(|(n, t)| (n.as_str(), t.as_str())))?;
        tracing::info!(dir = %dir.display(), count, "Loaded widget schema overrides");
        Ok(count)
    }

    /// Index of all schemas, ordered by type.
    #[must_use]
    pub fn list(&self) -> Vec<SchemaIndexItem> {
        self.schemas.values().map(WidgetSchema::index_item).collect()
    }

    /// Look up a schema by widget type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the type is unknown.
    pub fn get(&self, widget_type: &str) -> Result<&WidgetSchema, RegistryError> {
        self.schemas
            .get(widget_type)
            .ok_or_else(|| RegistryError::NotFound(widget_type.to_string()))
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// True if no schema is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn parse_schema(origin: &str, text: &str) -> Result<WidgetSchema, RegistryError> {
    let schema: WidgetSchema =
        serde_json::from_str(text).map_err(|e| RegistryError::InvalidSchema {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
    if schema.schema_version > SCHEMA_FORMAT_VERSION {
        return Err(RegistryError::UnsupportedSchemaVersion {
            origin: origin.to_string(),
            found: schema.schema_version,
            supported: SCHEMA_FORMAT_VERSION,
        });
    }
    if schema.widget_type.trim().is_empty() {
        return Err(RegistryError::InvalidSchema {
            origin: origin.to_string(),
            message: "type must not be empty".to_string(),
        });
    }
    if let Some(hw) = &schema.hardware {
        if let Some(missing) = hw.pin_props.iter().find(|p| !schema.props.contains_key(*p)) {
            return Err(RegistryError::InvalidSchema {
                origin: origin.to_string(),
                message: format!("pin prop '{missing}' is not declared in props"),
            });
        }
    }
    Ok(schema)
}
