//! Forward migrations for stored project documents.
//!
//! Each step is a pure transform from version `n` to `n + 1` on the raw JSON
//! document. Steps run in sequence until the document reaches
//! [`CURRENT_MODEL_VERSION`]. A document without `model_version` is treated
//! as version 1.

use serde_json::{Map, Value};

use crate::error::MigrationError;
use crate::project::{ProjectModel, CURRENT_MODEL_VERSION, DEFAULT_PAGE_ID};

type MigrationStep = fn(&mut Map<String, Value>);

/// Steps keyed by the version they migrate from.
const MIGRATIONS: &[(u64, MigrationStep)] = &[(1, v1_to_v2)];

/// Read the declared model version of a raw document.
///
/// # Errors
///
/// Returns [`MigrationError::Malformed`] if the document is not an object or
/// the version is not a positive integer.
pub fn document_version(doc: &Value) -> Result<u64, MigrationError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| MigrationError::Malformed("project must be a JSON object".into()))?;
    match obj.get("model_version") {
        None | Some(Value::Null) => Ok(1),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => Ok(n),
            _ => Err(MigrationError::Malformed(format!(
                "model_version must be a positive integer, got {v}"
            ))),
        },
    }
}

/// Migrate a raw document to the current version.
///
/// The input is not modified. A document already at the current version is
/// returned unchanged.
///
/// # Errors
///
/// Returns [`MigrationError::UnsupportedVersion`] for documents newer than
/// this build, or [`MigrationError::Malformed`] for non-object input.
pub fn migrate(doc: &Value) -> Result<Value, MigrationError> {
    let mut version = document_version(doc)?;
    if version > CURRENT_MODEL_VERSION {
        return Err(MigrationError::UnsupportedVersion {
            found: version,
            supported: CURRENT_MODEL_VERSION,
        });
    }
    let mut out = doc.clone();
    let Value::Object(obj) = &mut out else {
        return Err(MigrationError::Malformed(
            "project must be a JSON object".into(),
        ));
    };
    while version < CURRENT_MODEL_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|(from, _)| *from == version)
            .map(|(_, step)| *step)
            .ok_or_else(|| {
                MigrationError::Malformed(format!("no migration from model_version {version}"))
            })?;
        step(obj);
        version += 1;
        obj.insert("model_version".into(), Value::from(version));
        tracing::debug!(version, "Applied project migration");
    }
    Ok(out)
}

/// Migrate and decode a raw document into the canonical model.
///
/// # Errors
///
/// Returns the errors of [`migrate`], or [`MigrationError::Malformed`] when
/// the migrated document does not match the canonical shape.
pub fn canonicalize(doc: &Value) -> Result<ProjectModel, MigrationError> {
    let migrated = migrate(doc)?;
    serde_json::from_value(migrated).map_err(|e| MigrationError::Malformed(e.to_string()))
}

/// v1 stored page ids as `id`, kept the recipe under `hardware.recipe_id`,
/// and used entity-only `bindings` as subscriptions (now carried by links).
fn v1_to_v2(obj: &mut Map<String, Value>) {
    let pages = match obj.remove("pages") {
        Some(Value::Array(pages)) if !pages.is_empty() => pages,
        _ => vec![serde_json::json!({ "page_id": DEFAULT_PAGE_ID, "name": "Main" })],
    };
    let pages = pages
        .into_iter()
        .enumerate()
        .map(|(index, page)| match page {
            Value::Object(mut page) => {
                if !page.contains_key("page_id") {
                    let id = page.remove("id").unwrap_or_else(|| {
                        Value::from(if index == 0 {
                            DEFAULT_PAGE_ID.to_string()
                        } else {
                            format!("page_{}", index + 1)
                        })
                    });
                    page.insert("page_id".into(), id);
                }
                page.entry("widgets").or_insert_with(|| Value::Array(Vec::new()));
                Value::Object(page)
            }
            other => other,
        })
        .collect();
    obj.insert("pages".into(), Value::Array(pages));

    let legacy_recipe = obj
        .remove("hardware")
        .and_then(|hw| hw.get("recipe_id").cloned())
        .filter(Value::is_string);
    let device = obj
        .entry("device")
        .or_insert_with(|| Value::Object(Map::new()));
    if !device.is_object() {
        *device = Value::Object(Map::new());
    }
    if let (Some(recipe), Value::Object(device)) = (legacy_recipe, device) {
        device.entry("hardware_recipe_id").or_insert(recipe);
    }

    let bindings = match obj.remove("bindings") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter(|b| b.get("widget_id").is_some_and(Value::is_string))
            .collect(),
        _ => Vec::new(),
    };
    obj.insert("bindings".into(), Value::Array(bindings));

    if !obj.get("links").is_some_and(Value::is_array) {
        obj.insert("links".into(), Value::Array(Vec::new()));
    }
    for key in ["palette", "ui"] {
        if !obj.get(key).is_some_and(Value::is_object) {
            obj.insert(key.into(), Value::Object(Map::new()));
        }
    }
}
