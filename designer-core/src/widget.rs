//! Declarative widget schemas.
//!
//! A [`WidgetSchema`] describes one LVGL widget type: the literal or bindable
//! `props`, the visual `style` fields, and the `events` it can emit. Field
//! kinds form a closed tagged union so property validation is exhaustive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Highest schema file format this build reads.
pub const SCHEMA_FORMAT_VERSION: u32 = 1;

/// Primitive kind of a prop or style field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text. Values of the form `asset:<name>` reference uploaded assets.
    String,
    /// Numeric value with optional bounds.
    Number {
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        /// Reject fractional values.
        #[serde(default)]
        integer: bool,
    },
    /// `true` or `false`.
    Boolean,
    /// `#RRGGBB`, `0xRRGGBB`, or a palette entry name.
    Color,
    /// One of a fixed set of strings.
    Enum {
        /// Accepted values.
        values: Vec<String>,
    },
}

impl FieldKind {
    /// Short label used in issue messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number { .. } => "number",
            Self::Boolean => "boolean",
            Self::Color => "color",
            Self::Enum { .. } => "enum",
        }
    }

    /// Check a literal value against this kind.
    ///
    /// `palette` supplies the names accepted for color fields.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value does not fit.
    pub fn check(&self, value: &Value, palette: &BTreeMap<String, String>) -> Result<(), String> {
        match self {
            Self::String => match value {
                Value::String(_) => Ok(()),
                other => Err(format!("expected string, got {}", json_kind(other))),
            },
            Self::Number { min, max, integer } => {
                let Some(n) = value.as_f64() else {
                    return Err(format!("expected number, got {}", json_kind(value)));
                };
                if *integer && n.fract() != 0.0 {
                    return Err(format!("expected integer, got {n}"));
                }
                if let Some(lo) = min {
                    if n < *lo {
                        return Err(format!("{n} is below minimum {lo}"));
                    }
                }
                if let Some(hi) = max {
                    if n > *hi {
                        return Err(format!("{n} is above maximum {hi}"));
                    }
                }
                Ok(())
            }
            Self::Boolean => match value {
                Value::Bool(_) => Ok(()),
                other => Err(format!("expected boolean, got {}", json_kind(other))),
            },
            Self::Color => {
                let Value::String(s) = value else {
                    return Err(format!("expected color, got {}", json_kind(value)));
                };
                if parse_hex_color(s).is_some() || palette.contains_key(s) {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not a #RRGGBB color or palette name"))
                }
            }
            Self::Enum { values } => match value {
                Value::String(s) if values.iter().any(|v| v == s) => Ok(()),
                Value::String(s) => Err(format!("'{s}' is not one of [{}]", values.join(", "))),
                other => Err(format!("expected enum string, got {}", json_kind(other))),
            },
        }
    }
}

/// Parse `#RRGGBB` or `0xRRGGBB` into a 24-bit RGB value.
#[must_use]
pub fn parse_hex_color(s: &str) -> Option<u32> {
    let digits = s
        .strip_prefix('#')
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"))?;
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Definition of a prop or style field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Primitive kind.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Instances must set this field.
    #[serde(default)]
    pub required: bool,
    /// Value used when the instance omits the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Render `default` when the instance omits the field.
    #[serde(default)]
    pub emit_default: bool,
    /// YAML key to render under, if different from the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaml_key: Option<String>,
    /// Editor hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Definition of an event a widget can emit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDef {
    /// YAML trigger key, if different from the event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaml_key: Option<String>,
    /// Editor hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// ESPHome rendering hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EsphomeMapping {
    /// LVGL widget key, defaults to the schema type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_key: Option<String>,
}

/// Physical hardware a widget needs from the device recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareRequirement {
    /// Top-level recipe components that must be present (e.g. `output`).
    #[serde(default)]
    pub peripherals: Vec<String>,
    /// Props whose value names a GPIO pin the recipe must wire.
    #[serde(default)]
    pub pin_props: Vec<String>,
}

/// Which field map a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldSection {
    /// `props`
    Props,
    /// `style`
    Style,
    /// `events`
    Events,
}

impl FieldSection {
    /// Section name as it appears in documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Props => "props",
            Self::Style => "style",
            Self::Events => "events",
        }
    }
}

/// Schema of one widget type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSchema {
    /// Definition file format version.
    #[serde(default = "WidgetSchema::default_schema_version")]
    pub schema_version: u32,
    /// Unique widget type key.
    #[serde(rename = "type")]
    pub widget_type: String,
    /// Display title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendering hints.
    #[serde(default)]
    pub esphome: EsphomeMapping,
    /// Data-bound or literal properties.
    #[serde(default)]
    pub props: BTreeMap<String, FieldDef>,
    /// Visual properties.
    #[serde(default)]
    pub style: BTreeMap<String, FieldDef>,
    /// Emittable events.
    #[serde(default)]
    pub events: BTreeMap<String, EventDef>,
    /// Hardware requirements, present only for hardware-dependent widgets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareRequirement>,
}

impl WidgetSchema {
    const fn default_schema_version() -> u32 {
        1
    }

    /// LVGL key the widget renders under.
    #[must_use]
    pub fn root_key(&self) -> &str {
        self.esphome.root_key.as_deref().unwrap_or(&self.widget_type)
    }

    /// True if the widget needs physical hardware from a recipe.
    #[must_use]
    pub fn is_hardware_dependent(&self) -> bool {
        self.hardware.is_some()
    }

    /// Field definitions for a value section.
    ///
    /// Events have no field kinds and return `None`.
    #[must_use]
    pub fn fields(&self, section: FieldSection) -> Option<&BTreeMap<String, FieldDef>> {
        match section {
            FieldSection::Props => Some(&self.props),
            FieldSection::Style => Some(&self.style),
            FieldSection::Events => None,
        }
    }

    /// Index view without field maps.
    #[must_use]
    pub fn index_item(&self) -> SchemaIndexItem {
        SchemaIndexItem {
            widget_type: self.widget_type.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}

/// Entry of [`crate::registry::SchemaRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIndexItem {
    /// Widget type key.
    #[serde(rename = "type")]
    pub widget_type: String,
    /// Display title.
    pub title: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_palette() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_field_def_parses_tagged_kind() {
        let def: FieldDef = serde_json::from_value(json!({
            "kind": "number",
            "min": 0,
            "max": 100,
            "integer": true,
            "default": 50,
            "emit_default": true
        }))
        .expect("parse field");
        assert_eq!(
            def.kind,
            FieldKind::Number {
                min: Some(0.0),
                max: Some(100.0),
                integer: true
            }
        );
        assert!(def.emit_default);
        assert_eq!(def.default, Some(json!(50)));
    }

    #[test]
    fn test_enum_field_parses_values() {
        let def: FieldDef = serde_json::from_value(json!({
            "kind": "enum",
            "values": ["left", "center"]
        }))
        .expect("parse enum");
        assert!(def.kind.check(&json!("center"), &no_palette()).is_ok());
        assert!(def.kind.check(&json!("right"), &no_palette()).is_err());
    }

    #[test]
    fn test_number_bounds_and_integer() {
        let kind = FieldKind::Number {
            min: Some(0.0),
            max: Some(10.0),
            integer: true,
        };
        assert!(kind.check(&json!(5), &no_palette()).is_ok());
        assert!(kind.check(&json!(11), &no_palette()).is_err());
        assert!(kind.check(&json!(-1), &no_palette()).is_err());
        assert!(kind.check(&json!(2.5), &no_palette()).is_err());
        assert!(kind.check(&json!("5"), &no_palette()).is_err());
    }

    #[test]
    fn test_color_accepts_hex_and_palette() {
        let mut palette = BTreeMap::new();
        palette.insert("color.bg".to_string(), "#0B0F14".to_string());
        assert!(FieldKind::Color.check(&json!("#FF00aa"), &palette).is_ok());
        assert!(FieldKind::Color.check(&json!("0x00FF00"), &palette).is_ok());
        assert!(FieldKind::Color.check(&json!("color.bg"), &palette).is_ok());
        assert!(FieldKind::Color.check(&json!("red"), &palette).is_err());
        assert!(FieldKind::Color.check(&json!(255), &palette).is_err());
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#0B0F14"), Some(0x0B0F14));
        assert_eq!(parse_hex_color("0xffffff"), Some(0xFF_FFFF));
        assert_eq!(parse_hex_color("#FFF"), None);
        assert_eq!(parse_hex_color("#GG0000"), None);
    }

    #[test]
    fn test_schema_root_key_defaults_to_type() {
        let schema: WidgetSchema = serde_json::from_value(json!({
            "type": "label",
            "title": "Label"
        }))
        .expect("parse schema");
        assert_eq!(schema.root_key(), "label");
        assert_eq!(schema.schema_version, 1);
        assert!(!schema.is_hardware_dependent());

        let schema: WidgetSchema = serde_json::from_value(json!({
            "type": "relay_button",
            "title": "Relay button",
            "esphome": { "root_key": "button" },
            "hardware": { "pin_props": ["pin"] }
        }))
        .expect("parse schema");
        assert_eq!(schema.root_key(), "button");
        assert!(schema.is_hardware_dependent());
    }
}
