//! Input validation for untrusted request data.
//!
//! Path and body identifiers are checked here before they reach the stores,
//! so lookups never see traversal sequences or oversized keys.

use designer_core::asset::DEFAULT_MAX_ASSET_BYTES;
use thiserror::Error;

/// Maximum length for device IDs.
pub const MAX_DEVICE_ID_LEN: usize = 64;
/// Maximum length for entity IDs.
pub const MAX_ENTITY_ID_LEN: usize = 255;
/// Maximum length for widget type names.
pub const MAX_WIDGET_TYPE_LEN: usize = 64;
/// Maximum length for recipe IDs.
pub const MAX_RECIPE_ID_LEN: usize = 128;
/// Maximum length of a base64 asset payload (encoded form of the byte limit).
pub const MAX_ASSET_BASE64_LEN: usize = DEFAULT_MAX_ASSET_BYTES.div_ceil(3) * 4;
/// Maximum size of recipe YAML accepted for import or save.
pub const MAX_RECIPE_YAML_LEN: usize = 256 * 1024;
/// Maximum length for recipe labels.
pub const MAX_LABEL_LEN: usize = 128;

/// Validation error types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Device ID exceeds maximum length.
    #[error("device_id too long (max {MAX_DEVICE_ID_LEN} chars)")]
    DeviceIdTooLong,
    /// Device ID is empty or contains invalid characters.
    #[error("device_id contains invalid characters")]
    DeviceIdInvalidChars,
    /// Entity ID exceeds maximum length.
    #[error("entity_id too long (max {MAX_ENTITY_ID_LEN} chars)")]
    EntityIdTooLong,
    /// Entity ID is not of the form `domain.object_id`.
    #[error("entity_id must look like domain.object_id")]
    EntityIdMalformed,
    /// Widget type exceeds maximum length or contains invalid characters.
    #[error("widget type must be 1-{MAX_WIDGET_TYPE_LEN} chars of [a-z0-9_]")]
    WidgetTypeInvalid,
    /// Recipe ID exceeds maximum length or contains invalid characters.
    #[error("recipe_id must be 1-{MAX_RECIPE_ID_LEN} chars of [A-Za-z0-9_-]")]
    RecipeIdInvalid,
    /// Base64 payload exceeds the upload limit.
    #[error("asset payload too large (max {MAX_ASSET_BASE64_LEN} base64 chars)")]
    AssetPayloadTooLarge,
    /// Recipe YAML exceeds the size limit.
    #[error("recipe yaml too large (max {MAX_RECIPE_YAML_LEN} bytes)")]
    RecipeYamlTooLarge,
    /// Label is blank or too long.
    #[error("label must be 1-{MAX_LABEL_LEN} chars")]
    LabelInvalid,
}

impl ValidationError {
    /// Stable label used in metrics.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::DeviceIdTooLong | Self::DeviceIdInvalidChars => "device_id",
            Self::EntityIdTooLong | Self::EntityIdMalformed => "entity_id",
            Self::WidgetTypeInvalid => "widget_type",
            Self::RecipeIdInvalid => "recipe_id",
            Self::AssetPayloadTooLarge => "data_base64",
            Self::RecipeYamlTooLarge => "yaml",
            Self::LabelInvalid => "label",
        }
    }
}

/// Check if a character is valid for IDs (ASCII alphanumeric, hyphen, or underscore).
fn is_valid_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_entity_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
}

/// Validate a device ID.
///
/// Valid device IDs:
/// - 1-64 characters
/// - ASCII alphanumeric, hyphen, underscore only
///
/// # Errors
///
/// Returns [`ValidationError::DeviceIdTooLong`] if the ID exceeds 64 characters.
/// Returns [`ValidationError::DeviceIdInvalidChars`] if the ID is empty or contains invalid characters.
pub fn validate_device_id(id: &str) -> Result<(), ValidationError> {
    if id.len() > MAX_DEVICE_ID_LEN {
        return Err(ValidationError::DeviceIdTooLong);
    }
    if id.is_empty() || !id.chars().all(is_valid_id_char) {
        return Err(ValidationError::DeviceIdInvalidChars);
    }
    Ok(())
}

/// Validate an entity ID such as `light.kitchen`.
///
/// # Errors
///
/// Returns [`ValidationError::EntityIdTooLong`] past 255 characters and
/// [`ValidationError::EntityIdMalformed`] unless the ID is two non-empty
/// `[a-z0-9_]` parts joined by one dot.
pub fn validate_entity_id(id: &str) -> Result<(), ValidationError> {
    if id.len() > MAX_ENTITY_ID_LEN {
        return Err(ValidationError::EntityIdTooLong);
    }
    match id.split_once('.') {
        Some((domain, object))
            if !domain.is_empty()
                && !object.is_empty()
                && domain.chars().all(is_entity_char)
                && object.chars().all(is_entity_char) =>
        {
            Ok(())
        }
        _ => Err(ValidationError::EntityIdMalformed),
    }
}

/// Validate a widget type name.
///
/// # Errors
///
/// Returns [`ValidationError::WidgetTypeInvalid`] if the name is empty, too
/// long, or has characters outside `[a-z0-9_]`.
pub fn validate_widget_type(widget_type: &str) -> Result<(), ValidationError> {
    if widget_type.is_empty()
        || widget_type.len() > MAX_WIDGET_TYPE_LEN
        || !widget_type.chars().all(is_entity_char)
    {
        return Err(ValidationError::WidgetTypeInvalid);
    }
    Ok(())
}

/// Validate a recipe ID.
///
/// # Errors
///
/// Returns [`ValidationError::RecipeIdInvalid`] if the ID is empty, too long,
/// or contains invalid characters.
pub fn validate_recipe_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_RECIPE_ID_LEN || !id.chars().all(is_valid_id_char) {
        return Err(ValidationError::RecipeIdInvalid);
    }
    Ok(())
}

/// Validate the encoded size of an asset upload before decoding it.
///
/// # Errors
///
/// Returns [`ValidationError::AssetPayloadTooLarge`] past the limit.
pub fn validate_asset_payload(data_base64: &str) -> Result<(), ValidationError> {
    if data_base64.len() > MAX_ASSET_BASE64_LEN {
        return Err(ValidationError::AssetPayloadTooLarge);
    }
    Ok(())
}

/// Validate the size of recipe YAML.
///
/// # Errors
///
/// Returns [`ValidationError::RecipeYamlTooLarge`] past the limit.
pub fn validate_recipe_yaml(yaml: &str) -> Result<(), ValidationError> {
    if yaml.len() > MAX_RECIPE_YAML_LEN {
        return Err(ValidationError::RecipeYamlTooLarge);
    }
    Ok(())
}

/// Validate a user-facing label.
///
/// # Errors
///
/// Returns [`ValidationError::LabelInvalid`] if the trimmed label is empty
/// or longer than the limit.
pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_LABEL_LEN {
        return Err(ValidationError::LabelInvalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_device_ids() {
        assert!(validate_device_id("kitchen").is_ok());
        assert!(validate_device_id("kitchen-panel").is_ok());
        assert!(validate_device_id("panel_2").is_ok());
        assert!(validate_device_id("A").is_ok());
    }

    #[test]
    fn test_invalid_device_ids() {
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("has spaces").is_err());
        assert!(validate_device_id("../../../etc/passwd").is_err());
        assert!(validate_device_id("path\\traversal").is_err());
        assert!(validate_device_id("küche").is_err());
        assert!(validate_device_id("contains<script>").is_err());
    }

    #[test]
    fn test_device_id_boundary() {
        // Exactly at limit should pass
        let at_limit = "x".repeat(MAX_DEVICE_ID_LEN);
        assert!(validate_device_id(&at_limit).is_ok());

        let over_limit = "x".repeat(MAX_DEVICE_ID_LEN + 1);
        assert_eq!(
            validate_device_id(&over_limit),
            Err(ValidationError::DeviceIdTooLong)
        );
    }

    #[test]
    fn test_entity_ids() {
        assert!(validate_entity_id("light.kitchen").is_ok());
        assert!(validate_entity_id("sensor.outdoor_temp_2").is_ok());
        assert!(validate_entity_id("light").is_err());
        assert!(validate_entity_id("light.").is_err());
        assert!(validate_entity_id(".kitchen").is_err());
        assert!(validate_entity_id("Light.Kitchen").is_err());
        assert!(validate_entity_id("light.kitchen/../x").is_err());
        assert!(validate_entity_id("a.b.c").is_err());
        assert_eq!(
            validate_entity_id(&format!("sensor.{}", "x".repeat(MAX_ENTITY_ID_LEN))),
            Err(ValidationError::EntityIdTooLong)
        );
    }

    #[test]
    fn test_widget_types() {
        assert!(validate_widget_type("label").is_ok());
        assert!(validate_widget_type("image_button").is_ok());
        assert!(validate_widget_type("").is_err());
        assert!(validate_widget_type("../label").is_err());
        assert!(validate_widget_type(&"x".repeat(MAX_WIDGET_TYPE_LEN + 1)).is_err());
    }

    #[test]
    fn test_recipe_ids() {
        assert!(validate_recipe_id("sunton_2432s028r_320x240").is_ok());
        assert!(validate_recipe_id("my-board").is_ok());
        assert!(validate_recipe_id("").is_err());
        assert!(validate_recipe_id("../secrets").is_err());
    }

    #[test]
    fn test_asset_payload_limit() {
        assert!(validate_asset_payload("aGVsbG8=").is_ok());
        assert!(validate_asset_payload(&"A".repeat(MAX_ASSET_BASE64_LEN)).is_ok());
        assert!(validate_asset_payload(&"A".repeat(MAX_ASSET_BASE64_LEN + 1)).is_err());
    }

    #[test]
    fn test_recipe_yaml_and_labels() {
        assert!(validate_recipe_yaml("lvgl:\n").is_ok());
        assert_eq!(
            validate_recipe_yaml(&"#".repeat(MAX_RECIPE_YAML_LEN + 1)),
            Err(ValidationError::RecipeYamlTooLarge)
        );
        assert!(validate_label("Kitchen • 480x272").is_ok());
        assert_eq!(validate_label("   "), Err(ValidationError::LabelInvalid));
        assert!(validate_label(&"x".repeat(MAX_LABEL_LEN + 1)).is_err());
        assert_eq!(ValidationError::LabelInvalid.field(), "label");
    }

    #[test]
    fn test_error_messages_and_fields() {
        let err = ValidationError::DeviceIdTooLong;
        assert!(err.to_string().contains("64"));
        assert_eq!(err.field(), "device_id");
        assert_eq!(ValidationError::EntityIdMalformed.field(), "entity_id");
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn accepts_every_well_formed_device_id(id in "[A-Za-z0-9_-]{1,64}") {
                prop_assert!(validate_device_id(&id).is_ok());
            }

            #[test]
            fn rejects_device_ids_with_separators(
                prefix in "[a-z0-9]{0,20}",
                sep in prop::sample::select(vec!['/', '\\', '.', ' ', ':']),
                suffix in "[a-z0-9]{0,20}",
            ) {
                let id = format!("{prefix}{sep}{suffix}");
                prop_assert!(validate_device_id(&id).is_err());
            }

            #[test]
            fn accepts_well_formed_entity_ids(
                domain in "[a-z_]{1,20}",
                object in "[a-z0-9_]{1,40}",
            ) {
                let entity_id = format!("{domain}.{object}");
                prop_assert!(validate_entity_id(&entity_id).is_ok());
            }
        }
    }
}
