//! Compile issues.

use serde::Serialize;

/// Class of a compile issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The document is newer than this build.
    UnsupportedVersion,
    /// The document cannot be decoded into the canonical model.
    MalformedDocument,
    /// Two pages share a `page_id`.
    DuplicatePageId,
    /// Two widgets share an `id`.
    DuplicateWidgetId,
    /// `parent_id` does not name a widget on the same page, or forms a cycle.
    UnknownParent,
    /// The widget type has no schema.
    UnknownWidgetType,
    /// A prop, style or event value does not fit its schema.
    InvalidProperty,
    /// A binding or link cannot be satisfied by the entity.
    InvalidBinding,
    /// The capability resolver was unreachable. Retryable.
    BindingResolutionDeferred,
    /// A hardware widget needs something the recipe does not provide.
    HardwareMismatch,
    /// No usable recipe for a project that needs one.
    MissingRecipe,
    /// The recipe has error-severity issues.
    InvalidRecipe,
    /// The recipe has warning-severity issues.
    RecipeWarning,
    /// A referenced asset is not in the asset store.
    MissingAsset,
}

/// How an issue affects the compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Stops the compile.
    Fatal,
    /// Blocks the artifact.
    Error,
    /// Informational.
    Warning,
}

impl IssueKind {
    /// Severity attached to issues of this kind.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::UnsupportedVersion
            | Self::MalformedDocument
            | Self::MissingRecipe
            | Self::InvalidRecipe => Severity::Fatal,
            Self::RecipeWarning => Severity::Warning,
            Self::DuplicatePageId
            | Self::DuplicateWidgetId
            | Self::UnknownParent
            | Self::UnknownWidgetType
            | Self::InvalidProperty
            | Self::InvalidBinding
            | Self::BindingResolutionDeferred
            | Self::HardwareMismatch
            | Self::MissingAsset => Severity::Error,
        }
    }

    /// Snake-case code, identical to the serialized form.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UnsupportedVersion => "unsupported_version",
            Self::MalformedDocument => "malformed_document",
            Self::DuplicatePageId => "duplicate_page_id",
            Self::DuplicateWidgetId => "duplicate_widget_id",
            Self::UnknownParent => "unknown_parent",
            Self::UnknownWidgetType => "unknown_widget_type",
            Self::InvalidProperty => "invalid_property",
            Self::InvalidBinding => "invalid_binding",
            Self::BindingResolutionDeferred => "binding_resolution_deferred",
            Self::HardwareMismatch => "hardware_mismatch",
            Self::MissingRecipe => "missing_recipe",
            Self::InvalidRecipe => "invalid_recipe",
            Self::RecipeWarning => "recipe_warning",
            Self::MissingAsset => "missing_asset",
        }
    }
}

/// One problem found while compiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileIssue {
    /// Issue class.
    pub kind: IssueKind,
    /// Severity derived from the kind.
    pub severity: Severity,
    /// Page the issue is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    /// Widget the issue is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    /// Prop, style or event key, or `palette.<name>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Index into `bindings`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_index: Option<usize>,
    /// Index into `links`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_index: Option<usize>,
    /// Human-readable description.
    pub message: String,
}

impl CompileIssue {
    /// Create an issue with no location.
    #[must_use]
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            page_id: None,
            widget_id: None,
            property: None,
            binding_index: None,
            link_index: None,
            message: message.into(),
        }
    }

    /// Attach a page.
    #[must_use]
    pub fn on_page(mut self, page_id: impl Into<String>) -> Self {
        self.page_id = Some(page_id.into());
        self
    }

    /// Attach a widget.
    #[must_use]
    pub fn on_widget(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }

    /// Attach a property name.
    #[must_use]
    pub fn on_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Attach a binding index.
    #[must_use]
    pub fn on_binding(mut self, index: usize) -> Self {
        self.binding_index = Some(index);
        self
    }

    /// Attach a link index.
    #[must_use]
    pub fn on_link(mut self, index: usize) -> Self {
        self.link_index = Some(index);
        self
    }

    /// True for issues that block the artifact.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity <= Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_by_kind() {
        assert_eq!(IssueKind::MissingRecipe.severity(), Severity::Fatal);
        assert_eq!(IssueKind::UnknownWidgetType.severity(), Severity::Error);
        assert_eq!(IssueKind::RecipeWarning.severity(), Severity::Warning);
    }

    #[test]
    fn test_blocking() {
        assert!(CompileIssue::new(IssueKind::InvalidRecipe, "x").is_blocking());
        assert!(CompileIssue::new(IssueKind::InvalidBinding, "x").is_blocking());
        assert!(!CompileIssue::new(IssueKind::RecipeWarning, "x").is_blocking());
    }

    #[test]
    fn test_serialize_skips_empty_location() {
        let issue = CompileIssue::new(IssueKind::InvalidProperty, "bad")
            .on_page("main")
            .on_widget("l1")
            .on_property("text");
        let json = serde_json::to_value(&issue).expect("serialize");
        assert_eq!(json["kind"], "invalid_property");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["widget_id"], "l1");
        assert!(json.get("binding_index").is_none());
    }

    #[test]
    fn test_code_matches_serialized_kind() {
        for kind in [
            IssueKind::BindingResolutionDeferred,
            IssueKind::MissingAsset,
            IssueKind::DuplicatePageId,
        ] {
            let json = serde_json::to_value(kind).expect("serialize");
            assert_eq!(json, kind.code());
        }
    }
}
