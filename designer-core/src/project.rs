//! Canonical project document.
//!
//! Every optional section of a stored document decodes to an explicit
//! default, so the compiler always works on a fully populated model.
//! Documents in older layouts go through [`crate::migrate`] first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model version produced by this build.
pub const CURRENT_MODEL_VERSION: u64 = 2;

/// Page id of the default page.
pub const DEFAULT_PAGE_ID: &str = "main";

const DEFAULT_WIDGET_WIDTH: i64 = 100;
const DEFAULT_WIDGET_HEIGHT: i64 = 50;

/// Root project document for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectModel {
    /// Document layout version.
    pub model_version: u64,
    /// Pages in display order.
    #[serde(default)]
    pub pages: Vec<Page>,
    /// Widget to entity bindings.
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Live-update subscriptions.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Named colors.
    #[serde(default)]
    pub palette: BTreeMap<String, String>,
    /// Target device metadata.
    #[serde(default)]
    pub device: DeviceSettings,
    /// Editor preferences, opaque to the compiler.
    #[serde(default)]
    pub ui: serde_json::Map<String, Value>,
}

impl Default for ProjectModel {
    fn default() -> Self {
        let palette = [
            ("color.bg", "#0B0F14"),
            ("color.card", "#111827"),
            ("color.text", "#E5E7EB"),
            ("color.muted", "#9CA3AF"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            model_version: CURRENT_MODEL_VERSION,
            pages: vec![Page {
                page_id: DEFAULT_PAGE_ID.to_string(),
                name: "Main".to_string(),
                widgets: Vec::new(),
            }],
            bindings: Vec::new(),
            links: Vec::new(),
            palette,
            device: DeviceSettings::default(),
            ui: serde_json::Map::new(),
        }
    }
}

impl ProjectModel {
    /// Iterate widgets with their page and widget indices, in document order.
    pub fn widgets(&self) -> impl Iterator<Item = (usize, usize, &Page, &Widget)> {
        self.pages.iter().enumerate().flat_map(|(pi, page)| {
            page.widgets
                .iter()
                .enumerate()
                .map(move |(wi, widget)| (pi, wi, page, widget))
        })
    }

    /// Find the first widget with the given id and its page.
    #[must_use]
    pub fn find_widget(&self, widget_id: &str) -> Option<WidgetRef<'_>> {
        self.widgets()
            .find(|(_, _, _, w)| w.id == widget_id)
            .map(|(page_index, widget_index, page, widget)| WidgetRef {
                page_index,
                widget_index,
                page,
                widget,
            })
    }
}

/// A widget located in a project.
#[derive(Debug, Clone, Copy)]
pub struct WidgetRef<'a> {
    /// Index of the page in the document.
    pub page_index: usize,
    /// Index of the widget within its page.
    pub widget_index: usize,
    /// Owning page.
    pub page: &'a Page,
    /// The widget.
    pub widget: &'a Widget,
}

/// One screen of widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Unique page identifier.
    pub page_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Widgets in z-order.
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

/// A widget instance placed on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Identifier, unique across the project.
    pub id: String,
    /// Schema type key.
    #[serde(rename = "type")]
    pub widget_type: String,
    /// Left offset in pixels.
    #[serde(default)]
    pub x: i64,
    /// Top offset in pixels.
    #[serde(default)]
    pub y: i64,
    /// Width in pixels.
    #[serde(default = "Widget::default_width")]
    pub w: i64,
    /// Height in pixels.
    #[serde(default = "Widget::default_height")]
    pub h: i64,
    /// Parent widget on the same page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Prop values.
    #[serde(default)]
    pub props: BTreeMap<String, Value>,
    /// Style values.
    #[serde(default)]
    pub style: BTreeMap<String, Value>,
    /// Event action snippets (ESPHome action YAML).
    #[serde(default)]
    pub events: BTreeMap<String, Value>,
}

impl Widget {
    const fn default_width() -> i64 {
        DEFAULT_WIDGET_WIDTH
    }

    const fn default_height() -> i64 {
        DEFAULT_WIDGET_HEIGHT
    }

    /// Create a widget with default geometry and no values.
    #[must_use]
    pub fn new(id: impl Into<String>, widget_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            widget_type: widget_type.into(),
            x: 0,
            y: 0,
            w: DEFAULT_WIDGET_WIDTH,
            h: DEFAULT_WIDGET_HEIGHT,
            parent_id: None,
            props: BTreeMap::new(),
            style: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    /// Set a prop value.
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Set a style value.
    #[must_use]
    pub fn with_style(mut self, key: impl Into<String>, value: Value) -> Self {
        self.style.insert(key.into(), value);
        self
    }

    /// Set the parent widget.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Link from a widget prop or event to a home-automation entity.
///
/// Binding a prop reads the entity into the widget. Binding an event calls
/// an entity service when the event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Bound widget.
    pub widget_id: String,
    /// Prop or event name on the widget's schema.
    pub property: String,
    /// Entity id, e.g. `light.kitchen`.
    pub entity_id: String,
    /// Read this attribute instead of the entity state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Service to call for event bindings, `toggle` or `light.toggle`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Extra service call data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

/// Live update from an entity value to a widget action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Entity value that triggers the update.
    pub source: LinkSource,
    /// Widget update to perform.
    pub target: LinkTarget,
}

/// Source side of a [`Link`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSource {
    /// Entity id.
    pub entity_id: String,
    /// Which value of the entity to follow.
    #[serde(default)]
    pub kind: LinkSourceKind,
    /// Attribute name for the `attribute_*` kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

/// Value followed by a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSourceKind {
    /// Entity state as text.
    #[default]
    State,
    /// Entity state as on/off.
    Binary,
    /// Numeric attribute.
    AttributeNumber,
    /// Text attribute.
    AttributeText,
}

/// Target side of a [`Link`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTarget {
    /// Updated widget.
    pub widget_id: String,
    /// Update to perform.
    pub action: LinkAction,
    /// printf format for numeric label text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Multiplier applied to numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

/// Widget update performed by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAction {
    /// Set a label's text.
    LabelText,
    /// Set a slider's value.
    SliderValue,
    /// Set an arc's value.
    ArcValue,
    /// Set the checked state of any widget.
    WidgetChecked,
    /// Hide the widget when the value is false.
    ObjHidden,
}

/// Target hardware metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Hardware recipe the project was designed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_recipe_id: Option<String>,
    /// Screen size in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenGeometry>,
}

/// Screen size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let model: ProjectModel = serde_json::from_value(json!({
            "model_version": 2,
            "pages": [{ "page_id": "main", "widgets": [{ "id": "l1", "type": "label" }] }]
        }))
        .expect("parse");
        assert!(model.bindings.is_empty());
        assert!(model.links.is_empty());
        assert!(model.palette.is_empty());
        assert_eq!(model.device, DeviceSettings::default());
        let widget = &model.pages[0].widgets[0];
        assert_eq!((widget.x, widget.y, widget.w, widget.h), (0, 0, 100, 50));
    }

    #[test]
    fn test_default_project_shape() {
        let model = ProjectModel::default();
        assert_eq!(model.model_version, CURRENT_MODEL_VERSION);
        assert_eq!(model.pages.len(), 1);
        assert_eq!(model.pages[0].page_id, DEFAULT_PAGE_ID);
        assert_eq!(model.palette.get("color.bg").map(String::as_str), Some("#0B0F14"));
    }

    #[test]
    fn test_find_widget_reports_indices() {
        let mut model = ProjectModel::default();
        model.pages[0].widgets.push(Widget::new("a", "label"));
        model.pages.push(Page {
            page_id: "second".into(),
            name: "Second".into(),
            widgets: vec![Widget::new("b", "button"), Widget::new("c", "label")],
        });
        let found = model.find_widget("c").expect("found");
        assert_eq!((found.page_index, found.widget_index), (1, 1));
        assert_eq!(found.page.page_id, "second");
        assert!(model.find_widget("missing").is_none());
    }

    #[test]
    fn test_link_kind_defaults_to_state() {
        let link: Link = serde_json::from_value(json!({
            "source": { "entity_id": "sensor.temp" },
            "target": { "widget_id": "l1", "action": "label_text" }
        }))
        .expect("parse");
        assert_eq!(link.source.kind, LinkSourceKind::State);
        assert_eq!(link.target.action, LinkAction::LabelText);
    }
}
