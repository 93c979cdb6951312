//! Structural, property and hardware checks.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use super::issue::{CompileIssue, IssueKind};
use super::render::safe_id;
use crate::project::{ProjectModel, Widget};
use crate::recipe::{normalize_pin, HardwareProfile};
use crate::registry::SchemaRegistry;
use crate::widget::{parse_hex_color, FieldSection};

/// True for `[A-Za-z_][A-Za-z0-9_]*`, the form ESPHome accepts for ids.
#[must_use]
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn section_values(widget: &Widget, section: FieldSection) -> &BTreeMap<String, Value> {
    match section {
        FieldSection::Props => &widget.props,
        FieldSection::Style => &widget.style,
        FieldSection::Events => &widget.events,
    }
}

/// Page and widget identity, parent links and widget types.
pub(crate) fn check_structure(model: &ProjectModel, registry: &SchemaRegistry) -> Vec<CompileIssue> {
    let mut issues = Vec::new();
    let mut pages_seen = HashSet::new();
    let mut widgets_seen = HashSet::new();

    for page in &model.pages {
        if !pages_seen.insert(page.page_id.as_str()) {
            issues.push(
                CompileIssue::new(
                    IssueKind::DuplicatePageId,
                    format!("page_id '{}' is used more than once", page.page_id),
                )
                .on_page(&page.page_id),
            );
        }
        if !is_identifier(&page.page_id) {
            issues.push(
                CompileIssue::new(
                    IssueKind::InvalidProperty,
                    format!("page_id '{}' is not a valid identifier", page.page_id),
                )
                .on_page(&page.page_id)
                .on_property("page_id"),
            );
        }

        let parents: HashMap<&str, Option<&str>> = page
            .widgets
            .iter()
            .map(|w| (w.id.as_str(), w.parent_id.as_deref()))
            .collect();

        for widget in &page.widgets {
            let located = |kind, message: String| {
                CompileIssue::new(kind, message)
                    .on_page(&page.page_id)
                    .on_widget(&widget.id)
            };
            if !widgets_seen.insert(widget.id.as_str()) {
                issues.push(located(
                    IssueKind::DuplicateWidgetId,
                    format!("widget id '{}' is used more than once", widget.id),
                ));
            }
            if !is_identifier(&widget.id) {
                issues.push(
                    located(
                        IssueKind::InvalidProperty,
                        format!("widget id '{}' is not a valid identifier", widget.id),
                    )
                    .on_property("id"),
                );
            }
            if let Some(parent) = widget.parent_id.as_deref() {
                if parent == widget.id || !parents.contains_key(parent) {
                    issues.push(located(
                        IssueKind::UnknownParent,
                        format!(
                            "parent '{parent}' is not another widget on page '{}'",
                            page.page_id
                        ),
                    ));
                } else if !reaches_root(&widget.id, &parents) {
                    issues.push(located(
                        IssueKind::UnknownParent,
                        format!("parent chain of '{}' never reaches a root widget", widget.id),
                    ));
                }
            }
            if registry.get(&widget.widget_type).is_err() {
                issues.push(located(
                    IssueKind::UnknownWidgetType,
                    format!("unknown widget type '{}'", widget.widget_type),
                ));
            }
        }
    }
    issues
}

fn reaches_root(start: &str, parents: &HashMap<&str, Option<&str>>) -> bool {
    let mut current = start;
    for _ in 0..=parents.len() {
        match parents.get(current) {
            Some(Some(parent)) => current = *parent,
            Some(None) => return true,
            // Missing parents are reported separately.
            None => return true,
        }
    }
    false
}

/// Palette entries and every prop, style and event value against its schema.
pub(crate) fn check_properties(model: &ProjectModel, registry: &SchemaRegistry) -> Vec<CompileIssue> {
    let mut issues = Vec::new();

    let mut palette_ids: HashMap<String, &str> = HashMap::new();
    for (name, color) in &model.palette {
        if parse_hex_color(color).is_none() {
            issues.push(
                CompileIssue::new(
                    IssueKind::InvalidProperty,
                    format!("palette entry '{name}' = '{color}' is not a #RRGGBB color"),
                )
                .on_property(format!("palette.{name}")),
            );
        }
        let id = safe_id(name);
        if let Some(first) = palette_ids.get(&id) {
            issues.push(
                CompileIssue::new(
                    IssueKind::InvalidProperty,
                    format!("palette entries '{first}' and '{name}' both render as 'palette_{id}'"),
                )
                .on_property(format!("palette.{name}")),
            );
        } else {
            palette_ids.insert(id, name);
        }
    }

    for (_, _, page, widget) in model.widgets() {
        let Ok(schema) = registry.get(&widget.widget_type) else {
            continue;
        };
        let located = |key: &str, message: String| {
            CompileIssue::new(IssueKind::InvalidProperty, message)
                .on_page(&page.page_id)
                .on_widget(&widget.id)
                .on_property(key)
        };

        for section in [FieldSection::Props, FieldSection::Style] {
            let Some(fields) = schema.fields(section) else {
                continue;
            };
            let values = section_values(widget, section);
            for (key, value) in values {
                if value.is_null() {
                    continue;
                }
                match fields.get(key) {
                    None => issues.push(located(
                        key,
                        format!(
                            "'{key}' is not a {} key of widget type '{}'",
                            section.as_str(),
                            schema.widget_type
                        ),
                    )),
                    Some(def) => {
                        if let Err(reason) = def.kind.check(value, &model.palette) {
                            issues.push(located(key, format!("{}.{key}: {reason}", section.as_str())));
                        }
                    }
                }
            }
            for (key, def) in fields {
                if def.required && values.get(key).map_or(true, Value::is_null) {
                    issues.push(located(
                        key,
                        format!("required {} '{key}' is missing", section.as_str()),
                    ));
                }
            }
        }

        for (key, value) in &widget.events {
            if !schema.events.contains_key(key) {
                issues.push(located(
                    key,
                    format!(
                        "'{key}' is not an event of widget type '{}'",
                        schema.widget_type
                    ),
                ));
                continue;
            }
            match value {
                Value::Null => {}
                Value::String(snippet) => {
                    if let Err(e) = serde_yaml::from_str::<serde_yaml::Value>(snippet) {
                        issues.push(located(key, format!("events.{key}: action YAML does not parse: {e}")));
                    }
                }
                _ => issues.push(located(
                    key,
                    format!("events.{key}: expected an ESPHome action string"),
                )),
            }
        }
    }
    issues
}

/// True if any widget of a known type is hardware-dependent.
pub(crate) fn needs_hardware(model: &ProjectModel, registry: &SchemaRegistry) -> bool {
    model.widgets().any(|(_, _, _, widget)| {
        registry
            .get(&widget.widget_type)
            .is_ok_and(|schema| schema.is_hardware_dependent())
    })
}

/// Cross-check hardware widgets against the recipe profile.
pub(crate) fn check_hardware(
    model: &ProjectModel,
    registry: &SchemaRegistry,
    profile: &HardwareProfile,
) -> Vec<CompileIssue> {
    let mut issues = Vec::new();
    for (_, _, page, widget) in model.widgets() {
        let Some(hardware) = registry
            .get(&widget.widget_type)
            .ok()
            .and_then(|schema| schema.hardware.as_ref())
        else {
            continue;
        };
        let mismatch = |message: String| {
            CompileIssue::new(IssueKind::HardwareMismatch, message)
                .on_page(&page.page_id)
                .on_widget(&widget.id)
        };

        for peripheral in &hardware.peripherals {
            if !profile.peripherals.contains(peripheral) {
                issues.push(mismatch(format!(
                    "widget type '{}' needs a `{peripheral}:` component the recipe does not define",
                    widget.widget_type
                )));
            }
        }
        for prop in &hardware.pin_props {
            let Some(raw) = widget.props.get(prop).and_then(Value::as_str) else {
                continue;
            };
            match normalize_pin(raw) {
                None => issues.push(
                    mismatch(format!("'{raw}' is not a GPIO pin")).on_property(prop),
                ),
                Some(pin) if !profile.pins.contains(&pin) => issues.push(
                    mismatch(format!("recipe does not wire {pin}")).on_property(prop),
                ),
                Some(_) => {}
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Page;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().expect("builtin registry")
    }

    fn model_with(widgets: Vec<Widget>) -> ProjectModel {
        let mut model = ProjectModel::default();
        model.pages[0].widgets = widgets;
        model
    }

    fn kinds(issues: &[CompileIssue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("l1"));
        assert!(is_identifier("_x"));
        assert!(!is_identifier("1l"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_duplicate_ids() {
        let mut model = model_with(vec![Widget::new("a", "label"), Widget::new("a", "label")]);
        model.pages.push(Page {
            page_id: "main".into(),
            name: String::new(),
            widgets: vec![],
        });
        let issues = check_structure(&model, &registry());
        assert_eq!(
            kinds(&issues),
            vec![IssueKind::DuplicateWidgetId, IssueKind::DuplicatePageId]
        );
    }

    #[test]
    fn test_unknown_parent_and_cycle() {
        let model = model_with(vec![
            Widget::new("a", "obj").with_parent("ghost"),
            Widget::new("b", "obj").with_parent("c"),
            Widget::new("c", "obj").with_parent("b"),
            Widget::new("d", "label").with_parent("d"),
        ]);
        let issues = check_structure(&model, &registry());
        assert_eq!(kinds(&issues), vec![IssueKind::UnknownParent; 4]);
    }

    #[test]
    fn test_unknown_widget_type_reported_once() {
        let model = model_with(vec![Widget::new("w", "nonexistent_widget")]);
        let issues = check_structure(&model, &registry());
        assert_eq!(kinds(&issues), vec![IssueKind::UnknownWidgetType]);
        assert_eq!(issues[0].widget_id.as_deref(), Some("w"));
        assert_eq!(issues[0].page_id.as_deref(), Some("main"));

        // Property checks skip it.
        assert!(check_properties(&model, &registry()).is_empty());
    }

    #[test]
    fn test_property_violations_collected() {
        let model = model_with(vec![
            Widget::new("l1", "label")
                .with_prop("text", json!(5))
                .with_prop("bogus", json!(1))
                .with_style("text_color", json!("red")),
            Widget::new("img", "image"),
        ]);
        let issues = check_properties(&model, &registry());
        let props: Vec<_> = issues.iter().filter_map(|i| i.property.as_deref()).collect();
        assert_eq!(props, vec!["bogus", "text", "text_color", "src"]);
        assert!(issues.iter().all(|i| i.kind == IssueKind::InvalidProperty));
    }

    #[test]
    fn test_palette_color_accepted() {
        let model = model_with(vec![
            Widget::new("l1", "label").with_style("text_color", json!("color.text"))
        ]);
        assert!(check_properties(&model, &registry()).is_empty());
    }

    #[test]
    fn test_bad_palette_entry() {
        let mut model = ProjectModel::default();
        model.palette.insert("accent".into(), "blue".into());
        let issues = check_properties(&model, &registry());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].property.as_deref(), Some("palette.accent"));
    }

    #[test]
    fn test_palette_names_with_the_same_id_conflict() {
        let mut model = ProjectModel::default();
        model.palette.clear();
        model.palette.insert("color.bg".into(), "#000000".into());
        model.palette.insert("color_bg".into(), "#FFFFFF".into());
        let issues = check_properties(&model, &registry());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::InvalidProperty);
        assert_eq!(issues[0].property.as_deref(), Some("palette.color_bg"));
        assert!(issues[0].message.contains("palette_color_bg"));
    }

    #[test]
    fn test_event_values() {
        let mut button = Widget::new("b1", "button");
        button
            .events
            .insert("on_press".into(), json!("- logger.log: pressed"));
        button.events.insert("on_click".into(), json!(3));
        button.events.insert("on_focus".into(), json!("- x"));
        button
            .events
            .insert("on_release".into(), json!("- a: [unclosed"));
        let issues = check_properties(&model_with(vec![button]), &registry());
        let props: Vec<_> = issues.iter().filter_map(|i| i.property.as_deref()).collect();
        assert_eq!(props, vec!["on_click", "on_focus", "on_release"]);
    }

    #[test]
    fn test_hardware_checks() {
        let profile = HardwareProfile {
            peripherals: ["lvgl".to_string()].into_iter().collect(),
            pins: ["GPIO21".to_string()].into_iter().collect(),
            ..HardwareProfile::default()
        };
        let model = model_with(vec![
            Widget::new("bl", "backlight_slider"),
            Widget::new("r1", "relay_button").with_prop("pin", json!("gpio21")),
            Widget::new("r2", "relay_button").with_prop("pin", json!("GPIO5")),
            Widget::new("r3", "relay_button").with_prop("pin", json!("left")),
        ]);
        assert!(needs_hardware(&model, &registry()));
        let issues = check_hardware(&model, &registry(), &profile);
        let widgets: Vec<_> = issues.iter().filter_map(|i| i.widget_id.as_deref()).collect();
        assert_eq!(widgets, vec!["bl", "r2", "r3"]);
        assert!(issues.iter().all(|i| i.kind == IssueKind::HardwareMismatch));
    }

    #[test]
    fn test_plain_widgets_need_no_hardware() {
        let model = model_with(vec![Widget::new("l1", "label")]);
        assert!(!needs_hardware(&model, &registry()));
    }
}
