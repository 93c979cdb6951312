//! Binding and link checks against entity capabilities.
//!
//! Distinct entities are resolved concurrently. Issues are reported in
//! document order (page, widget, binding index, with links after bindings)
//! regardless of which lookup finishes first.

use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;

use super::issue::{CompileIssue, IssueKind};
use super::validate::is_identifier;
use crate::capability::{entity_domain, CapabilityResolver, CapabilitySet, ValueKind};
use crate::error::ResolveError;
use crate::project::{Binding, LinkAction, LinkSourceKind, ProjectModel};
use crate::registry::SchemaRegistry;
use crate::widget::FieldKind;

/// Service called by an event binding that does not name one.
pub const DEFAULT_SERVICE: &str = "toggle";

/// `domain.service` invoked by a write binding.
#[must_use]
pub fn service_call(binding: &Binding) -> String {
    let domain = entity_domain(&binding.entity_id).unwrap_or_default();
    match binding.service.as_deref() {
        Some(service) if service.contains('.') => service.to_string(),
        Some(service) => format!("{domain}.{service}"),
        None => format!("{domain}.{DEFAULT_SERVICE}"),
    }
}

/// True if a prop of `field` can display a value of `value`.
#[must_use]
pub fn read_compatible(field: &FieldKind, value: ValueKind) -> bool {
    match field {
        FieldKind::String => matches!(
            value,
            ValueKind::Text | ValueKind::Number | ValueKind::Boolean
        ),
        FieldKind::Number { .. } => value == ValueKind::Number,
        FieldKind::Boolean => value == ValueKind::Boolean,
        FieldKind::Color | FieldKind::Enum { .. } => value == ValueKind::Text,
    }
}

fn value_label(value: ValueKind) -> &'static str {
    match value {
        ValueKind::Text => "text",
        ValueKind::Number => "number",
        ValueKind::Boolean => "boolean",
        ValueKind::Other => "structured",
    }
}

/// Bindings sort before links; unknown widgets sort last in their group.
type SortKey = (u8, usize, usize, usize);

struct Site<'m> {
    key: SortKey,
    page_id: Option<&'m str>,
    widget_id: &'m str,
    property: Option<&'m str>,
    binding_index: Option<usize>,
    link_index: Option<usize>,
}

impl Site<'_> {
    fn issue(&self, kind: IssueKind, message: String) -> (SortKey, CompileIssue) {
        let mut issue = CompileIssue::new(kind, message).on_widget(self.widget_id);
        issue.page_id = self.page_id.map(str::to_string);
        issue.property = self.property.map(str::to_string);
        issue.binding_index = self.binding_index;
        issue.link_index = self.link_index;
        (self.key, issue)
    }
}

enum Need<'m> {
    Read {
        attribute: Option<&'m str>,
        field: &'m FieldKind,
    },
    Write {
        call: String,
    },
    Link {
        kind: LinkSourceKind,
        action: LinkAction,
        attribute: Option<&'m str>,
    },
}

impl Need<'_> {
    fn check(&self, caps: &CapabilitySet) -> Result<(), String> {
        match self {
            Self::Read { attribute, field } => {
                let Some(value) = caps.readable(*attribute) else {
                    return Err(format!(
                        "entity '{}' has no attribute '{}'",
                        caps.entity_id,
                        attribute.unwrap_or_default()
                    ));
                };
                if read_compatible(field, value) {
                    Ok(())
                } else {
                    Err(format!(
                        "{} prop cannot read the {} value of '{}'",
                        field.label(),
                        value_label(value),
                        caps.entity_id
                    ))
                }
            }
            Self::Write { call } => {
                let (domain, service) = call.split_once('.').unwrap_or((call.as_str(), ""));
                if domain != caps.domain {
                    return Err(format!(
                        "service '{call}' is not in the '{}' domain of '{}'",
                        caps.domain, caps.entity_id
                    ));
                }
                if caps.services.contains(service) {
                    Ok(())
                } else {
                    Err(format!(
                        "entity '{}' does not support service '{call}'",
                        caps.entity_id
                    ))
                }
            }
            Self::Link {
                kind,
                action,
                attribute,
            } => {
                let attribute_kind = attribute.and_then(|a| caps.attributes.get(a).copied());
                let ok = match kind {
                    LinkSourceKind::State => {
                        !matches!(action, LinkAction::SliderValue | LinkAction::ArcValue)
                            || caps.state == ValueKind::Number
                    }
                    LinkSourceKind::Binary => caps.state == ValueKind::Boolean,
                    LinkSourceKind::AttributeNumber => attribute_kind == Some(ValueKind::Number),
                    LinkSourceKind::AttributeText => attribute_kind.is_some(),
                };
                if ok {
                    Ok(())
                } else {
                    Err(format!(
                        "entity '{}' cannot feed a {kind:?} link into {action:?}",
                        caps.entity_id
                    ))
                }
            }
        }
    }
}

/// Static compatibility of a link action with its target and source kind.
fn link_shape_error(
    action: LinkAction,
    kind: LinkSourceKind,
    root_key: &str,
    attribute: Option<&str>,
) -> Option<String> {
    let required_root = match action {
        LinkAction::LabelText => Some("label"),
        LinkAction::SliderValue => Some("slider"),
        LinkAction::ArcValue => Some("arc"),
        LinkAction::WidgetChecked | LinkAction::ObjHidden => None,
    };
    if let Some(root) = required_root {
        if root != root_key {
            return Some(format!("{action:?} needs a {root} widget, target is {root_key}"));
        }
    }
    let kind_ok = match action {
        LinkAction::LabelText => true,
        LinkAction::SliderValue | LinkAction::ArcValue => {
            matches!(kind, LinkSourceKind::State | LinkSourceKind::AttributeNumber)
        }
        LinkAction::WidgetChecked | LinkAction::ObjHidden => kind == LinkSourceKind::Binary,
    };
    if !kind_ok {
        return Some(format!("{action:?} cannot take a {kind:?} source"));
    }
    let needs_attribute = matches!(
        kind,
        LinkSourceKind::AttributeNumber | LinkSourceKind::AttributeText
    );
    if needs_attribute && attribute.map_or(true, str::is_empty) {
        return Some(format!("{kind:?} source needs an attribute"));
    }
    None
}

/// Validate bindings and links.
///
/// Runs independently of the other stages so a deferred compile can be
/// re-checked once the resolver is reachable again.
pub async fn check_bindings<R>(
    model: &ProjectModel,
    registry: &SchemaRegistry,
    resolver: &R,
) -> Vec<CompileIssue>
where
    R: CapabilityResolver + ?Sized,
{
    let mut issues: Vec<(SortKey, CompileIssue)> = Vec::new();
    let mut pending: Vec<(Site<'_>, &str, Need<'_>)> = Vec::new();

    for (index, binding) in model.bindings.iter().enumerate() {
        let found = model.find_widget(&binding.widget_id);
        let site = Site {
            key: found.map_or((0, usize::MAX, usize::MAX, index), |f| {
                (0, f.page_index, f.widget_index, index)
            }),
            page_id: found.map(|f| f.page.page_id.as_str()),
            widget_id: &binding.widget_id,
            property: Some(&binding.property),
            binding_index: Some(index),
            link_index: None,
        };
        let Some(found) = found else {
            issues.push(site.issue(
                IssueKind::InvalidBinding,
                format!("binding targets unknown widget '{}'", binding.widget_id),
            ));
            continue;
        };
        let Ok(schema) = registry.get(&found.widget.widget_type) else {
            continue;
        };

        let need = if let Some(def) = schema.props.get(&binding.property) {
            let is_pin = schema
                .hardware
                .as_ref()
                .is_some_and(|hw| hw.pin_props.contains(&binding.property));
            if is_pin {
                issues.push(site.issue(
                    IssueKind::InvalidBinding,
                    format!("pin prop '{}' cannot be bound", binding.property),
                ));
                continue;
            }
            Need::Read {
                attribute: binding.attribute.as_deref(),
                field: &def.kind,
            }
        } else if schema.events.contains_key(&binding.property) {
            if let Some(key) = binding.data.keys().find(|k| !is_identifier(k)) {
                issues.push(site.issue(
                    IssueKind::InvalidBinding,
                    format!("service data key '{key}' is not a valid identifier"),
                ));
                continue;
            }
            Need::Write {
                call: service_call(binding),
            }
        } else {
            issues.push(site.issue(
                IssueKind::InvalidBinding,
                format!(
                    "'{}' is not a prop or event of widget type '{}'",
                    binding.property, schema.widget_type
                ),
            ));
            continue;
        };

        if entity_domain(&binding.entity_id).is_none() {
            issues.push(site.issue(
                IssueKind::InvalidBinding,
                format!("'{}' is not an entity id", binding.entity_id),
            ));
            continue;
        }
        pending.push((site, binding.entity_id.as_str(), need));
    }

    for (index, link) in model.links.iter().enumerate() {
        let target = &link.target;
        let found = model.find_widget(&target.widget_id);
        let site = Site {
            key: found.map_or((1, usize::MAX, usize::MAX, index), |f| {
                (1, f.page_index, f.widget_index, index)
            }),
            page_id: found.map(|f| f.page.page_id.as_str()),
            widget_id: &target.widget_id,
            property: None,
            binding_index: None,
            link_index: Some(index),
        };
        let Some(found) = found else {
            issues.push(site.issue(
                IssueKind::InvalidBinding,
                format!("link targets unknown widget '{}'", target.widget_id),
            ));
            continue;
        };
        let Ok(schema) = registry.get(&found.widget.widget_type) else {
            continue;
        };
        let attribute = link.source.attribute.as_deref();
        if let Some(reason) =
            link_shape_error(target.action, link.source.kind, schema.root_key(), attribute)
        {
            issues.push(site.issue(IssueKind::InvalidBinding, reason));
            continue;
        }
        if entity_domain(&link.source.entity_id).is_none() {
            issues.push(site.issue(
                IssueKind::InvalidBinding,
                format!("'{}' is not an entity id", link.source.entity_id),
            ));
            continue;
        }
        pending.push((
            site,
            link.source.entity_id.as_str(),
            Need::Link {
                kind: link.source.kind,
                action: target.action,
                attribute,
            },
        ));
    }

    let entities: BTreeSet<&str> = pending.iter().map(|(_, entity, _)| *entity).collect();
    let resolved: HashMap<&str, Result<CapabilitySet, ResolveError>> =
        join_all(entities.into_iter().map(|entity| async move {
            (entity, resolver.resolve(entity).await)
        }))
        .await
        .into_iter()
        .collect();
    tracing::debug!(
        entities = resolved.len(),
        deferred = resolved.values().filter(|r| r.as_ref().is_err_and(ResolveError::is_retryable)).count(),
        "Resolved binding entities"
    );

    for (site, entity, need) in pending {
        let Some(result) = resolved.get(entity) else {
            continue;
        };
        match result {
            Ok(caps) => {
                if let Err(reason) = need.check(caps) {
                    issues.push(site.issue(IssueKind::InvalidBinding, reason));
                }
            }
            Err(ResolveError::EntityNotFound(_)) => issues.push(site.issue(
                IssueKind::InvalidBinding,
                format!("entity '{entity}' not found"),
            )),
            Err(e @ ResolveError::Unavailable(_)) => {
                issues.push(site.issue(IssueKind::BindingResolutionDeferred, e.to_string()));
            }
        }
    }

    issues.sort_by_key(|(key, _)| *key);
    issues.into_iter().map(|(_, issue)| issue).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StaticCapabilities;
    use crate::project::{Link, LinkSource, LinkTarget, Widget};
    use std::collections::BTreeMap;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().expect("builtin registry")
    }

    fn caps() -> StaticCapabilities {
        StaticCapabilities::new()
            .with(
                CapabilitySet::new("light.kitchen", ValueKind::Boolean)
                    .with_attribute("brightness", ValueKind::Number)
                    .with_attribute("friendly_name", ValueKind::Text)
                    .with_service("toggle")
                    .with_service("turn_on"),
            )
            .with(CapabilitySet::new("sensor.temp", ValueKind::Number))
    }

    fn binding(widget_id: &str, property: &str, entity_id: &str) -> Binding {
        Binding {
            widget_id: widget_id.into(),
            property: property.into(),
            entity_id: entity_id.into(),
            attribute: None,
            service: None,
            data: BTreeMap::new(),
        }
    }

    fn link(entity_id: &str, kind: LinkSourceKind, widget_id: &str, action: LinkAction) -> Link {
        Link {
            source: LinkSource {
                entity_id: entity_id.into(),
                kind,
                attribute: None,
            },
            target: LinkTarget {
                widget_id: widget_id.into(),
                action,
                format: None,
                scale: None,
            },
        }
    }

    fn model() -> ProjectModel {
        let mut model = ProjectModel::default();
        model.pages[0].widgets = vec![
            Widget::new("l1", "label"),
            Widget::new("s1", "slider"),
            Widget::new("b1", "button"),
        ];
        model
    }

    #[test]
    fn test_service_call_forms() {
        let mut b = binding("b1", "on_press", "light.kitchen");
        assert_eq!(service_call(&b), "light.toggle");
        b.service = Some("turn_on".into());
        assert_eq!(service_call(&b), "light.turn_on");
        b.service = Some("switch.turn_off".into());
        assert_eq!(service_call(&b), "switch.turn_off");
    }

    #[test]
    fn test_read_compatibility_table() {
        assert!(read_compatible(&FieldKind::String, ValueKind::Number));
        assert!(!read_compatible(&FieldKind::String, ValueKind::Other));
        assert!(!read_compatible(&FieldKind::Boolean, ValueKind::Text));
        assert!(read_compatible(&FieldKind::Color, ValueKind::Text));
    }

    #[tokio::test]
    async fn test_valid_bindings_produce_no_issues() {
        let mut model = model();
        model.bindings = vec![
            binding("l1", "text", "sensor.temp"),
            binding("s1", "value", "sensor.temp"),
            binding("b1", "on_press", "light.kitchen"),
        ];
        model.links = vec![link(
            "light.kitchen",
            LinkSourceKind::Binary,
            "b1",
            LinkAction::WidgetChecked,
        )];
        let issues = check_bindings(&model, &registry(), &caps()).await;
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[tokio::test]
    async fn test_incompatible_read_mode_is_one_issue() {
        let mut model = model();
        let mut b = binding("s1", "value", "light.kitchen");
        b.attribute = Some("friendly_name".into());
        model.bindings = vec![b];
        let issues = check_bindings(&model, &registry(), &caps()).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::InvalidBinding);
        assert_eq!(issues[0].page_id.as_deref(), Some("main"));
        assert_eq!(issues[0].widget_id.as_deref(), Some("s1"));
        assert_eq!(issues[0].property.as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_write_needs_service() {
        let mut model = model();
        model.bindings = vec![binding("b1", "on_press", "sensor.temp")];
        let issues = check_bindings(&model, &registry(), &caps()).await;
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("sensor.toggle"));
    }

    #[tokio::test]
    async fn test_issue_order_follows_document() {
        let mut model = model();
        // Declared out of widget order.
        model.bindings = vec![
            binding("b1", "on_press", "light.missing"),
            binding("l1", "nope", "sensor.temp"),
            binding("ghost", "text", "sensor.temp"),
            binding("s1", "value", "light.missing"),
        ];
        model.links = vec![link(
            "sensor.temp",
            LinkSourceKind::Binary,
            "l1",
            LinkAction::LabelText,
        )];
        let issues = check_bindings(&model, &registry(), &caps()).await;
        let order: Vec<_> = issues
            .iter()
            .map(|i| (i.widget_id.clone().unwrap_or_default(), i.binding_index, i.link_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("l1".to_string(), Some(1), None),
                ("s1".to_string(), Some(3), None),
                ("b1".to_string(), Some(0), None),
                ("ghost".to_string(), Some(2), None),
                ("l1".to_string(), None, Some(0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_outage_defers_without_rejecting() {
        let table = caps();
        table.set_offline(true);
        let mut model = model();
        model.bindings = vec![
            binding("l1", "text", "sensor.temp"),
            binding("l1", "bogus", "sensor.temp"),
        ];
        let issues = check_bindings(&model, &registry(), &table).await;
        let kinds: Vec<_> = issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![IssueKind::BindingResolutionDeferred, IssueKind::InvalidBinding]
        );
        assert!(issues[0].binding_index == Some(0));
    }

    #[tokio::test]
    async fn test_bindings_to_unknown_widget_types_are_skipped() {
        let mut model = model();
        model.pages[0].widgets.push(Widget::new("x", "nonexistent_widget"));
        model.bindings = vec![binding("x", "text", "sensor.temp")];
        assert!(check_bindings(&model, &registry(), &caps()).await.is_empty());
    }

    #[tokio::test]
    async fn test_link_shapes() {
        let mut model = model();
        let mut number_attr = link(
            "light.kitchen",
            LinkSourceKind::AttributeNumber,
            "s1",
            LinkAction::SliderValue,
        );
        number_attr.source.attribute = Some("brightness".into());
        model.links = vec![
            number_attr,
            link("sensor.temp", LinkSourceKind::State, "s1", LinkAction::SliderValue),
            // Wrong widget for the action.
            link("sensor.temp", LinkSourceKind::State, "b1", LinkAction::ArcValue),
            // Binary source on a numeric entity.
            link("sensor.temp", LinkSourceKind::Binary, "b1", LinkAction::ObjHidden),
            // Missing attribute name.
            link("light.kitchen", LinkSourceKind::AttributeText, "l1", LinkAction::LabelText),
        ];
        let issues = check_bindings(&model, &registry(), &caps()).await;
        let links: Vec<_> = issues.iter().filter_map(|i| i.link_index).collect();
        assert_eq!(links, vec![4, 2, 3]);
    }
}
