//! Deterministic ESPHome YAML rendering.
//!
//! Output order comes only from the document (page and widget order,
//! binding order) and from sorted maps. Nothing here reads the clock or
//! iterates a hash map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use super::binding::service_call;
use super::issue::{CompileIssue, IssueKind};
use super::validate::section_values;
use super::CompileTarget;
use crate::project::{Binding, LinkAction, LinkSourceKind, Page, ProjectModel, Widget};
use crate::recipe::{HardwareRecipe, BINDINGS_MARKER, PAGES_MARKER};
use crate::registry::SchemaRegistry;
use crate::widget::{parse_hex_color, FieldKind, FieldSection};

/// Prefix of asset references in string values.
pub const ASSET_PREFIX: &str = "asset:";

/// How long a UI-originated action suppresses entity-to-UI updates.
const UI_LOCK_MS: u32 = 500;

const DEFAULT_WIFI: &str = "wifi:
  networks:
    - ssid: !secret wifi_ssid
      password: !secret wifi_password
  ap: {}";

const DEFAULT_OTA: &str = "ota:
  - platform: esphome";

/// Replace characters ESPHome rejects in ids with `_`.
#[must_use]
pub fn safe_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Lowercase slug of an entity id used in lock globals.
#[must_use]
pub fn entity_slug(entity_id: &str) -> String {
    let mut out = String::with_capacity(entity_id.len());
    for c in entity_id.trim().chars() {
        let c = if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            '_'
        };
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        "entity".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Line-oriented YAML writer.
#[derive(Default)]
struct Emitter {
    out: String,
}

impl Emitter {
    fn line(&mut self, indent: usize, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        self.out.extend(std::iter::repeat(' ').take(indent));
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn lines(&mut self, indent: usize, block: &[String]) {
        for text in block {
            self.line(indent, text);
        }
    }

    fn finish(self) -> String {
        self.out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SensorPlatform {
    Text,
    Numeric,
    Binary,
}

impl SensorPlatform {
    fn section(self) -> &'static str {
        match self {
            Self::Text => "text_sensor",
            Self::Numeric => "sensor",
            Self::Binary => "binary_sensor",
        }
    }

    fn trigger(self) -> &'static str {
        match self {
            Self::Binary => "on_state",
            Self::Text | Self::Numeric => "on_value",
        }
    }

    fn sensor_id(self, entity_id: &str, attribute: Option<&str>) -> String {
        let prefix = match (self, attribute) {
            (Self::Text, None) => "ha_state",
            (Self::Text, Some(_)) => "ha_txt",
            (Self::Numeric, _) => "ha_num",
            (Self::Binary, _) => "ha_bin",
        };
        match attribute {
            Some(attr) => format!("{prefix}_{}_{}", safe_id(entity_id), safe_id(attr)),
            None => format!("{prefix}_{}", safe_id(entity_id)),
        }
    }
}

struct Sensor<'a> {
    entity_id: &'a str,
    attribute: Option<&'a str>,
    /// Update actions, each a list item at indent 0.
    updates: Vec<Vec<String>>,
}

struct Renderer<'a> {
    model: &'a ProjectModel,
    registry: &'a SchemaRegistry,
    target: &'a CompileTarget,
    writes: BTreeMap<(&'a str, &'a str), Vec<&'a Binding>>,
    fonts: BTreeSet<(String, u32)>,
    images: BTreeSet<String>,
    issues: Vec<CompileIssue>,
}

/// Render a validated project. Returns `MissingAsset` issues on failure.
pub(crate) fn render(
    model: &ProjectModel,
    registry: &SchemaRegistry,
    recipe: Option<&HardwareRecipe>,
    target: &CompileTarget,
) -> Result<String, Vec<CompileIssue>> {
    let mut renderer = Renderer {
        model,
        registry,
        target,
        writes: BTreeMap::new(),
        fonts: BTreeSet::new(),
        images: BTreeSet::new(),
        issues: Vec::new(),
    };
    renderer.collect_writes();

    let pages = renderer.pages();
    let sensors = renderer.sensors();
    if !renderer.issues.is_empty() {
        return Err(renderer.issues);
    }

    let (esphome, rest) = merge_recipe(
        recipe.map(|r| r.text.as_str()),
        &target.slug,
        &pages,
        &sensors,
    );
    let has_top_level = |key: &str| {
        rest.lines()
            .any(|line| top_level_key(line).is_some_and(|k| k == key))
    };

    let mut sections = vec![esphome];
    if !has_top_level("wifi") {
        sections.push(DEFAULT_WIFI.to_string());
    }
    if !has_top_level("ota") {
        sections.push(DEFAULT_OTA.to_string());
    }
    sections.push(rest);
    sections.push(renderer.globals());
    sections.extend(renderer.colors());
    sections.extend(renderer.font_section());
    sections.extend(renderer.image_section());

    let device_id: String = target
        .device_id
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let mut out = format!(
        "---\n# Generated by touch-designer v{}\n# device_id: {device_id}\n# slug: {}\n\n",
        crate::VERSION,
        target.slug
    );
    out.push_str(&sections.join("\n\n"));
    out.push('\n');
    Ok(out)
}

impl<'a> Renderer<'a> {
    fn collect_writes(&mut self) {
        for binding in &self.model.bindings {
            let Some(found) = self.model.find_widget(&binding.widget_id) else {
                continue;
            };
            let is_event = self
                .registry
                .get(&found.widget.widget_type)
                .is_ok_and(|schema| schema.events.contains_key(&binding.property));
            if is_event {
                self.writes
                    .entry((binding.widget_id.as_str(), binding.property.as_str()))
                    .or_default()
                    .push(binding);
            }
        }
    }

    fn pages(&mut self) -> String {
        let mut em = Emitter::default();
        em.line(0, "pages:");
        for page in &self.model.pages {
            em.line(2, &format!("- id: {}", page.page_id));
            let mut children: HashMap<&str, Vec<&Widget>> = HashMap::new();
            for widget in &page.widgets {
                if let Some(parent) = widget.parent_id.as_deref() {
                    children.entry(parent).or_default().push(widget);
                }
            }
            let roots: Vec<&Widget> = page
                .widgets
                .iter()
                .filter(|w| w.parent_id.is_none())
                .collect();
            if roots.is_empty() {
                continue;
            }
            em.line(4, "widgets:");
            for widget in roots {
                self.widget(&mut em, 6, page, widget, &children);
            }
        }
        em.finish()
    }

    fn widget(
        &mut self,
        em: &mut Emitter,
        indent: usize,
        page: &Page,
        widget: &Widget,
        children: &HashMap<&str, Vec<&Widget>>,
    ) {
        let Ok(schema) = self.registry.get(&widget.widget_type) else {
            return;
        };
        let fi = indent + 4;
        em.line(indent, &format!("- {}:", schema.root_key()));
        em.line(fi, &format!("id: {}", widget.id));
        em.line(fi, &format!("x: {}", widget.x));
        em.line(fi, &format!("y: {}", widget.y));
        em.line(fi, &format!("width: {}", widget.w));
        em.line(fi, &format!("height: {}", widget.h));

        let pin_props: &[String] = schema
            .hardware
            .as_ref()
            .map_or(&[], |hw| hw.pin_props.as_slice());
        for section in [FieldSection::Props, FieldSection::Style] {
            let Some(fields) = schema.fields(section) else {
                continue;
            };
            let values = section_values(widget, section);
            for (key, def) in fields {
                if section == FieldSection::Props && pin_props.contains(key) {
                    continue;
                }
                let value = match values.get(key) {
                    Some(v) if !v.is_null() => v,
                    _ => match (&def.default, def.emit_default) {
                        (Some(default), true) => default,
                        _ => continue,
                    },
                };
                let rendered = self.scalar(page, widget, key, &def.kind, value);
                let yaml_key = def.yaml_key.as_deref().unwrap_or(key);
                em.line(fi, &format!("{yaml_key}: {rendered}"));
            }
        }

        for (key, def) in &schema.events {
            let yaml_key = def.yaml_key.as_deref().unwrap_or(key);
            if let Some(bindings) = self.writes.get(&(widget.id.as_str(), key.as_str())) {
                em.line(fi, &format!("{yaml_key}:"));
                em.line(fi + 2, "then:");
                for binding in bindings {
                    em.lines(fi + 4, &write_action(binding));
                }
            } else if let Some(Value::String(snippet)) = widget.events.get(key) {
                if snippet.trim().is_empty() {
                    continue;
                }
                em.line(fi, &format!("{yaml_key}:"));
                for line in snippet.trim_end().lines() {
                    em.line(fi + 2, line.trim_end());
                }
            }
        }

        if let Some(kids) = children.get(widget.id.as_str()) {
            em.line(fi, "widgets:");
            for kid in kids {
                self.widget(em, fi + 2, page, kid, children);
            }
        }
    }

    fn scalar(
        &mut self,
        page: &Page,
        widget: &Widget,
        key: &str,
        kind: &FieldKind,
        value: &Value,
    ) -> String {
        match (kind, value) {
            (FieldKind::Color, Value::String(s)) => match parse_hex_color(s) {
                Some(rgb) => format!("0x{rgb:06X}"),
                None => format!("palette_{}", safe_id(s)),
            },
            (FieldKind::String, Value::String(s)) if s.starts_with(ASSET_PREFIX) => {
                self.asset(page, widget, key, s)
            }
            (_, Value::Bool(b)) => b.to_string(),
            (_, Value::Number(n)) => render_number(n),
            (_, other) => other.to_string(),
        }
    }

    /// Resolve `asset:<file>` (image) or `asset:<file>:<size>` (font).
    fn asset(&mut self, page: &Page, widget: &Widget, key: &str, reference: &str) -> String {
        let spec = &reference[ASSET_PREFIX.len()..];
        let (file, size) = match spec.rsplit_once(':') {
            Some((file, size)) => match size.trim().parse::<u32>() {
                Ok(size) if size > 0 => (file.trim(), Some(size)),
                _ => (spec.trim(), None),
            },
            None => (spec.trim(), None),
        };
        if !self.target.assets.contains(file) {
            self.issues.push(
                CompileIssue::new(
                    IssueKind::MissingAsset,
                    format!("asset '{file}' is not in the asset store"),
                )
                .on_page(&page.page_id)
                .on_widget(&widget.id)
                .on_property(key),
            );
            return Value::from(reference).to_string();
        }
        match size {
            Some(size) => {
                self.fonts.insert((file.to_string(), size));
                font_id(file, size)
            }
            None => {
                self.images.insert(file.to_string());
                image_id(file)
            }
        }
    }

    fn sensors(&mut self) -> String {
        let mut sensors: BTreeMap<(SensorPlatform, String), Sensor<'a>> = BTreeMap::new();
        let mut collisions = Vec::new();
        let mut add = |platform: SensorPlatform,
                       entity_id: &'a str,
                       attribute: Option<&'a str>,
                       update: Vec<String>| {
            let id = platform.sensor_id(entity_id, attribute);
            let sensor = sensors.entry((platform, id)).or_insert_with(|| Sensor {
                entity_id,
                attribute,
                updates: Vec::new(),
            });
            if sensor.entity_id != entity_id || sensor.attribute != attribute {
                collisions.push(CompileIssue::new(
                    IssueKind::InvalidBinding,
                    format!(
                        "'{}' and '{}' map to the same sensor id '{}'",
                        source_label(sensor.entity_id, sensor.attribute),
                        source_label(entity_id, attribute),
                        platform.sensor_id(entity_id, attribute)
                    ),
                ));
                return;
            }
            sensor.updates.push(gated(entity_id, &update));
        };

        for binding in &self.model.bindings {
            let Some(found) = self.model.find_widget(&binding.widget_id) else {
                continue;
            };
            let Ok(schema) = self.registry.get(&found.widget.widget_type) else {
                continue;
            };
            let Some(def) = schema.props.get(&binding.property) else {
                continue;
            };
            let platform = match def.kind {
                FieldKind::Number { .. } => SensorPlatform::Numeric,
                FieldKind::Boolean => SensorPlatform::Binary,
                FieldKind::String | FieldKind::Color | FieldKind::Enum { .. } => {
                    SensorPlatform::Text
                }
            };
            let yaml_key = def.yaml_key.as_deref().unwrap_or(&binding.property);
            let update = if yaml_key == "checked" {
                vec![
                    "- lvgl.widget.update:".to_string(),
                    format!("    id: {}", binding.widget_id),
                    "    state:".to_string(),
                    "      checked: !lambda return x;".to_string(),
                ]
            } else {
                vec![
                    format!("- lvgl.{}.update:", schema.root_key()),
                    format!("    id: {}", binding.widget_id),
                    format!("    {yaml_key}: !lambda return x;"),
                ]
            };
            add(
                platform,
                binding.entity_id.as_str(),
                binding.attribute.as_deref(),
                update,
            );
        }

        for link in &self.model.links {
            let source = &link.source;
            let target = &link.target;
            let attribute = source.attribute.as_deref();
            let numeric_target = matches!(target.action, LinkAction::SliderValue | LinkAction::ArcValue);
            let (platform, attribute) = match source.kind {
                LinkSourceKind::State if numeric_target => (SensorPlatform::Numeric, None),
                LinkSourceKind::State => (SensorPlatform::Text, None),
                LinkSourceKind::Binary => (SensorPlatform::Binary, None),
                LinkSourceKind::AttributeNumber => (SensorPlatform::Numeric, attribute),
                LinkSourceKind::AttributeText => (SensorPlatform::Text, attribute),
            };
            let x = match target.scale {
                Some(scale) if (scale - 1.0).abs() > f64::EPSILON => format!("x * {scale:?}"),
                _ => "x".to_string(),
            };
            let id = format!("    id: {}", target.widget_id);
            let update = match target.action {
                LinkAction::WidgetChecked => vec![
                    "- lvgl.widget.update:".to_string(),
                    id,
                    "    state:".to_string(),
                    "      checked: !lambda return x;".to_string(),
                ],
                LinkAction::ObjHidden => vec![
                    "- lvgl.widget.update:".to_string(),
                    id,
                    "    hidden: !lambda return !x;".to_string(),
                ],
                LinkAction::SliderValue | LinkAction::ArcValue => {
                    let root = if target.action == LinkAction::SliderValue {
                        "slider"
                    } else {
                        "arc"
                    };
                    vec![
                        format!("- lvgl.{root}.update:"),
                        id,
                        format!("    value: !lambda return {x};"),
                    ]
                }
                LinkAction::LabelText => {
                    let text = match source.kind {
                        LinkSourceKind::State | LinkSourceKind::AttributeText => {
                            vec!["    text: !lambda return x;".to_string()]
                        }
                        LinkSourceKind::Binary => {
                            vec![r#"    text: !lambda 'return x ? "on" : "off";'"#.to_string()]
                        }
                        LinkSourceKind::AttributeNumber => vec![
                            "    text:".to_string(),
                            format!(
                                "      format: {}",
                                Value::from(target.format.as_deref().unwrap_or("%.0f"))
                            ),
                            format!("      args: [ '{x}' ]"),
                        ],
                    };
                    let mut lines = vec!["- lvgl.label.update:".to_string(), id];
                    lines.extend(text);
                    lines
                }
            };
            add(platform, source.entity_id.as_str(), attribute, update);
        }

        self.issues.extend(collisions);

        let mut em = Emitter::default();
        let mut current = None;
        for ((platform, id), sensor) in &sensors {
            if current != Some(*platform) {
                if current.is_some() {
                    em.line(0, "");
                }
                em.line(0, &format!("{}:", platform.section()));
                current = Some(*platform);
            }
            em.line(2, "- platform: homeassistant");
            em.line(4, &format!("id: {id}"));
            em.line(4, &format!("entity_id: {}", Value::from(sensor.entity_id)));
            if let Some(attribute) = sensor.attribute {
                em.line(4, &format!("attribute: {}", Value::from(attribute)));
            }
            if *platform == SensorPlatform::Binary {
                em.line(4, "publish_initial_state: true");
            }
            em.line(4, &format!("{}:", platform.trigger()));
            em.line(6, "then:");
            for update in &sensor.updates {
                em.lines(8, update);
            }
        }
        em.finish()
    }

    fn globals(&self) -> String {
        let entities: BTreeSet<String> = self
            .model
            .bindings
            .iter()
            .map(|b| b.entity_id.as_str())
            .chain(self.model.links.iter().map(|l| l.source.entity_id.as_str()))
            .map(entity_slug)
            .collect();
        let mut em = Emitter::default();
        em.line(0, "globals:");
        let ids = std::iter::once("etd_ui_lock_until".to_string())
            .chain(entities.iter().map(|slug| format!("etd_lock_{slug}")));
        for id in ids {
            em.line(2, &format!("- id: {id}"));
            em.line(4, "type: uint32_t");
            em.line(4, "restore_value: no");
            em.line(4, "initial_value: '0'");
        }
        em.finish()
    }

    fn colors(&self) -> Option<String> {
        let entries: Vec<(&String, u32)> = self
            .model
            .palette
            .iter()
            .filter_map(|(name, color)| parse_hex_color(color).map(|rgb| (name, rgb)))
            .collect();
        if entries.is_empty() {
            return None;
        }
        let mut em = Emitter::default();
        em.line(0, "color:");
        for (name, rgb) in entries {
            em.line(2, &format!("- id: palette_{}", safe_id(name)));
            em.line(4, &format!("hex: \"{rgb:06X}\""));
        }
        Some(em.finish())
    }

    fn font_section(&self) -> Option<String> {
        if self.fonts.is_empty() {
            return None;
        }
        let mut em = Emitter::default();
        em.line(0, "font:");
        for (file, size) in &self.fonts {
            em.line(2, &format!("- file: {}", Value::from(self.target.assets.file_path(file))));
            em.line(4, &format!("id: {}", font_id(file, *size)));
            em.line(4, &format!("size: {size}"));
        }
        Some(em.finish())
    }

    fn image_section(&self) -> Option<String> {
        if self.images.is_empty() {
            return None;
        }
        let mut em = Emitter::default();
        em.line(0, "image:");
        for file in &self.images {
            em.line(2, &format!("- file: {}", Value::from(self.target.assets.file_path(file))));
            em.line(4, &format!("id: {}", image_id(file)));
            em.line(4, "type: RGB565");
        }
        Some(em.finish())
    }
}

fn source_label(entity_id: &str, attribute: Option<&str>) -> String {
    match attribute {
        Some(attr) => format!("{entity_id}[{attr}]"),
        None => entity_id.to_string(),
    }
}

fn font_id(file: &str, size: u32) -> String {
    format!("font_{}_{size}", safe_id(file))
}

fn image_id(file: &str) -> String {
    format!("asset_{}", safe_id(file))
}

fn render_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Lock-gated wrapper around an entity-to-UI update.
fn gated(entity_id: &str, update: &[String]) -> Vec<String> {
    let slug = entity_slug(entity_id);
    let mut lines = vec![
        "- if:".to_string(),
        "    condition:".to_string(),
        format!(
            "      lambda: return (millis() > id(etd_ui_lock_until)) && (millis() > id(etd_lock_{slug}));"
        ),
        "    then:".to_string(),
    ];
    lines.extend(update.iter().map(|line| format!("      {line}")));
    lines
}

/// Actions of a write binding: set the UI locks, then call the service.
fn write_action(binding: &Binding) -> Vec<String> {
    let slug = entity_slug(&binding.entity_id);
    let mut lines = vec![
        format!("- lambda: id(etd_ui_lock_until) = millis() + {UI_LOCK_MS};"),
        format!("- lambda: id(etd_lock_{slug}) = millis() + {UI_LOCK_MS};"),
        "- homeassistant.action:".to_string(),
        format!("    action: {}", service_call(binding)),
        "    data:".to_string(),
        format!("      entity_id: {}", Value::from(binding.entity_id.as_str())),
    ];
    for (key, value) in &binding.data {
        let rendered = match value {
            Value::String(s) if s.starts_with("!lambda") => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("      {key}: {rendered}"));
    }
    lines
}

/// Top-level mapping key of a line, if the line starts one.
fn top_level_key(line: &str) -> Option<&str> {
    if line.starts_with([' ', '\t', '#', '-']) || line.trim().is_empty() {
        return None;
    }
    let (key, _) = line.split_once(':')?;
    Some(key.trim())
}

fn leading_ws(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Split the recipe into the rewritten `esphome:` block and the remaining
/// body with pages and sensors injected.
fn merge_recipe(
    recipe: Option<&str>,
    slug: &str,
    pages: &str,
    sensors: &str,
) -> (String, String) {
    let name_line = |indent: &str| format!("{indent}name: {}", Value::from(slug));
    let text = recipe.unwrap_or_default().trim_start_matches('\u{feff}');
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !matches!(line.trim_end(), "---" | "..."))
        .collect();

    let block_start = lines
        .iter()
        .position(|line| top_level_key(line) == Some("esphome"));
    let (esphome, body): (String, Vec<&str>) = match block_start {
        None => (format!("esphome:\n{}", name_line("  ")), lines),
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| !line.trim().is_empty() && !line.starts_with([' ', '\t']))
                .map_or(lines.len(), |offset| start + 1 + offset);
            let children: Vec<&str> = lines[start + 1..end].to_vec();
            let indent = children
                .iter()
                .find(|line| !line.trim().is_empty())
                .map_or("  ", |line| leading_ws(line));
            let mut block = vec!["esphome:".to_string(), name_line(indent)];
            block.extend(
                children
                    .iter()
                    .filter(|line| {
                        !(leading_ws(line) == indent && line.trim_start().starts_with("name:"))
                    })
                    .map(|line| line.trim_end().to_string()),
            );
            let mut body = lines[..start].to_vec();
            body.extend_from_slice(&lines[end..]);
            (block.join("\n").trim_end().to_string(), body)
        }
    };

    let mut out: Vec<String> = Vec::new();
    let push = |out: &mut Vec<String>, line: String| {
        if line.is_empty() && out.last().map_or(true, String::is_empty) {
            return;
        }
        out.push(line);
    };
    let indented = |block: &str, indent: &str| -> Vec<String> {
        block
            .lines()
            .map(|l| {
                if l.is_empty() {
                    String::new()
                } else {
                    format!("{indent}{l}")
                }
            })
            .collect()
    };

    let mut pages_done = false;
    let mut sensors_done = false;
    for line in &body {
        let trimmed = line.trim();
        if trimmed == PAGES_MARKER && !pages_done {
            for l in indented(pages, leading_ws(line)) {
                push(&mut out, l);
            }
            pages_done = true;
        } else if trimmed == BINDINGS_MARKER && !sensors_done {
            for l in indented(sensors, leading_ws(line)) {
                push(&mut out, l);
            }
            sensors_done = true;
        } else if trimmed != PAGES_MARKER && trimmed != BINDINGS_MARKER {
            push(&mut out, line.trim_end().to_string());
        }
    }

    if !pages_done {
        match out.iter().position(|line| top_level_key(line) == Some("lvgl")) {
            Some(at) => {
                let indent = out[at + 1..]
                    .iter()
                    .find(|line| !line.trim().is_empty())
                    .map(|line| leading_ws(line).to_string())
                    .filter(|ws| !ws.is_empty())
                    .unwrap_or_else(|| "  ".to_string());
                let block = indented(pages, &indent);
                out.splice(at + 1..at + 1, block);
            }
            None => {
                push(&mut out, String::new());
                push(&mut out, "lvgl:".to_string());
                for l in indented(pages, "  ") {
                    push(&mut out, l);
                }
            }
        }
    }
    if !sensors_done && !sensors.is_empty() {
        push(&mut out, String::new());
        for l in indented(sensors, "") {
            push(&mut out, l);
        }
    }

    let body = out.join("\n").trim().to_string();
    (esphome, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_id_and_slug() {
        assert_eq!(safe_id("Roboto-Bold.ttf"), "Roboto_Bold_ttf");
        assert_eq!(entity_slug("light.Kitchen__Main"), "light_kitchen_main");
        assert_eq!(entity_slug("..."), "entity");
    }

    #[test]
    fn test_render_number() {
        let n = |v: Value| match v {
            Value::Number(n) => render_number(&n),
            _ => String::new(),
        };
        assert_eq!(n(serde_json::json!(5)), "5");
        assert_eq!(n(serde_json::json!(50.0)), "50");
        assert_eq!(n(serde_json::json!(2.5)), "2.5");
        assert_eq!(n(serde_json::json!(-3)), "-3");
    }

    #[test]
    fn test_top_level_key() {
        assert_eq!(top_level_key("esphome:"), Some("esphome"));
        assert_eq!(top_level_key("wifi: {}"), Some("wifi"));
        assert_eq!(top_level_key("  name: x"), None);
        assert_eq!(top_level_key("#__HA_BINDINGS__"), None);
    }

    #[test]
    fn test_merge_replaces_name_and_markers() {
        let recipe = "esphome:\n  name: old\n  min_version: 2025.5.0\n\nlvgl:\n  displays:\n    - d\n  #__LVGL_PAGES__\n\n#__HA_BINDINGS__\n";
        let (esphome, body) = merge_recipe(Some(recipe), "kitchen", "pages:\n  - id: main", "sensor:\n  - platform: homeassistant");
        assert_eq!(esphome, "esphome:\n  name: \"kitchen\"\n  min_version: 2025.5.0");
        assert_eq!(
            body,
            "lvgl:\n  displays:\n    - d\n  pages:\n    - id: main\n\nsensor:\n  - platform: homeassistant"
        );
    }

    #[test]
    fn test_merge_without_markers() {
        let recipe = "esp32:\n  board: x\nlvgl:\n  displays:\n    - d\n";
        let (esphome, body) = merge_recipe(Some(recipe), "dev", "pages:\n  - id: main", "");
        assert_eq!(esphome, "esphome:\n  name: \"dev\"");
        assert_eq!(
            body,
            "esp32:\n  board: x\nlvgl:\n  pages:\n    - id: main\n  displays:\n    - d"
        );
    }

    #[test]
    fn test_merge_without_recipe() {
        let (_, body) = merge_recipe(None, "dev", "pages:\n  - id: main", "");
        assert_eq!(body, "lvgl:\n  pages:\n    - id: main");
    }

    #[test]
    fn test_write_action_lines() {
        let mut binding = Binding {
            widget_id: "b1".into(),
            property: "on_press".into(),
            entity_id: "light.kitchen".into(),
            attribute: None,
            service: Some("turn_on".into()),
            data: BTreeMap::new(),
        };
        binding
            .data
            .insert("brightness".into(), Value::from("!lambda return x;"));
        binding.data.insert("transition".into(), Value::from(2));
        let lines = write_action(&binding);
        assert_eq!(lines[3], "    action: light.turn_on");
        assert_eq!(lines[5], "      entity_id: \"light.kitchen\"");
        assert_eq!(lines[6], "      brightness: !lambda return x;");
        assert_eq!(lines[7], "      transition: 2");
    }
}
