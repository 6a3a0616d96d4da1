//! Typed, validated device controls and the per-device registry.
//!
//! A control is a named parameter a device exposes on its control channel:
//! a brightness number, a test-mode toggle, a palette enum. Each variant
//! validates (and where sensible coerces) raw JSON values against its
//! declared type and bounds, so a control's stored value is always
//! consistent with its declaration.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::types::ErrorCode;

fn default_group() -> String {
    "general".to_string()
}

fn default_step() -> f64 {
    1.0
}

fn default_color() -> String {
    "#000000".to_string()
}

fn is_default_group(group: &str) -> bool {
    group == "general"
}

/// Boolean toggle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BooleanControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    #[serde(default)]
    pub value: bool,
}

/// Numeric control with optional range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumberControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

/// Free-form string with optional length and pattern constraints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StringControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    #[serde(default)]
    pub value: String,
    #[serde(
        default,
        rename = "minLength",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_length: Option<usize>,
    #[serde(
        default,
        rename = "maxLength",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// One selectable option of an [`EnumControl`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumOption {
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl EnumOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            description: String::new(),
        }
    }
}

/// Selection from a fixed option set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    pub value: String,
    pub options: Vec<EnumOption>,
}

/// RGB (`#RRGGBB`) or RGBA (`#RRGGBBAA`) color, stored uppercase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    #[serde(default = "default_color")]
    pub value: String,
    #[serde(default)]
    pub alpha: bool,
}

/// Stateless trigger (a button). Carries no persistent value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    #[serde(default)]
    pub confirm: bool,
}

/// Item type specification for [`ArrayControl`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrayItemType {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Homogeneous array of values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrayControl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_group", skip_serializing_if = "is_default_group")]
    pub group: String,
    #[serde(default)]
    pub value: Vec<Value>,
    pub items: ArrayItemType,
    #[serde(default, rename = "minItems", skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, rename = "maxItems", skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

/// Any device control, discriminated by a `type` tag on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Control {
    Boolean(BooleanControl),
    Number(NumberControl),
    String(StringControl),
    Enum(EnumControl),
    Color(ColorControl),
    Action(ActionControl),
    Array(ArrayControl),
}

fn invalid(id: &str, message: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::new(ErrorCode::InvalidValue, format!("control '{id}': {message}"))
}

/// Loose truthiness for booleans and action triggers: accepts JSON bools,
/// nonzero numbers, and the usual on/off string spellings.
fn coerce_bool(id: &str, raw: &Value) -> Result<bool, ProtocolError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(invalid(id, format!("cannot convert '{other}' to boolean"))),
        },
        other => Err(invalid(
            id,
            format!("cannot convert {} to boolean", type_of(other)),
        )),
    }
}

fn coerce_number(id: &str, raw: &Value) -> Result<f64, ProtocolError> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(id, "number out of range")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(id, format!("cannot convert '{s}' to number"))),
        other => Err(invalid(
            id,
            format!("cannot convert {} to number", type_of(other)),
        )),
    }
}

fn coerce_string(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl Control {
    pub fn id(&self) -> &str {
        match self {
            Control::Boolean(c) => &c.id,
            Control::Number(c) => &c.id,
            Control::String(c) => &c.id,
            Control::Enum(c) => &c.id,
            Control::Color(c) => &c.id,
            Control::Action(c) => &c.id,
            Control::Array(c) => &c.id,
        }
    }

    pub fn readonly(&self) -> bool {
        match self {
            Control::Boolean(c) => c.readonly,
            Control::Number(c) => c.readonly,
            Control::String(c) => c.readonly,
            Control::Enum(c) => c.readonly,
            Control::Color(c) => c.readonly,
            Control::Action(c) => c.readonly,
            Control::Array(c) => c.readonly,
        }
    }

    pub fn group(&self) -> &str {
        match self {
            Control::Boolean(c) => &c.group,
            Control::Number(c) => &c.group,
            Control::String(c) => &c.group,
            Control::Enum(c) => &c.group,
            Control::Color(c) => &c.group,
            Control::Action(c) => &c.group,
            Control::Array(c) => &c.group,
        }
    }

    /// The control's current value. Actions have none and report `null`.
    pub fn value(&self) -> Value {
        match self {
            Control::Boolean(c) => Value::Bool(c.value),
            Control::Number(c) => serde_json::json!(c.value),
            Control::String(c) => Value::String(c.value.clone()),
            Control::Enum(c) => Value::String(c.value.clone()),
            Control::Color(c) => Value::String(c.value.clone()),
            Control::Action(_) => Value::Null,
            Control::Array(c) => Value::Array(c.value.clone()),
        }
    }

    /// Validate and coerce `raw` against this control's type and bounds.
    ///
    /// Returns the value that would be stored. Does not mutate the control;
    /// see [`Control::apply`].
    pub fn validate(&self, raw: &Value) -> Result<Value, ProtocolError> {
        match self {
            Control::Boolean(c) => coerce_bool(&c.id, raw).map(Value::Bool),
            Control::Number(c) => {
                let num = coerce_number(&c.id, raw)?;
                if let Some(min) = c.min {
                    if num < min {
                        return Err(invalid(&c.id, format!("value {num} is below minimum {min}")));
                    }
                }
                if let Some(max) = c.max {
                    if num > max {
                        return Err(invalid(&c.id, format!("value {num} exceeds maximum {max}")));
                    }
                }
                Ok(serde_json::json!(num))
            }
            Control::String(c) => {
                let s = coerce_string(raw);
                // Bounds are in characters, not bytes.
                let length = s.chars().count();
                if let Some(min) = c.min_length {
                    if length < min {
                        return Err(invalid(
                            &c.id,
                            format!("string length {length} is below minimum {min}"),
                        ));
                    }
                }
                if let Some(max) = c.max_length {
                    if length > max {
                        return Err(invalid(
                            &c.id,
                            format!("string length {length} exceeds maximum {max}"),
                        ));
                    }
                }
                if let Some(pattern) = &c.pattern {
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| invalid(&c.id, format!("bad pattern: {e}")))?;
                    if !re.is_match(&s) {
                        return Err(invalid(
                            &c.id,
                            format!("string does not match pattern '{pattern}'"),
                        ));
                    }
                }
                Ok(Value::String(s))
            }
            Control::Enum(c) => {
                let s = coerce_string(raw);
                if c.options.iter().any(|opt| opt.value == s) {
                    Ok(Value::String(s))
                } else {
                    Err(invalid(&c.id, format!("value '{s}' not in allowed options")))
                }
            }
            Control::Color(c) => {
                let s = coerce_string(raw).to_ascii_uppercase();
                let Some(hex) = s.strip_prefix('#') else {
                    return Err(invalid(&c.id, format!("invalid color format: {s}")));
                };
                if !is_hex(hex) {
                    return Err(invalid(&c.id, format!("invalid color format: {s}")));
                }
                match (c.alpha, hex.len()) {
                    (false, 6) => Ok(Value::String(s)),
                    (true, 8) => Ok(Value::String(s)),
                    // A 6-hex value on an alpha control coerces to 8-hex.
                    (true, 6) => Ok(Value::String(format!("{s}FF"))),
                    (false, _) => Err(invalid(&c.id, format!("invalid RGB color format: {s}"))),
                    (true, _) => Err(invalid(&c.id, format!("invalid RGBA color format: {s}"))),
                }
            }
            Control::Action(c) => coerce_bool(&c.id, raw)
                .or_else(|_| Ok(!raw.is_null()))
                .map(Value::Bool),
            Control::Array(c) => {
                let Value::Array(items) = raw else {
                    return Err(invalid(&c.id, format!("expected array, got {}", type_of(raw))));
                };
                if let Some(min) = c.min_items {
                    if items.len() < min {
                        return Err(invalid(
                            &c.id,
                            format!("array length {} is below minimum {min}", items.len()),
                        ));
                    }
                }
                if let Some(max) = c.max_items {
                    if items.len() > max {
                        return Err(invalid(
                            &c.id,
                            format!("array length {} exceeds maximum {max}", items.len()),
                        ));
                    }
                }
                let mut validated = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match c.items.item_type.as_str() {
                        "number" => {
                            let num = coerce_number(&c.id, item)
                                .map_err(|e| invalid(&c.id, format!("item {i}: {}", e.message)))?;
                            if let Some(min) = c.items.min {
                                if num < min {
                                    return Err(invalid(
                                        &c.id,
                                        format!("item {i} value {num} below minimum {min}"),
                                    ));
                                }
                            }
                            if let Some(max) = c.items.max {
                                if num > max {
                                    return Err(invalid(
                                        &c.id,
                                        format!("item {i} value {num} exceeds maximum {max}"),
                                    ));
                                }
                            }
                            validated.push(serde_json::json!(num));
                        }
                        "string" => validated.push(Value::String(coerce_string(item))),
                        "boolean" => {
                            let b = coerce_bool(&c.id, item)
                                .map_err(|e| invalid(&c.id, format!("item {i}: {}", e.message)))?;
                            validated.push(Value::Bool(b));
                        }
                        _ => validated.push(item.clone()),
                    }
                }
                Ok(Value::Array(validated))
            }
        }
    }

    /// Store a value previously produced by [`Control::validate`].
    /// A no-op for actions.
    pub fn apply(&mut self, validated: &Value) {
        match self {
            Control::Boolean(c) => {
                if let Value::Bool(b) = validated {
                    c.value = *b;
                }
            }
            Control::Number(c) => {
                if let Some(n) = validated.as_f64() {
                    c.value = n;
                }
            }
            Control::String(c) => {
                if let Value::String(s) = validated {
                    c.value = s.clone();
                }
            }
            Control::Enum(c) => {
                if let Value::String(s) = validated {
                    c.value = s.clone();
                }
            }
            Control::Color(c) => {
                if let Value::String(s) = validated {
                    c.value = s.clone();
                }
            }
            Control::Action(_) => {}
            Control::Array(c) => {
                if let Value::Array(items) = validated {
                    c.value = items.clone();
                }
            }
        }
    }
}

/// `true` if `id` is a valid control identifier:
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_control_id(id: &str) -> bool {
    let mut bytes = id.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

type ChangeObserver = Box<dyn Fn(&str, &Value, &Value) + Send + Sync>;

/// Registry of controls for one device.
///
/// Insertion order is preserved so capability responses list controls the
/// way the device declared them. Mutation is expected to happen from a
/// single task; devices wrap the registry in a lock.
#[derive(Default)]
pub struct ControlRegistry {
    controls: IndexMap<String, Control>,
    observers: HashMap<String, Vec<ChangeObserver>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a control. A duplicate id overwrites the previous control.
    /// Fails with `INVALID_VALUE` if the id is not a valid identifier.
    pub fn register(&mut self, control: Control) -> Result<(), ProtocolError> {
        if !is_valid_control_id(control.id()) {
            return Err(ProtocolError::new(
                ErrorCode::InvalidValue,
                format!("invalid control id: '{}'", control.id()),
            ));
        }
        self.controls.insert(control.id().to_string(), control);
        Ok(())
    }

    pub fn unregister(&mut self, control_id: &str) {
        self.controls.shift_remove(control_id);
        self.observers.remove(control_id);
    }

    pub fn get(&self, control_id: &str) -> Option<&Control> {
        self.controls.get(control_id)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Current value of one control. Fails `NOT_FOUND` if missing.
    pub fn get_value(&self, control_id: &str) -> Result<Value, ProtocolError> {
        self.controls
            .get(control_id)
            .map(Control::value)
            .ok_or_else(|| {
                ProtocolError::new(
                    ErrorCode::NotFound,
                    format!("unknown control: {control_id}"),
                )
            })
    }

    /// Values for the requested ids, or every control when `ids` is `None`.
    /// Unknown ids are silently skipped.
    pub fn get_values(&self, ids: Option<&[String]>) -> Map<String, Value> {
        let mut values = Map::new();
        match ids {
            Some(ids) => {
                for id in ids {
                    if let Some(control) = self.controls.get(id) {
                        values.insert(id.clone(), control.value());
                    }
                }
            }
            None => {
                for (id, control) in &self.controls {
                    values.insert(id.clone(), control.value());
                }
            }
        }
        values
    }

    /// Validate and store one value, notifying observers on success.
    /// Returns the validated/coerced value.
    pub fn set_value(&mut self, control_id: &str, raw: &Value) -> Result<Value, ProtocolError> {
        let control = self.controls.get_mut(control_id).ok_or_else(|| {
            ProtocolError::new(
                ErrorCode::NotFound,
                format!("unknown control: {control_id}"),
            )
        })?;

        if control.readonly() {
            return Err(ProtocolError::new(
                ErrorCode::Readonly,
                format!("control '{control_id}' is read-only"),
            ));
        }

        let old_value = control.value();
        let validated = control.validate(raw)?;
        control.apply(&validated);

        if let Some(observers) = self.observers.get(control_id) {
            for observer in observers {
                observer(control_id, &old_value, &validated);
            }
        }

        Ok(validated)
    }

    /// Best-effort multi-set. Returns the applied values and, keyed by
    /// control id, `{code, message}` objects for each failure.
    pub fn set_values(&mut self, values: &Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
        let mut applied = Map::new();
        let mut errors = Map::new();

        for (id, raw) in values {
            match self.set_value(id, raw) {
                Ok(validated) => {
                    applied.insert(id.clone(), validated);
                }
                Err(err) => {
                    errors.insert(
                        id.clone(),
                        serde_json::json!({
                            "code": u8::from(err.code),
                            "message": err.message,
                        }),
                    );
                }
            }
        }

        (applied, errors)
    }

    /// Register a `(id, old, new)` observer invoked after every successful
    /// set on `control_id`.
    pub fn on_change<F>(&mut self, control_id: &str, observer: F)
    where
        F: Fn(&str, &Value, &Value) + Send + Sync + 'static,
    {
        self.observers
            .entry(control_id.to_string())
            .or_default()
            .push(Box::new(observer));
    }

    /// Export every control definition for a capability response.
    pub fn to_list(&self) -> Vec<Value> {
        self.controls
            .values()
            .map(|c| serde_json::to_value(c).expect("control serialization is infallible"))
            .collect()
    }

    pub fn controls(&self) -> impl Iterator<Item = &Control> {
        self.controls.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn brightness() -> Control {
        Control::Number(NumberControl {
            id: "brightness".into(),
            name: "Brightness".into(),
            description: "Output brightness".into(),
            readonly: false,
            group: "output".into(),
            value: 0.0,
            min: Some(0.0),
            max: Some(10.0),
            step: 1.0,
            unit: String::new(),
        })
    }

    #[test]
    fn number_bounds_and_coercion() {
        let mut registry = ControlRegistry::new();
        registry.register(brightness()).unwrap();

        assert_eq!(
            registry.set_value("brightness", &serde_json::json!(5)).unwrap(),
            serde_json::json!(5.0)
        );
        let low = registry.set_value("brightness", &serde_json::json!(-1)).unwrap_err();
        assert_eq!(low.code, ErrorCode::InvalidValue);
        let high = registry.set_value("brightness", &serde_json::json!(11)).unwrap_err();
        assert_eq!(high.code, ErrorCode::InvalidValue);
        assert_eq!(
            registry.set_value("brightness", &serde_json::json!("5")).unwrap(),
            serde_json::json!(5.0)
        );
        let bad = registry.set_value("brightness", &serde_json::json!("abc")).unwrap_err();
        assert_eq!(bad.code, ErrorCode::InvalidValue);
    }

    #[test]
    fn boolean_coercions() {
        let control = Control::Boolean(BooleanControl {
            id: "power".into(),
            name: "Power".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: false,
        });

        for truthy in ["true", "1", "yes", "on", "YES", "On"] {
            assert_eq!(
                control.validate(&serde_json::json!(truthy)).unwrap(),
                Value::Bool(true),
                "{truthy}"
            );
        }
        for falsy in ["false", "0", "no", "off"] {
            assert_eq!(
                control.validate(&serde_json::json!(falsy)).unwrap(),
                Value::Bool(false)
            );
        }
        assert_eq!(control.validate(&serde_json::json!(1)).unwrap(), Value::Bool(true));
        assert_eq!(control.validate(&serde_json::json!(0)).unwrap(), Value::Bool(false));
        assert!(control.validate(&serde_json::json!("maybe")).is_err());
        assert!(control.validate(&serde_json::json!([1])).is_err());
    }

    #[test]
    fn color_normalization() {
        let control = Control::Color(ColorControl {
            id: "tint".into(),
            name: "Tint".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: default_color(),
            alpha: true,
        });

        assert_eq!(
            control.validate(&serde_json::json!("#abcdef")).unwrap(),
            Value::String("#ABCDEFFF".into())
        );
        assert_eq!(
            control.validate(&serde_json::json!("#a1b2c3d4")).unwrap(),
            Value::String("#A1B2C3D4".into())
        );
        assert!(control.validate(&serde_json::json!("#abc")).is_err());
        assert!(control.validate(&serde_json::json!("abcdef")).is_err());
        assert!(control.validate(&serde_json::json!("#GGGGGG")).is_err());

        let rgb_only = Control::Color(ColorControl {
            id: "tint".into(),
            name: "Tint".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: default_color(),
            alpha: false,
        });
        assert_eq!(
            rgb_only.validate(&serde_json::json!("#abcdef")).unwrap(),
            Value::String("#ABCDEF".into())
        );
        assert!(rgb_only.validate(&serde_json::json!("#ABCDEF00")).is_err());
    }

    #[test]
    fn enum_membership() {
        let control = Control::Enum(EnumControl {
            id: "pattern".into(),
            name: "Pattern".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: "gradient".into(),
            options: vec![
                EnumOption::new("gradient", "Gradient"),
                EnumOption::new("solid", "Solid"),
            ],
        });
        assert!(control.validate(&serde_json::json!("solid")).is_ok());
        assert!(control.validate(&serde_json::json!("plaid")).is_err());
    }

    #[test]
    fn string_length_and_pattern() {
        let control = Control::String(StringControl {
            id: "label".into(),
            name: "Label".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: String::new(),
            min_length: Some(2),
            max_length: Some(5),
            pattern: Some("^[a-z]+$".into()),
        });
        assert!(control.validate(&serde_json::json!("abc")).is_ok());
        assert!(control.validate(&serde_json::json!("a")).is_err());
        assert!(control.validate(&serde_json::json!("toolong")).is_err());
        assert!(control.validate(&serde_json::json!("ABC")).is_err());
    }

    #[test]
    fn string_length_counts_characters_not_bytes() {
        let control = Control::String(StringControl {
            id: "label".into(),
            name: "Label".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: String::new(),
            min_length: None,
            max_length: Some(5),
            pattern: None,
        });
        // Five characters, more than five bytes.
        assert!(control.validate(&serde_json::json!("caféé")).is_ok());
        assert!(control.validate(&serde_json::json!("cafééé")).is_err());
    }

    #[test]
    fn array_items_validated_with_bounds() {
        let control = Control::Array(ArrayControl {
            id: "levels".into(),
            name: "Levels".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            value: Vec::new(),
            items: ArrayItemType {
                item_type: "number".into(),
                min: Some(0.0),
                max: Some(1.0),
            },
            min_items: Some(1),
            max_items: Some(3),
        });
        assert_eq!(
            control.validate(&serde_json::json!([0.5, "1"])).unwrap(),
            serde_json::json!([0.5, 1.0])
        );
        assert!(control.validate(&serde_json::json!([])).is_err());
        assert!(control.validate(&serde_json::json!([0.1, 0.2, 0.3, 0.4])).is_err());
        assert!(control.validate(&serde_json::json!([2.0])).is_err());
        assert!(control.validate(&serde_json::json!("nope")).is_err());
    }

    #[test]
    fn readonly_rejected() {
        let mut registry = ControlRegistry::new();
        registry
            .register(Control::Number(NumberControl {
                id: "uptime".into(),
                name: "Uptime".into(),
                description: String::new(),
                readonly: true,
                group: default_group(),
                value: 0.0,
                min: None,
                max: None,
                step: 1.0,
                unit: "s".into(),
            }))
            .unwrap();
        let err = registry.set_value("uptime", &serde_json::json!(5)).unwrap_err();
        assert_eq!(err.code, ErrorCode::Readonly);
    }

    #[test]
    fn unknown_control_is_not_found() {
        let mut registry = ControlRegistry::new();
        assert_eq!(
            registry.get_value("ghost").unwrap_err().code,
            ErrorCode::NotFound
        );
        assert_eq!(
            registry.set_value("ghost", &Value::Null).unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    #[test]
    fn set_values_is_best_effort() {
        let mut registry = ControlRegistry::new();
        registry.register(brightness()).unwrap();

        let mut request = Map::new();
        request.insert("brightness".into(), serde_json::json!(7));
        request.insert("ghost".into(), serde_json::json!(1));
        let (applied, errors) = registry.set_values(&request);

        assert_eq!(applied["brightness"], serde_json::json!(7.0));
        assert_eq!(errors["ghost"]["code"], serde_json::json!(4));
        assert!(errors["ghost"]["message"].as_str().unwrap().contains("ghost"));
    }

    #[test]
    fn observers_see_old_and_new() {
        let mut registry = ControlRegistry::new();
        registry.register(brightness()).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        registry.on_change("brightness", move |id, old, new| {
            assert_eq!(id, "brightness");
            assert_eq!(old, &serde_json::json!(0.0));
            assert_eq!(new, &serde_json::json!(3.0));
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.set_value("brightness", &serde_json::json!(3)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Failed sets do not notify.
        let _ = registry.set_value("brightness", &serde_json::json!(99));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_register_overwrites() {
        let mut registry = ControlRegistry::new();
        registry.register(brightness()).unwrap();
        registry.register(brightness()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_id_rejected() {
        let mut registry = ControlRegistry::new();
        let mut control = brightness();
        if let Control::Number(c) = &mut control {
            c.id = "9lives".into();
        }
        assert!(registry.register(control).is_err());

        assert!(is_valid_control_id("brightness"));
        assert!(is_valid_control_id("_x2"));
        assert!(!is_valid_control_id(""));
        assert!(!is_valid_control_id("2fast"));
        assert!(!is_valid_control_id("has-dash"));
    }

    #[test]
    fn json_carries_type_discriminator() {
        let json = serde_json::to_value(&brightness()).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["min"], 0.0);
        let back: Control = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), "brightness");
        assert!(matches!(back, Control::Number(_)));
    }

    #[test]
    fn action_reports_null_value() {
        let control = Control::Action(ActionControl {
            id: "reset".into(),
            name: "Reset".into(),
            description: String::new(),
            readonly: false,
            group: default_group(),
            confirm: true,
        });
        assert_eq!(control.value(), Value::Null);
        assert_eq!(control.validate(&serde_json::json!(true)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn to_list_preserves_registration_order() {
        let mut registry = ControlRegistry::new();
        registry.register(brightness()).unwrap();
        registry
            .register(Control::Boolean(BooleanControl {
                id: "test_mode".into(),
                name: "Test Mode".into(),
                description: String::new(),
                readonly: false,
                group: default_group(),
                value: false,
            }))
            .unwrap();
        let list = registry.to_list();
        assert_eq!(list[0]["id"], "brightness");
        assert_eq!(list[1]["id"], "test_mode");
    }
}
