//! Field-level input schemas and their compiled validators.
//!
//! A tool declares its arguments as a map of field name → [`FieldSchema`].
//! At registration time the map is compiled once into a [`CompiledSchema`]
//! (one `jsonschema` validator per field) which the tool owns for the rest
//! of the process. Validation collects every violated constraint instead of
//! stopping at the first one, so callers get a complete report.

use std::collections::BTreeMap;
use std::fmt;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Primitive kind of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }
}

/// Type plus constraints for one argument field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields are required unless marked optional.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Element schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
}

impl FieldSchema {
    pub fn new(kind: FieldKind) -> Self {
        FieldSchema {
            kind,
            description: None,
            optional: false,
            pattern: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            allowed: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn array(items: FieldSchema) -> Self {
        FieldSchema {
            items: Some(Box::new(items)),
            ..Self::new(FieldKind::Array)
        }
    }

    pub fn object() -> Self {
        Self::new(FieldKind::Object)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn length(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }

    /// Render as a JSON Schema fragment.
    pub fn to_json_schema(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), json!(self.kind.as_str()));
        if let Some(d) = &self.description {
            obj.insert("description".into(), json!(d));
        }
        if let Some(p) = &self.pattern {
            obj.insert("pattern".into(), json!(p));
        }
        let (min_key, max_key) = match self.kind {
            FieldKind::Array => ("minItems", "maxItems"),
            _ => ("minLength", "maxLength"),
        };
        if let Some(n) = self.min_length {
            obj.insert(min_key.into(), json!(n));
        }
        if let Some(n) = self.max_length {
            obj.insert(max_key.into(), json!(n));
        }
        if let Some(n) = self.minimum {
            obj.insert("minimum".into(), json!(n));
        }
        if let Some(n) = self.maximum {
            obj.insert("maximum".into(), json!(n));
        }
        if let Some(values) = &self.allowed {
            obj.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(items) = &self.items {
            obj.insert("items".into(), items.to_json_schema());
        }
        Value::Object(obj)
    }
}

/// What to do with argument keys the schema does not declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFields {
    /// Drop them before the handler sees the arguments.
    #[default]
    Strip,
    /// Pass them through untouched.
    Allow,
    /// Treat them as a violation.
    Reject,
}

/// Declared argument shape of a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSchema>,
    #[serde(default)]
    pub unknown_fields: UnknownFields,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    pub fn unknown_fields(mut self, policy: UnknownFields) -> Self {
        self.unknown_fields = policy;
        self
    }

    /// Render as the JSON Schema object advertised in `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, f)| (name.clone(), f.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, f)| !f.optional)
            .map(|(name, _)| name.as_str())
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        if self.unknown_fields == UnknownFields::Reject {
            schema["additionalProperties"] = json!(false);
        }
        schema
    }
}

/// A schema that could not be compiled (e.g. an invalid regex pattern).
#[derive(Debug, thiserror::Error)]
#[error("field \"{field}\": {message}")]
pub struct SchemaError {
    pub field: String,
    pub message: String,
}

/// Every constraint a set of arguments violated.
#[derive(Debug, Clone, PartialEq)]
pub struct Violations(pub Vec<String>);

impl Violations {
    pub fn messages(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

struct CompiledField {
    name: String,
    required: bool,
    validator: Validator,
}

/// An [`InputSchema`] compiled once and reused for every invocation.
pub struct CompiledSchema {
    fields: Vec<CompiledField>,
    unknown_fields: UnknownFields,
    json_schema: Value,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("fields", &self.fields.iter().map(|c| &c.name).collect::<Vec<_>>())
            .field("unknown_fields", &self.unknown_fields)
            .finish()
    }
}

impl CompiledSchema {
    pub fn compile(schema: &InputSchema) -> Result<Self, SchemaError> {
        let mut fields = Vec::with_capacity(schema.fields.len());
        for (name, field) in &schema.fields {
            let validator =
                jsonschema::validator_for(&field.to_json_schema()).map_err(|e| SchemaError {
                    field: name.clone(),
                    message: e.to_string(),
                })?;
            fields.push(CompiledField {
                name: name.clone(),
                required: !field.optional,
                validator,
            });
        }

        Ok(CompiledSchema {
            fields,
            unknown_fields: schema.unknown_fields,
            json_schema: schema.to_json_schema(),
        })
    }

    /// The advertised JSON Schema form.
    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Validate raw arguments. On success returns the arguments the handler
    /// should see (unknown keys stripped according to policy).
    pub fn validate(&self, args: &Value) -> Result<Value, Violations> {
        let empty = Map::new();
        let obj = match args {
            Value::Object(obj) => obj,
            Value::Null => &empty,
            other => {
                return Err(Violations(vec![format!(
                    "arguments must be an object, got {}",
                    json_type_name(other)
                )]));
            }
        };

        let mut violations = Vec::new();
        for field in &self.fields {
            match obj.get(&field.name) {
                None if field.required => {
                    violations.push(format!("{}: required field is missing", field.name));
                }
                None => {}
                Some(value) => {
                    violations.extend(
                        field
                            .validator
                            .iter_errors(value)
                            .map(|e| format!("{}: {}", field.name, e)),
                    );
                }
            }
        }

        let mut out = Map::new();
        for (key, value) in obj {
            let declared = self.fields.iter().any(|f| &f.name == key);
            match (declared, self.unknown_fields) {
                (true, _) | (false, UnknownFields::Allow) => {
                    out.insert(key.clone(), value.clone());
                }
                (false, UnknownFields::Strip) => {}
                (false, UnknownFields::Reject) => {
                    violations.push(format!("unexpected field \"{}\"", key));
                }
            }
        }

        if violations.is_empty() {
            Ok(Value::Object(out))
        } else {
            Err(Violations(violations))
        }
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
