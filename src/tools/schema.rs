//! Input schemas: one `Schema<T>` capability with JSON-Schema and typed adapters.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// A value failed schema validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct SchemaError {
    /// JSON path of the offending value, `$` for the root.
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Validates JSON values into `T` and describes itself as JSON Schema.
pub trait Schema<T>: Send + Sync {
    fn validate(&self, value: &Value) -> Result<T, SchemaError>;

    fn to_json_schema(&self) -> Value;
}

/// A structural JSON Schema subset: `type`, `enum`, `const`, `required`,
/// `properties`, `additionalProperties: false`, `items`, `minItems`, `maxItems`.
/// Unknown keywords are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
    schema: Value,
}

impl JsonSchema {
    /// Create from a raw JSON Schema value.
    pub fn from_value(schema: Value) -> Self {
        Self { schema }
    }

    /// An object schema with no parameters.
    pub fn empty() -> Self {
        Self::object().build()
    }

    /// Builder: create an object schema with properties.
    pub fn object() -> ObjectSchemaBuilder {
        ObjectSchemaBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Check `value` without producing anything.
    pub fn check(&self, value: &Value) -> Result<(), SchemaError> {
        check_value(value, &self.schema, "$")
    }
}

impl Default for JsonSchema {
    fn default() -> Self {
        Self::empty()
    }
}

impl Schema<Value> for JsonSchema {
    fn validate(&self, value: &Value) -> Result<Value, SchemaError> {
        self.check(value)?;
        Ok(value.clone())
    }

    fn to_json_schema(&self) -> Value {
        self.schema.clone()
    }
}

/// A JSON Schema paired with a serde target type.
pub struct TypedSchema<T> {
    json: JsonSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new(schema: JsonSchema) -> Self {
        Self {
            json: schema,
            _marker: PhantomData,
        }
    }

    pub fn json_schema(&self) -> &JsonSchema {
        &self.json
    }
}

impl<T> Clone for TypedSchema<T> {
    fn clone(&self) -> Self {
        Self::new(self.json.clone())
    }
}

impl<T> std::fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedSchema")
            .field("schema", &self.json.schema)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> Schema<T> for TypedSchema<T> {
    fn validate(&self, value: &Value) -> Result<T, SchemaError> {
        self.json.check(value)?;
        serde_json::from_value(value.clone()).map_err(|e| SchemaError::at("$", e.to_string()))
    }

    fn to_json_schema(&self) -> Value {
        self.json.schema.clone()
    }
}

/// Builder for object schemas.
#[derive(Debug)]
pub struct ObjectSchemaBuilder {
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl ObjectSchemaBuilder {
    fn property(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    /// Add a string property.
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({ "type": "string", "description": description.into() });
        self.property(name, schema, required)
    }

    /// Add a number property.
    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({ "type": "number", "description": description.into() });
        self.property(name, schema, required)
    }

    pub fn integer(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({ "type": "integer", "description": description.into() });
        self.property(name, schema, required)
    }

    /// Add a boolean property.
    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({ "type": "boolean", "description": description.into() });
        self.property(name, schema, required)
    }

    /// Add an enum (string) property.
    pub fn string_enum(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({
            "type": "string",
            "description": description.into(),
            "enum": values,
        });
        self.property(name, schema, required)
    }

    /// Add an array property whose items follow `items`.
    pub fn array(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        items: Value,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({
            "type": "array",
            "description": description.into(),
            "items": items,
        });
        self.property(name, schema, required)
    }

    /// Add a property with an arbitrary sub-schema.
    pub fn schema(self, name: impl Into<String>, schema: JsonSchema, required: bool) -> Self {
        self.property(name, schema.schema, required)
    }

    pub fn build(self) -> JsonSchema {
        JsonSchema {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

fn check_value(value: &Value, schema: &Value, path: &str) -> Result<(), SchemaError> {
    match schema.get("type") {
        Some(Value::String(expected)) if !value_matches_type(value, expected) => {
            return Err(SchemaError::at(
                path,
                format!("expected type '{}', got {}", expected, json_type_name(value)),
            ));
        }
        Some(Value::Array(options)) => {
            let matches = options
                .iter()
                .filter_map(Value::as_str)
                .any(|expected| value_matches_type(value, expected));
            if !matches {
                return Err(SchemaError::at(
                    path,
                    format!("expected one of {}, got {}", Value::Array(options.clone()), json_type_name(value)),
                ));
            }
        }
        _ => {}
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(SchemaError::at(path, format!("{value} is not one of {}", Value::Array(allowed.clone()))));
        }
    }
    if let Some(constant) = schema.get("const") {
        if constant != value {
            return Err(SchemaError::at(path, format!("expected constant {constant}")));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(SchemaError::at(path, format!("missing required field '{name}'")));
                }
            }
        }
        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        for (key, field) in obj {
            match properties.and_then(|p| p.get(key)) {
                Some(field_schema) => check_value(field, field_schema, &format!("{path}.{key}"))?,
                None if closed => {
                    return Err(SchemaError::at(path, format!("unexpected field '{key}'")));
                }
                None => {}
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(SchemaError::at(path, format!("expected at least {min} items")));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if items.len() as u64 > max {
                return Err(SchemaError::at(path, format!("expected at most {max} items")));
            }
        }
        if let Some(item_schema) = schema.get("items").filter(|s| s.is_object()) {
            for (i, item) in items.iter().enumerate() {
                check_value(item, item_schema, &format!("{path}[{i}]"))?;
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
