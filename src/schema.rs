//! Tool parameter schemas.
//!
//! Tools describe their arguments with a tagged schema type instead of free-form
//! JSON. The consuming model API is strict about two things: every `array`
//! property must carry an `items` schema, and `default` fields are rejected.
//! Both rules are enforced once, when a definition enters the system —
//! `normalize` repairs raw JSON from external sources (ad hoc tool submissions,
//! catalog sources) before it is parsed into the typed form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::Role;

/// Errors from schema validation and parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("parameters must declare a top-level object type")]
    NotAnObject,

    #[error("invalid parameter schema: {0}")]
    Invalid(String),
}

/// Schema for a single tool parameter.
///
/// The `type` tag is mandatory; an array always carries an `items` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamSchema {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(
            default,
            rename = "enum",
            skip_serializing_if = "Option::is_none"
        )]
        enum_values: Option<Vec<String>>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        items: Box<ParamSchema>,
    },
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        properties: BTreeMap<String, ParamSchema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
}

impl ParamSchema {
    /// Shorthand for a plain string schema.
    pub fn string(description: impl Into<String>) -> Self {
        ParamSchema::String {
            description: Some(description.into()),
            enum_values: None,
        }
    }

    /// Shorthand for a string schema restricted to fixed values.
    pub fn string_enum(description: impl Into<String>, values: &[&str]) -> Self {
        ParamSchema::String {
            description: Some(description.into()),
            enum_values: Some(values.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Shorthand for a number schema.
    pub fn number(description: impl Into<String>) -> Self {
        ParamSchema::Number {
            description: Some(description.into()),
        }
    }

    /// Shorthand for a boolean schema.
    pub fn boolean(description: impl Into<String>) -> Self {
        ParamSchema::Boolean {
            description: Some(description.into()),
        }
    }
}

/// The serialized `type` tag of a top-level parameters object.
///
/// Deserializing anything other than `"object"` fails, which makes the
/// "top level must be an object" rule structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ObjectTag {
    #[serde(rename = "object")]
    Object,
}

impl Default for ObjectTag {
    fn default() -> Self {
        ObjectTag::Object
    }
}

/// Top-level parameters schema for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    tag: ObjectTag,
    #[serde(default)]
    pub properties: BTreeMap<String, ParamSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Default for ObjectSchema {
    fn default() -> Self {
        Self {
            tag: ObjectTag::Object,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ObjectSchema {
    /// Build a schema from properties and required names.
    pub fn new(properties: BTreeMap<String, ParamSchema>, required: Vec<String>) -> Self {
        Self {
            tag: ObjectTag::Object,
            properties,
            required,
        }
    }

    /// Parse raw JSON into a typed schema, normalizing it first.
    ///
    /// # Errors
    /// `SchemaError::NotAnObject` when the top level is missing or not an
    /// object type; `SchemaError::Invalid` when a property has no usable type.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let top_type = value.get("type").and_then(|t| t.as_str());
        if top_type != Some("object") {
            return Err(SchemaError::NotAnObject);
        }
        let mut normalized = value.clone();
        normalize(&mut normalized);
        serde_json::from_value(normalized).map_err(|e| SchemaError::Invalid(e.to_string()))
    }

    /// Serialize for the model API / wire format.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}

/// Repair a raw JSON schema in place so the model API will accept it:
/// backfill missing `items` on array properties (string by default) and
/// strip `default` fields at every level.
pub fn normalize(value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.remove("default");

        if obj.get("type").and_then(|t| t.as_str()) == Some("array") {
            match obj.get_mut("items") {
                Some(items) => {
                    // An items object without a type is as unusable as none.
                    if items.get("type").is_none() {
                        *items = serde_json::json!({ "type": "string" });
                    } else {
                        normalize(items);
                    }
                }
                None => {
                    obj.insert(
                        "items".to_string(),
                        serde_json::json!({ "type": "string" }),
                    );
                }
            }
        }

        if let Some(props) = obj.get_mut("properties").and_then(|p| p.as_object_mut()) {
            for (_name, prop) in props.iter_mut() {
                normalize(prop);
            }
        }
    }
}

fn default_allowed_agents() -> Vec<Role> {
    vec![Role::Executor]
}

/// A registered tool: name, model-facing description, typed parameter schema,
/// and the roles permitted to invoke it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
    #[serde(default = "default_allowed_agents")]
    pub allowed_agents: Vec<Role>,
}

impl ToolDefinition {
    /// Create a definition granted to the executor role only.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ObjectSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            allowed_agents: default_allowed_agents(),
        }
    }

    /// Override the roles permitted to invoke this tool.
    pub fn for_roles(mut self, roles: Vec<Role>) -> Self {
        self.allowed_agents = roles;
        self
    }

    /// Parse a raw JSON definition (e.g. an ad hoc tool from the submit API).
    ///
    /// Missing `allowed_agents` defaults to executor; the parameter schema is
    /// normalized and validated on the way in.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SchemaError::Invalid("missing tool name".to_string()))?;
        let description = value
            .get("description")
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| SchemaError::Invalid("missing tool description".to_string()))?;
        let parameters = value
            .get("parameters")
            .ok_or(SchemaError::NotAnObject)
            .and_then(ObjectSchema::from_value)?;

        let allowed_agents = match value.get("allowedAgents").or_else(|| value.get("allowed_agents"))
        {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| SchemaError::Invalid(format!("allowedAgents: {}", e)))?,
            None => default_allowed_agents(),
        };

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            allowed_agents,
        })
    }
}
