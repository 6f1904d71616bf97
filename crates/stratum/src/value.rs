//! value representation
//!
//! Every configuration tree handled by stratum is made of the following data types
//! - null
//! - boolean (true/false)
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving "map"/"dictionary", where the key is of type string)
//! - tag (a scalar carrying a custom tag such as `!env HOME`, evaluated late)
//!
//! Tags survive loading and merging untouched. They are replaced by their result
//! during evaluation, see [crate::tags].
use crate::document::LoadError;
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

pub type Map = indexmap::IndexMap<String, Value>;

/// All possible value types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Tag(TagValue),
}

/// A scalar node with a custom tag, e.g. `!terraform.output vpc vpc_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagValue {
    /// tag name without the leading `!`
    pub name: String,
    pub argument: String,
}

impl TagValue {
    pub fn new(name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argument: argument.into(),
        }
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.argument.is_empty() {
            write!(f, "!{}", self.name)
        } else {
            write!(f, "!{} {}", self.name, self.argument)
        }
    }
}

impl Value {
    pub fn object() -> Self {
        Value::Object(Map::new())
    }

    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Tag(_) => "tag",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Boolean(_)
                | Value::Integer(_)
                | Value::Decimal(_)
                | Value::String(_)
        )
    }

    /// `null`, `[]` and `{}` may be replaced by (or replace) anything during a merge
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Array(array) => array.is_empty(),
            Value::Object(object) => object.is_empty(),
            _ => false,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Lookup of a key in an object, `None` for anything else
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|object| object.get(key))
    }

    /// Walk a path of object keys
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(self, |current, key| current.get(key.as_ref()))
    }

    /// Returns a copy that only contains the requested keys (in the order they appear in `self`)
    pub fn select(&self, keys: &[&str]) -> Value {
        match self {
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .filter(|(key, _)| keys.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            _ => Value::object(),
        }
    }

    /// Returns a copy without the given keys
    pub fn without(&self, keys: &[&str]) -> Value {
        match self {
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .filter(|(key, _)| !keys.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<TagValue> for Value {
    fn from(value: TagValue) -> Self {
        Self::Tag(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<hcl::Number> for Value {
    fn from(value: hcl::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        value.as_f64().map(Value::Decimal).unwrap_or(Value::Null)
    }
}

impl From<hcl::Value> for Value {
    fn from(value: hcl::Value) -> Value {
        match value {
            hcl::Value::Null => Value::Null,
            hcl::Value::Bool(b) => b.into(),
            hcl::Value::Number(n) => n.into(),
            hcl::Value::String(s) => s.into(),
            hcl::Value::Array(a) => a.into(),
            hcl::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => b.into(),
            Json::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                None => n.as_f64().map(Value::Decimal).unwrap_or(Value::Null),
            },
            Json::String(s) => s.into(),
            Json::Array(a) => a.into(),
            Json::Object(o) => Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl TryFrom<serde_yaml::Value> for Value {
    type Error = LoadError;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        use serde_yaml::Value as Yaml;

        Ok(match value {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => b.into(),
            Yaml::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                None => n.as_f64().map(Value::Decimal).unwrap_or(Value::Null),
            },
            Yaml::String(s) => s.into(),
            Yaml::Sequence(sequence) => Value::Array(
                sequence
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Yaml::Mapping(mapping) => {
                let mut object = Map::with_capacity(mapping.len());
                for (key, value) in mapping {
                    object.insert(yaml_key(key)?, Value::try_from(value)?);
                }
                Value::Object(object)
            }
            Yaml::Tagged(tagged) => {
                let name = tagged.tag.to_string();
                let name = name.trim_start_matches('!').to_string();
                let argument = match tagged.value {
                    Yaml::Null => String::new(),
                    Yaml::String(s) => s,
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Number(n) => n.to_string(),
                    _ => return Err(LoadError::NonScalarTag(name)),
                };
                Value::Tag(TagValue { name, argument })
            }
        })
    }
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, LoadError> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Null => Ok("null".to_string()),
        other => Err(LoadError::UnsupportedKey(format!("{other:?}"))),
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Tag(tag) => serializer.collect_str(tag),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(source: &str) -> Value {
        let parsed: serde_yaml::Value = serde_yaml::from_str(source).expect("valid yaml");
        Value::try_from(parsed).expect("convertible yaml")
    }

    #[test]
    fn yaml_tags_become_tag_values() {
        let value = yaml("vpc_id: !terraform.output vpc .vpc_id\nhome: !env HOME");

        assert_eq!(
            value.get("vpc_id"),
            Some(&Value::Tag(TagValue::new("terraform.output", "vpc .vpc_id")))
        );
        assert_eq!(
            value.get("home"),
            Some(&Value::Tag(TagValue::new("env", "HOME")))
        );
    }

    #[test]
    fn yaml_non_string_keys_are_stringified() {
        let value = yaml("1: one\ntrue: yes");
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["1".to_string(), "true".to_string()]);
    }

    #[test]
    fn yaml_tag_on_mapping_is_rejected() {
        let parsed: serde_yaml::Value = serde_yaml::from_str("a: !env {x: 1}").unwrap();
        assert!(matches!(
            Value::try_from(parsed),
            Err(LoadError::NonScalarTag(tag)) if tag == "env"
        ));
    }

    #[test]
    fn get_path_walks_objects() {
        let value = yaml("a:\n  b:\n    c: 3");
        assert_eq!(value.get_path(&["a", "b", "c"]), Some(&Value::Integer(3)));
        assert_eq!(value.get_path(&["a", "x"]), None);
    }

    #[test]
    fn tags_serialize_as_strings() {
        let value = Value::Tag(TagValue::new("env", "HOME"));
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"!env HOME\"");
    }
}
