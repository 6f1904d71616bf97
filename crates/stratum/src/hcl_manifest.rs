//! hcl stack manifests
//!
//! In hcl terms a file is a `body`, a list of `structures`:
//! - `attribute`: a "key = value" pair
//! - `block`: an identifier, 0 or more labels and a nested body
//!
//! A manifest maps onto the same tree a yaml manifest produces. Attributes become keys,
//! blocks become nested objects keyed by identifier and then by each label:
//!
//! ```hcl
//! import = ["catalog/vpc"]
//!
//! vars {
//!   stage = "dev"
//! }
//!
//! components "terraform" "vpc" {
//!   vars = { cidr = "10.0.0.0/16" }
//! }
//! ```
//!
//! Attributes are evaluated without variables or functions. Custom tags do not exist in hcl.
use crate::document::LoadError;
use crate::value::{Map, Value};
use hcl::eval::Evaluate;
use hcl_edit::structure::{Body, Structure};

pub fn parse(source: &str) -> Result<Value, LoadError> {
    let body = hcl_edit::parser::parse_body(source)?;
    body_to_object(&body).map(Value::Object)
}

#[tracing::instrument(level = "trace", skip_all)]
fn body_to_object(body: &Body) -> Result<Map, LoadError> {
    let context = hcl::eval::Context::new();
    let mut object = Map::new();

    for structure in body.iter() {
        match structure {
            Structure::Attribute(attribute) => {
                let expression: hcl::Expression = attribute.value.clone().into();
                let value: Value = expression
                    .evaluate(&context)
                    .map_err(hcl::eval::Errors::from)?
                    .into();
                object.insert(attribute.key.value().as_str().to_string(), value);
            }
            Structure::Block(block) => {
                let mut keys = vec![block.ident.value().as_str().to_string()];
                keys.extend(block.labels.iter().map(|label| label.as_str().to_string()));

                let content = body_to_object(&block.body)?;
                insert_nested(&mut object, &keys, content);
            }
        }
    }

    Ok(object)
}

/// Repeated blocks with the same identifier/labels merge into one object
fn insert_nested(object: &mut Map, keys: &[String], content: Map) {
    let Some((key, rest)) = keys.split_first() else {
        return;
    };

    let entry = object.entry(key.clone()).or_insert_with(Value::object);
    if !matches!(entry, Value::Object(_)) {
        *entry = Value::object();
    }
    let Value::Object(child) = entry else {
        return;
    };

    if rest.is_empty() {
        child.extend(content);
    } else {
        insert_nested(child, rest, content);
    }
}
