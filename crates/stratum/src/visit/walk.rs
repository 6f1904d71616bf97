use super::{Visit, VisitMut};
use crate::error::Result;
use crate::util::{child_path, index_path};
use crate::value::{TagValue, Value};

/// Recursively walk a [Value] tree, depth-first in document order
///
/// Walks abort on the first error a visitor returns.
pub trait Walk {
    /// Visit every node that is not an array or object
    ///
    /// Visitors may replace the node, the replacement is not walked.
    fn walk_leaves_mut(&mut self, root: &str, visitor: &mut dyn VisitMut<Value>) -> Result<()>;

    /// Visit every string and tag argument
    fn walk_text(&self, root: &str, visitor: &mut dyn Visit<str>) -> Result<()>;

    /// Visit every tag
    fn walk_tags(&self, root: &str, visitor: &mut dyn Visit<TagValue>) -> Result<()>;
}

impl Walk for Value {
    fn walk_leaves_mut(&mut self, root: &str, visitor: &mut dyn VisitMut<Value>) -> Result<()> {
        match self {
            Value::Array(array) => {
                for (index, element) in array.iter_mut().enumerate() {
                    element.walk_leaves_mut(&index_path(root, index), visitor)?;
                }
                Ok(())
            }
            Value::Object(object) => {
                for (key, value) in object.iter_mut() {
                    value.walk_leaves_mut(&child_path(root, key), visitor)?;
                }
                Ok(())
            }
            leaf => visitor.visit_mut(root, leaf),
        }
    }

    fn walk_text(&self, root: &str, visitor: &mut dyn Visit<str>) -> Result<()> {
        match self {
            Value::String(string) => visitor.visit(root, string),
            Value::Tag(tag) => visitor.visit(root, &tag.argument),
            Value::Array(array) => {
                for (index, element) in array.iter().enumerate() {
                    element.walk_text(&index_path(root, index), visitor)?;
                }
                Ok(())
            }
            Value::Object(object) => {
                for (key, value) in object {
                    value.walk_text(&child_path(root, key), visitor)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn walk_tags(&self, root: &str, visitor: &mut dyn Visit<TagValue>) -> Result<()> {
        match self {
            Value::Tag(tag) => visitor.visit(root, tag),
            Value::Array(array) => {
                for (index, element) in array.iter().enumerate() {
                    element.walk_tags(&index_path(root, index), visitor)?;
                }
                Ok(())
            }
            Value::Object(object) => {
                for (key, value) in object {
                    value.walk_tags(&child_path(root, key), visitor)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
