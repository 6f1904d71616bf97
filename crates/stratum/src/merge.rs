//! deep merge of configuration trees
//!
//! Layers are merged in order, the last layer has the highest precedence.
//!
//! | existing \ incoming | object          | array            | scalar / tag |
//! |---------------------|-----------------|------------------|--------------|
//! | object              | merge keys      | conflict*        | conflict*    |
//! | array               | conflict*       | list strategy    | conflict*    |
//! | scalar / tag        | conflict*       | conflict*        | replace      |
//!
//! `*` unless either side is null, `[]` or `{}` (or a tag, which is a scalar of unknown
//! type until it is evaluated); then the incoming value replaces the existing one.
use crate::error::{Error, Result};
use crate::provenance::Trace;
use crate::util::{child_path, index_path};
use crate::value::Value;
use indexmap::IndexMap;

/// How two arrays at the same key are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMergeStrategy {
    /// the last non-empty array wins
    #[default]
    Replace,
    /// concatenate in merge order
    Append,
    /// merge objects by position, union anything else
    Merge,
}

impl std::str::FromStr for ListMergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "replace" => Ok(ListMergeStrategy::Replace),
            "append" => Ok(ListMergeStrategy::Append),
            "merge" => Ok(ListMergeStrategy::Merge),
            other => Err(format!(
                "invalid list merge strategy '{other}', valid strategies are: replace, append, merge"
            )),
        }
    }
}

impl std::fmt::Display for ListMergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListMergeStrategy::Replace => f.write_str("replace"),
            ListMergeStrategy::Append => f.write_str("append"),
            ListMergeStrategy::Merge => f.write_str("merge"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOptions {
    pub list_merge_strategy: ListMergeStrategy,
    /// strategy for arrays below a given key, the nearest ancestor key wins
    pub section_strategies: IndexMap<String, ListMergeStrategy>,
}

impl MergeOptions {
    pub fn new(list_merge_strategy: ListMergeStrategy) -> Self {
        Self {
            list_merge_strategy,
            section_strategies: Default::default(),
        }
    }
}

/// Merge layers without recording provenance
pub fn merge<'a>(
    layers: impl IntoIterator<Item = &'a Value>,
    options: &MergeOptions,
) -> Result<Value> {
    let mut merger = Merger {
        options,
        trace: None,
    };

    let mut result = Value::object();
    for layer in layers {
        merger.merge_value(&mut result, layer, "", options.list_merge_strategy, "")?;
    }
    Ok(result)
}

/// Merge labeled layers and record which labels set each key
pub fn merge_traced<'a>(
    layers: impl IntoIterator<Item = (&'a str, &'a Value)>,
    options: &MergeOptions,
) -> Result<(Value, Trace)> {
    let mut trace = Trace::default();
    let mut merger = Merger {
        options,
        trace: Some(&mut trace),
    };

    let mut result = Value::object();
    for (label, layer) in layers {
        tracing::trace!(label, "merging layer");
        merger.merge_value(&mut result, layer, "", options.list_merge_strategy, label)?;
    }
    Ok((result, trace))
}

struct Merger<'o, 't> {
    options: &'o MergeOptions,
    trace: Option<&'t mut Trace>,
}

impl Merger<'_, '_> {
    fn merge_value(
        &mut self,
        existing: &mut Value,
        incoming: &Value,
        path: &str,
        strategy: ListMergeStrategy,
        label: &str,
    ) -> Result<()> {
        match (&mut *existing, incoming) {
            (Value::Object(existing), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    let path = child_path(path, key);
                    let strategy = self
                        .options
                        .section_strategies
                        .get(key)
                        .copied()
                        .unwrap_or(strategy);

                    match existing.get_mut(key) {
                        Some(current) => {
                            self.merge_value(current, value, &path, strategy, label)?
                        }
                        None => {
                            existing.insert(key.clone(), value.clone());
                            self.record_all(&path, value, label);
                        }
                    }
                }
                Ok(())
            }
            (Value::Array(existing), Value::Array(incoming)) => {
                self.merge_arrays(existing, incoming, path, strategy, label)
            }
            (current, incoming) => {
                let replaceable = matches!(current, Value::Tag(_))
                    || matches!(incoming, Value::Tag(_))
                    || (current.is_scalar() && incoming.is_scalar())
                    || current.is_empty()
                    || incoming.is_empty();

                if !replaceable {
                    return Err(Error::MergeTypeConflict {
                        path: path.to_string(),
                        existing: current.kind(),
                        incoming: incoming.kind(),
                        origin: Some(label.to_string()),
                    });
                }

                *current = incoming.clone();
                self.replace_trace(path, incoming, label);
                Ok(())
            }
        }
    }

    fn merge_arrays(
        &mut self,
        existing: &mut Vec<Value>,
        incoming: &[Value],
        path: &str,
        strategy: ListMergeStrategy,
        label: &str,
    ) -> Result<()> {
        match strategy {
            ListMergeStrategy::Replace => {
                if incoming.is_empty() {
                    return Ok(());
                }
                *existing = incoming.to_vec();
                self.replace_trace(path, &Value::Array(incoming.to_vec()), label);
            }
            ListMergeStrategy::Append => {
                existing.extend(incoming.iter().cloned());
                self.record(path, label);
            }
            ListMergeStrategy::Merge => {
                let all_objects =
                    |values: &[Value]| values.iter().all(|v| matches!(v, Value::Object(_)));

                if all_objects(existing.as_slice()) && all_objects(incoming) {
                    for (index, value) in incoming.iter().enumerate() {
                        match existing.get_mut(index) {
                            Some(current) => self.merge_value(
                                current,
                                value,
                                &index_path(path, index),
                                strategy,
                                label,
                            )?,
                            None => {
                                existing.push(value.clone());
                                self.record_all(&index_path(path, index), value, label);
                            }
                        }
                    }
                } else {
                    for value in incoming {
                        if !existing.contains(value) {
                            existing.push(value.clone());
                        }
                    }
                }
                self.record(path, label);
            }
        }

        Ok(())
    }

    fn record(&mut self, path: &str, label: &str) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.record(path, label);
        }
    }

    /// Record every leaf of a value that was inserted as a whole
    fn record_all(&mut self, path: &str, value: &Value, label: &str) {
        match value {
            Value::Object(object) if !object.is_empty() => {
                for (key, value) in object {
                    self.record_all(&child_path(path, key), value, label);
                }
            }
            _ => self.record(path, label),
        }
    }

    fn replace_trace(&mut self, path: &str, value: &Value, label: &str) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.clear_below(path);
            if matches!(value, Value::Object(object) if !object.is_empty()) {
                trace.remove(path);
            }
        }
        self.record_all(path, value, label);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config_document;
    use pretty_assertions::assert_eq;

    fn tree(source: &str) -> Value {
        config_document!(source).tree
    }

    fn merged(layers: &[&str], strategy: ListMergeStrategy) -> Value {
        let trees: Vec<Value> = layers.iter().map(|source| tree(source)).collect();
        merge(&trees, &MergeOptions::new(strategy)).unwrap()
    }

    #[test]
    fn later_layers_win() {
        let result = merged(
            &["vars: {a: 1, b: {c: 1, d: 1}}", "vars: {b: {c: 2}}"],
            ListMergeStrategy::Replace,
        );
        assert_eq!(result, tree("vars: {a: 1, b: {c: 2, d: 1}}"));
    }

    #[test]
    fn list_strategies() {
        let layers = ["list: [1, 2]", "list: [2, 3]", "list: []"];

        assert_eq!(
            merged(&layers, ListMergeStrategy::Replace),
            tree("list: [2, 3]")
        );
        assert_eq!(
            merged(&layers, ListMergeStrategy::Append),
            tree("list: [1, 2, 2, 3]")
        );
        assert_eq!(
            merged(&layers, ListMergeStrategy::Merge),
            tree("list: [1, 2, 3]")
        );
    }

    #[test]
    fn merge_strategy_merges_objects_by_position() {
        let result = merged(
            &[
                "list: [{name: a, size: 1}, {name: b}]",
                "list: [{size: 2}]",
            ],
            ListMergeStrategy::Merge,
        );
        assert_eq!(result, tree("list: [{name: a, size: 2}, {name: b}]"));
    }

    #[test]
    fn section_strategy_applies_below_its_key() {
        let mut options = MergeOptions::new(ListMergeStrategy::Replace);
        options
            .section_strategies
            .insert("settings".into(), ListMergeStrategy::Append);

        let layers = [
            tree("vars: {l: [1]}\nsettings: {nested: {l: [1]}}"),
            tree("vars: {l: [2]}\nsettings: {nested: {l: [2]}}"),
        ];
        let result = merge(&layers, &options).unwrap();

        assert_eq!(
            result,
            tree("vars: {l: [2]}\nsettings: {nested: {l: [1, 2]}}")
        );
    }

    #[test]
    fn scalar_over_mapping_is_a_conflict() {
        let layers = [tree("vars: {tags: {a: 1}}"), tree("vars: {tags: oops}")];
        let error = merge_traced(
            [("base.yaml", &layers[0]), ("dev.yaml", &layers[1])],
            &MergeOptions::default(),
        )
        .unwrap_err();

        assert_eq!(
            error.to_string(),
            "cannot merge string into object at 'vars.tags' (from dev.yaml)"
        );
    }

    #[test]
    fn empty_and_null_replace_without_conflict() {
        assert_eq!(
            merged(&["a: {x: 1}", "a: null"], ListMergeStrategy::Replace),
            tree("a: null")
        );
        assert_eq!(
            merged(&["a: ~", "a: [1]"], ListMergeStrategy::Replace),
            tree("a: [1]")
        );
        assert_eq!(
            merged(&["a: scalar", "a: {}"], ListMergeStrategy::Replace),
            tree("a: {}")
        );
    }

    #[test]
    fn tags_replace_anything() {
        assert_eq!(
            merged(&["a: {x: 1}", "a: !env HOME"], ListMergeStrategy::Replace),
            tree("a: !env HOME")
        );
        assert_eq!(
            merged(&["a: !env HOME", "a: [1]"], ListMergeStrategy::Replace),
            tree("a: [1]")
        );
    }

    #[test]
    fn merging_is_deterministic() {
        let layers = ["a: {b: [1, {c: 2}]}", "a: {b: [3], d: x}"];
        assert_eq!(
            merged(&layers, ListMergeStrategy::Merge),
            merged(&layers, ListMergeStrategy::Merge)
        );
    }

    #[test]
    fn trace_lists_contributors_in_order() {
        let layers = [
            tree("vars: {x: 1, y: 1}"),
            tree("vars: {x: 2}"),
            tree("vars: {x: {nested: true}}"),
        ];
        let (_, trace) = merge_traced(
            [("a", &layers[0]), ("b", &layers[1])],
            &MergeOptions::default(),
        )
        .unwrap();

        assert_eq!(
            trace.get("vars.x"),
            Some(["a".to_string(), "b".to_string()].as_slice())
        );
        assert_eq!(trace.get("vars.y"), Some(["a".to_string()].as_slice()));

        let conflict = merge_traced(
            [("a", &layers[0]), ("c", &layers[2])],
            &MergeOptions::default(),
        );
        assert!(matches!(conflict, Err(Error::MergeTypeConflict { .. })));
    }
}
