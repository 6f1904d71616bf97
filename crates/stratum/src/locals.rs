//! per document `locals`
//!
//! Locals are private to the document declaring them. They may reference each other
//! (`{{ locals.a }}`), the document's own `vars`, `settings` and `env` and the context the
//! document was imported with. Locals are evaluated in dependency order, a local depending on
//! itself (directly or not) is an error naming the chain.
//!
//! Narrower scopes (component type section, component definition) see the locals of the
//! wider scope and may shadow them.
use crate::error::{Error, Result};
use crate::tags::TagEvaluator;
use crate::template::{Renderer, Scope};
use crate::util::root_name;
use crate::value::{Map, Value};
use crate::visit::Walk;
use std::path::{Path, PathBuf};

pub struct LocalsEvaluator<'a> {
    document: &'a Path,
    renderer: &'a Renderer,
    tags: &'a TagEvaluator<'a>,
}

impl<'a> LocalsEvaluator<'a> {
    pub fn new(document: &'a Path, renderer: &'a Renderer, tags: &'a TagEvaluator<'a>) -> Self {
        Self {
            document,
            renderer,
            tags,
        }
    }

    /// Evaluates `declared` on top of the already evaluated `parent` locals
    ///
    /// `context` holds the static sections (`vars`, `settings`, `env`) visible to the scope
    /// and the import context. The result contains `parent` and the newly declared locals.
    #[tracing::instrument(level = "trace", skip_all, fields(document = %self.document.display()))]
    pub fn evaluate(&self, declared: &Map, parent: &Map, context: &Map) -> Result<Map> {
        let mut done = Map::new();

        for key in declared.keys() {
            if done.contains_key(key) {
                continue;
            }

            let mut stack = vec![key.clone()];
            while let Some(current) = stack.last().cloned() {
                let value = &declared[&current];

                let pending = self
                    .dependencies(value, declared, &current)?
                    .into_iter()
                    .find(|dependency| {
                        declared.contains_key(dependency) && !done.contains_key(dependency)
                    });

                if let Some(dependency) = pending {
                    if let Some(position) = stack.iter().position(|key| key == &dependency) {
                        let mut chain = stack[position..].to_vec();
                        chain.push(dependency);
                        return Err(Error::LocalsCycle {
                            document: self.document.to_path_buf(),
                            chain,
                        });
                    }

                    stack.push(dependency);
                    continue;
                }

                let evaluated =
                    self.evaluate_local(&current, value.clone(), parent, &done, context)?;
                done.insert(current, evaluated);
                stack.pop();
            }
        }

        let mut locals = parent.clone();
        for key in declared.keys() {
            if let Some(value) = done.shift_remove(key) {
                locals.insert(key.clone(), value);
            }
        }
        Ok(locals)
    }

    fn evaluate_local(
        &self,
        key: &str,
        mut value: Value,
        parent: &Map,
        done: &Map,
        context: &Map,
    ) -> Result<Value> {
        tracing::trace!(local = key, "evaluating local");

        let mut visible = parent.clone();
        visible.extend(done.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut template_context = context.clone();
        template_context.insert("locals".to_string(), Value::Object(visible));

        let document = self.document.to_path_buf();
        let locate = move |_: &str| -> PathBuf { document.clone() };
        let scope = Scope {
            component: "",
            stack: "",
            locate: &locate,
        };

        self.renderer.evaluate_tree(
            &mut value,
            &format!("locals.{key}"),
            &template_context,
            self.tags,
            &scope,
        )?;
        Ok(value)
    }

    /// Locals read anywhere in `value`, reading the whole `locals` mapping reads every other
    /// declared local
    fn dependencies(&self, value: &Value, declared: &Map, current: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = vec![];
        let mut add = |key: &str| {
            if !keys.iter().any(|known| known == key) {
                keys.push(key.to_string());
            }
        };

        value.walk_text("", &mut |_: &str, text: &str| {
            for chain in self.renderer.references(text) {
                if chain == "locals" {
                    declared
                        .keys()
                        .filter(|key| key.as_str() != current)
                        .for_each(|key| add(key));
                } else if let Some(rest) = chain.strip_prefix("locals.") {
                    add(root_name(rest));
                }
            }
            Ok(())
        })?;
        Ok(keys)
    }
}
