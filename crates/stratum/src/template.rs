//! template strings
//!
//! Strings containing `{{ ... }}` or `{% ... %}` are rendered with [minijinja] against a
//! context (stack, component, vars, settings, env, locals, ...). Undefined values are errors.
//! Every string is rendered once, output is never rendered again within a pass.
//!
//! Besides the minijinja builtins templates can use
//! - `getenv(name, default)`
//! - filters `fromjson`, `toyaml`, `trimprefix`, `trimsuffix`
//! - `atmos.Component(component, stack)`: the resolved configuration of another component,
//!   its `outputs` are read lazily through the [OutputReader](crate::collaborators::OutputReader)
//!
//! Component lookups go through [Resolution] which detects cycles. Errors raised inside a
//! lookup are kept aside and returned instead of minijinja's generic error. A failing
//! collaborator fails the string even when the template recovered with `default(...)`.
use crate::collaborators::OutputLookup;
use crate::component::ResolvedComponentConfig;
use crate::error::{Error, Result, Unavailable};
use crate::resolution::{ComponentKey, Resolution};
use crate::tags::TagEvaluator;
use crate::util::{has_template, root_name};
use crate::value::{Map, Value};
use crate::visit::Walk;
use minijinja::value::{from_args, Enumerator, Object, Value as TemplateValue};
use minijinja::{Environment, ErrorKind, State, UndefinedBehavior};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

type Failure = Arc<Mutex<Option<Error>>>;

/// Where rendering happens, used to build error messages
pub struct Scope<'a> {
    pub component: &'a str,
    pub stack: &'a str,
    /// document that defined the value at a key path
    pub locate: &'a dyn Fn(&str) -> PathBuf,
}

pub struct Renderer {
    env: Environment<'static>,
    failure: Failure,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    /// Renderer with helpers only, `atmos` is not available
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_function("getenv", getenv);
        env.add_filter("fromjson", fromjson);
        env.add_filter("toyaml", toyaml);
        env.add_filter("trimprefix", trimprefix);
        env.add_filter("trimsuffix", trimsuffix);

        Self {
            env,
            failure: Default::default(),
        }
    }

    /// Renderer for the templates of `consumer`, with component lookups
    pub fn with_lookups(resolution: Arc<Resolution>, consumer: ComponentKey) -> Self {
        let mut renderer = Self::new();
        let atmos = AtmosFunctions {
            resolution,
            consumer,
            failure: renderer.failure.clone(),
        };
        renderer
            .env
            .add_global("atmos", TemplateValue::from_object(atmos));
        renderer
    }

    fn render(
        &self,
        source: &str,
        context: &TemplateValue,
        path: &str,
        scope: &Scope,
    ) -> Result<String> {
        self.take_failure();

        match self.env.render_str(source, context) {
            Ok(rendered) => match self.take_failure() {
                // unavailable outputs may be replaced by `default(...)`, broken collaborators not
                Some(error @ Error::Collaborator { .. }) => Err(error),
                _ => Ok(rendered),
            },
            Err(source) => {
                if let Some(error) = self.take_failure() {
                    return Err(error);
                }

                Err(Error::TemplateEvaluation {
                    document: (scope.locate)(path),
                    path: path.to_string(),
                    component: scope.component.to_string(),
                    stack: scope.stack.to_string(),
                    source,
                })
            }
        }
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Names a template reads from its context, as access chains (`vars.stage`, `locals`)
    ///
    /// Names bound inside the template and globals of the environment are left out. An invalid
    /// template references nothing, rendering reports it later.
    pub fn references(&self, source: &str) -> BTreeSet<String> {
        let env = Environment::new();
        let Ok(template) = env.template_from_str(source) else {
            return BTreeSet::new();
        };

        template
            .undeclared_variables(true)
            .into_iter()
            .filter(|chain| {
                let root = root_name(chain);
                !self.env.globals().any(|(global, _)| global == root)
            })
            .collect()
    }

    /// Render a single string
    pub fn render_string(&self, source: &str, context: &Map, scope: &Scope) -> Result<String> {
        if !has_template(source) {
            return Ok(source.to_string());
        }
        self.render(source, &TemplateValue::from_serialize(context), "", scope)
    }

    /// Evaluate every template string and tag below `root`
    ///
    /// Tag arguments are rendered before the tag is evaluated (except for `!literal`).
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn evaluate_tree(
        &self,
        tree: &mut Value,
        root: &str,
        context: &Map,
        tags: &TagEvaluator,
        scope: &Scope,
    ) -> Result<()> {
        let context = TemplateValue::from_serialize(context);

        tree.walk_leaves_mut(root, &mut |path: &str, leaf: &mut Value| {
            match leaf {
                Value::String(source) if has_template(source) => {
                    *source = self.render(source, &context, path, scope)?;
                }
                Value::Tag(tag) => {
                    let mut tag = tag.clone();
                    if tag.name != "literal" && has_template(&tag.argument) {
                        tag.argument = self.render(&tag.argument, &context, path, scope)?;
                    }
                    *leaf = tags.evaluate(&tag, path)?;
                }
                _ => {}
            }
            Ok(())
        })
    }

    /// File level pass over the strings (and tag arguments) below `root`
    ///
    /// Strings referencing only names of `context` are rendered. Strings that read `locals` and
    /// names only known later get the locals bound in front of them, so they render the same
    /// wherever they end up. Everything else is left for the component pass.
    pub fn render_partial(
        &self,
        tree: &mut Value,
        root: &str,
        context: &Map,
        document: &Path,
    ) -> Result<()> {
        let template_context = TemplateValue::from_serialize(context);
        let locate = |_: &str| document.to_path_buf();
        let scope = Scope {
            component: "",
            stack: "",
            locate: &locate,
        };

        let prepare = |path: &str, source: &mut String| -> Result<()> {
            match self.partial(source, context) {
                Partial::Render => *source = self.render(source, &template_context, path, &scope)?,
                Partial::Bind(bound) => *source = bound,
                Partial::Keep => {}
            }
            Ok(())
        };

        tree.walk_leaves_mut(root, &mut |path: &str, leaf: &mut Value| {
            match leaf {
                Value::String(source) => prepare(path, source),
                Value::Tag(tag) if tag.name != "literal" => prepare(path, &mut tag.argument),
                _ => Ok(()),
            }
        })
    }

    fn partial(&self, source: &str, context: &Map) -> Partial {
        if !has_template(source) {
            return Partial::Keep;
        }

        let references = self.references(source);
        let roots: BTreeSet<&str> = references.iter().map(|chain| root_name(chain)).collect();
        if roots.is_empty() {
            return Partial::Keep;
        }
        if roots.iter().all(|root| context.contains_key(*root)) {
            return Partial::Render;
        }

        match context.get("locals") {
            Some(Value::Object(locals)) if roots.contains("locals") => {
                Partial::Bind(bind_locals(source, &references, locals))
            }
            _ => Partial::Keep,
        }
    }
}

enum Partial {
    Render,
    Bind(String),
    Keep,
}

/// `{% set locals = {...} %}` with the locals `source` reads, followed by `source`
fn bind_locals(source: &str, references: &BTreeSet<String>, locals: &Map) -> String {
    let whole = references.contains("locals");
    let read = |key: &str| {
        references.iter().any(|chain| {
            chain
                .strip_prefix("locals.")
                .is_some_and(|rest| root_name(rest) == key)
        })
    };

    let bound: Map = locals
        .iter()
        .filter(|(key, _)| whole || read(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut bound_source = String::from("{% set locals = ");
    write_literal(&Value::Object(bound), &mut bound_source);
    bound_source.push_str(" %}");
    bound_source.push_str(source);
    bound_source
}

/// `value` as a template expression
fn write_literal(value: &Value, out: &mut String) {
    let quoted = |text: &str| serde_json::Value::from(text).to_string();

    match value {
        Value::Null => out.push_str("none"),
        Value::Boolean(value) => out.push_str(if *value { "true" } else { "false" }),
        Value::Integer(value) => {
            let _ = write!(out, "{value}");
        }
        Value::Decimal(value) if value.is_finite() => {
            let _ = write!(out, "{value:?}");
        }
        Value::Decimal(_) => out.push_str("none"),
        Value::String(value) => out.push_str(&quoted(value)),
        Value::Tag(tag) => out.push_str(&quoted(&tag.to_string())),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_literal(item, out);
            }
            out.push(']');
        }
        Value::Object(object) => {
            out.push('{');
            for (index, (key, item)) in object.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quoted(key));
                out.push_str(": ");
                write_literal(item, out);
            }
            out.push('}');
        }
    }
}

fn getenv(name: String, default: Option<TemplateValue>) -> TemplateValue {
    match std::env::var(&name) {
        Ok(value) => TemplateValue::from(value),
        Err(_) => default.unwrap_or_else(|| TemplateValue::from(())),
    }
}

fn fromjson(value: String) -> std::result::Result<TemplateValue, minijinja::Error> {
    let json: serde_json::Value = serde_json::from_str(&value).map_err(|e| {
        minijinja::Error::new(ErrorKind::InvalidOperation, format!("invalid json: {e}"))
    })?;
    Ok(TemplateValue::from_serialize(&json))
}

fn toyaml(value: TemplateValue) -> std::result::Result<String, minijinja::Error> {
    serde_yaml::to_string(&value)
        .map(|yaml| yaml.trim_end().to_string())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn trimprefix(value: String, prefix: String) -> String {
    value
        .strip_prefix(prefix.as_str())
        .map(str::to_string)
        .unwrap_or(value.clone())
}

fn trimsuffix(value: String, suffix: String) -> String {
    value
        .strip_suffix(suffix.as_str())
        .map(str::to_string)
        .unwrap_or(value.clone())
}

/// Keeps `error` aside, a collaborator failure is never replaced
fn fail(failure: &Failure, error: Error) -> minijinja::Error {
    let message = error.to_string();
    let mut failure = failure.lock().unwrap_or_else(PoisonError::into_inner);
    if !matches!(*failure, Some(Error::Collaborator { .. })) {
        *failure = Some(error);
    }
    minijinja::Error::new(ErrorKind::InvalidOperation, message)
}

/// The `atmos` global
struct AtmosFunctions {
    resolution: Arc<Resolution>,
    consumer: ComponentKey,
    failure: Failure,
}

impl std::fmt::Debug for AtmosFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("atmos")
            .field("consumer", &self.consumer)
            .finish()
    }
}

impl Object for AtmosFunctions {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[TemplateValue],
    ) -> std::result::Result<TemplateValue, minijinja::Error> {
        if method != "Component" {
            return Err(minijinja::Error::new(
                ErrorKind::UnknownMethod,
                format!("atmos has no function named {method}"),
            ));
        }

        let (component, stack): (String, Option<String>) = from_args(args)?;
        let producer = ComponentKey::new(
            component,
            stack.unwrap_or_else(|| self.consumer.stack.clone()),
        );

        match self.resolution.lookup(&self.consumer, &producer) {
            Ok(resolved) => Ok(TemplateValue::from_object(ComponentView {
                resolved,
                outputs: TemplateValue::from_object(ComponentOutputs {
                    resolution: self.resolution.clone(),
                    producer,
                    failure: self.failure.clone(),
                }),
            })),
            Err(error) => Err(fail(&self.failure, error)),
        }
    }
}

/// Result of `atmos.Component(...)`
#[derive(Debug)]
struct ComponentView {
    resolved: Arc<ResolvedComponentConfig>,
    outputs: TemplateValue,
}

impl Object for ComponentView {
    fn get_value(self: &Arc<Self>, key: &TemplateValue) -> Option<TemplateValue> {
        let resolved = &self.resolved;
        Some(match key.as_str()? {
            "vars" => TemplateValue::from_serialize(&resolved.vars),
            "settings" => TemplateValue::from_serialize(&resolved.settings),
            "env" => TemplateValue::from_serialize(&resolved.env),
            "backend" => TemplateValue::from_serialize(&resolved.backend),
            "metadata" => TemplateValue::from_serialize(&resolved.metadata),
            "component" => TemplateValue::from(resolved.component.as_str()),
            "stack" => TemplateValue::from(resolved.stack.as_str()),
            "outputs" => self.outputs.clone(),
            _ => return None,
        })
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&[
            "vars", "settings", "env", "backend", "metadata", "component", "stack", "outputs",
        ])
    }
}

/// `outputs` of a looked up component, every key access reads from the collaborator
struct ComponentOutputs {
    resolution: Arc<Resolution>,
    producer: ComponentKey,
    failure: Failure,
}

impl std::fmt::Debug for ComponentOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("outputs")
            .field("producer", &self.producer)
            .finish()
    }
}

impl Object for ComponentOutputs {
    fn get_value(self: &Arc<Self>, key: &TemplateValue) -> Option<TemplateValue> {
        let key = key.as_str()?;

        let reason = match self.resolution.read_output(&self.producer, key) {
            Ok(OutputLookup::Found(value)) => return Some(TemplateValue::from_serialize(&value)),
            Ok(OutputLookup::NotProvisioned) => Unavailable::NotProvisioned,
            Ok(OutputLookup::KeyNotFound) => Unavailable::KeyNotFound,
            Err(error) => {
                fail(&self.failure, error);
                return None;
            }
        };

        fail(
            &self.failure,
            Error::OutputUnavailable {
                producer: self.producer.clone(),
                key: key.to_string(),
                reason,
            },
        );
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::config_document;
    use pretty_assertions::assert_eq;

    fn context(source: &str) -> Map {
        match config_document!(source).tree {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn evaluate(tree: &str, context_source: &str) -> Result<Value> {
        let mut tree = config_document!(tree).tree;
        let collaborators = Collaborators::default();
        let tags = TagEvaluator::new(&collaborators, Path::new("."));
        let locate = |_: &str| PathBuf::from("stack.yaml");
        let scope = Scope {
            component: "vpc",
            stack: "dev",
            locate: &locate,
        };

        Renderer::new().evaluate_tree(&mut tree, "", &context(context_source), &tags, &scope)?;
        Ok(tree)
    }

    #[test]
    fn strings_are_rendered_once() {
        let tree = evaluate(
            r#"
            name: "{{ vars.namespace }}-{{ stack }}"
            nested: "{{ vars.inner }}"
            plain: no template
            number: 3
            "#,
            "stack: dev\nvars: {namespace: acme, inner: '{{ stack }}'}",
        )
        .unwrap();

        assert_eq!(tree.get("name"), Some(&Value::from("acme-dev")));
        assert_eq!(tree.get("nested"), Some(&Value::from("{{ stack }}")));
        assert_eq!(tree.get("plain"), Some(&Value::from("no template")));
        assert_eq!(tree.get("number"), Some(&Value::Integer(3)));
    }

    #[test]
    fn undefined_values_are_errors() {
        let error = evaluate("a: {b: '{{ vars.missing }}'}", "vars: {}").unwrap_err();
        assert!(
            matches!(&error, Error::TemplateEvaluation { path, document, stack, .. }
                if path == "a.b" && document == Path::new("stack.yaml") && stack == "dev"),
            "{error:?}"
        );
    }

    #[test]
    fn helpers() {
        let tree = evaluate(
            r#"
            prefix: "{{ 'eks-cluster' | trimprefix('eks-') }}"
            suffix: "{{ 'cluster.yaml' | trimsuffix('.yaml') }}"
            json: "{{ ('{\"a\": [1, 2]}' | fromjson).a[1] }}"
            yaml: "{{ vars | toyaml }}"
            env: "{{ getenv('STRATUM_TEST_SURELY_UNSET', 'fallback') }}"
            "#,
            "vars: {a: 1}",
        )
        .unwrap();

        assert_eq!(tree.get("prefix"), Some(&Value::from("cluster")));
        assert_eq!(tree.get("suffix"), Some(&Value::from("cluster")));
        assert_eq!(tree.get("json"), Some(&Value::from("2")));
        assert_eq!(tree.get("yaml"), Some(&Value::from("a: 1")));
        assert_eq!(tree.get("env"), Some(&Value::from("fallback")));
    }

    #[test]
    fn tag_arguments_are_rendered_first() {
        let tree = evaluate(
            r#"
            decoded: !template '{"stage": "{{ vars.stage }}"}'
            literal: !literal "{{ vars.stage }}"
            "#,
            "vars: {stage: dev}",
        )
        .unwrap();

        assert_eq!(
            tree.get_path(&["decoded", "stage"]),
            Some(&Value::from("dev"))
        );
        assert_eq!(tree.get("literal"), Some(&Value::from("{{ vars.stage }}")));
    }

    #[test]
    fn partial_rendering_only_touches_known_roots() {
        let mut tree = config_document!(
            r#"
            a: "{{ region }}"
            b: "{{ region }}-{{ vars.stage }}"
            c: !terraform.output vpc {{ region }} .vpc_id
            "#
        )
        .tree;

        Renderer::new()
            .render_partial(&mut tree, "", &context("region: us-east-2"), Path::new("mixin.yaml"))
            .unwrap();

        assert_eq!(tree.get("a"), Some(&Value::from("us-east-2")));
        assert_eq!(
            tree.get("b"),
            Some(&Value::from("{{ region }}-{{ vars.stage }}"))
        );
        assert_eq!(
            tree.get("c"),
            Some(&Value::Tag(crate::value::TagValue::new(
                "terraform.output",
                "vpc us-east-2 .vpc_id"
            )))
        );
    }

    #[test]
    fn references_skip_bound_names_and_helpers() {
        let renderer = Renderer::new();
        let references = |source: &str| renderer.references(source).into_iter().collect::<Vec<_>>();

        assert_eq!(
            references("{% for z in locals.zones %}{{ z }}{% endfor %}"),
            vec!["locals.zones"]
        );
        assert_eq!(references("{% set n = locals.a %}{{ n }}"), vec!["locals.a"]);
        assert_eq!(
            references("{{ getenv('HOME', settings.home) | trimprefix('/') }}-{{ vars.stage }}"),
            vec!["settings.home", "vars.stage"]
        );
        assert_eq!(references("{{ locals['name'] }}"), vec!["locals"]);
        assert!(references("{{ unclosed").is_empty());
    }

    #[test]
    fn locals_are_bound_for_later_passes() {
        let mut tree = config_document!(
            r#"
            label: "{{ locals.name }}-{{ stack }}"
            zones: "{% for z in locals.zones %}{{ z }}{% endfor %}"
            later: "{{ stack }}"
            "#
        )
        .tree;
        let file_context =
            context(r#"locals: {name: "catalog \"x\"", zones: [a, b], unused: 1}"#);

        Renderer::new()
            .render_partial(&mut tree, "", &file_context, Path::new("catalog.yaml"))
            .unwrap();

        assert_eq!(tree.get("zones"), Some(&Value::from("ab")));
        assert_eq!(tree.get("later"), Some(&Value::from("{{ stack }}")));
        assert_eq!(
            tree.get("label"),
            Some(&Value::from(
                r#"{% set locals = {"name": "catalog \"x\""} %}{{ locals.name }}-{{ stack }}"#
            ))
        );

        // the component pass sees other locals, the bound ones win
        let tags_collaborators = Collaborators::default();
        let tags = TagEvaluator::new(&tags_collaborators, Path::new("."));
        let locate = |_: &str| PathBuf::from("dev.yaml");
        let scope = Scope {
            component: "vpc",
            stack: "dev",
            locate: &locate,
        };
        Renderer::new()
            .evaluate_tree(
                &mut tree,
                "",
                &context("stack: dev\nlocals: {name: dev}"),
                &tags,
                &scope,
            )
            .unwrap();
        assert_eq!(tree.get("label"), Some(&Value::from(r#"catalog "x"-dev"#)));
    }

    #[test]
    fn literals_of_every_kind() {
        let value = config_document!(r#"{a: [1, 2.5, true, null], "b c": "q\"uote"}"#).tree;
        let mut literal = String::new();
        write_literal(&value, &mut literal);
        assert_eq!(literal, r#"{"a": [1, 2.5, true, none], "b c": "q\"uote"}"#);
    }
}
