//! resolution of one component in one stack
//!
//! The configuration of a component is the merge of (lowest precedence first)
//! 1. the global `vars`, `settings` and `env` of the stack
//! 2. the section of its component type (`terraform:`)
//! 3. its base components: `metadata.component` then `metadata.inherits`, each expanded
//!    recursively
//! 4. its own definition
//! 5. the `overrides` sections in the configured order
//!
//! The merged tree is then evaluated: template strings are rendered and tags replaced. Base
//! components never contribute `metadata`. `locals` are not visible here, every document
//! already rendered (or bound) the strings reading its own locals.
use crate::config::OverrideLayer;
use crate::error::{Error, Result};
use crate::merge::merge_traced;
use crate::provenance::Provenance;
use crate::resolution::{ComponentKey, Resolution};
use crate::stack::ResolvedStack;
use crate::tags::TagEvaluator;
use crate::template::{Renderer, Scope};
use crate::value::{Map, Value};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const COMPONENT_TYPES: &[&str] = &["terraform", "helmfile", "packer"];

/// Fully merged and evaluated configuration of a component instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedComponentConfig {
    pub component: String,
    pub stack: String,
    pub component_type: String,
    /// component after `metadata.component` redirection
    pub physical_component: String,
    /// base components in merge order
    pub inheritance: Vec<String>,
    /// document defining the component
    pub manifest: PathBuf,
    pub vars: Map,
    pub settings: Map,
    pub env: Map,
    pub backend_type: Value,
    pub backend: Map,
    pub metadata: Map,
    pub locals: Map,
    pub command: Value,
    pub providers: Map,
    /// sections without special meaning
    #[serde(flatten)]
    pub extra: Map,
    #[serde(skip_serializing_if = "Provenance::is_empty")]
    pub provenance: Provenance,
}

/// A component instance as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentRef {
    pub component: String,
    pub stack: String,
    pub component_type: String,
}

impl ComponentRef {
    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(&self.component, &self.stack)
    }
}

/// Abstract and disabled components can be resolved (and inherited from) but not deployed
pub fn is_deployable(definition: &Value) -> bool {
    let metadata = definition.get("metadata");
    let is_abstract = metadata
        .and_then(|metadata| metadata.get("type"))
        .and_then(Value::as_str)
        == Some("abstract");
    let enabled = metadata
        .and_then(|metadata| metadata.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(true);

    !is_abstract && enabled
}

pub fn deployable_components(stack: &ResolvedStack) -> Vec<ComponentRef> {
    let mut found = vec![];
    for component_type in COMPONENT_TYPES {
        let Some(components) = stack.components(component_type) else {
            continue;
        };

        for (component, definition) in components {
            if is_deployable(definition) {
                found.push(ComponentRef {
                    component: component.clone(),
                    stack: stack.name.clone(),
                    component_type: component_type.to_string(),
                });
            }
        }
    }
    found
}

/// Resolves `key` within `resolution`, use [Resolution::resolve] to benefit from its cache
#[tracing::instrument(level = "trace", skip_all, fields(component = %key))]
pub(crate) fn resolve(
    resolution: &Arc<Resolution>,
    key: &ComponentKey,
) -> Result<ResolvedComponentConfig> {
    let engine = resolution.engine();
    let config = engine.config();
    let stack = engine.resolve_stack(&key.stack)?;

    let Some((component_type, definition)) = stack.find_component(&key.component) else {
        return Err(Error::ComponentNotFound {
            component: key.component.clone(),
            stack: key.stack.clone(),
        });
    };
    let location = format!("component '{}' in stack '{}'", key.component, key.stack);
    let components = stack.components(component_type).cloned().unwrap_or_default();
    let inheritance = inheritance_chain(&components, &key.component, &stack.name, &location)?;

    let label = |name: &str| format!("components.{component_type}.{name}");
    let mut layers: Vec<(String, Value)> = vec![(
        String::new(),
        stack.tree.select(&["vars", "settings", "env"]),
    )];

    let type_section = object_section(stack.tree.get(component_type), &location, component_type)?;
    if let Some(section) = type_section {
        layers.push((
            component_type.to_string(),
            section.without(&["overrides", "locals"]),
        ));
    }
    for base in &inheritance {
        if let Some(definition) = object_section(components.get(base), &location, &label(base))? {
            layers.push((
                label(base),
                definition.without(&["metadata", "overrides", "locals"]),
            ));
        }
    }
    if let Some(definition) = object_section(Some(definition), &location, &label(&key.component))? {
        layers.push((label(&key.component), definition.without(&["overrides", "locals"])));
    }

    for layer in &config.settings.overrides_order {
        let (name, overrides) = match layer {
            OverrideLayer::Global => ("overrides".to_string(), stack.tree.get("overrides")),
            OverrideLayer::ComponentType => (
                format!("{component_type}.overrides"),
                stack.tree.get_path(&[component_type, "overrides"]),
            ),
            OverrideLayer::Component => (
                format!("{}.overrides", label(&key.component)),
                definition.get("overrides"),
            ),
        };
        if let Some(overrides) = object_section(overrides, &location, &name)? {
            layers.push((name, overrides.clone()));
        }
    }

    let (mut merged, trace) = merge_traced(
        layers.iter().map(|(name, layer)| (name.as_str(), layer)),
        &config.merge_options(),
    )?;
    let provenance = Provenance::from_component_trace(&trace, &stack.provenance);

    let source = stack.defining_source(component_type, &key.component);
    let manifest = source
        .map(|source| source.document.path.clone())
        .unwrap_or_else(|| stack.manifest.clone());
    let locals = source
        .map(|source| {
            source
                .locals
                .for_component(component_type, &key.component)
                .clone()
        })
        .unwrap_or_default();

    let renderer = Renderer::with_lookups(resolution.clone(), key.clone());
    let tags =
        TagEvaluator::with_lookups(engine.collaborators(), &config.base_path, resolution, key);
    let locate = |path: &str| {
        provenance
            .defining_document(path)
            .map(PathBuf::from)
            .unwrap_or_else(|| manifest.clone())
    };
    let scope = Scope {
        component: &key.component,
        stack: &key.stack,
        locate: &locate,
    };

    for pass in 0..config.templates.evaluations {
        tracing::trace!(pass, "template pass");
        let context = template_context(key, component_type, &manifest, &merged);
        renderer.evaluate_tree(&mut merged, "", &context, &tags, &scope)?;
    }

    let Value::Object(mut sections) = merged else {
        return Err(Error::invalid_section(location, &key.component, "a mapping"));
    };
    let mut take = |name: &str| take_object(&mut sections, name, &location);

    let vars = take("vars")?;
    let settings = take("settings")?;
    let env = take("env")?;
    let backend = take("backend")?;
    let metadata = take("metadata")?;
    let providers = take("providers")?;
    let backend_type = sections.shift_remove("backend_type").unwrap_or_default();
    let command = sections.shift_remove("command").unwrap_or_default();

    let physical_component = physical_component(&components, &key.component, &metadata);

    Ok(ResolvedComponentConfig {
        component: key.component.clone(),
        stack: key.stack.clone(),
        component_type: component_type.to_string(),
        physical_component,
        inheritance,
        manifest,
        vars,
        settings,
        env,
        backend_type,
        backend,
        metadata,
        locals,
        command,
        providers,
        extra: sections,
        provenance,
    })
}

/// Names visible to the templates of a component
fn template_context(
    key: &ComponentKey,
    component_type: &str,
    manifest: &Path,
    merged: &Value,
) -> Map {
    let mut context = Map::new();
    context.insert("stack".into(), Value::from(key.stack.as_str()));
    context.insert("component".into(), Value::from(key.component.as_str()));
    context.insert("component_type".into(), Value::from(component_type));
    context.insert(
        "manifest".into(),
        Value::from(manifest.display().to_string()),
    );

    for section in ["vars", "settings", "env", "backend", "metadata"] {
        context.insert(
            section.into(),
            merged.get(section).cloned().unwrap_or_else(Value::object),
        );
    }
    context.insert(
        "backend_type".into(),
        merged.get("backend_type").cloned().unwrap_or_default(),
    );
    context
}

/// `None` for a missing or null section, an error for anything that is not a mapping
fn object_section<'v>(
    section: Option<&'v Value>,
    location: &str,
    name: &str,
) -> Result<Option<&'v Value>> {
    match section {
        None | Some(Value::Null) => Ok(None),
        Some(object @ Value::Object(_)) => Ok(Some(object)),
        Some(_) => Err(Error::invalid_section(location, name, "a mapping")),
    }
}

fn take_object(sections: &mut Map, name: &str, location: &str) -> Result<Map> {
    match sections.shift_remove(name) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(object)) => Ok(object),
        Some(_) => Err(Error::invalid_section(location, name, "a mapping")),
    }
}

/// `metadata.component` followed through the components of the stack it redirects to
///
/// Stops at a name that is not a component of the stack or at a component without its own
/// redirection.
fn physical_component(components: &Map, component: &str, metadata: &Map) -> String {
    let Some(mut physical) = metadata.get("component").and_then(Value::as_str) else {
        return component.to_string();
    };

    let mut seen = vec![component];
    while !seen.contains(&physical) {
        let next = components
            .get(physical)
            .and_then(|definition| definition.get_path(&["metadata", "component"]))
            .and_then(Value::as_str);
        let Some(next) = next else {
            break;
        };
        seen.push(physical);
        physical = next;
    }

    physical.to_string()
}

/// Base components of `component` in merge order, each after its own bases
fn inheritance_chain(
    components: &Map,
    component: &str,
    stack: &str,
    location: &str,
) -> Result<Vec<String>> {
    let mut active = vec![component.to_string()];
    let mut bases = vec![];
    collect_bases(components, component, stack, location, &mut active, &mut bases)?;
    Ok(bases)
}

fn collect_bases(
    components: &Map,
    component: &str,
    stack: &str,
    location: &str,
    active: &mut Vec<String>,
    bases: &mut Vec<String>,
) -> Result<()> {
    for parent in parents(components, component, stack, location)? {
        if let Some(position) = active.iter().position(|current| current == &parent) {
            let mut chain = active[position..].to_vec();
            chain.push(parent);
            return Err(Error::RedirectionCycle {
                stack: stack.to_string(),
                chain,
            });
        }

        // diamonds: the first occurrence wins
        if bases.contains(&parent) {
            continue;
        }

        active.push(parent.clone());
        collect_bases(components, &parent, stack, location, active, bases)?;
        active.pop();
        bases.push(parent);
    }

    Ok(())
}

/// `metadata.component` (when it names a component of the stack) and `metadata.inherits`
fn parents(components: &Map, component: &str, stack: &str, location: &str) -> Result<Vec<String>> {
    let metadata = components
        .get(component)
        .and_then(|definition| definition.get("metadata"));
    let mut parents = vec![];

    // a redirection to a component that is not defined only names the physical component
    if let Some(target) = metadata
        .and_then(|metadata| metadata.get("component"))
        .and_then(Value::as_str)
    {
        if target != component && components.contains_key(target) {
            parents.push(target.to_string());
        }
    }

    match metadata.and_then(|metadata| metadata.get("inherits")) {
        None | Some(Value::Null) => {}
        Some(Value::Array(inherits)) => {
            for base in inherits {
                let Some(base) = base.as_str() else {
                    return Err(Error::invalid_section(
                        location,
                        format!("components.{component}.metadata.inherits"),
                        "a list of component names",
                    ));
                };
                if !components.contains_key(base) {
                    return Err(Error::ComponentNotFound {
                        component: base.to_string(),
                        stack: stack.to_string(),
                    });
                }
                if !parents.iter().any(|parent| parent == base) {
                    parents.push(base.to_string());
                }
            }
        }
        Some(_) => {
            return Err(Error::invalid_section(
                location,
                format!("components.{component}.metadata.inherits"),
                "a list of component names",
            ))
        }
    }

    Ok(parents)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config_document;
    use pretty_assertions::assert_eq;

    fn components(source: &str) -> Map {
        match config_document!(source).tree {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn bases_of(source: &str, component: &str) -> Result<Vec<String>> {
        inheritance_chain(&components(source), component, "dev", "test")
    }

    #[test]
    fn bases_come_before_their_children() {
        let source = r#"
        defaults: {metadata: {type: abstract}}
        tagged: {metadata: {inherits: [defaults]}}
        vpc-base: {metadata: {inherits: [defaults]}}
        vpc:
          metadata:
            component: vpc-base
            inherits: [tagged]
        "#;

        assert_eq!(
            bases_of(source, "vpc").unwrap(),
            vec!["defaults", "vpc-base", "tagged"]
        );
    }

    #[test]
    fn undefined_redirection_is_only_physical() {
        let source = "vpc: {metadata: {component: infra/vpc}}";
        assert_eq!(bases_of(source, "vpc").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn missing_base_is_an_error() {
        assert!(matches!(
            bases_of("vpc: {metadata: {inherits: [nope]}}", "vpc"),
            Err(Error::ComponentNotFound { component, .. }) if component == "nope"
        ));
    }

    #[test]
    fn redirection_cycles_name_the_chain() {
        let source = r#"
        a: {metadata: {component: b}}
        b: {metadata: {inherits: [c]}}
        c: {metadata: {component: a}}
        "#;

        let Err(Error::RedirectionCycle { chain, stack }) = bases_of(source, "a") else {
            panic!("expected a redirection cycle");
        };
        assert_eq!(stack, "dev");
        assert_eq!(chain, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn deployability() {
        assert!(is_deployable(&config_document!("vars: {}").tree));
        assert!(!is_deployable(
            &config_document!("metadata: {type: abstract}").tree
        ));
        assert!(!is_deployable(
            &config_document!("metadata: {enabled: false}").tree
        ));
        assert!(is_deployable(
            &config_document!("metadata: {type: real, enabled: true}").tree
        ));
    }

    #[test]
    fn redirections_are_followed_to_the_physical_component() {
        let components = components(
            r#"
            vpc: {metadata: {component: vpc-base}}
            vpc-base: {metadata: {component: infra/vpc}}
            eks-base: {vars: {}}
            loop: {metadata: {component: loop}}
            "#,
        );
        let metadata = |source: &str| match config_document!(source).tree {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        assert_eq!(
            physical_component(&components, "vpc", &metadata("component: vpc-base")),
            "infra/vpc"
        );
        assert_eq!(
            physical_component(&components, "eks", &metadata("component: eks-base")),
            "eks-base"
        );
        assert_eq!(physical_component(&components, "app", &metadata("{}")), "app");
        assert_eq!(
            physical_component(&components, "loop", &metadata("component: loop")),
            "loop"
        );
    }
}
