//! stacks: a top level manifest merged with everything it imports
//!
//! Loading a stack
//! 1. expands the imports of the manifest into the merge sequence
//! 2. prepares every document of the sequence on its own: its `locals` are evaluated and
//!    removed, strings referencing locals or the import context are rendered (or get the
//!    locals bound when they also need the merged configuration)
//! 3. merges the prepared documents in sequence order, recording provenance
//! 4. names the stack
//!
//! A manifest failing to load only takes its own stack down, see [StackSet].
use crate::collaborators::Collaborators;
use crate::component::COMPONENT_TYPES;
use crate::config::EngineConfig;
use crate::document::{ConfigDocument, DocumentStore};
use crate::error::{Error, Result};
use crate::imports::{expand_glob, ImportResolver, ImportedDocument};
use crate::locals::LocalsEvaluator;
use crate::merge::merge_traced;
use crate::provenance::Provenance;
use crate::tags::TagEvaluator;
use crate::template::{Renderer, Scope};
use crate::value::{Map, Value};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Every stack of a repository
#[derive(Debug, Default)]
pub struct StackSet {
    /// loaded stacks by name, sorted by name
    pub stacks: IndexMap<String, Arc<ResolvedStack>>,
    /// manifests that did not produce a stack
    pub failures: Vec<StackFailure>,
}

/// A manifest whose stack could not be loaded
#[derive(Debug, Clone)]
pub struct StackFailure {
    /// name of the stack if known, the path name below the stacks directory otherwise
    pub name: String,
    pub manifest: PathBuf,
    pub error: Arc<Error>,
}

impl StackSet {
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.stacks.keys()
    }

    pub fn get(&self, name: &str) -> Result<Arc<ResolvedStack>> {
        if let Some(stack) = self.stacks.get(name) {
            return Ok(stack.clone());
        }

        match self.failures.iter().find(|failure| failure.name == name) {
            Some(failure) => Err(Error::StackUnavailable {
                name: name.to_string(),
                manifest: failure.manifest.clone(),
                source: failure.error.clone(),
            }),
            None => Err(Error::StackNotFound(name.to_string())),
        }
    }

    fn insert(&mut self, stack: ResolvedStack) {
        let first = match self.stacks.shift_remove(&stack.name) {
            Some(first) => Some(first.manifest.clone()),
            None => self
                .failures
                .iter()
                .find(|failure| failure.name == stack.name)
                .map(|failure| failure.manifest.clone()),
        };

        match first {
            Some(first) => {
                let error = Error::DuplicateStackName {
                    name: stack.name.clone(),
                    first,
                    second: stack.manifest.clone(),
                };
                self.fail(stack.name, stack.manifest, error);
            }
            None => {
                self.stacks.insert(stack.name.clone(), Arc::new(stack));
            }
        }
    }

    fn fail(&mut self, name: String, manifest: PathBuf, error: Error) {
        tracing::warn!(stack = %name, manifest = %manifest.display(), %error, "stack skipped");
        self.failures.push(StackFailure {
            name,
            manifest,
            error: Arc::new(error),
        });
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedStack {
    pub name: String,
    /// the top level manifest
    pub manifest: PathBuf,
    /// merged sections, `locals` removed
    pub tree: Value,
    pub provenance: Provenance,
    /// prepared documents in merge order (manifest last)
    pub sources: Vec<StackSource>,
}

/// A document of the merge sequence after its locals were applied
#[derive(Debug, Clone)]
pub struct StackSource {
    pub document: Arc<ConfigDocument>,
    pub context: Map,
    pub tree: Value,
    pub locals: DocumentLocals,
}

/// Evaluated locals of one document, narrower scopes include the wider ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentLocals {
    pub root: Map,
    pub component_types: IndexMap<String, Map>,
    /// component type -> component -> locals
    pub components: IndexMap<String, IndexMap<String, Map>>,
}

impl DocumentLocals {
    pub fn for_component_type(&self, component_type: &str) -> &Map {
        self.component_types
            .get(component_type)
            .unwrap_or(&self.root)
    }

    pub fn for_component(&self, component_type: &str, component: &str) -> &Map {
        self.components
            .get(component_type)
            .and_then(|components| components.get(component))
            .unwrap_or_else(|| self.for_component_type(component_type))
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.component_types.is_empty() && self.components.is_empty()
    }

    /// Shaped like the document: `locals`, `<type>.locals`, `components.<type>.<name>.locals`
    pub fn to_value(&self) -> Value {
        let mut value = Map::new();
        if !self.root.is_empty() {
            value.insert("locals".into(), Value::Object(self.root.clone()));
        }

        for (component_type, locals) in &self.component_types {
            value.insert(
                component_type.clone(),
                Value::Object([("locals".to_string(), Value::Object(locals.clone()))].into()),
            );
        }

        let mut components = Map::new();
        for (component_type, definitions) in &self.components {
            let definitions = definitions
                .iter()
                .map(|(name, locals)| {
                    let section = [("locals".to_string(), Value::Object(locals.clone()))];
                    (name.clone(), Value::Object(section.into()))
                })
                .collect();
            components.insert(component_type.clone(), Value::Object(definitions));
        }
        if !components.is_empty() {
            value.insert("components".into(), Value::Object(components));
        }

        Value::Object(value)
    }
}

impl ResolvedStack {
    #[tracing::instrument(level = "trace", skip_all, fields(manifest = %manifest.display()))]
    pub fn load(
        manifest: &Path,
        config: &EngineConfig,
        store: &DocumentStore,
        collaborators: &Collaborators,
    ) -> Result<Self> {
        let stacks_dir = config.stacks_dir();
        let sequence = ImportResolver::new(store, &stacks_dir, collaborators.fetcher.as_ref())
            .resolve(manifest)?;

        let renderer = Renderer::new();
        let tags = TagEvaluator::new(collaborators, &config.base_path);
        let sources = sequence
            .into_iter()
            .map(|imported| StackSource::prepare(imported, &renderer, &tags))
            .collect::<Result<Vec<_>>>()?;

        let layers = sources
            .iter()
            .map(|source| (source.document.origin.as_str(), &source.tree));
        let (tree, trace) = merge_traced(layers, &config.merge_options())?;

        let Some(root) = sources.last() else {
            return Err(Error::Config(format!(
                "{} produced no documents",
                manifest.display()
            )));
        };
        let manifest = root.document.path.clone();
        let name = stack_name(root, &tree, &manifest, config, &renderer)?;
        tracing::debug!(
            stack = %name,
            manifest = %manifest.display(),
            documents = sources.len(),
            "stack loaded"
        );

        Ok(Self {
            name,
            manifest,
            tree,
            provenance: Provenance::from_stack_trace(&trace),
            sources,
        })
    }

    /// Component definitions of one type
    pub fn components(&self, component_type: &str) -> Option<&Map> {
        self.tree
            .get_path(&["components", component_type])
            .and_then(Value::as_object)
    }

    /// Type and definition of a component
    pub fn find_component(&self, component: &str) -> Option<(&'static str, &Value)> {
        COMPONENT_TYPES.iter().find_map(|component_type| {
            self.components(component_type)
                .and_then(|components| components.get(component))
                .map(|definition| (*component_type, definition))
        })
    }

    /// The last source (in merge order) that defines a component
    pub fn defining_source(&self, component_type: &str, component: &str) -> Option<&StackSource> {
        self.sources.iter().rev().find(|source| {
            source
                .tree
                .get_path(&["components", component_type, component])
                .is_some()
        })
    }
}

impl StackSource {
    fn prepare(
        imported: ImportedDocument,
        renderer: &Renderer,
        tags: &TagEvaluator,
    ) -> Result<Self> {
        let ImportedDocument { document, context } = imported;
        let mut tree = document.tree.clone();
        let declared = DeclaredLocals::take(&mut tree, &document.path)?;
        let evaluator = LocalsEvaluator::new(&document.path, renderer, tags);

        let mut locals = DocumentLocals::default();
        let root_context = static_context(&tree, &context);
        locals.root = evaluator.evaluate(&declared.root, &Map::new(), &root_context)?;

        for component_type in COMPONENT_TYPES {
            let section = tree.get(component_type);
            let type_context = scoped_context(&root_context, section);

            let type_locals = match declared.component_types.get(*component_type) {
                Some(own) => {
                    let evaluated = evaluator.evaluate(own, &locals.root, &type_context)?;
                    locals
                        .component_types
                        .insert(component_type.to_string(), evaluated.clone());
                    evaluated
                }
                None => locals.root.clone(),
            };

            let Some(components) = declared.components.get(*component_type) else {
                continue;
            };
            for (component, own) in components {
                let definition =
                    tree.get_path(&["components", *component_type, component.as_str()]);
                let component_context = scoped_context(&type_context, definition);
                let evaluated = evaluator.evaluate(own, &type_locals, &component_context)?;
                locals
                    .components
                    .entry(component_type.to_string())
                    .or_default()
                    .insert(component.clone(), evaluated);
            }
        }

        apply_locals(&mut tree, &locals, &context, renderer, &document.path)?;

        Ok(Self {
            document,
            context,
            tree,
            locals,
        })
    }
}

/// `locals` sections as declared, removed from the tree
#[derive(Default)]
struct DeclaredLocals {
    root: Map,
    component_types: IndexMap<String, Map>,
    components: IndexMap<String, IndexMap<String, Map>>,
}

impl DeclaredLocals {
    fn take(tree: &mut Value, document: &Path) -> Result<Self> {
        let mut declared = DeclaredLocals::default();
        let location = document.display().to_string();

        declared.root = take_locals(tree, &location, "locals")?;

        for component_type in COMPONENT_TYPES {
            if let Some(section) = tree.as_object_mut().and_then(|o| o.get_mut(*component_type)) {
                let locals = take_locals(section, &location, &format!("{component_type}.locals"))?;
                if !locals.is_empty() {
                    declared
                        .component_types
                        .insert(component_type.to_string(), locals);
                }
            }

            let components = tree
                .as_object_mut()
                .and_then(|o| o.get_mut("components"))
                .and_then(Value::as_object_mut)
                .and_then(|o| o.get_mut(*component_type))
                .and_then(Value::as_object_mut);
            let Some(components) = components else {
                continue;
            };

            for (component, definition) in components.iter_mut() {
                let section = format!("components.{component_type}.{component}.locals");
                let locals = take_locals(definition, &location, &section)?;
                if !locals.is_empty() {
                    declared
                        .components
                        .entry(component_type.to_string())
                        .or_default()
                        .insert(component.clone(), locals);
                }
            }
        }

        Ok(declared)
    }
}

fn take_locals(section: &mut Value, location: &str, name: &str) -> Result<Map> {
    let Some(object) = section.as_object_mut() else {
        return Ok(Map::new());
    };

    match object.shift_remove("locals") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(locals)) => Ok(locals),
        Some(_) => Err(Error::invalid_section(location, name, "a mapping")),
    }
}

/// `vars`, `settings` and `env` of the document root plus the import context
fn static_context(tree: &Value, import_context: &Map) -> Map {
    let mut context = import_context.clone();
    for section in ["vars", "settings", "env"] {
        context.insert(
            section.to_string(),
            tree.get(section).cloned().unwrap_or_else(Value::object),
        );
    }
    context
}

/// Context of a narrower scope: its `vars`, `settings` and `env` merged over the wider ones
fn scoped_context(wider: &Map, section: Option<&Value>) -> Map {
    let mut context = wider.clone();
    let Some(section) = section else {
        return context;
    };

    for name in ["vars", "settings", "env"] {
        let Some(Value::Object(own)) = section.get(name) else {
            continue;
        };
        if let Some(Value::Object(visible)) = context.get_mut(name) {
            visible.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    context
}

/// Render the strings of a document that only reference its locals and its import context
fn apply_locals(
    tree: &mut Value,
    locals: &DocumentLocals,
    import_context: &Map,
    renderer: &Renderer,
    document: &Path,
) -> Result<()> {
    let with_locals = |locals: &Map| {
        let mut context = import_context.clone();
        context.insert("locals".to_string(), Value::Object(locals.clone()));
        context
    };

    let Some(object) = tree.as_object_mut() else {
        return Ok(());
    };

    let root_context = with_locals(&locals.root);
    for (key, value) in object.iter_mut() {
        match key.as_str() {
            "components" => {
                let Some(by_type) = value.as_object_mut() else {
                    continue;
                };
                for (component_type, components) in by_type.iter_mut() {
                    let Some(components) = components.as_object_mut() else {
                        continue;
                    };
                    for (component, definition) in components.iter_mut() {
                        let context =
                            with_locals(locals.for_component(component_type, component));
                        let root = format!("components.{component_type}.{component}");
                        renderer.render_partial(definition, &root, &context, document)?;
                    }
                }
            }
            key if COMPONENT_TYPES.contains(&key) => {
                let context = with_locals(locals.for_component_type(key));
                renderer.render_partial(value, key, &context, document)?;
            }
            key => renderer.render_partial(value, key, &root_context, document)?,
        }
    }

    Ok(())
}

/// Name precedence: `name` of the manifest, `stacks.name_template`, `stacks.name_pattern`,
/// path of the manifest below the stacks directory
fn stack_name(
    root: &StackSource,
    tree: &Value,
    manifest: &Path,
    config: &EngineConfig,
    renderer: &Renderer,
) -> Result<String> {
    if let Some(name) = root.tree.get("name") {
        return match name {
            Value::String(name) if !name.is_empty() => Ok(name.clone()),
            _ => Err(Error::invalid_section(
                manifest.display().to_string(),
                "name",
                "a non-empty string",
            )),
        };
    }

    let stacks = &config.stacks;
    if !stacks.name_template.is_empty() {
        let context = tree.as_object().cloned().unwrap_or_default();
        let locate = |_: &str| manifest.to_path_buf();
        let scope = Scope {
            component: "",
            stack: "",
            locate: &locate,
        };
        return renderer.render_string(&stacks.name_template, &context, &scope);
    }

    if !stacks.name_pattern.is_empty() {
        return name_from_pattern(&stacks.name_pattern, tree, manifest);
    }

    Ok(path_name(manifest, config))
}

/// `orgs/acme/dev` for `<stacks>/orgs/acme/dev.yaml`
fn path_name(manifest: &Path, config: &EngineConfig) -> String {
    let stacks_dir = config.stacks_dir();
    let stacks_dir = stacks_dir.canonicalize().unwrap_or(stacks_dir);
    let manifest = manifest
        .canonicalize()
        .unwrap_or_else(|_| manifest.to_path_buf());
    let relative = manifest.strip_prefix(&stacks_dir).unwrap_or(&manifest);

    relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// `{tenant}-{stage}` with tokens replaced by stack vars
fn name_from_pattern(pattern: &str, tree: &Value, manifest: &Path) -> Result<String> {
    let mut name = String::new();
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        name.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            return Err(Error::Config(format!("unclosed '{{' in name pattern '{pattern}'")));
        };
        let token = &rest[start + 1..start + end];

        let value = match tree.get_path(&["vars", token]) {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Integer(value)) => value.to_string(),
            Some(Value::Boolean(value)) => value.to_string(),
            _ => {
                return Err(Error::Config(format!(
                    "stack {} has no var '{token}' required by the name pattern '{pattern}'",
                    manifest.display()
                )))
            }
        };
        name.push_str(&value);
        rest = &rest[start + end + 1..];
    }
    name.push_str(rest);

    Ok(name)
}

/// Manifests matching `stacks.included_paths` and none of `stacks.excluded_paths`
pub fn find_manifests(config: &EngineConfig) -> Result<Vec<PathBuf>> {
    let stacks_dir = config.stacks_dir();

    let excluded = config
        .stacks
        .excluded_paths
        .iter()
        .map(|pattern| {
            let pattern = stacks_dir.join(pattern);
            glob::Pattern::new(&pattern.to_string_lossy()).map_err(|e| {
                Error::Config(format!(
                    "invalid excluded path '{}': {e}",
                    pattern.display()
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut manifests = vec![];
    for pattern in &config.stacks.included_paths {
        for path in expand_glob(&stacks_dir.join(pattern)).map_err(Error::Config)? {
            if excluded.iter().any(|exclude| exclude.matches_path(&path)) {
                tracing::trace!(path=%path.display(), "excluded");
                continue;
            }
            if !manifests.contains(&path) {
                manifests.push(path);
            }
        }
    }

    manifests.sort();
    Ok(manifests)
}

/// Load every stack in parallel and index them by name
///
/// A manifest that fails to load (or names a stack another manifest already named) is
/// recorded in [StackSet::failures], the other stacks are unaffected.
pub fn load_all(
    config: &EngineConfig,
    store: &DocumentStore,
    collaborators: &Collaborators,
) -> Result<StackSet> {
    let manifests = find_manifests(config)?;
    tracing::info!(count = manifests.len(), "loading stacks");

    let loaded: Vec<_> = manifests
        .par_iter()
        .map(|manifest| {
            let stack = ResolvedStack::load(manifest, config, store, collaborators);
            (manifest, stack)
        })
        .collect();

    let mut set = StackSet::default();
    for (manifest, stack) in loaded {
        match stack {
            Ok(stack) => set.insert(stack),
            Err(error) => set.fail(path_name(manifest, config), manifest.clone(), error),
        }
    }

    set.stacks.sort_keys();
    Ok(set)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Repository(tempfile::TempDir);

    impl Repository {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (path, contents) in files {
                let path = dir.path().join("stacks").join(path);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, contents).unwrap();
            }
            Repository(dir)
        }

        fn config(&self) -> EngineConfig {
            EngineConfig {
                base_path: self.0.path().to_path_buf(),
                ..Default::default()
            }
        }

        fn load(&self, manifest: &str) -> Result<ResolvedStack> {
            self.load_with(manifest, &self.config())
        }

        fn load_with(&self, manifest: &str, config: &EngineConfig) -> Result<ResolvedStack> {
            ResolvedStack::load(
                &self.0.path().join("stacks").join(manifest),
                config,
                &DocumentStore::default(),
                &Collaborators::default(),
            )
        }
    }

    #[test]
    fn imports_merge_before_the_manifest() {
        let repository = Repository::new(&[
            ("catalog/vpc.yaml", "vars: {x: 1, y: 1}"),
            ("dev.yaml", "import: [catalog/vpc]\nvars: {x: 2}"),
        ]);

        let stack = repository.load("dev.yaml").unwrap();
        assert_eq!(stack.name, "dev");
        assert_eq!(stack.tree.get_path(&["vars", "x"]), Some(&Value::Integer(2)));
        assert_eq!(stack.tree.get_path(&["vars", "y"]), Some(&Value::Integer(1)));

        let documents = stack.provenance.documents("vars.x");
        assert_eq!(documents.len(), 2);
        assert!(documents[0].ends_with("catalog/vpc.yaml"));
        assert!(documents[1].ends_with("dev.yaml"));
    }

    #[test]
    fn locals_stay_in_their_document() {
        let repository = Repository::new(&[
            (
                "catalog/vpc.yaml",
                "locals: {name: catalog}\nvars: {from_catalog: '{{ locals.name }}'}",
            ),
            (
                "dev.yaml",
                r#"
import: [catalog/vpc]
locals:
  name: dev
vars:
  from_dev: "{{ locals.name }}"
terraform:
  locals:
    backend: "{{ locals.name }}-state"
  backend:
    bucket: "{{ locals.backend }}"
components:
  terraform:
    vpc:
      locals:
        name: vpc
      vars:
        label: "{{ locals.name }}-{{ locals.backend }}"
        later: "{{ stack }}"
"#,
            ),
        ]);

        let stack = repository.load("dev.yaml").unwrap();
        let tree = &stack.tree;
        assert_eq!(tree.get("locals"), None);
        assert_eq!(
            tree.get_path(&["vars", "from_catalog"]),
            Some(&Value::from("catalog"))
        );
        assert_eq!(tree.get_path(&["vars", "from_dev"]), Some(&Value::from("dev")));
        assert_eq!(
            tree.get_path(&["terraform", "backend", "bucket"]),
            Some(&Value::from("dev-state"))
        );
        assert_eq!(
            tree.get_path(&["components", "terraform", "vpc", "vars", "label"]),
            Some(&Value::from("vpc-dev-state"))
        );
        assert_eq!(
            tree.get_path(&["components", "terraform", "vpc", "vars", "later"]),
            Some(&Value::from("{{ stack }}"))
        );
        assert_eq!(
            tree.get_path(&["components", "terraform", "vpc", "locals"]),
            None
        );
    }

    #[test]
    fn import_context_renders_the_mixin() {
        let repository = Repository::new(&[
            ("mixins/region.yaml", "vars: {region: '{{ region }}', stage: '{{ vars.stage }}'}"),
            (
                "dev.yaml",
                "import: [{path: mixins/region, context: {region: us-east-2}}]\nvars: {stage: dev}",
            ),
        ]);

        let stack = repository.load("dev.yaml").unwrap();
        assert_eq!(
            stack.tree.get_path(&["vars", "region"]),
            Some(&Value::from("us-east-2"))
        );
        assert_eq!(
            stack.tree.get_path(&["vars", "stage"]),
            Some(&Value::from("dev"))
        );
    }

    #[test]
    fn naming_precedence() {
        let repository = Repository::new(&[
            ("orgs/acme/dev.yaml", "vars: {tenant: acme, stage: dev}"),
            ("named.yaml", "name: custom\nvars: {tenant: acme, stage: prod}"),
        ]);

        assert_eq!(repository.load("orgs/acme/dev.yaml").unwrap().name, "orgs/acme/dev");
        assert_eq!(repository.load("named.yaml").unwrap().name, "custom");

        let mut config = repository.config();
        config.stacks.name_pattern = "{tenant}-{stage}".into();
        assert_eq!(
            repository.load_with("orgs/acme/dev.yaml", &config).unwrap().name,
            "acme-dev"
        );

        config.stacks.name_template = "{{ vars.stage }}-{{ vars.tenant }}".into();
        assert_eq!(
            repository.load_with("orgs/acme/dev.yaml", &config).unwrap().name,
            "dev-acme"
        );

        config.stacks.name_template = String::new();
        config.stacks.name_pattern = "{tenant}-{region}".into();
        assert!(matches!(
            repository.load_with("orgs/acme/dev.yaml", &config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn discovery_and_duplicates() {
        let repository = Repository::new(&[
            ("orgs/dev.yaml", "name: same\nvars: {}"),
            ("orgs/prod.yaml", "name: same\nvars: {}"),
            ("orgs/_defaults.yaml", "vars: {}"),
            ("catalog/vpc.yaml", "vars: {}"),
        ]);

        let mut config = repository.config();
        config.stacks.included_paths = vec!["orgs/**/*".into()];
        config.stacks.excluded_paths = vec!["**/_defaults.yaml".into()];

        let manifests = find_manifests(&config).unwrap();
        let names: Vec<_> = manifests
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["dev.yaml", "prod.yaml"]);

        let set = load_all(&config, &DocumentStore::default(), &Collaborators::default()).unwrap();
        assert!(set.stacks.is_empty());
        let Err(Error::StackUnavailable { source, .. }) = set.get("same") else {
            panic!("expected an unavailable stack");
        };
        assert!(
            matches!(source.as_ref(), Error::DuplicateStackName { name, .. } if name == "same")
        );
    }

    #[test]
    fn broken_manifests_only_fail_their_stack() {
        let repository = Repository::new(&[
            ("dev.yaml", "vars: {stage: dev}"),
            ("prod.yaml", "locals:\n  a: '{{ locals.b }}'\n  b: '{{ locals.a }}'\n"),
            ("staging.yaml", "import: [catalog/missing]"),
        ]);
        let mut config = repository.config();
        config.stacks.included_paths = vec!["*.yaml".into()];

        let set = load_all(&config, &DocumentStore::default(), &Collaborators::default()).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["dev"]);
        assert!(set.get("dev").is_ok());

        let failed: Vec<_> = set.failures.iter().map(|failure| failure.name.as_str()).collect();
        assert_eq!(failed, vec!["prod", "staging"]);
        assert!(matches!(
            set.get("prod"),
            Err(Error::StackUnavailable { source, .. })
                if matches!(source.as_ref(), Error::LocalsCycle { .. })
        ));
        assert!(matches!(set.get("qa"), Err(Error::StackNotFound(_))));
    }

    #[test]
    fn described_locals_follow_the_document_shape() {
        let mut locals = DocumentLocals::default();
        locals.root.insert("a".into(), Value::from("1"));
        locals
            .components
            .entry("terraform".into())
            .or_default()
            .insert("vpc".into(), Map::from([("b".to_string(), Value::from("2"))]));

        assert_eq!(
            locals.to_value(),
            crate::config_document!(
                "locals: {a: '1'}\ncomponents: {terraform: {vpc: {locals: {b: '2'}}}}"
            )
            .tree
        );
        assert_eq!(locals.for_component("terraform", "eks"), &locals.root);
    }
}
