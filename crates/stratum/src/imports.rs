//! expansion of `import` lists
//!
//! Imports are walked depth-first in declaration order. A document lands in the merge
//! sequence after everything it imports (its inline sections win) and only at its first
//! position. Identity of an import is its canonical path (or URI) plus the context it was
//! imported with, so one mixin imported with two different contexts contributes twice.
//!
//! Cycles are detected with the stack of documents currently being expanded, a document that
//! was already expanded elsewhere is simply skipped.
use crate::collaborators::Fetcher;
use crate::document::{is_remote, ConfigDocument, DocumentStore, ImportSpec, EXTENSIONS};
use crate::error::{Error, Result};
use crate::template::Renderer;
use crate::util::has_template;
use crate::value::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A document of the merge sequence with the context it has to be rendered with
#[derive(Debug, Clone)]
pub struct ImportedDocument {
    pub document: Arc<ConfigDocument>,
    pub context: Map,
}

#[derive(derive_new::new)]
pub struct ImportResolver<'a> {
    store: &'a DocumentStore,
    /// non-relative imports are resolved against this directory
    stacks_dir: &'a Path,
    fetcher: &'a dyn Fetcher,
}

#[derive(Default)]
struct Expansion {
    /// identities of documents that are already part of the sequence
    visited: HashSet<String>,
    /// origins of the documents currently being expanded
    active: Vec<String>,
    sequence: Vec<ImportedDocument>,
}

enum Target {
    Local(PathBuf),
    Remote(String),
}

impl ImportResolver<'_> {
    /// Root manifest plus its transitive imports, in merge order (root last)
    pub fn resolve(&self, manifest: &Path) -> Result<Vec<ImportedDocument>> {
        let root = self.store.load(manifest)?;
        let mut expansion = Expansion::default();
        expansion.visited.insert(identity(&root.origin, &Map::new()));

        self.expand(root, Map::new(), &mut expansion)?;
        Ok(expansion.sequence)
    }

    #[tracing::instrument(level = "trace", skip_all, fields(document = %document.origin))]
    fn expand(
        &self,
        document: Arc<ConfigDocument>,
        context: Map,
        expansion: &mut Expansion,
    ) -> Result<()> {
        expansion.active.push(document.origin.clone());

        for spec in &document.imports {
            let mut child_context = context.clone();
            child_context.extend(spec.context.iter().map(|(k, v)| (k.clone(), v.clone())));

            for target in self.targets(&document, spec, &context)? {
                let imported = match target {
                    Target::Local(path) => self.store.load(&path)?,
                    Target::Remote(uri) => {
                        let local = self.fetcher.fetch(&uri).map_err(|source| {
                            Error::Collaborator {
                                collaborator: "fetch",
                                target: uri.clone(),
                                source,
                            }
                        })?;
                        self.store.load_remote(&uri, &local)?
                    }
                };

                if let Some(position) = expansion
                    .active
                    .iter()
                    .position(|origin| origin == &imported.origin)
                {
                    let mut chain = expansion.active[position..].to_vec();
                    chain.push(imported.origin.clone());
                    return Err(Error::ImportCycle { chain });
                }

                if !expansion
                    .visited
                    .insert(identity(&imported.origin, &child_context))
                {
                    tracing::debug!(import=%imported.origin, "already imported");
                    continue;
                }

                self.expand(imported, child_context.clone(), expansion)?;
            }
        }

        expansion.active.pop();
        expansion.sequence.push(ImportedDocument { document, context });
        Ok(())
    }

    /// Files an import spec refers to
    fn targets(
        &self,
        document: &ConfigDocument,
        spec: &ImportSpec,
        context: &Map,
    ) -> Result<Vec<Target>> {
        let mut import = spec.path.clone();
        if has_template(&import) && !context.is_empty() {
            let mut value = Value::String(import);
            Renderer::new().render_partial(&mut value, "", context, &document.path)?;
            import = value.as_str().unwrap_or_default().to_string();
        }

        if is_remote(&import) {
            return Ok(vec![Target::Remote(import)]);
        }

        let base = if import.starts_with("./") || import.starts_with("../") {
            document.directory()
        } else {
            self.stacks_dir
        };
        let path = base.join(&import);

        let found = if is_glob(&import) {
            expand_glob(&path).map_err(|reason| Error::InvalidImport {
                document: document.path.clone(),
                reason,
            })?
        } else {
            find_file(&path).into_iter().collect()
        };

        if found.is_empty() && !spec.skip_if_missing {
            return Err(Error::ImportNotFound {
                import: spec.path.clone(),
                document: document.path.clone(),
            });
        }

        Ok(found.into_iter().map(Target::Local).collect())
    }
}

fn identity(origin: &str, context: &Map) -> String {
    if context.is_empty() {
        return origin.to_string();
    }

    // objects keep insertion order, equal contexts serialize equally
    let context = serde_json::to_string(&Value::Object(context.clone())).unwrap_or_default();
    format!("{origin}#{context}")
}

fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// The file itself, or the first existing one with a known extension appended
fn find_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }

    EXTENSIONS.iter().find_map(|extension| {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(extension);
        let candidate = PathBuf::from(candidate);
        candidate.is_file().then_some(candidate)
    })
}

fn has_known_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

/// Sorted manifests matching a glob
pub(crate) fn expand_glob(pattern: &Path) -> std::result::Result<Vec<PathBuf>, String> {
    let pattern = pattern.to_string_lossy();
    let paths = glob::glob(&pattern).map_err(|e| format!("invalid glob '{pattern}': {e}"))?;

    let mut found = vec![];
    for path in paths {
        let path = path.map_err(|e| e.to_string())?;
        if path.is_file() && has_known_extension(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
