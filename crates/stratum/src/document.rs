//! configuration documents ([ConfigDocument] and the [DocumentStore] caching them)
//!
//! A [ConfigDocument] tracks
//! - its origin (canonical path, or the URI it was fetched from)
//! - the local path it was read from
//! - the parsed tree (without `import`)
//! - the declared imports
//!
//! Documents are immutable once loaded. The store hands out [Arc]s so parallel workers can
//! share them.
use crate::error::{Error, Result};
use crate::tags::KNOWN_TAGS;
use crate::value::{Map, Value};
use crate::visit::Walk;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// File extensions tried (in order) when an import omits the extension
pub const EXTENSIONS: &[&str] = &["yaml", "yml", "hcl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Hcl,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("hcl") => DocumentFormat::Hcl,
            _ => DocumentFormat::Yaml,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    /// canonical identity, used in error messages and provenance
    pub origin: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub tree: Value,
    pub imports: Vec<ImportSpec>,
}

/// One entry of a document's `import` list
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct ImportSpec {
    pub path: String,
    #[new(default)]
    pub context: Map,
    #[new(default)]
    pub skip_if_missing: bool,
}

/// `git::https://...`, `s3://...`, `file:///...`
pub fn is_remote(path: &str) -> bool {
    path.contains("://") || path.contains("::")
}

impl ConfigDocument {
    pub fn parse(
        path: impl Into<PathBuf>,
        source: &str,
        format: DocumentFormat,
    ) -> Result<Self, LoadError> {
        let path = path.into();
        let tree = match format {
            DocumentFormat::Yaml => {
                let yaml: serde_yaml::Value = serde_yaml::from_str(source)?;
                Value::try_from(yaml)?
            }
            DocumentFormat::Hcl => crate::hcl_manifest::parse(source)?,
        };

        let mut tree = match tree {
            Value::Null => Value::object(),
            tree @ Value::Object(_) => tree,
            other => return Err(LoadError::NotAMapping(other.kind())),
        };

        let imports = match tree.as_object_mut().and_then(|o| o.shift_remove("import")) {
            Some(import) => parse_imports(import)?,
            None => vec![],
        };

        Ok(Self {
            origin: path.display().to_string(),
            path,
            format,
            tree,
            imports,
        })
    }

    /// Directory relative imports (`./`, `../`) are resolved against
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Rejects tags outside of [KNOWN_TAGS]
    fn check_tags(&self) -> Result<()> {
        self.tree.walk_tags("", &mut |path: &str, tag: &crate::value::TagValue| {
            if KNOWN_TAGS.contains(&tag.name.as_str()) {
                return Ok(());
            }

            Err(Error::UnknownTag {
                tag: tag.name.clone(),
                path: path.to_string(),
                document: self.origin.clone(),
            })
        })
    }
}

fn parse_imports(import: Value) -> Result<Vec<ImportSpec>, LoadError> {
    let entries = match import {
        Value::Null => return Ok(vec![]),
        Value::String(path) => return Ok(vec![ImportSpec::new(path)]),
        Value::Array(entries) => entries,
        other => {
            return Err(LoadError::InvalidImport(format!(
                "`import` must be a list, found {}",
                other.kind()
            )))
        }
    };

    entries
        .into_iter()
        .map(|entry| match entry {
            Value::String(path) => Ok(ImportSpec::new(path)),
            Value::Object(mut object) => {
                let Some(Value::String(path)) = object.shift_remove("path") else {
                    return Err(LoadError::InvalidImport(
                        "structured import requires a string `path`".into(),
                    ));
                };

                let context = match object.shift_remove("context") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(context)) => context,
                    Some(other) => {
                        return Err(LoadError::InvalidImport(format!(
                            "context of import '{path}' must be a mapping, found {}",
                            other.kind()
                        )))
                    }
                };

                let skip_if_missing = match object.shift_remove("skip_if_missing") {
                    None | Some(Value::Null) => false,
                    Some(Value::Boolean(skip)) => skip,
                    Some(other) => {
                        return Err(LoadError::InvalidImport(format!(
                            "skip_if_missing of import '{path}' must be a boolean, found {}",
                            other.kind()
                        )))
                    }
                };

                Ok(ImportSpec {
                    path,
                    context,
                    skip_if_missing,
                })
            }
            other => Err(LoadError::InvalidImport(format!(
                "import entries must be strings or mappings, found {}",
                other.kind()
            ))),
        })
        .collect()
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("IO error")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse yaml document")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unable to parse json document")]
    Json(#[from] serde_json::Error),
    #[error("Unable to parse hcl document")]
    HclParse(#[from] hcl_edit::parser::Error),
    #[error("Unable to evaluate hcl attribute")]
    HclEval(#[from] hcl::eval::Errors),
    #[error("document root must be a mapping, found {0}")]
    NotAMapping(&'static str),
    #[error("tag '!{0}' must be applied to a scalar")]
    NonScalarTag(String),
    #[error("unsupported mapping key {0}")]
    UnsupportedKey(String),
    #[error("{0}")]
    InvalidImport(String),
}

/// Cache of loaded documents keyed by the local path they were read from
#[derive(Default, Debug)]
pub struct DocumentStore {
    documents: RwLock<HashMap<PathBuf, Arc<ConfigDocument>>>,
}

impl DocumentStore {
    /// Loads a local document, returns the cached instance when already loaded
    pub fn load(&self, file_path: &Path) -> Result<Arc<ConfigDocument>> {
        let file_path = file_path.canonicalize().map_err(|e| Error::Load {
            path: file_path.to_path_buf(),
            source: e.into(),
        })?;

        self.load_as(file_path, None)
    }

    /// Loads a document that was fetched from `uri` into `local_path`
    pub fn load_remote(&self, uri: &str, local_path: &Path) -> Result<Arc<ConfigDocument>> {
        self.load_as(local_path.to_path_buf(), Some(uri))
    }

    fn load_as(&self, file_path: PathBuf, uri: Option<&str>) -> Result<Arc<ConfigDocument>> {
        if let Some(document) = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_path)
        {
            tracing::trace!(path=%file_path.display(), "document cache hit");
            return Ok(document.clone());
        }

        tracing::info!(path=%file_path.display(), "loading file");
        let load_error = |source: LoadError| Error::Load {
            path: file_path.clone(),
            source,
        };

        let file_contents = std::fs::read_to_string(&file_path).map_err(|e| load_error(e.into()))?;
        let format = DocumentFormat::from_path(&file_path);
        let mut document = ConfigDocument::parse(&file_path, &file_contents, format)
            .map_err(load_error)?;
        if let Some(uri) = uri {
            document.origin = uri.to_string();
        }
        document.check_tags()?;

        let document = Arc::new(document);
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_path, document.clone());

        Ok(document)
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Utility macro to create a [ConfigDocument] from yaml
///
/// ```
/// # use stratum::config_document;
/// let document = config_document!("vars: { stage: dev }");
/// assert!(document.imports.is_empty());
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use stratum::config_document;
/// config_document!("- not a mapping");
/// ```
#[macro_export]
macro_rules! config_document {
    { $expr:expr } => {
        $crate::document::ConfigDocument::parse("inline.yaml", $expr, $crate::document::DocumentFormat::Yaml)
            .expect("document must parse")
    };
    { $path:expr => $expr:expr } => {
        $crate::document::ConfigDocument::parse($path, $expr, $crate::document::DocumentFormat::from_path(::std::path::Path::new($path)))
            .expect("document must parse")
    };
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn imports_are_split_from_the_tree() {
        let document = config_document! {r#"
        import:
          - catalog/vpc
          - path: mixins/region
            context:
              region: us-east-2
            skip_if_missing: true
        vars:
          stage: dev
        "#};

        assert_eq!(document.tree.get("import"), None);
        assert_eq!(document.imports.len(), 2);
        assert_eq!(document.imports[0], ImportSpec::new("catalog/vpc".into()));
        assert_eq!(document.imports[1].path, "mixins/region");
        assert_eq!(
            document.imports[1].context.get("region"),
            Some(&Value::from("us-east-2"))
        );
        assert!(document.imports[1].skip_if_missing);
    }

    #[test]
    fn empty_document_is_an_empty_mapping() {
        let document = config_document!("");
        assert_eq!(document.tree, Value::object());
    }

    #[test]
    fn import_context_must_be_a_mapping() {
        let result = ConfigDocument::parse(
            "bad.yaml",
            "import: [{path: a, context: [1]}]",
            DocumentFormat::Yaml,
        );
        assert!(matches!(result, Err(LoadError::InvalidImport(_))));
    }

    #[test]
    fn unknown_tags_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, "vars:\n  a: !unknown.tag x\n").unwrap();

        let error = DocumentStore::default().load(&path).unwrap_err();
        assert!(
            matches!(&error, Error::UnknownTag { tag, path, .. } if tag == "unknown.tag" && path == "vars.a"),
            "{error:?}"
        );
    }

    #[test]
    fn documents_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, "vars: {a: 1}").unwrap();

        let store = DocumentStore::default();
        let first = store.load(&path).unwrap();
        let second = store.load(&dir.path().join("./stack.yaml")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }
}
