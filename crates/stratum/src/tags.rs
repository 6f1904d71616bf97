//! custom tags (`!env HOME`, `!terraform.output vpc .vpc_id`, ...)
//!
//! Tags are kept as [TagValue]s through loading and merging and evaluated in the template
//! pass, after their argument was rendered. The set of tags is closed, documents using
//! anything else are rejected when loaded.
use crate::collaborators::{Collaborators, OutputLookup};
use crate::document::{is_remote, LoadError};
use crate::error::{Error, Result, Unavailable};
use crate::resolution::{ComponentKey, Resolution};
use crate::value::{TagValue, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const KNOWN_TAGS: &[&str] = &[
    "literal",
    "template",
    "env",
    "include",
    "include.raw",
    "repo-root",
    "exec",
    "terraform.output",
    "terraform.state",
];

pub struct TagEvaluator<'a> {
    collaborators: &'a Collaborators,
    /// `!include` paths and `!exec` commands are relative to this directory
    base_dir: &'a Path,
    lookups: Option<(&'a Arc<Resolution>, &'a ComponentKey)>,
}

impl<'a> TagEvaluator<'a> {
    /// Evaluator for tags that do not need other components
    pub fn new(collaborators: &'a Collaborators, base_dir: &'a Path) -> Self {
        Self {
            collaborators,
            base_dir,
            lookups: None,
        }
    }

    /// Evaluator for the tags of `consumer`, `!terraform.output` goes through `resolution`
    pub fn with_lookups(
        collaborators: &'a Collaborators,
        base_dir: &'a Path,
        resolution: &'a Arc<Resolution>,
        consumer: &'a ComponentKey,
    ) -> Self {
        Self {
            collaborators,
            base_dir,
            lookups: Some((resolution, consumer)),
        }
    }

    /// Evaluates a tag whose argument is already rendered
    pub fn evaluate(&self, tag: &TagValue, path: &str) -> Result<Value> {
        tracing::trace!(%tag, path, "evaluating tag");
        let argument = tag.argument.as_str();

        match tag.name.as_str() {
            "literal" => Ok(Value::from(argument)),
            "template" => Ok(decode_json(argument).unwrap_or_else(|| Value::from(argument))),
            "env" => Ok(environment_variable(argument)),
            "include" => self.include(tag, path, read_included),
            "include.raw" => self.include(tag, path, |file| {
                Ok(Value::String(std::fs::read_to_string(file)?))
            }),
            "repo-root" => self.repo_root(argument, path),
            "exec" => self.exec(argument),
            "terraform.output" | "terraform.state" => self.component_output(tag, path),
            other => Err(Error::UnknownTag {
                tag: other.to_string(),
                path: path.to_string(),
                document: self.base_dir.display().to_string(),
            }),
        }
    }

    /// `read` decodes the included file
    fn include(
        &self,
        tag: &TagValue,
        path: &str,
        read: impl Fn(&Path) -> std::result::Result<Value, LoadError>,
    ) -> Result<Value> {
        let argument = tag.argument.trim();
        if argument.is_empty() {
            return Err(invalid_argument(&tag.name, path, "a path is required"));
        }

        let file = if is_remote(argument) {
            self.collaborators
                .fetcher
                .fetch(argument)
                .map_err(|source| Error::Collaborator {
                    collaborator: "fetch",
                    target: argument.to_string(),
                    source,
                })?
        } else {
            self.base_dir.join(argument)
        };

        read(&file).map_err(|source| Error::Load { path: file, source })
    }

    /// Root of the git repository containing the base directory, the argument is the default
    fn repo_root(&self, argument: &str, path: &str) -> Result<Value> {
        let default = unquote(argument.trim());
        if let Some(root) = find_repo_root(self.base_dir) {
            return Ok(Value::from(root.display().to_string()));
        }

        if default.is_empty() {
            return Err(invalid_argument(
                "repo-root",
                path,
                format!("{} is not inside a git repository", self.base_dir.display()),
            ));
        }
        Ok(Value::from(default))
    }

    fn exec(&self, command: &str) -> Result<Value> {
        let stdout = self
            .collaborators
            .runner
            .run(command, self.base_dir)
            .map_err(|source| Error::Collaborator {
                collaborator: "exec",
                target: command.to_string(),
                source,
            })?;

        let stdout = stdout.trim();
        Ok(decode_json(stdout).unwrap_or_else(|| Value::from(stdout)))
    }

    /// `!terraform.output` and `!terraform.state`, both read through the output reader
    fn component_output(&self, tag: &TagValue, path: &str) -> Result<Value> {
        let Some((resolution, consumer)) = self.lookups else {
            return Err(invalid_argument(
                &tag.name,
                path,
                "component lookups are not available here",
            ));
        };

        let request = OutputRequest::parse(&tag.argument, &consumer.stack)
            .map_err(|reason| invalid_argument(&tag.name, path, reason))?;

        // resolving the producer first detects cycles between components
        resolution.lookup(consumer, &request.producer)?;

        let found = match resolution.read_output(&request.producer, &request.key)? {
            OutputLookup::Found(value) => {
                navigate(value, &request.rest).ok_or(Unavailable::KeyNotFound)
            }
            OutputLookup::NotProvisioned => Err(Unavailable::NotProvisioned),
            OutputLookup::KeyNotFound => Err(Unavailable::KeyNotFound),
        };

        match (found, request.default) {
            (Ok(value), _) => Ok(value),
            (Err(reason), Some(default)) => {
                tracing::debug!(
                    producer = %request.producer,
                    key = %request.key,
                    %reason,
                    "using default output"
                );
                Ok(default)
            }
            (Err(reason), None) => Err(Error::OutputUnavailable {
                producer: request.producer,
                key: request.key,
                reason,
            }),
        }
    }
}

fn invalid_argument(tag: &str, path: &str, reason: impl Into<String>) -> Error {
    Error::InvalidTagArgument {
        tag: tag.to_string(),
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn decode_json(source: &str) -> Option<Value> {
    serde_json::from_str::<serde_json::Value>(source)
        .ok()
        .map(Value::from)
}

/// `NAME` or `NAME default`, the default may be quoted
fn environment_variable(argument: &str) -> Value {
    let argument = argument.trim();
    let (name, default) = match argument.split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(unquote(default.trim()))),
        None => (argument, None),
    };

    match std::env::var(name) {
        Ok(value) => Value::from(value),
        Err(_) => default.map(Value::from).unwrap_or(Value::Null),
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    let mut current = Some(start.as_path());

    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

fn read_included(file: &Path) -> std::result::Result<Value, LoadError> {
    let contents = std::fs::read_to_string(file)?;

    Ok(match file.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(&contents)?;
            Value::try_from(yaml)?
        }
        Some("json") => serde_json::from_str::<serde_json::Value>(&contents)?.into(),
        Some("hcl") => crate::hcl_manifest::parse(&contents)?,
        _ => Value::String(contents),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parsed argument of `!terraform.output`
#[derive(Debug, PartialEq)]
struct OutputRequest {
    producer: ComponentKey,
    /// output name
    key: String,
    /// path inside the output value
    rest: Vec<Segment>,
    default: Option<Value>,
}

impl OutputRequest {
    /// `component [stack] expression [// default]`
    fn parse(argument: &str, current_stack: &str) -> std::result::Result<Self, String> {
        let (head, default) = match argument.split_once("//") {
            Some((head, default)) => {
                let default = default.trim();
                let value = decode_json(default).unwrap_or_else(|| Value::from(default));
                (head, Some(value))
            }
            None => (argument, None),
        };

        let tokens: Vec<&str> = head.split_whitespace().collect();
        let (component, stack, expression) = match tokens.as_slice() {
            [component, expression] => (*component, current_stack, *expression),
            [component, stack, expression] => (*component, *stack, *expression),
            _ => {
                return Err(format!(
                    "expected 'component [stack] expression', found '{}'",
                    head.trim()
                ))
            }
        };

        let mut segments = parse_path(expression)?.into_iter();
        let Some(Segment::Key(key)) = segments.next() else {
            return Err(format!("'{expression}' must start with an output name"));
        };

        Ok(Self {
            producer: ComponentKey::new(component, stack),
            key,
            rest: segments.collect(),
            default,
        })
    }
}

/// `.a.b[0]` (or `a.b[0]`) into segments
fn parse_path(expression: &str) -> std::result::Result<Vec<Segment>, String> {
    let mut segments = vec![];
    let mut rest = expression.strip_prefix('.').unwrap_or(expression);

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let Some((index, after)) = after.split_once(']') else {
                return Err(format!("unclosed '[' in '{expression}'"));
            };
            let index = index
                .parse()
                .map_err(|_| format!("invalid index '{index}' in '{expression}'"))?;
            segments.push(Segment::Index(index));
            rest = after.strip_prefix('.').unwrap_or(after);
            continue;
        }

        let end = rest.find(['.', '[']).unwrap_or(rest.len());
        if end == 0 {
            return Err(format!("empty key in '{expression}'"));
        }
        segments.push(Segment::Key(rest[..end].to_string()));
        rest = &rest[end..];
        rest = rest.strip_prefix('.').unwrap_or(rest);
    }

    if segments.is_empty() {
        return Err("an output name is required".to_string());
    }
    Ok(segments)
}

fn navigate(value: Value, segments: &[Segment]) -> Option<Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| match (current, segment) {
            (Value::Object(mut object), Segment::Key(key)) => object.shift_remove(key),
            (Value::Array(mut array), Segment::Index(index)) if *index < array.len() => {
                Some(array.swap_remove(*index))
            }
            _ => None,
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::{CollaboratorError, CommandRunner};
    use pretty_assertions::assert_eq;

    fn evaluate(name: &str, argument: &str) -> Result<Value> {
        let collaborators = Collaborators::default();
        TagEvaluator::new(&collaborators, Path::new("."))
            .evaluate(&TagValue::new(name, argument), "a.b")
    }

    #[test]
    fn literal_and_template() {
        assert_eq!(
            evaluate("literal", "{{ not rendered }}").unwrap(),
            Value::from("{{ not rendered }}")
        );
        assert_eq!(
            evaluate("template", r#"{"a": [1, 2]}"#).unwrap(),
            Value::Object([("a".to_string(), Value::from(vec![1i64, 2]))].into())
        );
        assert_eq!(
            evaluate("template", "not json").unwrap(),
            Value::from("not json")
        );
    }

    #[test]
    fn env_with_defaults() {
        assert_eq!(evaluate("env", "STRATUM_TEST_SURELY_UNSET").unwrap(), Value::Null);
        assert_eq!(
            evaluate("env", "STRATUM_TEST_SURELY_UNSET 'some default'").unwrap(),
            Value::from("some default")
        );
        assert!(matches!(
            evaluate("env", "PATH").unwrap(),
            Value::String(path) if !path.is_empty()
        ));
    }

    #[test]
    fn include_decodes_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "cidr: 10.0.0.0/16").unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"zones": ["a", "b"]}"#).unwrap();
        std::fs::write(dir.path().join("c.txt"), "plain text\n").unwrap();

        let collaborators = Collaborators::default();
        let tags = TagEvaluator::new(&collaborators, dir.path());
        let include = |file: &str| tags.evaluate(&TagValue::new("include", file), "x");

        assert_eq!(
            include("a.yaml").unwrap().get("cidr"),
            Some(&Value::from("10.0.0.0/16"))
        );
        assert_eq!(
            include("b.json").unwrap().get("zones"),
            Some(&Value::from(vec!["a", "b"]))
        );
        assert_eq!(include("c.txt").unwrap(), Value::from("plain text\n"));
        assert!(matches!(include("missing.yaml"), Err(Error::Load { .. })));
    }

    struct Echo;

    impl CommandRunner for Echo {
        fn run(&self, command: &str, _: &Path) -> std::result::Result<String, CollaboratorError> {
            match command {
                "fail" => Err("exit status 1".into()),
                other => Ok(format!("{other}\n")),
            }
        }
    }

    #[test]
    fn exec_decodes_json_output() {
        let collaborators = Collaborators::default().with_runner(Echo);
        let tags = TagEvaluator::new(&collaborators, Path::new("."));
        let exec = |command: &str| tags.evaluate(&TagValue::new("exec", command), "x");

        assert_eq!(exec("42").unwrap(), Value::Integer(42));
        assert_eq!(exec("hello").unwrap(), Value::from("hello"));
        assert!(matches!(
            exec("fail"),
            Err(Error::Collaborator { collaborator: "exec", .. })
        ));
    }

    #[test]
    fn output_requests() {
        let request = OutputRequest::parse("vpc .subnets[1].id", "dev").unwrap();
        assert_eq!(request.producer, ComponentKey::new("vpc", "dev"));
        assert_eq!(request.key, "subnets");
        assert_eq!(
            request.rest,
            vec![Segment::Index(1), Segment::Key("id".to_string())]
        );
        assert_eq!(request.default, None);

        let request = OutputRequest::parse("vpc prod vpc_id // \"vpc-none\"", "dev").unwrap();
        assert_eq!(request.producer, ComponentKey::new("vpc", "prod"));
        assert_eq!(request.default, Some(Value::from("vpc-none")));

        assert!(OutputRequest::parse("vpc", "dev").is_err());
        assert!(OutputRequest::parse("vpc .a[x]", "dev").is_err());
    }

    #[test]
    fn navigation() {
        let value = crate::config_document!("subnets: [{id: a}, {id: b}]").tree;
        assert_eq!(
            navigate(
                value.clone(),
                &[
                    Segment::Key("subnets".into()),
                    Segment::Index(1),
                    Segment::Key("id".into())
                ]
            ),
            Some(Value::from("b"))
        );
        assert_eq!(navigate(value, &[Segment::Key("nope".into())]), None);
    }

    #[test]
    fn output_needs_lookups() {
        assert!(matches!(
            evaluate("terraform.output", "vpc .vpc_id"),
            Err(Error::InvalidTagArgument { reason, .. }) if reason.contains("not available")
        ));
        assert!(matches!(
            evaluate("terraform.state", "vpc .vpc_id"),
            Err(Error::InvalidTagArgument { tag, .. }) if tag == "terraform.state"
        ));
    }

    #[test]
    fn include_raw_keeps_the_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "cidr: 10.0.0.0/16\n").unwrap();

        let collaborators = Collaborators::default();
        let tags = TagEvaluator::new(&collaborators, dir.path());
        assert_eq!(
            tags.evaluate(&TagValue::new("include.raw", "a.yaml"), "x").unwrap(),
            Value::from("cidr: 10.0.0.0/16\n")
        );
        assert!(matches!(
            tags.evaluate(&TagValue::new("include.raw", "missing.txt"), "x"),
            Err(Error::Load { .. })
        ));
    }

    #[test]
    fn repo_root_walks_up_to_git() {
        let repository = tempfile::tempdir().unwrap();
        std::fs::create_dir(repository.path().join(".git")).unwrap();
        let stacks = repository.path().join("stacks/orgs");
        std::fs::create_dir_all(&stacks).unwrap();

        let collaborators = Collaborators::default();
        let root = repository.path().canonicalize().unwrap();
        assert_eq!(
            TagEvaluator::new(&collaborators, &stacks)
                .evaluate(&TagValue::new("repo-root", ""), "x")
                .unwrap(),
            Value::from(root.display().to_string())
        );

        let outside = tempfile::tempdir().unwrap();
        let tags = TagEvaluator::new(&collaborators, outside.path());
        assert_eq!(
            tags.evaluate(&TagValue::new("repo-root", "'/srv/infra'"), "x").unwrap(),
            Value::from("/srv/infra")
        );
        assert!(matches!(
            tags.evaluate(&TagValue::new("repo-root", ""), "x"),
            Err(Error::InvalidTagArgument { reason, .. }) if reason.contains("git repository")
        ));
    }
}
