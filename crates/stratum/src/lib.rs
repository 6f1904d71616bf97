//! # stratum - layered stack configuration
//!
//! ## Introduction for developers
//!
//! Read this to understand how `stratum` works internally.
//!
//! ### Terms
//!
//! - a `document` is one yaml (or hcl) file
//! - a `stack` is a top level document (the `manifest`) plus everything it imports, e.g. the
//!   configuration of one environment
//! - a `component` is a deployable unit (a terraform root module, a helmfile, ...) defined in
//!   `components.<type>.<name>` of a stack
//!
//! This is a valid stack manifest:
//! ```yaml
//! import:
//!   - catalog/vpc                 # stacks/catalog/vpc.yaml
//!   - path: mixins/region
//!     context: { region: us-east-2 }
//!
//! locals:
//!   prefix: "acme-{{ vars.stage }}"   # only visible in this file
//!
//! vars:
//!   stage: dev
//!
//! components:
//!   terraform:
//!     vpc:
//!       metadata:
//!         inherits: [vpc-defaults]
//!       vars:
//!         name: "{{ locals.prefix }}-vpc"
//!         cidr: !exec ./scripts/next-cidr.sh
//! ```
//!
//! ### Loading documents
//!
//! see [document::DocumentStore]
//!
//! Documents are parsed into [value::Value] trees. Custom yaml tags (`!exec`, `!env`, ...) are
//! kept as [value::TagValue]s and evaluated much later. The `import` list is split from the
//! tree. Documents are cached by path, every stack importing a catalog shares one instance.
//!
//! ### Building a stack
//!
//! see [stack::ResolvedStack::load]
//!
//! 1. [imports::ImportResolver] expands the imports depth-first into a merge sequence where
//!    every document comes after what it imports.
//! 2. Each document of the sequence evaluates its own `locals` ([locals::LocalsEvaluator]).
//!    Strings that only use locals or the import context are rendered right away, locals are
//!    then dropped. This keeps locals from leaking into other documents.
//! 3. [merge::merge_traced] merges the sequence. The [provenance::Trace] remembers which
//!    document set which key.
//!
//! ### Resolving a component
//!
//! see [component] and [resolution::Resolution]
//!
//! The merged stack tree is sliced into layers (globals, component type section, base
//! components, the definition, overrides) which are merged again. Then every template string
//! is rendered with [minijinja] and every tag is evaluated ([template::Renderer],
//! [tags::TagEvaluator]).
//!
//! Templates may look at other components (`atmos.Component("vpc").outputs.vpc_id`,
//! `!terraform.output vpc .vpc_id`). Those lookups recurse into the [resolution::Resolution]
//! of the request which
//! - resolves every component at most once
//! - detects cycles: a component that is already being resolved is requested again
//!
//! ```text
//! describe component eks -s dev
//!   eks@dev        in progress: [eks@dev]
//!   └── vpc@dev    in progress: [eks@dev, vpc@dev]
//!       └── eks@dev   -> circular component dependency: eks@dev → vpc@dev → eks@dev
//! ```
//!
//! ### Output
//!
//! [component::ResolvedComponentConfig] serializes via [serde]. With provenance enabled each
//! key lists the documents that contributed to it.
//!
//! ### External systems
//!
//! Fetching remote imports, reading outputs of applied components and running commands are
//! delegated to [collaborators].
pub mod collaborators;
pub mod component;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod hcl_manifest;
pub mod imports;
pub mod locals;
pub mod merge;
pub mod provenance;
pub mod resolution;
pub mod stack;
pub mod tags;
pub mod template;
mod util;
pub mod value;
mod visit;

pub use engine::Engine;
pub use error::{Error, Result};
