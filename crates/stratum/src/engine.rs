//! the engine: configuration, collaborators and the caches shared by every request
//!
//! Documents and stacks are loaded once per engine and shared read-only afterwards. Component
//! resolution is request scoped, see [Resolution].
use crate::collaborators::Collaborators;
use crate::component::{self, ComponentRef, ResolvedComponentConfig};
use crate::config::EngineConfig;
use crate::document::DocumentStore;
use crate::error::{Error, Result};
use crate::resolution::{ComponentKey, DependencyEdge, Resolution};
use crate::stack::{self, ResolvedStack, StackFailure, StackSet};
use crate::value::Value;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    config: EngineConfig,
    collaborators: Collaborators,
    documents: DocumentStore,
    stacks: RwLock<Option<Arc<StackSet>>>,
}

/// Result of resolving one component during a batch
#[derive(Debug)]
pub enum Outcome {
    Resolved,
    Failed(Error),
    /// skipped after cancellation
    Cancelled,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(ComponentRef, Outcome)>,
    /// stacks that could not be loaded, none of their components were resolved
    pub broken_stacks: Vec<StackFailure>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = (&ComponentRef, &Error)> {
        self.outcomes.iter().filter_map(|(component, outcome)| match outcome {
            Outcome::Failed(error) => Some((component, error)),
            _ => None,
        })
    }

    pub fn resolved(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Resolved))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Cancelled))
    }

    fn count(&self, filter: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| filter(outcome))
            .count()
    }

    /// Every stack loaded and every component resolved
    pub fn is_success(&self) -> bool {
        self.broken_stacks.is_empty() && self.resolved() == self.outcomes.len()
    }
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                collaborators,
                documents: DocumentStore::default(),
                stacks: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.collaborators
    }

    /// Every stack, loaded on first use
    ///
    /// Only an invalid stack discovery configuration is an error here, manifests failing to
    /// load are part of the set.
    pub fn stacks(&self) -> Result<Arc<StackSet>> {
        if let Some(stacks) = self
            .inner
            .stacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(stacks.clone());
        }

        let stacks = Arc::new(stack::load_all(
            &self.inner.config,
            &self.inner.documents,
            &self.inner.collaborators,
        )?);

        let mut cache = self
            .inner
            .stacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(cache.get_or_insert(stacks).clone())
    }

    pub fn list_stacks(&self) -> Result<Vec<String>> {
        Ok(self.stacks()?.names().cloned().collect())
    }

    pub fn resolve_stack(&self, name: &str) -> Result<Arc<ResolvedStack>> {
        self.stacks()?.get(name)
    }

    /// A fresh request scope
    pub fn resolution(&self) -> Arc<Resolution> {
        Resolution::new(self.clone())
    }

    pub fn resolve_component(
        &self,
        component: &str,
        stack: &str,
    ) -> Result<Arc<ResolvedComponentConfig>> {
        self.resolution()
            .resolve(&ComponentKey::new(component, stack))
    }

    /// Like [Engine::resolve_component], also returns the dependencies discovered on the way
    pub fn resolve_component_with_dependencies(
        &self,
        component: &str,
        stack: &str,
    ) -> Result<(Arc<ResolvedComponentConfig>, Vec<DependencyEdge>)> {
        let resolution = self.resolution();
        let resolved = resolution.resolve(&ComponentKey::new(component, stack))?;
        Ok((resolved, resolution.edges()))
    }

    /// Components that can be deployed, of one stack or of all of them
    pub fn list_deployable_components(&self, stack: Option<&str>) -> Result<Vec<ComponentRef>> {
        match stack {
            Some(name) => Ok(component::deployable_components(&*self.resolve_stack(name)?)),
            None => Ok(self
                .stacks()?
                .stacks
                .values()
                .flat_map(|stack| component::deployable_components(stack))
                .collect()),
        }
    }

    /// Evaluated locals of every document of a stack that declares some
    pub fn describe_locals(&self, stack: &str) -> Result<IndexMap<PathBuf, Value>> {
        let stack = self.resolve_stack(stack)?;
        Ok(stack
            .sources
            .iter()
            .filter(|source| !source.locals.is_empty())
            .map(|source| (source.document.path.clone(), source.locals.to_value()))
            .collect())
    }

    /// Resolve every deployable component on the worker pool
    ///
    /// A failing component does not stop the batch, stacks that failed to load are reported
    /// next to the components. Once `cancel` is set, the remaining components are reported as
    /// cancelled.
    pub fn validate_all(&self, cancel: &AtomicBool) -> Result<BatchReport> {
        let broken_stacks = self.stacks()?.failures.clone();
        let components = self.list_deployable_components(None)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.inner.config.settings.workers)
            .build()
            .map_err(|e| Error::Config(format!("unable to start the worker pool: {e}")))?;

        let outcomes = pool.install(|| {
            components
                .into_par_iter()
                .map(|component| {
                    if cancel.load(Ordering::Relaxed) {
                        return (component, Outcome::Cancelled);
                    }

                    let outcome = match self
                        .resolve_component(&component.component, &component.stack)
                    {
                        Ok(_) => Outcome::Resolved,
                        Err(error) => {
                            tracing::debug!(
                                component = %component.key(),
                                %error,
                                "resolution failed"
                            );
                            Outcome::Failed(error)
                        }
                    };
                    (component, outcome)
                })
                .collect()
        });

        Ok(BatchReport {
            outcomes,
            broken_stacks,
        })
    }
}
