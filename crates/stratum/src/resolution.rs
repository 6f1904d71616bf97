//! request scoped component resolution
//!
//! A [Resolution] lives for one top level request (`describe component`, one pair of a batch
//! validation). It keeps
//! - the ordered path of components currently being resolved, re-entering one of them is a
//!   cycle
//! - the components resolved so far, so every component is resolved at most once
//! - the outputs read so far
//! - the dependency edges discovered through lookups
//!
//! Nothing is shared between requests.
use crate::collaborators::OutputLookup;
use crate::component::{self, ResolvedComponentConfig};
use crate::engine::Engine;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A component instance: component name plus stack name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ComponentKey {
    pub component: String,
    pub stack: String,
}

impl ComponentKey {
    pub fn new(component: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            stack: stack.into(),
        }
    }
}

impl std::fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.component, self.stack)
    }
}

/// `consumer` read the configuration or outputs of `producer`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DependencyEdge {
    pub consumer: ComponentKey,
    pub producer: ComponentKey,
}

#[derive(Debug)]
pub struct Resolution {
    engine: Engine,
    in_progress: Mutex<Vec<ComponentKey>>,
    resolved: Mutex<HashMap<ComponentKey, Arc<ResolvedComponentConfig>>>,
    outputs: Mutex<HashMap<(ComponentKey, String), OutputLookup>>,
    edges: Mutex<Vec<DependencyEdge>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Resolution {
    pub fn new(engine: Engine) -> Arc<Self> {
        Arc::new(Self {
            engine,
            in_progress: Default::default(),
            resolved: Default::default(),
            outputs: Default::default(),
            edges: Default::default(),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Resolve a component, or return it from the cache of this request
    pub fn resolve(self: &Arc<Self>, key: &ComponentKey) -> Result<Arc<ResolvedComponentConfig>> {
        if let Some(resolved) = lock(&self.resolved).get(key) {
            tracing::debug!(component=%key, "resolution cache hit");
            return Ok(resolved.clone());
        }

        {
            let mut in_progress = lock(&self.in_progress);
            if let Some(position) = in_progress.iter().position(|current| current == key) {
                let mut chain = in_progress[position..].to_vec();
                chain.push(key.clone());
                return Err(Error::CircularComponentDependency { chain });
            }
            in_progress.push(key.clone());
        }

        tracing::debug!(component=%key, "resolving component");
        let result = component::resolve(self, key);

        lock(&self.in_progress).retain(|current| current != key);

        let resolved = Arc::new(result?);
        lock(&self.resolved).insert(key.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Resolve `producer` on behalf of `consumer` and record the dependency
    pub fn lookup(
        self: &Arc<Self>,
        consumer: &ComponentKey,
        producer: &ComponentKey,
    ) -> Result<Arc<ResolvedComponentConfig>> {
        {
            let edge = DependencyEdge {
                consumer: consumer.clone(),
                producer: producer.clone(),
            };
            let mut edges = lock(&self.edges);
            if !edges.contains(&edge) {
                tracing::debug!(%consumer, %producer, "dependency discovered");
                edges.push(edge);
            }
        }

        self.resolve(producer)
    }

    /// Read an output of `producer`, every (component, stack, key) is read once per request
    pub fn read_output(&self, producer: &ComponentKey, key: &str) -> Result<OutputLookup> {
        let cache_key = (producer.clone(), key.to_string());
        if let Some(lookup) = lock(&self.outputs).get(&cache_key) {
            return Ok(lookup.clone());
        }

        let lookup = self
            .engine
            .collaborators()
            .outputs
            .read_output(&producer.component, &producer.stack, key)
            .map_err(|source| Error::Collaborator {
                collaborator: "output reader",
                target: format!("{producer} ({key})"),
                source,
            })?;

        lock(&self.outputs).insert(cache_key, lookup.clone());
        Ok(lookup)
    }

    /// Dependency edges discovered so far, in discovery order
    pub fn edges(&self) -> Vec<DependencyEdge> {
        lock(&self.edges).clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keys_display_as_component_at_stack() {
        assert_eq!(ComponentKey::new("vpc", "dev").to_string(), "vpc@dev");
    }

    #[test]
    fn keys_order_by_component_then_stack() {
        let mut keys = vec![
            ComponentKey::new("vpc", "prod"),
            ComponentKey::new("eks", "prod"),
            ComponentKey::new("vpc", "dev"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ComponentKey::new("eks", "prod"),
                ComponentKey::new("vpc", "dev"),
                ComponentKey::new("vpc", "prod"),
            ]
        );
    }
}
