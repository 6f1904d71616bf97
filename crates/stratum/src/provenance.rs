//! where did a value come from
//!
//! A merge records a [Trace]: for each key path (`vars.tags.team`, `subnets[0].cidr`) the
//! ordered list of layer labels that set it. Stacks label layers with the document origin,
//! components label them with the section of the merged stack tree they were taken from.
//!
//! [Provenance] is the user facing form. Every entry names the document and the section
//! within the stack (`components.terraform.vpc.vars.cidr`) that contributed.
use crate::util::{child_path, is_below, parent_path};
use indexmap::IndexMap;

/// Raw merge trace: key path -> labels of the layers that set it (in merge order)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    entries: IndexMap<String, Vec<String>>,
}

impl Trace {
    pub fn record(&mut self, path: &str, label: &str) {
        let labels = self.entries.entry(path.to_string()).or_default();
        if labels.last().map(String::as_str) != Some(label) {
            labels.push(label.to_string());
        }
    }

    /// Forget everything recorded strictly below `path`
    pub fn clear_below(&mut self, path: &str) {
        self.entries
            .retain(|key, _| key == path || !is_below(key, path));
    }

    pub fn remove(&mut self, path: &str) {
        self.entries.shift_remove(path);
    }

    pub fn get(&self, path: &str) -> Option<&[String]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(path, labels)| (path.as_str(), labels.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProvenanceEntry {
    pub document: String,
    pub section: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Provenance {
    entries: IndexMap<String, Vec<ProvenanceEntry>>,
}

impl Provenance {
    /// A stack trace is labeled by document, the section is the key path itself
    pub fn from_stack_trace(trace: &Trace) -> Self {
        let entries = trace
            .iter()
            .map(|(path, documents)| {
                let contributors = documents
                    .iter()
                    .map(|document| ProvenanceEntry {
                        document: document.clone(),
                        section: path.to_string(),
                    })
                    .collect();
                (path.to_string(), contributors)
            })
            .collect();

        Self { entries }
    }

    /// Translate a component trace (labeled by stack section) through the stack's provenance
    ///
    /// A component key `vars.cidr` taken from section `components.terraform.vpc` is looked up
    /// as `components.terraform.vpc.vars.cidr` in the stack. When the stack recorded the value
    /// higher up (a whole list for example) the closest recorded ancestor is used.
    pub fn from_component_trace(trace: &Trace, stack: &Provenance) -> Self {
        let mut entries: IndexMap<String, Vec<ProvenanceEntry>> = IndexMap::new();

        for (path, sections) in trace.iter() {
            let contributors = entries.entry(path.to_string()).or_default();
            for section in sections {
                let stack_path = child_path(section, path);
                for entry in stack.closest(&stack_path) {
                    if !contributors.contains(entry) {
                        contributors.push(entry.clone());
                    }
                }
            }
        }

        Self { entries }
    }

    fn closest(&self, path: &str) -> &[ProvenanceEntry] {
        let mut current = Some(path);
        while let Some(path) = current {
            if let Some(entries) = self.entries.get(path) {
                return entries;
            }
            current = parent_path(path);
        }
        &[]
    }

    pub fn get(&self, path: &str) -> Option<&[ProvenanceEntry]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Documents that contributed to `path`, in merge order
    pub fn documents(&self, path: &str) -> Vec<&str> {
        self.get(path)
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.document.as_str())
            .collect()
    }

    /// Last document that set `path` or one of its ancestors
    pub fn defining_document(&self, path: &str) -> Option<&str> {
        self.closest(path).last().map(|entry| entry.document.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProvenanceEntry])> {
        self.entries
            .iter()
            .map(|(path, entries)| (path.as_str(), entries.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
