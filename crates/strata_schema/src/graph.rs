//! The resolved dependency graph of a schema cache.
//!
//! Nodes are the consistent metadata objects. An edge runs from a dependent
//! object to the object providing the target it depends on. The graph is kept
//! as plain ordered maps so that two builds of the same document compare
//! equal; [`DependencyGraph::to_digraph`] gives a `petgraph` view for
//! traversals.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use serde::ser::{Serialize, Serializer};
use strata_metadata::{MetadataObjId, SchemaDependency, SchemaObjId};

use crate::context::CollectedObject;

/// Dependency edges between the objects of a schema cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<MetadataObjId, Vec<SchemaDependency>>,
    providers: BTreeMap<SchemaObjId, MetadataObjId>,
}

impl DependencyGraph {
    /// Builds the graph of a set of objects.
    pub fn new<'a>(objects: impl IntoIterator<Item = &'a CollectedObject>) -> Self {
        let mut graph = Self::default();
        for object in objects {
            graph.insert(object);
        }
        graph
    }

    /// Adds an object with its provided targets and outgoing edges.
    pub fn insert(&mut self, object: &CollectedObject) {
        for target in &object.provides {
            self.providers.insert(target.clone(), object.id.clone());
        }
        self.edges
            .entry(object.id.clone())
            .or_default()
            .extend(object.dependencies.iter().cloned());
    }

    /// Returns `true` if the object is a node of the graph.
    pub fn contains(&self, id: &MetadataObjId) -> bool {
        self.edges.contains_key(id)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if the graph has no objects.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Returns `true` if every edge targets something an object of the
    /// graph provides.
    pub fn is_closed(&self) -> bool {
        self.dangling().next().is_none()
    }

    /// Edges whose target no object provides.
    pub fn dangling(&self) -> impl Iterator<Item = (&MetadataObjId, &SchemaDependency)> {
        self.edges.iter().flat_map(move |(id, deps)| {
            deps.iter()
                .filter(move |d| !self.providers.contains_key(&d.target))
                .map(move |d| (id, d))
        })
    }

    /// Objects with at least one edge accepted by `matches`.
    pub fn direct_dependents(
        &self,
        matches: impl Fn(&SchemaDependency) -> bool,
    ) -> BTreeSet<MetadataObjId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.iter().any(&matches))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// A `petgraph` view of the graph, with a lookup from object to node.
    /// Edges point from dependent to provider and carry the edge reason.
    pub fn to_digraph(
        &self,
    ) -> (
        DiGraph<MetadataObjId, strata_metadata::DependencyReason>,
        BTreeMap<MetadataObjId, NodeIndex>,
    ) {
        let mut graph = DiGraph::new();
        let mut nodes = BTreeMap::new();
        for id in self.edges.keys() {
            nodes.insert(id.clone(), graph.add_node(id.clone()));
        }
        for (id, deps) in &self.edges {
            let from = nodes[id];
            for dep in deps {
                let provider = self.providers.get(&dep.target).and_then(|p| nodes.get(p));
                if let Some(&to) = provider {
                    if to != from {
                        graph.add_edge(from, to, dep.reason);
                    }
                }
            }
        }
        (graph, nodes)
    }

    /// Every object that depends, directly or through other objects, on one
    /// of `roots`. The roots themselves are not included.
    pub fn transitive_dependents(
        &self,
        roots: &BTreeSet<MetadataObjId>,
    ) -> BTreeSet<MetadataObjId> {
        let (graph, nodes) = self.to_digraph();
        let reversed = Reversed(&graph);
        let mut found = BTreeSet::new();
        for root in roots {
            let Some(&start) = nodes.get(root) else {
                continue;
            };
            let mut bfs = Bfs::new(reversed, start);
            while let Some(node) = bfs.next(reversed) {
                let id = &graph[node];
                if !roots.contains(id) {
                    found.insert(id.clone());
                }
            }
        }
        found
    }
}

#[derive(serde::Serialize)]
struct Entry<'a> {
    object: &'a MetadataObjId,
    dependencies: &'a [SchemaDependency],
}

impl Serialize for DependencyGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.edges.iter().map(|(object, deps)| Entry {
            object,
            dependencies: deps,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::SourceName;
    use strata_metadata::DependencyReason;

    fn table(name: &str) -> MetadataObjId {
        MetadataObjId::Table {
            source: "default".into(),
            table: name.into(),
        }
    }

    fn object(id: MetadataObjId, provides: Vec<SchemaObjId>, on: &[&str]) -> CollectedObject {
        CollectedObject {
            id,
            provides,
            dependencies: on
                .iter()
                .map(|t| {
                    SchemaDependency::new(
                        SchemaObjId::table_of(&"default".into(), &(*t).into()),
                        DependencyReason::RemoteTable,
                    )
                })
                .collect(),
        }
    }

    fn chain() -> DependencyGraph {
        let source = SourceName::new("default");
        let a = object(table("a"), vec![SchemaObjId::table_of(&source, &"a".into())], &[]);
        let b = object(table("b"), vec![SchemaObjId::table_of(&source, &"b".into())], &["a"]);
        let c = object(table("c"), Vec::new(), &["b"]);
        DependencyGraph::new([&a, &b, &c])
    }

    #[test]
    fn transitive_dependents_follow_reversed_edges() {
        let graph = chain();
        let roots: BTreeSet<_> = [table("a")].into_iter().collect();
        let found = graph.transitive_dependents(&roots);
        assert_eq!(found, [table("b"), table("c")].into_iter().collect());
        assert!(graph.is_closed());
    }

    #[test]
    fn direct_dependents_filter_edges() {
        let graph = chain();
        let a = SchemaObjId::table_of(&"default".into(), &"a".into());
        let found = graph.direct_dependents(|d| d.target == a);
        assert_eq!(found, [table("b")].into_iter().collect());
    }

    #[test]
    fn dangling_edges_break_closure() {
        let orphan = object(table("x"), Vec::new(), &["missing"]);
        let graph = DependencyGraph::new([&orphan]);
        assert!(!graph.is_closed());
        assert_eq!(graph.dangling().count(), 1);
    }

    #[test]
    fn serializes_as_list() {
        let json = serde_json::to_value(chain()).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(3));
    }
}
