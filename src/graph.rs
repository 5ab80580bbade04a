//! Dependency resolution over the registry.
//!
//! Edges point from a resource to what it depends on. Creation order is a
//! sequence of layers from Kahn's algorithm (each layer sorted by name for
//! reproducible output); deletion order is the reversed layer sequence.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::trace;

use crate::error::{Error, Result};
use crate::manifest::ResourceKey;
use crate::registry::Registry;

/// The chart's dependency DAG
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceKey, ()>,
    index: HashMap<ResourceKey, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from a registry.
    ///
    /// Fails if a declared dependency is absent from the registry or if the
    /// graph contains a cycle.
    pub fn build(registry: &Registry) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for key in registry.keys() {
            let node = graph.add_node(key.clone());
            index.insert(key.clone(), node);
        }

        for (from, to) in registry.dependency_edges() {
            let Some(&to_node) = index.get(&to) else {
                return Err(Error::dependency(format!(
                    "{from} depends on {to}, which is not declared in the chart"
                )));
            };
            // Node for `from` always exists: edges come from registry keys
            let from_node = index[&from];
            graph.update_edge(from_node, to_node, ());
            trace!(%from, %to, "dependency edge");
        }

        let built = Self { graph, index };
        built.check_acyclic()?;
        Ok(built)
    }

    /// Number of resources in the graph
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph is empty
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// DFS cycle detection with an explicit recursion stack set.
    ///
    /// Any back-edge is a cycle; the error names one of its members.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS; the stack holds (node, neighbour iterator state)
            let mut stack = vec![(start, self.graph.neighbors(start))];
            marks[start.index()] = Mark::InStack;
            while let Some((node, neighbours)) = stack.last_mut() {
                if let Some(next) = neighbours.next() {
                    match marks[next.index()] {
                        Mark::InStack => {
                            return Err(Error::dependency(format!(
                                "dependency cycle detected involving {}",
                                self.graph[next]
                            )));
                        }
                        Mark::Unvisited => {
                            marks[next.index()] = Mark::InStack;
                            stack.push((next, self.graph.neighbors(next)));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Creation order: layers of mutually independent resources.
    ///
    /// Kahn's algorithm; each pass emits the resources with no unsatisfied
    /// dependency, sorted lexicographically by name.
    pub fn creation_layers(&self) -> Vec<Vec<ResourceKey>> {
        // A node is ready once every outgoing "depends on" edge is satisfied
        let mut pending: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Outgoing).count()))
            .collect();

        let mut layers = Vec::new();
        while !pending.is_empty() {
            let mut ready: Vec<NodeIndex> = pending
                .iter()
                .filter(|(_, &count)| count == 0)
                .map(|(&node, _)| node)
                .collect();
            if ready.is_empty() {
                // Unreachable for graphs accepted by build(): only a cycle
                // leaves pending nodes with no ready candidate
                break;
            }
            ready.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

            for &node in &ready {
                pending.remove(&node);
                for dependant in self.graph.neighbors_directed(node, Direction::Incoming) {
                    if let Some(count) = pending.get_mut(&dependant) {
                        *count -= 1;
                    }
                }
            }
            layers.push(ready.iter().map(|&n| self.graph[n].clone()).collect());
        }
        layers
    }

    /// Deletion order: the creation layers reversed
    pub fn deletion_layers(&self) -> Vec<Vec<ResourceKey>> {
        let mut layers = self.creation_layers();
        layers.reverse();
        layers
    }

    /// The creation layer index a resource lands in
    pub fn layer_of(&self, key: &ResourceKey) -> Option<usize> {
        self.creation_layers()
            .iter()
            .position(|layer| layer.contains(key))
    }

    /// Direct dependencies of a resource
    pub fn dependencies_of(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let Some(&node) = self.index.get(key) else {
            return Vec::new();
        };
        let mut deps: Vec<ResourceKey> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        deps.sort();
        deps
    }
}
