//! Graph - parses flow descriptions and orders vertex builds

use super::context::Fields;
use super::vertex::Vertex;
use crate::components::ComponentRegistry;
use crate::error::{CycleError, GraphError};
use crate::sandbox::ComponentSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

/// Serialized flow: nodes plus the edges wiring their outputs to inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDescription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub edges: Vec<EdgeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub is_loop: bool,
    #[serde(default)]
    pub params: Fields,
    /// Edited source replacing the component's own
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub source: String,
    pub target: String,
    pub source_output: String,
    pub target_input: String,
}

/// Data dependency from one vertex output to another vertex input
pub type Edge = EdgeDescription;

/// Vertex graph of one flow
#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a flow description from a `.json`, `.yml` or `.yaml` file
    pub fn from_file(path: &Path, registry: &ComponentRegistry) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow {}", path.display()))?;

        let description: FlowDescription = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON flow {}", path.display()))?,
            _ => serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML flow {}", path.display()))?,
        };

        Ok(Self::from_description(description, registry)?)
    }

    pub fn from_description(
        description: FlowDescription,
        registry: &ComponentRegistry,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();

        for node in description.nodes {
            let component = registry.get(&node.component_type).ok_or_else(|| {
                GraphError::UnknownComponent {
                    vertex_id: node.id.clone(),
                    component_type: node.component_type.clone(),
                }
            })?;

            let display_name = node.display_name.unwrap_or_else(|| node.component_type.clone());
            let mut vertex = Vertex::new(node.id, node.component_type, display_name.as_str(), component)
                .with_frozen(node.frozen)
                .with_loop(node.is_loop)
                .with_params(node.params);
            if let Some(code) = node.code {
                vertex = vertex.with_source(ComponentSource::new(code, Some(display_name.as_str())));
            }
            graph.add_vertex(vertex)?;
        }

        for edge in description.edges {
            graph.add_edge(edge)?;
        }

        Ok(graph)
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<(), GraphError> {
        if self.index.contains_key(&vertex.id) {
            return Err(GraphError::DuplicateVertex(vertex.id));
        }
        self.index.insert(vertex.id.clone(), self.vertices.len());
        self.vertices.push(vertex);
        Ok(())
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let source = self
            .vertex(&edge.source)
            .ok_or_else(|| GraphError::UnknownVertex(edge.source.clone()))?;
        if !self.index.contains_key(&edge.target) {
            return Err(GraphError::UnknownVertex(edge.target.clone()));
        }
        if !source.outputs().contains(&edge.source_output) {
            return Err(GraphError::UnknownOutput {
                vertex_id: source.id.clone(),
                component_type: source.component_type.clone(),
                output: edge.source_output.clone(),
            });
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex(&self, id: &str) -> Option<&Vertex> {
        self.index.get(id).map(|&i| &self.vertices[i])
    }

    pub fn vertex_mut(&mut self, id: &str) -> Option<&mut Vertex> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.vertices[i]),
            None => None,
        }
    }

    /// Vertices in declaration order
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// An edge into a loop vertex from something the loop itself feeds
    pub fn is_feedback(&self, edge: &Edge) -> bool {
        self.vertex(&edge.target).map(|v| v.is_loop).unwrap_or(false)
            && self.reachable(&edge.target, &edge.source)
    }

    fn reachable(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for edge in self.edges.iter().filter(|e| e.source == current) {
                queue.push_back(edge.target.as_str());
            }
        }
        false
    }

    /// Edges that constrain build order
    fn ordering_edges(&self) -> Vec<&Edge> {
        self.edges.iter().filter(|e| !self.is_feedback(e)).collect()
    }

    /// Vertices that must be terminal before `id` may start
    pub fn predecessors(&self, id: &str) -> Vec<String> {
        self.predecessor_map().remove(id).unwrap_or_default()
    }

    /// Predecessors of every vertex from one pass over the ordering edges
    pub fn predecessor_map(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for edge in self.ordering_edges() {
            let found = map.entry(edge.target.clone()).or_default();
            if !found.contains(&edge.source) {
                found.push(edge.source.clone());
            }
        }
        map
    }

    pub fn successors(&self, id: &str) -> Vec<String> {
        let mut found = Vec::new();
        for edge in self.ordering_edges() {
            if edge.source == id && !found.contains(&edge.target) {
                found.push(edge.target.clone());
            }
        }
        found
    }

    /// Vertices nothing else depends on, in declaration order
    pub fn terminal_vertices(&self) -> Vec<String> {
        let sources: HashSet<&str> = self
            .ordering_edges()
            .into_iter()
            .map(|e| e.source.as_str())
            .collect();
        self.vertices
            .iter()
            .filter(|v| !sources.contains(v.id.as_str()))
            .map(|v| v.id.clone())
            .collect()
    }

    /// Topological order, ties broken by declaration order
    pub fn build_order(&self) -> Result<Vec<String>, CycleError> {
        let edges = self.ordering_edges();
        let mut in_degree = vec![0usize; self.vertices.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.vertices.len()];
        for edge in &edges {
            let (s, t) = (self.index[&edge.source], self.index[&edge.target]);
            outgoing[s].push(t);
            in_degree[t] += 1;
        }

        let mut ready: BTreeSet<usize> = (0..self.vertices.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(i) = ready.pop_first() {
            order.push(self.vertices[i].id.clone());
            for &t in &outgoing[i] {
                in_degree[t] -= 1;
                if in_degree[t] == 0 {
                    ready.insert(t);
                }
            }
        }

        if order.len() == self.vertices.len() {
            Ok(order)
        } else {
            Err(self.find_cycle(&edges, &in_degree))
        }
    }

    /// Walk backwards through unresolved vertices until one repeats
    fn find_cycle(&self, edges: &[&Edge], in_degree: &[usize]) -> CycleError {
        let stuck = |id: &str| in_degree[self.index[id]] > 0;
        let Some(start) = self.vertices.iter().find(|v| stuck(&v.id)) else {
            return CycleError { vertices: Vec::new() };
        };

        let mut path: Vec<String> = vec![start.id.clone()];
        loop {
            let Some(current) = path.last() else { break };
            let Some(prev) = edges
                .iter()
                .find(|e| &e.target == current && stuck(&e.source))
                .map(|e| e.source.clone())
            else {
                break;
            };
            if let Some(pos) = path.iter().position(|p| *p == prev) {
                let mut cycle = path.split_off(pos);
                cycle.reverse();
                return CycleError { vertices: cycle };
            }
            path.push(prev);
        }

        path.reverse();
        CycleError { vertices: path }
    }

    /// Resolve named inputs from predecessors' results
    ///
    /// Feedback edges contribute once their source has been built.
    pub fn inputs_for(&self, id: &str) -> Fields {
        let mut inputs = Fields::new();
        for edge in self.edges.iter().filter(|e| e.target == id) {
            if let Some(value) = self
                .vertex(&edge.source)
                .and_then(|v| v.results())
                .and_then(|r| r.get(&edge.source_output))
            {
                inputs.insert(edge.target_input.clone(), value.clone());
            }
        }
        inputs
    }

    /// Reset vertex state for a new scheduling pass
    pub fn begin_pass(&mut self) {
        for vertex in &mut self.vertices {
            vertex.begin_pass();
        }
    }
}
