//! A typed DAG of tasks with validation, device mapping, GPU-path expansion
//! and a JSON round-trip.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::graph::{Edge, Graph, NodeIndex};
use crate::registry::TaskRegistry;
use crate::resources::GpuNode;
use crate::task::{Task, TaskMode};
use crate::error::{Error, Result};

/*
 * ChangeLog:
 * - 1.1: Add "index" and "total" keys to the root object
 */
const JSON_API_VERSION: &str = "1.1";

/// A directed acyclic graph of tasks ready for execution.
pub struct TaskGraph {
    graph: Graph<Box<dyn Task>>,
    prop_sets: HashMap<String, Map<String, Value>>,
    index: u32,
    total: u32,
}

impl TaskGraph {
    pub fn new() -> TaskGraph {
        TaskGraph {
            graph: Graph::new(),
            prop_sets: HashMap::new(),
            index: 0,
            total: 1,
        }
    }

    /// Reads a JSON description from `filename`, resolving plugin names
    /// through `registry`.
    pub fn read_from_file<P: AsRef<Path>>(filename: P, registry: &TaskRegistry)
            -> Result<TaskGraph> {
        let data = fs::read_to_string(filename)?;
        TaskGraph::read_from_data(&data, registry)
    }

    /// Builds a graph from a JSON string.
    pub fn read_from_data(data: &str, registry: &TaskRegistry) -> Result<TaskGraph> {
        let root: Value = serde_json::from_str(data)?;
        let object = root.as_object()
            .ok_or_else(|| Error::Graph("graph JSON root must be an object".into()))?;

        let mut graph = TaskGraph::new();

        if let (Some(index), Some(total)) =
                (object.get("index").and_then(Value::as_u64),
                 object.get("total").and_then(Value::as_u64)) {
            graph.set_partition(index as u32, total as u32)?;
        }

        if let Some(sets) = object.get("prop-sets") {
            let sets = sets.as_object()
                .ok_or_else(|| Error::Graph("`prop-sets' must be an object".into()))?;

            for (name, set) in sets {
                let set = set.as_object()
                    .ok_or_else(|| Error::Graph(format!(
                        "property set `{}' must be an object", name)))?;
                graph.prop_sets.insert(name.clone(), set.clone());
            }
        }

        let mut by_name: HashMap<String, NodeIndex> = HashMap::new();

        if let Some(nodes) = object.get("nodes") {
            let nodes = nodes.as_array()
                .ok_or_else(|| Error::Graph("`nodes' must be an array".into()))?;

            for node in nodes {
                let task = create_node_from_json(node, registry, &graph.prop_sets)?;
                let name = task.node().identifier().to_string();

                if by_name.contains_key(&name) {
                    return Err(Error::Graph(format!("duplicate name `{}' found", name)));
                }

                by_name.insert(name, graph.graph.add_node(task));
            }

            /* Edges only make sense once there are nodes. */
            if let Some(edges) = object.get("edges") {
                let edges = edges.as_array()
                    .ok_or_else(|| Error::Graph("`edges' must be an array".into()))?;

                for edge in edges {
                    graph.add_edge_from_json(edge, &by_name)?;
                }
            }
        }

        Ok(graph)
    }

    fn add_edge_from_json(&mut self, edge: &Value, by_name: &HashMap<String, NodeIndex>)
            -> Result<()> {
        let endpoint_name = |edge: &Value, key: &str| -> Result<String> {
            edge.get(key)
                .ok_or_else(|| Error::Graph(format!("edge does not have `{}' key", key)))?
                .get("name")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| Error::Graph(format!(
                    "`{}' node does not have a `name' key", key)))
        };

        let from_name = endpoint_name(edge, "from")?;
        let to_name = endpoint_name(edge, "to")?;
        let port = edge.get("to")
            .and_then(|to| to.get("input"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        let from = *by_name.get(&from_name)
            .ok_or_else(|| Error::Graph(format!("no task `{}' defined", from_name)))?;
        let to = *by_name.get(&to_name)
            .ok_or_else(|| Error::Graph(format!("no task `{}' defined", to_name)))?;

        self.connect_nodes_full(from, to, port);
        Ok(())
    }

    /// Saves the graph's JSON description to `filename`.
    pub fn save_to_json<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        fs::write(filename, self.json_data()?)?;
        Ok(())
    }

    /// The JSON description of this graph as a string.
    pub fn json_data(&self) -> Result<String> {
        let nodes: Vec<Value> = self.graph.nodes().iter()
            .map(|task| {
                let mut object = Map::new();
                let node = task.node();

                object.insert("plugin".into(), Value::from(node.plugin_name()));

                if let Some(package) = node.package_name() {
                    object.insert("package".into(), Value::from(package));
                }

                object.insert("name".into(), Value::from(node.identifier()));
                object.insert("properties".into(), Value::Object(task.properties()));
                Value::Object(object)
            })
            .collect();

        let edges: Vec<Value> = self.graph.edges().iter()
            .map(|edge| {
                let from = self.graph.node(edge.source).node().identifier();
                let to = self.graph.node(edge.target).node().identifier();
                json!({
                    "from": { "name": from },
                    "to": { "name": to, "input": edge.label },
                })
            })
            .collect();

        let root = json!({
            "version": JSON_API_VERSION,
            "nodes": nodes,
            "edges": edges,
            "index": self.index,
            "total": self.total,
        });

        Ok(serde_json::to_string_pretty(&root)?)
    }

    pub fn add_node(&mut self, task: Box<dyn Task>) -> NodeIndex {
        self.graph.add_node(task)
    }

    /// Connects `source` with `target` using the target's default input
    /// port.
    pub fn connect_nodes(&mut self, source: NodeIndex, target: NodeIndex) {
        self.connect_nodes_full(source, target, 0);
    }

    /// Connects `source` with the given input port of `target`. Connecting
    /// an identical `(source, target, port)` triple twice is a no-op.
    pub fn connect_nodes_full(&mut self, source: NodeIndex, target: NodeIndex, port: u32) {
        self.graph.connect(source, target, port);
    }

    pub fn task(&self, index: NodeIndex) -> &dyn Task {
        self.graph.node(index).as_ref()
    }

    pub fn task_mut(&mut self, index: NodeIndex) -> &mut (dyn Task + 'static) {
        self.graph.node_mut(index).as_mut()
    }

    pub fn tasks_mut(&mut self) -> &mut [Box<dyn Task>] {
        self.graph.nodes_mut()
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn edges(&self) -> &[Edge] {
        self.graph.edges()
    }

    pub fn graph(&self) -> &Graph<Box<dyn Task>> {
        &self.graph
    }

    /// Finds the node index of the task named `identifier`.
    pub fn find_node(&self, identifier: &str) -> Option<NodeIndex> {
        self.graph.nodes().iter()
            .position(|task| task.node().identifier() == identifier)
    }

    /// Finds the first node instantiated from the given plugin.
    pub fn find_node_by_plugin(&self, plugin: &str) -> Option<NodeIndex> {
        self.graph.nodes().iter()
            .position(|task| task.node().plugin_name() == plugin)
    }

    /// Checks the structural invariants: the graph must be acyclic and every
    /// leaf must be a sink task. A node fed by both processor and reductor
    /// outputs is reported as a warning because such graphs may deadlock.
    pub fn is_alright(&self) -> Result<()> {
        if self.graph.topological_order().is_none() {
            return Err(Error::Graph("task graph contains a cycle".into()));
        }

        for node in 0..self.graph.num_nodes() {
            let predecessors = self.graph.predecessors(node);

            if predecessors.len() > 1 {
                let mut combined = TaskMode::empty();

                for pred in predecessors {
                    combined |= self.graph.node(pred).mode() & TaskMode::TYPE_MASK;
                }

                if combined.contains(TaskMode::PROCESSOR) && combined.contains(TaskMode::REDUCTOR) {
                    warn!("`{}' receives both processor and reductor inputs which may deadlock",
                        self.graph.node(node).node().plugin_name());
                }
            }
        }

        for leaf in self.graph.leaves() {
            let task = self.graph.node(leaf);

            if !task.mode().is_sink() {
                return Err(Error::Graph(format!(
                    "`{}' is a leaf node but not a sink task", task.node().plugin_name())));
            }
        }

        Ok(())
    }

    /// Duplicates the longest GPU-only path so that up to `n_workers`
    /// parallel copies share the path's boundary predecessor and successor.
    ///
    /// Paths touching a node with more than one input are left alone because
    /// the input streams of the copies could not be associated reliably.
    pub fn expand(&mut self, n_workers: usize) {
        let path = self.graph.longest_path(|task| task.mode().uses_gpu());

        if path.is_empty() {
            return;
        }

        if path.iter().any(|&node| self.graph.num_predecessors(node) > 1) {
            return;
        }

        let mut full = path;

        if let Some(&pred) = self.graph.predecessors(full[0]).first() {
            full.insert(0, pred);
        }

        if let Some(&succ) = self.graph.successors(full[full.len() - 1]).first() {
            full.push(succ);
        }

        debug!("expanding for {} workers", n_workers);

        for _ in 1..n_workers {
            self.graph.expand(&full, |task| task.duplicate());
        }
    }

    /// Walks the graph breadth-first from every root and assigns each
    /// GPU-using task without a processing node one of `gpu_nodes`, cycling
    /// through the list.
    pub fn map(&mut self, gpu_nodes: &[GpuNode]) {
        if gpu_nodes.is_empty() {
            return;
        }

        for root in self.graph.roots() {
            self.map_proc_node(root, 0, gpu_nodes);
        }
    }

    fn map_proc_node(&mut self, node: NodeIndex, proc_index: usize, gpu_nodes: &[GpuNode]) {
        let task = self.graph.node_mut(node);

        if task.mode().uses_gpu() && task.node().proc_node().is_none() {
            debug!("mapping GPU {} to {}", proc_index, task.node().identifier());
            task.node_mut().set_proc_node(gpu_nodes[proc_index].clone());
        }

        let mut proc_index = proc_index;

        for succ in self.graph.successors(node) {
            self.map_proc_node(succ, proc_index, gpu_nodes);
            proc_index = (proc_index + 1) % gpu_nodes.len();
        }
    }

    /// Deep-copies the graph by duplicating every task.
    pub fn copy(&self) -> TaskGraph {
        TaskGraph {
            graph: self.graph.copy(|task| task.duplicate()),
            prop_sets: self.prop_sets.clone(),
            index: self.index,
            total: self.total,
        }
    }

    /// Marks this graph as fragment `index` of `total` cooperating graph
    /// instances.
    pub fn set_partition(&mut self, index: u32, total: u32) -> Result<()> {
        if index >= total {
            return Err(Error::Graph(format!(
                "partition index {} is not below total {}", index, total)));
        }

        self.index = index;
        self.total = total;
        Ok(())
    }

    pub fn get_partition(&self) -> (u32, u32) {
        (self.index, self.total)
    }
}

impl Default for TaskGraph {
    fn default() -> TaskGraph {
        TaskGraph::new()
    }
}

fn create_node_from_json(node: &Value, registry: &TaskRegistry,
        prop_sets: &HashMap<String, Map<String, Value>>) -> Result<Box<dyn Task>> {
    let object = node.as_object()
        .ok_or_else(|| Error::Graph("node entries must be objects".into()))?;

    let plugin = object.get("plugin").and_then(Value::as_str)
        .ok_or_else(|| Error::Graph("node does not have a `plugin' key".into()))?;
    let name = object.get("name").and_then(Value::as_str)
        .ok_or_else(|| Error::Graph("node does not have a `name' key".into()))?;

    let mut task = registry.get_task(plugin)?;
    task.node_mut().set_identifier(name);

    if let Some(package) = object.get("package").and_then(Value::as_str) {
        task.node_mut().set_package_name(package);
    }

    let mut properties: Map<String, Value> = Map::new();

    if let Some(refs) = object.get("prop-refs").and_then(Value::as_array) {
        for reference in refs {
            let reference = reference.as_str().ok_or_else(|| Error::Graph(
                "`prop-refs' entries must be strings".into()))?;

            match prop_sets.get(reference) {
                Some(set) => properties.extend(set.clone()),
                None => warn!("no property set `{}' found in `prop-sets'", reference),
            }
        }
    }

    if let Some(props) = object.get("properties").and_then(Value::as_object) {
        properties.extend(props.clone());
    }

    for (key, value) in &properties {
        let is_nested_task = value.as_object()
            .map(|object| object.contains_key("plugin"))
            .unwrap_or(false);

        if is_nested_task {
            let inner = create_node_from_json(value, registry, prop_sets)?;
            task.set_task_property(key, inner)?;
        } else {
            task.set_property(key, value)?;
        }
    }

    Ok(task)
}
