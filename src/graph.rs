//! A generic directed graph over arbitrary node payloads.
//!
//! Nodes are addressed by index; edges carry an integer label which the task
//! layer interprets as the input port of the target node.

use std::collections::HashMap;

/// Index of a node within its graph.
pub type NodeIndex = usize;

/// A directed, labelled connection between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub label: u32,
}

/// A directed graph with edge labels.
#[derive(Debug, Default)]
pub struct Graph<N> {
    nodes: Vec<N>,
    edges: Vec<Edge>,
}

impl<N> Graph<N> {
    pub fn new() -> Graph<N> {
        Graph { nodes: Vec::new(), edges: Vec::new() }
    }

    pub fn add_node(&mut self, node: N) -> NodeIndex {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, index: NodeIndex) -> &N {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut N {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [N] {
        &mut self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Connects `source` with `target`. Adding the identical edge (same
    /// label included) twice is a no-op; the same node pair may be connected
    /// several times under different labels.
    pub fn connect(&mut self, source: NodeIndex, target: NodeIndex, label: u32) {
        let edge = Edge { source, target, label };

        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub fn is_connected(&self, source: NodeIndex, target: NodeIndex) -> bool {
        self.edges.iter().any(|e| e.source == source && e.target == target)
    }

    /// The label of the first edge between `source` and `target`.
    pub fn edge_label(&self, source: NodeIndex, target: NodeIndex) -> Option<u32> {
        self.edges.iter()
            .find(|e| e.source == source && e.target == target)
            .map(|e| e.label)
    }

    /// Successor nodes in edge insertion order.
    pub fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.edges.iter()
            .filter(|e| e.source == node)
            .map(|e| e.target)
            .collect()
    }

    pub fn predecessors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.edges.iter()
            .filter(|e| e.target == node)
            .map(|e| e.source)
            .collect()
    }

    pub fn num_successors(&self, node: NodeIndex) -> usize {
        self.edges.iter().filter(|e| e.source == node).count()
    }

    pub fn num_predecessors(&self, node: NodeIndex) -> usize {
        self.edges.iter().filter(|e| e.target == node).count()
    }

    /// All nodes without a predecessor.
    pub fn roots(&self) -> Vec<NodeIndex> {
        (0..self.nodes.len())
            .filter(|&n| self.num_predecessors(n) == 0)
            .collect()
    }

    /// All nodes without a successor.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        (0..self.nodes.len())
            .filter(|&n| self.num_successors(n) == 0)
            .collect()
    }

    /// Breadth-first levels starting from the roots: each inner list holds
    /// the nodes at the same height.
    pub fn flatten(&self) -> Vec<Vec<NodeIndex>> {
        let mut result = Vec::new();
        let mut current = self.roots();

        while !current.is_empty() {
            let mut next = Vec::new();

            for &node in &current {
                for succ in self.successors(node) {
                    if !next.contains(&succ) {
                        next.push(succ);
                    }
                }
            }

            result.push(current);
            current = next;
        }

        result
    }

    /// Maximal chains of nodes matching `pred`, walked from the roots.
    pub fn paths<F: Fn(&N) -> bool>(&self, pred: F) -> Vec<Vec<NodeIndex>> {
        let mut paths = Vec::new();

        for root in self.roots() {
            self.pickup_paths(&pred, root, Vec::new(), &mut paths);
        }

        paths
    }

    fn pickup_paths<F: Fn(&N) -> bool>(&self, pred: &F, current: NodeIndex,
            mut current_path: Vec<NodeIndex>, paths: &mut Vec<Vec<NodeIndex>>) {
        if pred(&self.nodes[current]) {
            current_path.push(current);
        } else {
            if !current_path.is_empty() {
                paths.push(current_path);
            }

            current_path = Vec::new();
        }

        let successors = self.successors(current);

        if successors.is_empty() {
            if !current_path.is_empty() {
                paths.push(current_path);
            }

            return;
        }

        for succ in successors {
            self.pickup_paths(pred, succ, current_path.clone(), paths);
        }
    }

    /// The longest path of nodes matching `pred`.
    pub fn longest_path<F: Fn(&N) -> bool>(&self, pred: F) -> Vec<NodeIndex> {
        self.paths(pred).into_iter()
            .max_by_key(|path| path.len())
            .unwrap_or_default()
    }

    /// Duplicates the interior nodes of `path` via `dup` and wires the
    /// copies between the path's first and last node, so that the original
    /// endpoints gain one additional parallel branch.
    ///
    /// An interior node with more than one predecessor is not copied (its
    /// input streams could not be associated reliably); the branch reuses it
    /// instead.
    pub fn expand<F: FnMut(&N) -> N>(&mut self, path: &[NodeIndex], mut dup: F) {
        if path.len() < 2 {
            return;
        }

        let head = path[0];
        let tail = path[path.len() - 1];
        let mut orig = head;
        let mut current = head;

        for &next in &path[1..path.len() - 1] {
            let label = self.edge_label(orig, next).unwrap_or(0);

            if self.num_predecessors(next) <= 1 {
                let copy = self.add_node(dup(&self.nodes[next]));
                self.connect(current, copy, label);
                current = copy;
            } else {
                self.connect(current, next, label);
                current = next;
            }

            orig = next;
        }

        let label = self.edge_label(orig, tail).unwrap_or(0);
        self.connect(current, tail, label);
    }

    /// Deep-copies the graph, duplicating every node via `dup`. The copy
    /// preserves connectivity and edge labels; node indices are remapped.
    pub fn copy<F: FnMut(&N) -> N>(&self, mut dup: F) -> Graph<N> {
        let mut copy = Graph::new();
        let mut map: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for (index, node) in self.nodes.iter().enumerate() {
            map.insert(index, copy.add_node(dup(node)));
        }

        for edge in &self.edges {
            copy.connect(map[&edge.source], map[&edge.target], edge.label);
        }

        copy
    }

    /// Kahn's algorithm. Returns the node indices in topological order, or
    /// `None` if the graph contains a cycle.
    pub fn topological_order(&self) -> Option<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = (0..self.nodes.len())
            .map(|n| self.num_predecessors(n))
            .collect();
        let mut ready: Vec<NodeIndex> = self.roots();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop() {
            order.push(node);

            for succ in self.successors(node) {
                in_degree[succ] -= 1;

                if in_degree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Some(order)
        } else {
            None
        }
    }
}
