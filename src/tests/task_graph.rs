//! Structural task-graph behavior: validation, expansion, copying.

use std::sync::{Arc, Mutex};

use super::{cl_available, AddOne, CollectSink, GpuFilter, VectorGenerator};
use crate::buffer::Requisition;
use crate::resources::Resources;
use crate::task_graph::TaskGraph;

fn generator() -> Box<VectorGenerator> {
    Box::new(VectorGenerator::new(Requisition::new_2d(2, 2), vec![vec![0.0; 4]]))
}

fn sink() -> Box<CollectSink> {
    Box::new(CollectSink::new(Arc::new(Mutex::new(Vec::new()))))
}

#[test]
fn leaves_must_be_sinks() {
    let mut graph = TaskGraph::new();
    let read = graph.add_node(generator());
    let add = graph.add_node(Box::new(AddOne::new()));
    graph.connect_nodes(read, add);

    assert!(graph.is_alright().is_err());

    let write = graph.add_node(sink());
    graph.connect_nodes(add, write);
    assert!(graph.is_alright().is_ok());
}

#[test]
fn cycles_are_rejected() {
    let mut graph = TaskGraph::new();
    let a = graph.add_node(Box::new(AddOne::new()));
    let b = graph.add_node(Box::new(AddOne::new()));
    let write = graph.add_node(sink());
    graph.connect_nodes(a, b);
    graph.connect_nodes(b, a);
    graph.connect_nodes(b, write);

    assert!(graph.is_alright().is_err());
}

#[test]
fn expansion_duplicates_the_gpu_path() {
    let mut graph = TaskGraph::new();
    let read = graph.add_node(generator());
    let filter = graph.add_node(Box::new(GpuFilter::new()));
    let write = graph.add_node(sink());
    graph.connect_nodes(read, filter);
    graph.connect_nodes(filter, write);

    graph.expand(2);

    /* One extra copy of the filter, sharing reader and writer. */
    assert_eq!(graph.num_nodes(), 4);
    assert_eq!(graph.graph().num_successors(read), 2);
    assert_eq!(graph.graph().num_predecessors(write), 2);
    assert_eq!(graph.graph().num_predecessors(filter), 1);
}

#[test]
fn expansion_skips_paths_with_multiple_inputs() {
    let mut graph = TaskGraph::new();
    let read_a = graph.add_node(generator());
    let read_b = graph.add_node(generator());
    let filter = graph.add_node(Box::new(GpuFilter::new()));
    let write = graph.add_node(sink());
    graph.connect_nodes(read_a, filter);
    graph.connect_nodes_full(read_b, filter, 1);
    graph.connect_nodes(filter, write);

    graph.expand(2);
    assert_eq!(graph.num_nodes(), 4);
}

#[test]
fn expansion_without_gpu_tasks_is_a_noop() {
    let mut graph = TaskGraph::new();
    let read = graph.add_node(generator());
    let add = graph.add_node(Box::new(AddOne::new()));
    let write = graph.add_node(sink());
    graph.connect_nodes(read, add);
    graph.connect_nodes(add, write);

    graph.expand(4);
    assert_eq!(graph.num_nodes(), 3);
}

#[test]
fn mapping_assigns_distinct_gpus_to_expanded_branches() {
    if !cl_available() {
        return;
    }

    let resources = Resources::new().unwrap();
    let gpu_nodes = resources.gpu_nodes();

    if gpu_nodes.len() < 2 {
        return;
    }

    let mut graph = TaskGraph::new();
    let read = graph.add_node(generator());
    let filter = graph.add_node(Box::new(GpuFilter::new()));
    let write = graph.add_node(sink());
    graph.connect_nodes(read, filter);
    graph.connect_nodes(filter, write);

    graph.expand(2);
    graph.map(&gpu_nodes);

    let copy = (0..graph.num_nodes())
        .find(|&index| index != filter && graph.task(index).mode().uses_gpu())
        .expect("expansion created a filter copy");

    let first = graph.task(filter).node().proc_node().expect("filter mapped");
    let second = graph.task(copy).node().proc_node().expect("copy mapped");
    assert_ne!(first.index(), second.index());
}

#[test]
fn copies_preserve_connectivity_with_fresh_tasks() {
    let mut graph = TaskGraph::new();
    let read = graph.add_node(generator());
    let add = graph.add_node(Box::new(AddOne::new()));
    let write = graph.add_node(sink());
    graph.connect_nodes(read, add);
    graph.connect_nodes(add, write);
    graph.set_partition(1, 4).unwrap();

    let copy = graph.copy();

    assert_eq!(copy.num_nodes(), 3);
    assert_eq!(copy.edges().len(), 2);
    assert_eq!(copy.get_partition(), (1, 4));
    assert_ne!(copy.task(0).node().identifier(), graph.task(0).node().identifier());
}

#[test]
fn partitions_are_validated() {
    let mut graph = TaskGraph::new();
    assert!(graph.set_partition(2, 2).is_err());
    assert!(graph.set_partition(1, 2).is_ok());
    assert_eq!(graph.get_partition(), (1, 2));
}
