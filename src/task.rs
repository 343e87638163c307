//! The capability contract every task in a graph satisfies, plus the common
//! node state embedded in each task implementation.

use std::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;
use serde_json::{Map, Value};

use crate::buffer::{Buffer, Requisition};
use crate::error::{Error, Result};
use crate::profiler::Profiler;
use crate::resources::{GpuNode, Resources};

bitflags! {
    /// Orthogonal fields describing how a task operates.
    ///
    /// Exactly one of the type bits (`PROCESSOR`, `GENERATOR`, `REDUCTOR`,
    /// `SINK`) must be set; the processing-unit and modifier bits combine
    /// freely with it.
    pub struct TaskMode: u32 {
        const PROCESSOR  = 1;
        const GENERATOR  = 1 << 1;
        const REDUCTOR   = 1 << 2;
        const SINK       = 1 << 3;
        const CPU        = 1 << 4;
        const GPU        = 1 << 5;
        const SHARE_DATA = 1 << 6;
        const TYPE_MASK  = Self::PROCESSOR.bits | Self::GENERATOR.bits |
                           Self::REDUCTOR.bits | Self::SINK.bits;
    }
}

impl TaskMode {
    pub fn is_processor(self) -> bool {
        self & TaskMode::TYPE_MASK == TaskMode::PROCESSOR
    }

    pub fn is_generator(self) -> bool {
        self & TaskMode::TYPE_MASK == TaskMode::GENERATOR
    }

    pub fn is_reductor(self) -> bool {
        self & TaskMode::TYPE_MASK == TaskMode::REDUCTOR
    }

    pub fn is_sink(self) -> bool {
        self & TaskMode::TYPE_MASK == TaskMode::SINK
    }

    pub fn uses_gpu(self) -> bool {
        self.contains(TaskMode::GPU)
    }
}

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(0);

/// Common state carried by every task: plugin name, unique identifier,
/// assigned processing node, profiler, partition and processed count.
///
/// Task implementations embed a `TaskNode` and expose it through
/// [`Task::node`]/[`Task::node_mut`].
#[derive(Debug)]
pub struct TaskNode {
    plugin_name: String,
    identifier: String,
    package_name: Option<String>,
    proc_node: Option<GpuNode>,
    profiler: Profiler,
    partition: (u32, u32),
    num_processed: u64,
}

impl TaskNode {
    pub fn new<S: Into<String>>(plugin_name: S) -> TaskNode {
        let plugin_name = plugin_name.into();
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);

        TaskNode {
            identifier: format!("{}-{}", plugin_name, id),
            plugin_name,
            package_name: None,
            proc_node: None,
            profiler: Profiler::new(),
            partition: (0, 1),
            num_processed: 0,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn set_plugin_name<S: Into<String>>(&mut self, name: S) {
        self.plugin_name = name.into();
    }

    /// The name that identifies this node uniquely within a graph.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn set_identifier<S: Into<String>>(&mut self, identifier: S) {
        self.identifier = identifier.into();
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    pub fn set_package_name<S: Into<String>>(&mut self, name: S) {
        self.package_name = Some(name.into());
    }

    /// The processing node this task has been mapped onto, if any.
    pub fn proc_node(&self) -> Option<&GpuNode> {
        self.proc_node.as_ref()
    }

    pub fn set_proc_node(&mut self, node: GpuNode) {
        self.proc_node = Some(node);
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    pub fn set_profiler(&mut self, profiler: Profiler) {
        self.profiler = profiler;
    }

    pub fn partition(&self) -> (u32, u32) {
        self.partition
    }

    pub fn set_partition(&mut self, index: u32, total: u32) {
        debug_assert!(index < total);
        self.partition = (index, total);
    }

    pub fn num_processed(&self) -> u64 {
        self.num_processed
    }

    pub fn increase_processed(&mut self) {
        self.num_processed += 1;
    }
}

/// A node of a task graph: produces, transforms or consumes buffers.
///
/// The scheduler drives every task through the same sequence: `setup` once,
/// then `get_requisition` followed by `process`/`generate` per stream
/// element, then `inputs_stopped` when all inputs have ended.
pub trait Task: Send {
    /// Access to the embedded common node state.
    fn node(&self) -> &TaskNode;

    fn node_mut(&mut self) -> &mut TaskNode;

    fn mode(&self) -> TaskMode;

    /// Number of input ports. Zero for generators.
    fn num_inputs(&self) -> u32;

    /// Dimensionality expected on the given input port.
    fn num_dimensions(&self, input: u32) -> u32;

    /// Called once before the first `process`/`generate`. Acquire kernels
    /// and scratch state here.
    fn setup(&mut self, resources: &Resources) -> Result<()> {
        let _ = resources;
        Ok(())
    }

    /// Computes the output size for the current inputs. `inputs` is empty
    /// for generators.
    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition>;

    /// Transforms `inputs` into `output`. Sinks receive `None` as output.
    ///
    /// Returning `Ok(false)` signals that the task declines to emit further
    /// output for its input stream; it is not an error.
    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            requisition: &Requisition) -> Result<bool> {
        let _ = (inputs, output, requisition);
        Err(Error::Execution(format!(
            "`{}' does not implement process", self.node().plugin_name())))
    }

    /// Produces the next element of the output stream, returning `Ok(false)`
    /// once the stream is exhausted.
    fn generate(&mut self, output: &mut Buffer, requisition: &Requisition) -> Result<bool> {
        let _ = (output, requisition);
        Err(Error::Execution(format!(
            "`{}' does not implement generate", self.node().plugin_name())))
    }

    /// Invoked once when every input port has signalled end-of-stream.
    fn inputs_stopped(&mut self) {}

    /// Creates a fresh task of the same kind with the same configuration.
    /// Used when a graph is copied or expanded onto multiple devices.
    fn duplicate(&self) -> Box<dyn Task>;

    /// Sets a configuration property from a loosely typed value. Parsers use
    /// this to apply JSON node properties and pipeline assignments.
    fn set_property(&mut self, name: &str, value: &Value) -> Result<()> {
        let _ = value;
        Err(Error::Graph(format!(
            "`{}' does not have property `{}'", self.node().plugin_name(), name)))
    }

    /// Whether the named property takes a list of values. The pipeline
    /// parser consults this to decide how far a comma-separated value
    /// extends.
    fn is_array_property(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// Sets a task-valued property. Only tasks that aggregate other tasks
    /// implement this.
    fn set_task_property(&mut self, name: &str, task: Box<dyn Task>) -> Result<()> {
        let _ = task;
        Err(Error::Graph(format!(
            "`{}' does not have task property `{}'", self.node().plugin_name(), name)))
    }

    /// The current property values, used when a graph is serialized.
    fn properties(&self) -> Map<String, Value> {
        Map::new()
    }
}
