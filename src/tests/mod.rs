//! Crate tests plus the small task implementations they share.
//!
//! The device-touching tests check for a usable OpenCL platform first and
//! turn into no-ops on machines without one.

pub mod buffer;
pub mod task_graph;

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::buffer::{Buffer, MetaValue, Requisition};
use crate::error::{Error, Result};
use crate::properties;
use crate::task::{Task, TaskMode, TaskNode};

/// Whether any OpenCL platform with at least one device is present.
pub fn cl_available() -> bool {
    match crate::core::get_platform_ids() {
        Ok(platforms) => platforms.iter().any(|platform| {
            crate::core::get_device_ids(platform, None, None)
                .map(|devices| !devices.is_empty())
                .unwrap_or(false)
        }),
        Err(_) => false,
    }
}

/// Emits a fixed list of host arrays, one per `generate` call.
pub struct VectorGenerator {
    node: TaskNode,
    shape: Requisition,
    items: Vec<Vec<f32>>,
    metadata: Vec<(String, MetaValue)>,
    cursor: usize,
}

impl VectorGenerator {
    pub fn new(shape: Requisition, items: Vec<Vec<f32>>) -> VectorGenerator {
        VectorGenerator {
            node: TaskNode::new("vector-generator"),
            shape,
            items,
            metadata: Vec::new(),
            cursor: 0,
        }
    }

    /// Attach a metadata entry to every emitted buffer.
    pub fn with_metadata<S: Into<String>>(mut self, name: S, value: MetaValue) -> VectorGenerator {
        self.metadata.push((name.into(), value));
        self
    }
}

impl Task for VectorGenerator {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::GENERATOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        0
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        0
    }

    fn get_requisition(&mut self, _inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(self.shape)
    }

    fn generate(&mut self, output: &mut Buffer, _requisition: &Requisition) -> Result<bool> {
        if self.cursor >= self.items.len() {
            return Ok(false);
        }

        output.get_host(None)?.copy_from_slice(&self.items[self.cursor]);

        for (name, value) in &self.metadata {
            output.set_metadata(name.clone(), value.clone());
        }

        self.cursor += 1;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(VectorGenerator::new(self.shape, self.items.clone()))
    }
}

/// Collects every incoming host array (and one metadata key, if configured)
/// for later inspection.
pub struct CollectSink {
    node: TaskNode,
    collected: Arc<Mutex<Vec<Vec<f32>>>>,
    watch_key: Option<String>,
    seen_metadata: Arc<Mutex<Vec<Option<MetaValue>>>>,
}

impl CollectSink {
    pub fn new(collected: Arc<Mutex<Vec<Vec<f32>>>>) -> CollectSink {
        CollectSink {
            node: TaskNode::new("collect-sink"),
            collected,
            watch_key: None,
            seen_metadata: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn watching<S: Into<String>>(mut self, key: S,
            seen: Arc<Mutex<Vec<Option<MetaValue>>>>) -> CollectSink {
        self.watch_key = Some(key.into());
        self.seen_metadata = seen;
        self
    }
}

impl Task for CollectSink {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::SINK | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], _output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        if let Some(key) = &self.watch_key {
            let value = inputs[0].get_metadata(key).cloned();
            self.seen_metadata.lock().unwrap().push(value);
        }

        let data = inputs[0].get_host(None)?.to_vec();
        self.collected.lock().unwrap().push(data);
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(CollectSink {
            node: TaskNode::new("collect-sink"),
            collected: self.collected.clone(),
            watch_key: self.watch_key.clone(),
            seen_metadata: self.seen_metadata.clone(),
        })
    }
}

/// Adds one to every element.
pub struct AddOne {
    node: TaskNode,
}

impl AddOne {
    pub fn new() -> AddOne {
        AddOne { node: TaskNode::new("add-one") }
    }
}

impl Task for AddOne {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        let output = output.expect("processors are handed an output");
        let source = inputs[0].get_host(None)?.to_vec();
        let sink = output.get_host(None)?;

        for (out, x) in sink.iter_mut().zip(source) {
            *out = x + 1.0;
        }

        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(AddOne::new())
    }
}

/// Forwards its input unchanged but declines after `limit` buffers.
pub struct StopAfter {
    node: TaskNode,
    limit: usize,
    seen: usize,
}

impl StopAfter {
    pub fn new(limit: usize) -> StopAfter {
        StopAfter {
            node: TaskNode::new("stop-after"),
            limit,
            seen: 0,
        }
    }
}

impl Task for StopAfter {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        if self.seen >= self.limit {
            return Ok(false);
        }

        self.seen += 1;

        let output = output.expect("processors are handed an output");
        Buffer::copy(&mut inputs[0], output)?;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(StopAfter::new(self.limit))
    }
}

/// Reduces the input stream to a single buffer holding the smallest value.
pub struct MinReductor {
    node: TaskNode,
    smallest: f32,
    emitted: bool,
}

impl MinReductor {
    pub fn new() -> MinReductor {
        MinReductor {
            node: TaskNode::new("min"),
            smallest: f32::MAX,
            emitted: false,
        }
    }
}

impl Task for MinReductor {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::REDUCTOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, _inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(Requisition::new_1d(1))
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        for &x in inputs[0].get_host(None)?.iter() {
            if x < self.smallest {
                self.smallest = x;
            }
        }

        if let Some(output) = output {
            output.get_host(None)?[0] = self.smallest;
        }

        Ok(true)
    }

    fn generate(&mut self, output: &mut Buffer, _requisition: &Requisition) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }

        output.get_host(None)?[0] = self.smallest;
        self.emitted = true;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(MinReductor::new())
    }
}

/// A processor whose requisition fails after a number of inputs. Used to
/// exercise the error drain path.
pub struct FailingRequisition {
    node: TaskNode,
    after: usize,
    seen: usize,
}

impl FailingRequisition {
    pub fn new(after: usize) -> FailingRequisition {
        FailingRequisition {
            node: TaskNode::new("fail-req"),
            after,
            seen: 0,
        }
    }
}

impl Task for FailingRequisition {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        if self.seen >= self.after {
            return Err(Error::Requisition("input metadata is inconsistent".into()));
        }

        self.seen += 1;
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        let output = output.expect("processors are handed an output");
        Buffer::copy(&mut inputs[0], output)?;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(FailingRequisition::new(self.after))
    }
}

/// A GPU-flagged pass-through used for expansion and mapping tests.
pub struct GpuFilter {
    node: TaskNode,
}

impl GpuFilter {
    pub fn new() -> GpuFilter {
        GpuFilter { node: TaskNode::new("gpu-filter") }
    }
}

impl Task for GpuFilter {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::GPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        let output = output.expect("processors are handed an output");
        Buffer::copy(&mut inputs[0], output)?;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(GpuFilter::new())
    }
}

/// A configurable task covering every property kind the parsers support.
pub struct ParamTask {
    node: TaskNode,
    pub width: u32,
    pub factor: f32,
    pub label: String,
    pub enabled: bool,
    pub sizes: Vec<u32>,
}

impl ParamTask {
    pub fn new() -> ParamTask {
        ParamTask {
            node: TaskNode::new("param"),
            width: 0,
            factor: 1.0,
            label: String::new(),
            enabled: false,
            sizes: Vec::new(),
        }
    }
}

impl Task for ParamTask {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        let output = output.expect("processors are handed an output");
        Buffer::copy(&mut inputs[0], output)?;
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        let mut copy = ParamTask::new();
        copy.width = self.width;
        copy.factor = self.factor;
        copy.label = self.label.clone();
        copy.enabled = self.enabled;
        copy.sizes = self.sizes.clone();
        Box::new(copy)
    }

    fn set_property(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "width" => self.width = properties::to_u32(name, value)?,
            "factor" => self.factor = properties::to_f32(name, value)?,
            "label" => self.label = properties::to_string(name, value)?,
            "enabled" => self.enabled = properties::to_bool(name, value)?,
            "sizes" => self.sizes = properties::to_u32_list(name, value)?,
            _ => return Err(Error::Graph(format!(
                "`param' does not have property `{}'", name))),
        }

        Ok(())
    }

    fn is_array_property(&self, name: &str) -> bool {
        name == "sizes"
    }

    fn properties(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("width".into(), Value::from(self.width));
        map.insert("factor".into(), Value::from(self.factor));
        map.insert("label".into(), Value::from(self.label.clone()));
        map.insert("enabled".into(), Value::from(self.enabled));
        map.insert("sizes".into(), Value::from(self.sizes.clone()));
        map
    }
}

/// Merges two input streams; used by tap-list parsing tests.
pub struct MergeTask {
    node: TaskNode,
}

impl MergeTask {
    pub fn new() -> MergeTask {
        MergeTask { node: TaskNode::new("merge") }
    }
}

impl Task for MergeTask {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        2
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        let output = output.expect("processors are handed an output");
        let left = inputs[0].get_host(None)?.to_vec();
        let right = inputs[1].get_host(None)?.to_vec();
        let sink = output.get_host(None)?;

        for ((out, a), b) in sink.iter_mut().zip(left).zip(right) {
            *out = a + b;
        }

        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(MergeTask::new())
    }
}

/// Holds another task as a property; exercises task-valued JSON properties.
pub struct WrapperSink {
    node: TaskNode,
    pub inner: Option<Box<dyn Task>>,
}

impl WrapperSink {
    pub fn new() -> WrapperSink {
        WrapperSink {
            node: TaskNode::new("wrapper"),
            inner: None,
        }
    }
}

impl Task for WrapperSink {
    fn node(&self) -> &TaskNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut TaskNode {
        &mut self.node
    }

    fn mode(&self) -> TaskMode {
        TaskMode::SINK | TaskMode::CPU
    }

    fn num_inputs(&self) -> u32 {
        1
    }

    fn num_dimensions(&self, _input: u32) -> u32 {
        2
    }

    fn get_requisition(&mut self, inputs: &mut [Buffer]) -> Result<Requisition> {
        Ok(*inputs[0].requisition())
    }

    fn process(&mut self, _inputs: &mut [Buffer], _output: Option<&mut Buffer>,
            _requisition: &Requisition) -> Result<bool> {
        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(WrapperSink {
            node: TaskNode::new("wrapper"),
            inner: self.inner.as_ref().map(|task| task.duplicate()),
        })
    }

    fn set_task_property(&mut self, name: &str, task: Box<dyn Task>) -> Result<()> {
        match name {
            "inner" => {
                self.inner = Some(task);
                Ok(())
            }
            _ => Err(Error::Graph(format!(
                "`wrapper' does not have task property `{}'", name))),
        }
    }

    fn properties(&self) -> Map<String, Value> {
        let mut map = Map::new();

        if let Some(inner) = &self.inner {
            let mut object = Map::new();
            object.insert("plugin".into(), Value::from(inner.node().plugin_name()));
            object.insert("name".into(), Value::from(inner.node().identifier()));
            object.insert("properties".into(), Value::Object(inner.properties()));
            map.insert("inner".into(), Value::Object(object));
        }

        map
    }
}
