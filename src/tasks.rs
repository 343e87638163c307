//! Built-in helper tasks.
//!
//! Real processing tasks live in separate plugin crates; these two are part
//! of the runtime itself because schedulers and tests need a trivial
//! processor and a trivial sink.

use serde_json::{Map, Value};

use crate::buffer::{Buffer, Requisition};
use crate::error::Result;
use crate::task::{Task, TaskMode, TaskNode};

/// Copies every input buffer to its output unchanged.
pub struct CopyTask {
    node: TaskNode,
}

impl CopyTask {
    pub fn new() -> CopyTask {
        CopyTask { node: TaskNode::new("copy") }
    }
}

impl Default for CopyTask {
    fn default() -> CopyTask {
        CopyTask::new()
    }
}

impl Task for CopyTask {
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
        if let Some(output) = output {
            Buffer::copy(&mut inputs[0], output)?;
        }

        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(CopyTask::new())
    }
}

/// Swallows its input stream without doing anything.
pub struct NullTask {
    node: TaskNode,
    download: bool,
}

impl NullTask {
    pub fn new() -> NullTask {
        NullTask {
            node: TaskNode::new("null"),
            download: false,
        }
    }
}

impl Default for NullTask {
    fn default() -> NullTask {
        NullTask::new()
    }
}

impl Task for NullTask {
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
        if self.download {
            /* Force the transfer back so device work is accounted for. */
            inputs[0].get_host(None)?;
        }

        Ok(true)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        let mut copy = NullTask::new();
        copy.download = self.download;
        Box::new(copy)
    }

    fn set_property(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "download" => {
                self.download = crate::properties::to_bool(name, value)?;
                Ok(())
            }
            _ => Err(crate::error::Error::Graph(format!(
                "`null' does not have property `{}'", name))),
        }
    }

    fn properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("download".into(), Value::from(self.download));
        properties
    }
}
