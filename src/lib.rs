//! # ocl-flow
//!
//! A data-flow engine that executes directed graphs of image-processing
//! tasks over streams of n-dimensional float buffers, with OpenCL offload
//! for the heavy lifting.
//!
//! A pipeline is described declaratively, either as graph JSON or as a
//! shell-style expression (`read path=x.tif ! blur ! write`), mapped onto
//! the available compute devices and driven by a scheduler that moves
//! buffers between producers and consumers:
//!
//! * [`Buffer`]: n-dimensional float storage that migrates between host
//!   memory, OpenCL buffers and OpenCL images on demand.
//! * [`Task`]: the contract every processing step satisfies.
//! * [`TaskGraph`]: the typed DAG of tasks, including a JSON round-trip
//!   and multi-GPU path expansion.
//! * [`Resources`]: the OpenCL context, devices and kernel cache shared by
//!   one run.
//! * [`Scheduler`]: the thread-per-task driver.
//!
//! ## Foundations
//!
//! Raw OpenCL access goes through the [`ocl-core`] crate, re-exported here
//! as [`core`].
//!
//! [`ocl-core`]: https://github.com/cogciprocate/ocl-core

pub extern crate ocl_core as core;

mod buffer;
mod graph;
mod pipeline;
mod profiler;
mod registry;
mod resources;
mod scheduler;
mod task;
mod task_graph;
mod tasks;
mod two_way_queue;
pub mod error;
pub mod properties;

#[cfg(test)]
mod tests;

pub use crate::buffer::{Buffer, Depth, Location, MetaValue, Region, Requisition, MAX_NDIMS};
pub use crate::error::{Error, Result};
pub use crate::graph::{Edge, Graph, NodeIndex};
pub use crate::pipeline::parse_pipeline;
pub use crate::profiler::{KernelSpan, Profiler, Timer, TraceEvent, TraceEventKind};
pub use crate::registry::TaskRegistry;
pub use crate::resources::{GpuNode, Resources, KERNEL_PATH_VAR};
pub use crate::scheduler::Scheduler;
pub use crate::task::{Task, TaskMode, TaskNode};
pub use crate::task_graph::TaskGraph;
pub use crate::tasks::{CopyTask, NullTask};
pub use crate::two_way_queue::{Item, TwoWayQueue};
