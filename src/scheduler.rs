//! The fixed scheduler: one worker thread per task, one recycling queue per
//! edge, minimal automatisms.
//!
//! The scheduler validates the graph, optionally expands it over the
//! available GPUs, assigns unmapped GPU tasks a default device, sets every
//! task up and then drives mode-specific worker loops until each queue has
//! seen the end-of-stream sentinel.

use std::path::PathBuf;
use std::time::Instant;

use crossbeam::thread;
use log::debug;
use serde_json::Value;

use crate::buffer::{Buffer, Requisition};
use crate::core::Context;
use crate::error::{Error, Result};
use crate::profiler::{self, Profiler, Timer, TraceEventKind, TraceRow};
use crate::resources::Resources;
use crate::task::Task;
use crate::task_graph::TaskGraph;
use crate::two_way_queue::{Item, TwoWayQueue};

/// A wired edge: the queue between one producer/consumer pair.
struct Connection {
    from: usize,
    to: usize,
    port: u32,
    queue: TwoWayQueue,
}

/// Drives a validated [`TaskGraph`] to completion.
pub struct Scheduler {
    resources: Option<Resources>,
    expand: bool,
    trace: bool,
    timestamps: bool,
    gpu_restriction: Option<Vec<usize>>,
    trace_dir: PathBuf,
    time: f64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            resources: None,
            expand: true,
            trace: false,
            timestamps: false,
            gpu_restriction: None,
            trace_dir: PathBuf::from("."),
            time: 0.0,
        }
    }

    /// Assigns a pre-created OpenCL environment. Without one, the scheduler
    /// creates its own on the first run.
    pub fn set_resources(&mut self, resources: Resources) {
        self.resources = Some(resources);
    }

    pub fn resources(&self) -> Option<&Resources> {
        self.resources.as_ref()
    }

    /// Whether GPU paths are duplicated across the available devices before
    /// execution. Enabled by default.
    pub fn set_expand(&mut self, expand: bool) {
        self.expand = expand;
    }

    /// Enables trace collection and the emission of Chrome-format trace
    /// files after each run.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// When enabled, every forwarded buffer is stamped with a `timestamp`
    /// metadata entry holding microseconds since the run started.
    pub fn set_timestamps(&mut self, timestamps: bool) {
        self.timestamps = timestamps;
    }

    /// Restricts scheduling to the GPU nodes with the given indices.
    pub fn set_gpus(&mut self, gpus: Vec<usize>) {
        self.gpu_restriction = Some(gpus);
    }

    /// Where `trace.json` and `opencl.json` are written when tracing is
    /// enabled.
    pub fn set_trace_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.trace_dir = dir.into();
    }

    /// Wall-clock seconds the last run took.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Runs `graph` to completion.
    ///
    /// Validation, setup and graph errors abort before any worker starts.
    /// Errors raised inside workers let the remaining pipeline drain, and
    /// the first one is returned after all workers have terminated. The
    /// elapsed time is recorded either way.
    pub fn run(&mut self, graph: &mut TaskGraph) -> Result<()> {
        let start = Instant::now();
        let result = self.run_inner(graph, start);
        self.time = start.elapsed().as_secs_f64();
        result
    }

    fn run_inner(&mut self, graph: &mut TaskGraph, epoch: Instant) -> Result<()> {
        graph.is_alright()?;

        if self.resources.is_none() {
            self.resources = Some(Resources::new()?);
        }

        let resources = self.resources.as_ref().expect("resources created above");

        let gpu_nodes: Vec<_> = match &self.gpu_restriction {
            Some(allowed) => resources.gpu_nodes().into_iter()
                .filter(|gpu| allowed.contains(&gpu.index()))
                .collect(),
            None => resources.gpu_nodes(),
        };

        if self.expand && gpu_nodes.len() > 1 {
            graph.expand(gpu_nodes.len());
        }

        graph.map(&gpu_nodes);

        for task in graph.tasks_mut() {
            task.node_mut().set_profiler(Profiler::with_epoch(epoch, self.trace));

            if task.mode().uses_gpu() && task.node().proc_node().is_none() {
                let gpu = gpu_nodes.first().ok_or_else(|| Error::Setup(
                    "using GPU tasks but no GPU available".into()))?;

                debug!("setting default GPU {} for {}", gpu.index(),
                    task.node().identifier());
                task.node_mut().set_proc_node(gpu.clone());
            }

            task.setup(resources)?;
        }

        let connections: Vec<Connection> = graph.edges().iter()
            .map(|edge| Connection {
                from: edge.source,
                to: edge.target,
                port: edge.label,
                queue: TwoWayQueue::new(),
            })
            .collect();

        let num_inputs: Vec<usize> = (0..graph.num_nodes())
            .map(|node| graph.graph().num_predecessors(node))
            .collect();

        let context = resources.context().cloned();
        let timestamps = self.timestamps;

        let result = thread::scope(|scope| {
            let mut workers = Vec::with_capacity(graph.num_nodes());

            for (index, task) in graph.tasks_mut().iter_mut().enumerate() {
                let connections = &connections;
                let context = context.clone();
                let n_inputs = num_inputs[index];

                workers.push(scope.spawn(move |_| {
                    run_task(task.as_mut(), index, n_inputs, connections, context,
                        timestamps, epoch)
                }));
            }

            let mut first_error = None;

            for worker in workers {
                let outcome = match worker.join() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Execution("a worker thread panicked".into())),
                };

                if let Err(err) = outcome {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }).map_err(|_| Error::Execution("a worker thread panicked".into()))?;

        for connection in &connections {
            drop(connection.queue.drain());
        }

        if self.trace {
            self.write_traces(graph)?;
        }

        result
    }

    fn write_traces(&self, graph: &TaskGraph) -> Result<()> {
        let mut task_rows = Vec::new();
        let mut kernel_rows = Vec::new();

        for task in graph.graph().nodes() {
            let node = task.node();
            let tid = node.identifier().to_string();

            for event in node.profiler().events() {
                task_rows.push(TraceRow {
                    ph: match event.kind {
                        TraceEventKind::Begin => 'B',
                        TraceEventKind::End => 'E',
                    },
                    ts: event.timestamp * 1.0e6,
                    pid: 1,
                    tid: tid.clone(),
                    name: event.name.to_string(),
                });
            }

            for span in node.profiler().kernel_spans()? {
                /* OpenCL counters are in ns, the trace viewer wants µs. */
                kernel_rows.push(TraceRow {
                    ph: 'B',
                    ts: span.start as f64 * 1.0e-3,
                    pid: 1,
                    tid: span.kernel.clone(),
                    name: span.kernel.clone(),
                });
                kernel_rows.push(TraceRow {
                    ph: 'E',
                    ts: span.end as f64 * 1.0e-3,
                    pid: 1,
                    tid: span.kernel.clone(),
                    name: span.kernel,
                });
            }
        }

        profiler::write_chrome_trace(&self.trace_dir.join("trace.json"), task_rows)?;

        if !kernel_rows.is_empty() {
            profiler::write_chrome_trace(&self.trace_dir.join("opencl.json"), kernel_rows)?;
        }

        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new()
    }
}

fn run_task(task: &mut dyn Task, index: usize, n_inputs: usize, connections: &[Connection],
        context: Option<Context>, timestamps: bool, epoch: Instant) -> Result<()> {
    let out_queues = output_queues(connections, index);
    let in_queues = input_queues(connections, index, n_inputs)?;
    let mode = task.mode();

    if mode.is_generator() {
        generate_loop(task, &out_queues, &context, timestamps, epoch)
    } else if mode.is_processor() || mode.is_sink() {
        process_loop(task, &in_queues, &out_queues, &context, timestamps, epoch)
    } else if mode.is_reductor() {
        reduce_loop(task, &in_queues, &out_queues, &context, timestamps, epoch)
    } else {
        finish_successors(&out_queues);
        Err(Error::Execution(format!(
            "`{}' does not declare a task mode", task.node().plugin_name())))
    }
}

/// The queues on every outgoing edge, in edge list order.
fn output_queues<'a>(connections: &'a [Connection], index: usize) -> Vec<&'a TwoWayQueue> {
    connections.iter()
        .filter(|c| c.from == index)
        .map(|c| &c.queue)
        .collect()
}

/// The queues feeding each input port, indexed by port number.
fn input_queues<'a>(connections: &'a [Connection], index: usize, n_inputs: usize)
        -> Result<Vec<&'a TwoWayQueue>> {
    let mut queues: Vec<Option<&TwoWayQueue>> = vec![None; n_inputs];

    for connection in connections.iter().filter(|c| c.to == index) {
        let port = connection.port as usize;

        if port >= n_inputs {
            return Err(Error::Graph(format!(
                "input port {} exceeds the {} declared ports", port, n_inputs)));
        }

        queues[port] = Some(&connection.queue);
    }

    queues.into_iter()
        .enumerate()
        .map(|(port, queue)| queue.ok_or_else(|| Error::Graph(format!(
            "input port {} has no producer", port))))
        .collect()
}

/// Pops one buffer from every port that has not finished yet, tracking the
/// end-of-stream sentinel per port. Returns `false` once every port has
/// finished.
fn pop_inputs(in_queues: &[&TwoWayQueue], finished: &mut [bool], inputs: &mut [Option<Buffer>])
        -> bool {
    let mut n_finished = 0;

    for (port, queue) in in_queues.iter().enumerate() {
        if finished[port] {
            n_finished += 1;
            continue;
        }

        match queue.consumer_pop() {
            Item::Data(buffer) => inputs[port] = Some(buffer),
            Item::Poison => {
                finished[port] = true;
                n_finished += 1;
            }
        }
    }

    n_finished < in_queues.len()
}

/// Returns every held input buffer to its producer.
fn release_inputs(in_queues: &[&TwoWayQueue], inputs: &mut [Option<Buffer>]) {
    for (port, slot) in inputs.iter_mut().enumerate() {
        if let Some(buffer) = slot.take() {
            in_queues[port].consumer_push(buffer);
        }
    }
}

/// Consumes and recycles everything still queued on the input ports. Run
/// after an error so that upstream producers can terminate.
fn drain_inputs(in_queues: &[&TwoWayQueue], finished: &mut [bool],
        inputs: &mut [Option<Buffer>]) {
    while pop_inputs(in_queues, finished, inputs) {
        release_inputs(in_queues, inputs);
    }
}

/// Retrieves a recyclable output buffer, lazily growing the queue to its
/// fixed capacity of two and resizing the buffer to the requisition.
fn pop_output(queue: &TwoWayQueue, requisition: &Requisition, context: &Option<Context>)
        -> Buffer {
    if queue.capacity() < 2 {
        queue.insert(Buffer::new(*requisition, context.clone()));
    }

    let mut buffer = queue.producer_pop();

    if buffer.cmp_dimensions(requisition) != 0 {
        buffer.resize(*requisition);
    }

    buffer
}

/// Broadcasts the end-of-stream sentinel downstream.
fn finish_successors(out_queues: &[&TwoWayQueue]) {
    for queue in out_queues {
        queue.producer_push(Item::Poison);
    }
}

fn stamp(buffer: &mut Buffer, epoch: Instant) {
    buffer.set_metadata("timestamp", Value::from(epoch.elapsed().as_micros() as u64));
}

fn begin(task: &mut dyn Task, name: &'static str) {
    let profiler = task.node_mut().profiler_mut();
    profiler.trace_event(name, TraceEventKind::Begin);
    profiler.start(Timer::Cpu);
}

fn end(task: &mut dyn Task, name: &'static str) {
    let profiler = task.node_mut().profiler_mut();
    profiler.stop(Timer::Cpu);
    profiler.trace_event(name, TraceEventKind::End);
}

fn generate_loop(task: &mut dyn Task, out_queues: &[&TwoWayQueue], context: &Option<Context>,
        timestamps: bool, epoch: Instant) -> Result<()> {
    let mut error = None;

    'running: loop {
        for out_queue in out_queues {
            let requisition = match task.get_requisition(&mut []) {
                Ok(requisition) => requisition,
                Err(err) => {
                    error = Some(err);
                    break 'running;
                }
            };

            let mut output = pop_output(out_queue, &requisition, context);

            begin(task, "generate");
            let active = task.generate(&mut output, &requisition);
            end(task, "generate");

            match active {
                Ok(true) => {
                    if timestamps {
                        stamp(&mut output, epoch);
                    }

                    task.node_mut().increase_processed();
                    out_queue.producer_push(Item::Data(output));
                }
                Ok(false) => {
                    out_queue.consumer_push(output);
                    break 'running;
                }
                Err(err) => {
                    out_queue.consumer_push(output);
                    error = Some(err);
                    break 'running;
                }
            }
        }
    }

    finish_successors(out_queues);

    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn process_loop(task: &mut dyn Task, in_queues: &[&TwoWayQueue], out_queues: &[&TwoWayQueue],
        context: &Option<Context>, timestamps: bool, epoch: Instant) -> Result<()> {
    let is_sink = out_queues.is_empty();
    let mut finished = vec![false; in_queues.len()];
    let mut inputs: Vec<Option<Buffer>> = (0..in_queues.len()).map(|_| None).collect();
    let mut error = None;

    'running: loop {
        if !pop_inputs(in_queues, &mut finished, &mut inputs) {
            task.inputs_stopped();
            break;
        }

        /* A port ended while others still stream: drain without processing
         * until the remaining ports end too. */
        if finished.iter().any(|&f| f) {
            release_inputs(in_queues, &mut inputs);
            continue;
        }

        let mut current: Vec<Buffer> = inputs.iter_mut()
            .map(|slot| slot.take().expect("all ports yielded a buffer"))
            .collect();

        let requisition = match task.get_requisition(&mut current) {
            Ok(requisition) => requisition,
            Err(err) => {
                for (port, buffer) in current.into_iter().enumerate() {
                    in_queues[port].consumer_push(buffer);
                }

                error = Some(err);
                break;
            }
        };

        let mut active = true;

        if is_sink {
            begin(task, "process");
            let outcome = task.process(&mut current, None, &requisition);
            end(task, "process");

            match outcome {
                Ok(going) => active = going,
                Err(err) => error = Some(err),
            }
        } else {
            for out_queue in out_queues {
                let mut output = pop_output(out_queue, &requisition, context);

                for input in &current {
                    input.copy_metadata(&mut output);
                }

                begin(task, "process");
                let outcome = task.process(&mut current, Some(&mut output), &requisition);
                end(task, "process");

                match outcome {
                    Ok(true) => {
                        if timestamps {
                            stamp(&mut output, epoch);
                        }

                        task.node_mut().increase_processed();
                        out_queue.producer_push(Item::Data(output));
                    }
                    Ok(false) => {
                        active = false;
                        out_queue.consumer_push(output);
                        break;
                    }
                    Err(err) => {
                        error = Some(err);
                        out_queue.consumer_push(output);
                        break;
                    }
                }
            }
        }

        for (port, buffer) in current.into_iter().enumerate() {
            in_queues[port].consumer_push(buffer);
        }

        if error.is_some() || !active {
            break 'running;
        }
    }

    if error.is_some() {
        drain_inputs(in_queues, &mut finished, &mut inputs);
    }

    finish_successors(out_queues);

    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn reduce_loop(task: &mut dyn Task, in_queues: &[&TwoWayQueue], out_queues: &[&TwoWayQueue],
        context: &Option<Context>, timestamps: bool, epoch: Instant) -> Result<()> {
    let mut finished = vec![false; in_queues.len()];
    let mut inputs: Vec<Option<Buffer>> = (0..in_queues.len()).map(|_| None).collect();
    let mut error = None;

    if !pop_inputs(in_queues, &mut finished, &mut inputs) {
        task.inputs_stopped();
        finish_successors(out_queues);
        return Ok(());
    }

    let mut requisition = None;
    let mut outputs: Vec<Option<Buffer>> = Vec::new();
    let mut first = true;

    /* Accumulation phase: every input is folded into the scratch output of
     * each outgoing edge. The requisition is computed once, from the first
     * input. */
    'reducing: loop {
        if !first && !pop_inputs(in_queues, &mut finished, &mut inputs) {
            task.inputs_stopped();
            break;
        }

        first = false;

        /* A port ended while others still stream: drain without processing
         * until the remaining ports end too. */
        if finished.iter().any(|&f| f) {
            release_inputs(in_queues, &mut inputs);
            continue;
        }

        let mut current: Vec<Buffer> = inputs.iter_mut()
            .map(|slot| slot.take().expect("all ports yielded a buffer"))
            .collect();

        if requisition.is_none() {
            match task.get_requisition(&mut current) {
                Ok(computed) => {
                    outputs = out_queues.iter()
                        .map(|queue| Some(pop_output(queue, &computed, context)))
                        .collect();
                    requisition = Some(computed);
                }
                Err(err) => {
                    for (port, buffer) in current.into_iter().enumerate() {
                        in_queues[port].consumer_push(buffer);
                    }

                    error = Some(err);
                    break;
                }
            }
        }

        let current_requisition = requisition.as_ref().expect("requisition computed above");

        for output in outputs.iter_mut() {
            let output = output.as_mut().expect("scratch output present in phase one");

            for input in &current {
                input.copy_metadata(output);
            }

            begin(task, "process");
            let outcome = task.process(&mut current, Some(output), current_requisition);
            end(task, "process");

            if let Err(err) = outcome {
                error = Some(err);
                break;
            }
        }

        for (port, buffer) in current.into_iter().enumerate() {
            in_queues[port].consumer_push(buffer);
        }

        if error.is_some() {
            break 'reducing;
        }
    }

    /* Emission phase: generate until the reduced stream is exhausted,
     * cycling each emitted buffer through its queue. */
    if error.is_none() {
        if let Some(current_requisition) = requisition.as_ref() {
            let mut go_on = true;

            while go_on {
                for (slot, out_queue) in outputs.iter_mut().zip(out_queues) {
                    let mut output = match slot.take() {
                        Some(output) => output,
                        None => {
                            go_on = false;
                            break;
                        }
                    };

                    begin(task, "generate");
                    let outcome = task.generate(&mut output, current_requisition);
                    end(task, "generate");

                    match outcome {
                        Ok(true) => {
                            if timestamps {
                                stamp(&mut output, epoch);
                            }

                            task.node_mut().increase_processed();
                            out_queue.producer_push(Item::Data(output));
                            *slot = Some(pop_output(out_queue, current_requisition, context));
                        }
                        Ok(false) => {
                            *slot = Some(output);
                            go_on = false;
                        }
                        Err(err) => {
                            *slot = Some(output);
                            error = Some(err);
                            go_on = false;
                        }
                    }

                    if !go_on {
                        break;
                    }
                }
            }
        }
    }

    if error.is_some() {
        drain_inputs(in_queues, &mut finished, &mut inputs);
    }

    /* Return unused scratch buffers to their recycle loops. */
    for (slot, out_queue) in outputs.iter_mut().zip(out_queues) {
        if let Some(buffer) = slot.take() {
            out_queue.consumer_push(buffer);
        }
    }

    finish_successors(out_queues);

    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
