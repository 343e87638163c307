//! Per-task timing counters and execution trace collection.
//!
//! Every task carries a [`Profiler`]. The scheduler rebases all profilers
//! onto a single epoch when a run starts so that their trace events share
//! one timeline, and emits them in Chrome tracing format afterwards.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::core::{self, CommandQueue, Event, Kernel, ProfilingInfo};
use crate::error::Result;

/// The fixed set of activities a profiler accounts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timer {
    Io,
    Cpu,
    Gpu,
    Fetch,
    Release,
}

const NUM_TIMERS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEventKind {
    Begin,
    End,
}

/// One begin/end mark on a task's timeline.
#[derive(Clone, Debug)]
pub struct TraceEvent {
    pub name: &'static str,
    pub kind: TraceEventKind,
    /// Seconds since the profiler's epoch.
    pub timestamp: f64,
}

/// A kernel execution span derived from the OpenCL profiling counters, in
/// nanoseconds of device time.
#[derive(Clone, Debug)]
pub struct KernelSpan {
    pub kernel: String,
    pub queued: u64,
    pub submitted: u64,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug)]
pub struct Profiler {
    epoch: Instant,
    elapsed: [Duration; NUM_TIMERS],
    started: [Option<Instant>; NUM_TIMERS],
    trace_enabled: bool,
    events: Vec<TraceEvent>,
    kernel_events: Vec<(String, Event)>,
}

impl Profiler {
    pub fn new() -> Profiler {
        Profiler::with_epoch(Instant::now(), false)
    }

    /// Creates a profiler whose trace timestamps are relative to `epoch`.
    pub fn with_epoch(epoch: Instant, trace_enabled: bool) -> Profiler {
        Profiler {
            epoch,
            elapsed: [Duration::ZERO; NUM_TIMERS],
            started: [None; NUM_TIMERS],
            trace_enabled,
            events: Vec::new(),
            kernel_events: Vec::new(),
        }
    }

    pub fn enable_tracing(&mut self, enable: bool) {
        self.trace_enabled = enable;
    }

    pub fn tracing_enabled(&self) -> bool {
        self.trace_enabled
    }

    pub fn start(&mut self, timer: Timer) {
        self.started[timer as usize] = Some(Instant::now());
    }

    pub fn stop(&mut self, timer: Timer) {
        if let Some(started) = self.started[timer as usize].take() {
            self.elapsed[timer as usize] += started.elapsed();
        }
    }

    /// Accumulated seconds spent in `timer`.
    pub fn elapsed(&self, timer: Timer) -> f64 {
        self.elapsed[timer as usize].as_secs_f64()
    }

    /// Records a begin/end mark when tracing is enabled.
    pub fn trace_event(&mut self, name: &'static str, kind: TraceEventKind) {
        if self.trace_enabled {
            self.events.push(TraceEvent {
                name,
                kind,
                timestamp: self.epoch.elapsed().as_secs_f64(),
            });
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Enqueues `kernel` on `queue` and accounts it on the GPU timer. When
    /// tracing is enabled the completion event is retained so that
    /// [`Profiler::kernel_spans`] can recover device timestamps later.
    pub fn call(&mut self, queue: &CommandQueue, kernel: &Kernel, work_dims: u32,
            global_work_size: [usize; 3], local_work_size: Option<[usize; 3]>) -> Result<()> {
        self.start(Timer::Gpu);

        let mut event = Event::null();

        unsafe {
            core::enqueue_kernel(queue, kernel, work_dims, None, &global_work_size,
                local_work_size, None::<Event>, Some(&mut event))?;
        }

        if self.trace_enabled {
            let name = core::get_kernel_info(kernel, core::KernelInfo::FunctionName)
                .map(|r| r.to_string())
                .unwrap_or_else(|_| String::from("kernel"));
            self.kernel_events.push((name, event));
        }

        self.stop(Timer::Gpu);
        Ok(())
    }

    /// Resolves every retained kernel event into its four device-side
    /// timestamps. Blocks until the events have completed.
    pub fn kernel_spans(&self) -> Result<Vec<KernelSpan>> {
        let mut spans = Vec::with_capacity(self.kernel_events.len());

        for (kernel, event) in &self.kernel_events {
            core::wait_for_event(event)?;

            spans.push(KernelSpan {
                kernel: kernel.clone(),
                queued: core::get_event_profiling_info(event, ProfilingInfo::Queued)?.time()?,
                submitted: core::get_event_profiling_info(event, ProfilingInfo::Submit)?.time()?,
                start: core::get_event_profiling_info(event, ProfilingInfo::Start)?.time()?,
                end: core::get_event_profiling_info(event, ProfilingInfo::End)?.time()?,
            });
        }

        Ok(spans)
    }
}

impl Default for Profiler {
    fn default() -> Profiler {
        Profiler::new()
    }
}

/// One entry of a Chrome trace file.
pub(crate) struct TraceRow {
    pub ph: char,
    /// Microseconds.
    pub ts: f64,
    pub pid: usize,
    pub tid: String,
    pub name: String,
}

/// Writes `rows` as a `traceEvents` JSON file loadable by the Chrome trace
/// viewer.
pub(crate) fn write_chrome_trace(path: &Path, mut rows: Vec<TraceRow>) -> Result<()> {
    rows.sort_by(|a, b| {
        a.ts.partial_cmp(&b.ts)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.ph.cmp(&b.ph))
    });

    let events: Vec<_> = rows.iter()
        .map(|row| json!({
            "cat": "f",
            "ph": row.ph.to_string(),
            "ts": row.ts,
            "pid": row.pid,
            "tid": row.tid,
            "name": row.name,
            "args": {},
        }))
        .collect();

    let mut file = File::create(path)?;
    let document = json!({ "traceEvents": events });
    file.write_all(serde_json::to_string(&document)?.as_bytes())?;
    Ok(())
}
