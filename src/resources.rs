//! Process-wide OpenCL state: the selected platform, its devices, one
//! command queue per device and a cache of built programs.
//!
//! Kernels are loaded from `.cl` text files found on the kernel search path
//! and built with per-device options so that kernel source can branch on the
//! hardware it runs on.

use std::collections::HashMap;
use std::env;
use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, warn};

use crate::core::{self, CommandQueue, Context, DeviceId, DeviceInfo, DeviceInfoResult,
    Kernel, PlatformId, PlatformInfo, Program};
use crate::error::{Error, Result};

/// Colon-separated list of directories prepended to the kernel search path.
pub const KERNEL_PATH_VAR: &str = "OCL_FLOW_PLUGIN_PATH";

/// Directory searched after the current directory and [`KERNEL_PATH_VAR`].
const INSTALL_KERNEL_DIR: &str = "/usr/local/lib/ocl-flow/kernels";

/// The identity of one GPU device, including the command queue all work
/// assigned to it is enqueued on.
#[derive(Clone, Debug)]
pub struct GpuNode {
    index: usize,
    device: DeviceId,
    queue: CommandQueue,
}

impl GpuNode {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// The device name as reported by the driver.
    pub fn name(&self) -> String {
        device_name(&self.device)
    }
}

impl PartialEq for GpuNode {
    fn eq(&self, other: &GpuNode) -> bool {
        self.index == other.index
    }
}

#[derive(Debug)]
pub struct Resources {
    platform: Option<PlatformId>,
    devices: Vec<DeviceId>,
    gpu_indices: Vec<usize>,
    context: Option<Context>,
    queues: Vec<CommandQueue>,
    kernel_paths: Vec<PathBuf>,
    build_opts: String,
    programs: Mutex<HashMap<String, Program>>,
}

impl Resources {
    /// Creates the OpenCL environment, preferring the first platform that
    /// exposes GPU devices.
    ///
    /// A host without any OpenCL platform yields an empty instance: no
    /// devices are enumerated and GPU work fails at task setup.
    pub fn new() -> Result<Resources> {
        let mut kernel_paths = vec![PathBuf::from(".")];

        if let Ok(var) = env::var(KERNEL_PATH_VAR) {
            kernel_paths.extend(var.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }

        kernel_paths.push(PathBuf::from(INSTALL_KERNEL_DIR));

        let platforms = match core::get_platform_ids() {
            Ok(platforms) => platforms,
            Err(err) => {
                warn!("no OpenCL platforms available: {}", err);
                Vec::new()
            }
        };

        let platform = select_platform(&platforms);

        let mut resources = Resources {
            platform,
            devices: Vec::new(),
            gpu_indices: Vec::new(),
            context: None,
            queues: Vec::new(),
            kernel_paths,
            build_opts: String::from("-cl-mad-enable"),
            programs: Mutex::new(HashMap::new()),
        };

        if let Some(platform) = platform {
            resources.initialize_devices(platform)?;
        }

        Ok(resources)
    }

    fn initialize_devices(&mut self, platform: PlatformId) -> Result<()> {
        if let Ok(vendor) = core::get_platform_info(platform, PlatformInfo::Vendor) {
            let vendor = vendor.to_string();

            if vendor.starts_with("NVIDIA") {
                self.build_opts.push_str(" -cl-nv-verbose -DVENDOR=NVIDIA");
            } else if vendor.starts_with("Advanced Micro Devices") {
                self.build_opts.push_str(" -DVENDOR=AMD");
            }
        }

        self.devices = core::get_device_ids(&platform, Some(core::DEVICE_TYPE_ALL), None)?;
        self.context = Some(core::create_context(None, &self.devices, None, None)?);

        let context = self.context.as_ref().expect("context created above");

        for (index, device) in self.devices.iter().enumerate() {
            let queue = core::create_command_queue(context, device,
                Some(core::QUEUE_PROFILING_ENABLE))?;
            self.queues.push(queue);

            if let Ok(DeviceInfoResult::Type(device_type)) =
                    core::get_device_info(device, DeviceInfo::Type) {
                if device_type.contains(core::DEVICE_TYPE_GPU) {
                    self.gpu_indices.push(index);
                }
            }
        }

        debug!("initialized {} devices ({} GPUs)", self.devices.len(), self.gpu_indices.len());
        Ok(())
    }

    /// The OpenCL context shared by all buffers and tasks, if any device was
    /// enumerated.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// All command queues, one per device.
    pub fn cmd_queues(&self) -> &[CommandQueue] {
        &self.queues
    }

    /// One [`GpuNode`] per enumerated GPU device.
    pub fn gpu_nodes(&self) -> Vec<GpuNode> {
        self.gpu_indices.iter()
            .map(|&index| GpuNode {
                index,
                device: self.devices[index],
                queue: self.queues[index].clone(),
            })
            .collect()
    }

    /// Loads and builds `kernel` from the `.cl` file `filename`.
    ///
    /// The file is searched in the current working directory, the
    /// directories named by [`KERNEL_PATH_VAR`] and the installation kernel
    /// directory. Programs are built once per file and cached; the returned
    /// kernel is owned by the caller.
    pub fn get_kernel(&self, filename: &str, kernel: &str) -> Result<Kernel> {
        let program = self.create_and_build_program(filename, "")?;

        core::create_kernel(&program, kernel).map_err(|err| Error::Setup(format!(
            "failed to create kernel `{}' from `{}': {}", kernel, filename, err)))
    }

    /// Builds `kernel` from an in-memory source string. The program is
    /// cached under the kernel name.
    pub fn get_kernel_from_source(&self, source: &str, kernel: &str) -> Result<Kernel> {
        let mut programs = self.programs.lock().expect("program cache poisoned");

        let program = match programs.get(kernel) {
            Some(program) => program.clone(),
            None => {
                let program = self.build_program(source, "", kernel)?;
                programs.insert(kernel.to_string(), program.clone());
                program
            }
        };

        core::create_kernel(&program, kernel).map_err(|err| Error::Setup(format!(
            "failed to create kernel `{}': {}", kernel, err)))
    }

    /// Looks `filename` up in the program cache, loading and building it on
    /// a miss. A single process-wide lock serializes builds because task
    /// setups run concurrently.
    fn create_and_build_program(&self, filename: &str, options: &str) -> Result<Program> {
        let mut programs = self.programs.lock().expect("program cache poisoned");

        if let Some(program) = programs.get(filename) {
            return Ok(program.clone());
        }

        let path = self.lookup_kernel_path(filename).ok_or_else(|| Error::Setup(format!(
            "could not find `{}' in the kernel search path", filename)))?;
        let source = fs::read_to_string(&path)?;
        let program = self.build_program(&source, options, filename)?;

        debug!("added program from `{}'", path.display());
        programs.insert(filename.to_string(), program.clone());
        Ok(program)
    }

    fn build_program(&self, source: &str, options: &str, name: &str) -> Result<Program> {
        let context = self.context.as_ref().ok_or_else(|| Error::Setup(
            "cannot build programs without an OpenCL context".into()))?;
        let source = CString::new(source)?;
        let program = core::create_program_with_source(context, &[source])?;

        for (index, device) in self.devices.iter().enumerate() {
            let build_options = CString::new(self.device_build_options(index, options))?;

            if let Err(err) = core::build_program(&program, Some(&[*device]),
                    &build_options, None, None) {
                if let Err(log) = core::program_build_err(&program, &self.devices) {
                    error!("build log for `{}':\n{}", name, log);
                }

                return Err(Error::Setup(format!(
                    "failed to build program `{}': {}", name, err)));
            }
        }

        Ok(program)
    }

    /// Assembles the compiler options for one device: the global options, a
    /// caller supplement and a macro carrying the escaped device name.
    fn device_build_options(&self, device_index: usize, additional: &str) -> String {
        let mut opts = self.build_opts.clone();

        if !additional.is_empty() {
            opts.push(' ');
            opts.push_str(additional);
        }

        opts.push_str(" -D");
        opts.push_str(&escape_device_name(&device_name(&self.devices[device_index])));
        opts
    }

    fn lookup_kernel_path(&self, filename: &str) -> Option<PathBuf> {
        let direct = Path::new(filename);

        if direct.is_absolute() {
            return if direct.exists() { Some(direct.to_path_buf()) } else { None };
        }

        self.kernel_paths.iter()
            .map(|dir| dir.join(filename))
            .find(|path| path.exists())
    }
}

fn select_platform(platforms: &[PlatformId]) -> Option<PlatformId> {
    let has_gpus = |platform: &PlatformId| {
        core::get_device_ids(platform, Some(core::DEVICE_TYPE_GPU), None)
            .map(|devices| !devices.is_empty())
            .unwrap_or(false)
    };

    platforms.iter().copied().find(|p| has_gpus(p))
        .or_else(|| platforms.first().copied())
}

fn device_name(device: &DeviceId) -> String {
    core::get_device_info(device, DeviceInfo::Name)
        .map(|name| name.to_string())
        .unwrap_or_else(|_| String::from("UNKNOWN"))
}

/// Turns a driver-reported device name into a macro-safe identifier.
fn escape_device_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == ' ' { '_' } else { c.to_ascii_uppercase() })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
