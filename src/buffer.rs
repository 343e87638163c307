//! N-dimensional float storage with an explicit host/device/image location
//! state machine.
//!
//! A [`Buffer`] owns up to three backing slots for the same logical array: a
//! host `Vec<f32>`, an OpenCL buffer object and an OpenCL image object. The
//! `get_*` accessors lazily allocate the requested slot, transfer the current
//! contents onto it and update the location. All transfers are synchronous
//! from the caller's perspective.

use std::collections::HashMap;

use crate::core::{self, CommandQueue, Context, Event, Mem, BufferRegion,
    ImageChannelDataType, ImageChannelOrder, ImageDescriptor, ImageFormat, MemObjectType};
use crate::error::{Error, Result};

/// Maximum number of dimensions a buffer can have.
pub const MAX_NDIMS: usize = 3;

/// A size requirement: the number of dimensions and their extents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requisition {
    n_dims: usize,
    dims: [usize; MAX_NDIMS],
}

impl Requisition {
    /// Creates a requisition from a dimension list.
    ///
    /// Fails unless `1 <= dims.len() <= 3`.
    pub fn new(dims: &[usize]) -> Result<Requisition> {
        if dims.is_empty() || dims.len() > MAX_NDIMS {
            return Err(Error::Execution(format!(
                "a buffer must have between 1 and {} dimensions, got {}", MAX_NDIMS, dims.len())));
        }

        let mut req = Requisition { n_dims: dims.len(), dims: [1; MAX_NDIMS] };
        req.dims[..dims.len()].copy_from_slice(dims);
        Ok(req)
    }

    pub fn new_1d(width: usize) -> Requisition {
        Requisition { n_dims: 1, dims: [width, 1, 1] }
    }

    pub fn new_2d(width: usize, height: usize) -> Requisition {
        Requisition { n_dims: 2, dims: [width, height, 1] }
    }

    pub fn new_3d(width: usize, height: usize, depth: usize) -> Requisition {
        Requisition { n_dims: 3, dims: [width, height, depth] }
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.n_dims]
    }

    /// Total number of `f32` elements.
    pub fn len(&self) -> usize {
        self.dims[..self.n_dims].iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the backing storage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    /// The `[w, h, d]` region used for image transfers, padded with ones.
    fn cl_region(&self) -> [usize; 3] {
        [self.dims[0],
         if self.n_dims >= 2 { self.dims[1] } else { 1 },
         if self.n_dims == 3 { self.dims[2] } else { 1 }]
    }
}

/// A sub-rectangle of a buffer for use with [`Buffer::get_device_view`].
#[derive(Clone, Copy, Debug)]
pub struct Region {
    pub origin: [usize; MAX_NDIMS],
    pub size: [usize; MAX_NDIMS],
}

/// Which backing slot currently holds the authoritative data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// No data is associated with the buffer yet.
    Invalid,
    Host,
    Device,
    DeviceImage,
}

/// Source bit depth of raw data passed to [`Buffer::convert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    U8,
    U16,
    S16,
    S32,
    U32,
    F32,
}

/// Metadata values attached to a buffer are loosely typed JSON values.
pub type MetaValue = serde_json::Value;

/// An n-dimensional float array with explicit host/device residence.
#[derive(Debug)]
pub struct Buffer {
    requisition: Requisition,
    host: Option<Vec<f32>>,
    device: Option<Mem>,
    image: Option<Mem>,
    context: Option<Context>,
    last_queue: Option<CommandQueue>,
    location: Location,
    last_location: Location,
    metadata: HashMap<String, MetaValue>,
    sub_buffers: Vec<Mem>,
}

impl Buffer {
    /// Creates a buffer with the given requisition. No storage is allocated
    /// until the first `get_*` access; the location starts out `Invalid`.
    pub fn new(requisition: Requisition, context: Option<Context>) -> Buffer {
        Buffer {
            requisition,
            host: None,
            device: None,
            image: None,
            context,
            last_queue: None,
            location: Location::Invalid,
            last_location: Location::Invalid,
            metadata: HashMap::new(),
            sub_buffers: Vec::new(),
        }
    }

    /// Creates a buffer backed by an existing host array.
    ///
    /// Fails if `data` does not match the requisition.
    pub fn new_with_data(requisition: Requisition, data: Vec<f32>, context: Option<Context>)
            -> Result<Buffer> {
        if data.len() != requisition.len() {
            return Err(Error::Execution(format!(
                "host data holds {} elements but the requisition needs {}",
                data.len(), requisition.len())));
        }

        let mut buffer = Buffer::new(requisition, context);
        buffer.host = Some(data);
        buffer.update_location(Location::Host);
        Ok(buffer)
    }

    /// Creates a new, empty buffer with the same requisition and context.
    /// Note that this is not a copy of `self`!
    pub fn dup(&self) -> Buffer {
        Buffer::new(self.requisition, self.context.clone())
    }

    pub fn requisition(&self) -> &Requisition {
        &self.requisition
    }

    pub fn size_bytes(&self) -> usize {
        self.requisition.size_bytes()
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Compares the buffer's size with `requisition`.
    ///
    /// Returns 0 if and only if both requisitions are identical, otherwise a
    /// nonzero signed measure of the difference (the summed per-dimension
    /// delta, or the first nonzero per-dimension delta when the sum cancels
    /// out).
    pub fn cmp_dimensions(&self, requisition: &Requisition) -> i64 {
        if requisition.n_dims != self.requisition.n_dims {
            return requisition.n_dims as i64 - self.requisition.n_dims as i64;
        }

        let mut result = 0i64;
        let mut first_delta = 0i64;

        for (req_dim, own_dim) in requisition.dims().iter().zip(self.requisition.dims()) {
            let delta = *req_dim as i64 - *own_dim as i64;

            if first_delta == 0 {
                first_delta = delta;
            }

            result += delta;
        }

        if result == 0 { first_delta } else { result }
    }

    /// Resizes the buffer, releasing all three storage slots and any
    /// outstanding sub-buffers. Resizing to the current requisition is a
    /// no-op. Metadata survives a resize; the contents do not.
    pub fn resize(&mut self, requisition: Requisition) {
        if self.cmp_dimensions(&requisition) == 0 {
            return;
        }

        self.sub_buffers.clear();
        self.host = None;
        self.device = None;
        self.image = None;
        self.requisition = requisition;
        self.location = Location::Invalid;
        self.last_location = Location::Invalid;
    }

    /// Replaces the backing host array and marks the host slot current.
    ///
    /// Fails if `data` does not match the current requisition.
    pub fn set_host_data(&mut self, data: Vec<f32>) -> Result<()> {
        if data.len() != self.requisition.len() {
            return Err(Error::Execution(format!(
                "host data holds {} elements but the requisition needs {}",
                data.len(), self.requisition.len())));
        }

        self.host = Some(data);
        self.update_location(Location::Host);
        Ok(())
    }

    /// Returns the host array, transferring device-resident data back first.
    pub fn get_host(&mut self, queue: Option<&CommandQueue>) -> Result<&mut [f32]> {
        self.update_last_queue(queue);

        if self.host.is_none() {
            self.host = Some(vec![0.0; self.requisition.len()]);
        }

        match self.location {
            Location::Device if self.device.is_some() => self.transfer_device_to_host()?,
            Location::DeviceImage if self.image.is_some() => self.transfer_image_to_host()?,
            _ => (),
        }

        self.update_location(Location::Host);
        Ok(self.host.as_mut().expect("host slot allocated above"))
    }

    /// Returns the device buffer object, transferring the current contents
    /// onto the device if necessary. If `queue` is `None` the last used
    /// command queue is taken.
    pub fn get_device(&mut self, queue: Option<&CommandQueue>) -> Result<&Mem> {
        self.update_last_queue(queue);

        if self.device.is_none() {
            self.device = Some(self.alloc_device_array()?);
        }

        match self.location {
            Location::Host if self.host.is_some() => self.transfer_host_to_device()?,
            Location::DeviceImage if self.image.is_some() => self.transfer_image_to_device()?,
            _ => (),
        }

        self.update_location(Location::Device);
        Ok(self.device.as_ref().expect("device slot allocated above"))
    }

    /// Returns the device image object (2d or 3d), transferring the current
    /// contents into it if necessary.
    ///
    /// Fails for one-dimensional buffers.
    pub fn get_device_image(&mut self, queue: Option<&CommandQueue>) -> Result<&Mem> {
        if self.requisition.n_dims < 2 {
            return Err(Error::Execution(
                "one-dimensional buffers cannot be accessed as images".into()));
        }

        self.update_last_queue(queue);

        if self.image.is_none() {
            self.image = Some(self.alloc_device_image()?);
        }

        match self.location {
            Location::Host if self.host.is_some() => self.transfer_host_to_image()?,
            Location::Device if self.device.is_some() => self.transfer_device_to_image()?,
            _ => (),
        }

        self.update_location(Location::DeviceImage);
        Ok(self.image.as_ref().expect("image slot allocated above"))
    }

    /// Creates a sub-buffer object starting `offset` bytes into the device
    /// array. The handle is cached and released together with the parent on
    /// resize or drop.
    pub fn get_device_with_offset(&mut self, queue: Option<&CommandQueue>, offset: usize)
            -> Result<Mem> {
        let elem_size = std::mem::size_of::<f32>();

        if offset % elem_size != 0 || offset >= self.size_bytes() {
            return Err(Error::Execution(format!(
                "sub-buffer offset {} is not valid for a buffer of {} bytes",
                offset, self.size_bytes())));
        }

        let origin = offset / elem_size;
        let len = self.requisition.len() - origin;
        let device = self.get_device(queue)?.clone();
        let sub = core::create_sub_buffer::<f32>(&device, core::MEM_READ_WRITE,
            &BufferRegion::new(origin, len))?;

        self.sub_buffers.push(sub.clone());
        Ok(sub)
    }

    /// Copies the given sub-rectangle into a newly allocated device buffer
    /// that is owned by the caller. The buffer itself is left untouched.
    ///
    /// If the region spans the full row width the copy degenerates to a
    /// single offset transfer.
    pub fn get_device_view(&mut self, queue: &CommandQueue, region: &Region) -> Result<Mem> {
        let dims = self.requisition.cl_region();
        let n_dims = self.requisition.n_dims;

        for i in 0..n_dims {
            if region.origin[i] + region.size[i] > dims[i] {
                return Err(Error::Execution(format!(
                    "requested view exceeds buffer size in dimension {}", i)));
            }
        }

        self.update_last_queue(Some(queue));

        let elem_size = std::mem::size_of::<f32>();
        let view_len: usize = region.size[..n_dims].iter().product();
        let context = self.require_context()?;
        let view = unsafe {
            core::create_buffer::<_, f32>(&context, core::MEM_READ_WRITE, view_len, None)?
        };

        match self.location {
            Location::Host => {
                let host = self.host.as_ref()
                    .ok_or_else(|| Error::Execution("host slot is empty".into()))?;

                match n_dims {
                    1 => unsafe {
                        let src = &host[region.origin[0]..region.origin[0] + region.size[0]];
                        core::enqueue_write_buffer(queue, &view, true, 0, src,
                            None::<Event>, None::<&mut Event>)?;
                    },
                    2 => {
                        if region.size[0] == dims[0] {
                            /* region as wide as the buffer, copy with a fixed offset */
                            let start = region.origin[1] * dims[0];
                            let src = &host[start..start + view_len];
                            unsafe {
                                core::enqueue_write_buffer(queue, &view, true, 0, src,
                                    None::<Event>, None::<&mut Event>)?;
                            }
                        } else {
                            let mut tmp = Vec::with_capacity(view_len);

                            for y in 0..region.size[1] {
                                let row = (region.origin[1] + y) * dims[0] + region.origin[0];
                                tmp.extend_from_slice(&host[row..row + region.size[0]]);
                            }

                            unsafe {
                                core::enqueue_write_buffer(queue, &view, true, 0, &tmp,
                                    None::<Event>, None::<&mut Event>)?;
                            }
                        }
                    },
                    _ => return Err(Error::Execution(
                        "host views of three-dimensional buffers are not supported".into())),
                }
            }
            Location::Device => {
                let device = self.device.as_ref()
                    .ok_or_else(|| Error::Execution("device slot is empty".into()))?;
                let src_row_pitch = elem_size * dims[0];
                let src_slc_pitch = src_row_pitch * dims[1];
                let dst_row_pitch = elem_size * region.size[0];
                let dst_slc_pitch = dst_row_pitch * region.size[1];
                let mut event = Event::null();

                core::enqueue_copy_buffer_rect::<f32, _, _, _>(queue, device, &view,
                    region.origin, [0, 0, 0],
                    [region.size[0],
                     if n_dims >= 2 { region.size[1] } else { 1 },
                     if n_dims == 3 { region.size[2] } else { 1 }],
                    src_row_pitch, src_slc_pitch, dst_row_pitch, dst_slc_pitch,
                    None::<Event>, Some(&mut event))?;
                core::wait_for_event(&event)?;
            }
            Location::DeviceImage | Location::Invalid => {
                return Err(Error::Execution(format!(
                    "cannot create a view while the buffer resides in {:?}", self.location)));
            }
        }

        Ok(view)
    }

    /// Reverts the location to the previous one without copying. The caller
    /// guarantees that the previous slot already holds the desired data.
    pub fn discard_location(&mut self) {
        self.location = self.last_location;
    }

    /// Converts host data in place from `depth` to the 32-bit float
    /// representation.
    ///
    /// Fails unless the data currently resides on the host.
    pub fn convert(&mut self, depth: Depth) -> Result<()> {
        if self.location != Location::Host {
            return Err(Error::Execution(
                "depth conversion requires host-resident data".into()));
        }

        if let Some(host) = self.host.as_mut() {
            convert_in_place(host, depth);
        }

        Ok(())
    }

    /// Converts an external byte array into the buffer's host slot,
    /// promoting `depth`-typed samples to float.
    ///
    /// `data` must provide one sample per buffer element.
    pub fn convert_from_data(&mut self, data: &[u8], depth: Depth) -> Result<()> {
        let n = self.requisition.len();

        if data.len() < n * depth_size(depth) {
            return Err(Error::Execution(format!(
                "conversion source holds {} bytes but {} are required",
                data.len(), n * depth_size(depth))));
        }

        let host = self.host.get_or_insert_with(|| vec![0.0; n]);
        convert_from(host, data, depth);
        self.update_location(Location::Host);
        Ok(())
    }

    /// Returns the maximum of the host-resident float array.
    pub fn max(&self, _queue: Option<&CommandQueue>) -> Result<f32> {
        self.host_fold(f32::MIN, |acc, x| if x > acc { x } else { acc })
    }

    /// Returns the minimum of the host-resident float array.
    pub fn min(&self, _queue: Option<&CommandQueue>) -> Result<f32> {
        self.host_fold(f32::MAX, |acc, x| if x < acc { x } else { acc })
    }

    pub fn set_metadata<S: Into<String>>(&mut self, name: S, value: MetaValue) {
        self.metadata.insert(name.into(), value);
    }

    pub fn get_metadata(&self, name: &str) -> Option<&MetaValue> {
        self.metadata.get(name)
    }

    pub fn metadata_keys(&self) -> impl Iterator<Item = &String> {
        self.metadata.keys()
    }

    /// Copies every metadata entry of `self` onto `dst`, overwriting
    /// existing keys.
    pub fn copy_metadata(&self, dst: &mut Buffer) {
        for (name, value) in &self.metadata {
            dst.metadata.insert(name.clone(), value.clone());
        }
    }

    /// Copies the contents of `src` to `dst`. The destination is resized to
    /// match and receives the data at its current location.
    pub fn copy(src: &mut Buffer, dst: &mut Buffer) -> Result<()> {
        if dst.cmp_dimensions(&src.requisition) != 0 {
            dst.resize(src.requisition);
        }

        let queue = src.last_queue.clone().or_else(|| dst.last_queue.clone());

        if src.location == Location::Invalid {
            src.host = Some(vec![0.0; src.requisition.len()]);
            src.location = Location::Host;
        }

        if dst.location == Location::Invalid ||
                (dst.host.is_none() && dst.device.is_none() && dst.image.is_none()) {
            match src.location {
                Location::Host => dst.host = Some(vec![0.0; dst.requisition.len()]),
                Location::Device => dst.device = Some(dst.alloc_device_array()?),
                Location::DeviceImage => dst.image = Some(dst.alloc_device_image()?),
                Location::Invalid => unreachable!(),
            }
            dst.location = src.location;
        }

        transfer(src, dst, queue.as_ref())?;
        dst.last_queue = queue;
        Ok(())
    }

    fn host_fold<F: Fn(f32, f32) -> f32>(&self, init: f32, f: F) -> Result<f32> {
        if self.location != Location::Host {
            return Err(Error::Execution(
                "extrema are only defined for host-resident buffers".into()));
        }

        let host = self.host.as_ref()
            .ok_or_else(|| Error::Execution("host slot is empty".into()))?;
        Ok(host.iter().fold(init, |acc, &x| f(acc, x)))
    }

    fn update_last_queue(&mut self, queue: Option<&CommandQueue>) {
        if let Some(queue) = queue {
            self.last_queue = Some(queue.clone());
        }
    }

    fn update_location(&mut self, new_location: Location) {
        self.last_location = self.location;
        self.location = new_location;
    }

    fn require_context(&self) -> Result<Context> {
        self.context.clone().ok_or_else(|| Error::Execution(
            "buffer has no OpenCL context for device allocations".into()))
    }

    fn require_queue(&self) -> Result<CommandQueue> {
        self.last_queue.clone().ok_or_else(|| Error::Execution(
            "no command queue has been associated with this buffer".into()))
    }

    fn alloc_device_array(&self) -> Result<Mem> {
        let context = self.require_context()?;
        let mem = unsafe {
            core::create_buffer::<_, f32>(&context, core::MEM_READ_WRITE,
                self.requisition.len(), None)?
        };
        Ok(mem)
    }

    fn alloc_device_image(&self) -> Result<Mem> {
        let context = self.require_context()?;
        let [width, height, depth] = self.requisition.cl_region();
        let object_type = if self.requisition.n_dims == 2 {
            MemObjectType::Image2d
        } else {
            MemObjectType::Image3d
        };
        let format = ImageFormat::new(ImageChannelOrder::Intensity, ImageChannelDataType::Float);
        let descriptor = ImageDescriptor::new(object_type, width, height, depth, 0, 0, 0, None);
        let mem = unsafe {
            core::create_image::<_, f32>(&context, core::MEM_READ_WRITE,
                &format, &descriptor, None, None)?
        };
        Ok(mem)
    }

    fn transfer_host_to_device(&mut self) -> Result<()> {
        let queue = self.require_queue()?;
        let host = self.host.as_ref().expect("host slot present");
        let device = self.device.as_ref().expect("device slot present");

        unsafe {
            core::enqueue_write_buffer(&queue, device, true, 0, host.as_slice(),
                None::<Event>, None::<&mut Event>)?;
        }

        Ok(())
    }

    fn transfer_device_to_host(&mut self) -> Result<()> {
        let queue = self.require_queue()?;
        let device = self.device.clone().expect("device slot present");
        let host = self.host.as_mut().expect("host slot present");

        unsafe {
            core::enqueue_read_buffer(&queue, &device, true, 0, host.as_mut_slice(),
                None::<Event>, None::<&mut Event>)?;
        }

        Ok(())
    }

    fn transfer_host_to_image(&mut self) -> Result<()> {
        let queue = self.require_queue()?;
        let region = self.requisition.cl_region();
        let host = self.host.as_ref().expect("host slot present");
        let image = self.image.as_ref().expect("image slot present");

        unsafe {
            core::enqueue_write_image(&queue, image, true, [0, 0, 0], region, 0, 0,
                host.as_slice(), None::<Event>, None::<&mut Event>)?;
        }

        Ok(())
    }

    fn transfer_image_to_host(&mut self) -> Result<()> {
        let queue = self.require_queue()?;
        let region = self.requisition.cl_region();
        let image = self.image.clone().expect("image slot present");
        let host = self.host.as_mut().expect("host slot present");

        unsafe {
            core::enqueue_read_image(&queue, &image, true, [0, 0, 0], region, 0, 0,
                host.as_mut_slice(), None::<Event>, None::<&mut Event>)?;
        }

        Ok(())
    }

    fn transfer_device_to_image(&mut self) -> Result<()> {
        let queue = self.require_queue()?;
        let region = self.requisition.cl_region();
        let device = self.device.as_ref().expect("device slot present");
        let image = self.image.as_ref().expect("image slot present");
        let mut event = Event::null();

        core::enqueue_copy_buffer_to_image::<f32, _, _, _>(&queue, device, image,
            0, [0, 0, 0], region, None::<Event>, Some(&mut event))?;
        core::wait_for_event(&event)?;
        Ok(())
    }

    fn transfer_image_to_device(&mut self) -> Result<()> {
        let queue = self.require_queue()?;
        let region = self.requisition.cl_region();
        let image = self.image.as_ref().expect("image slot present");
        let device = self.device.as_ref().expect("device slot present");
        let mut event = Event::null();

        core::enqueue_copy_image_to_buffer::<f32, _, _, _>(&queue, image, device,
            [0, 0, 0], region, 0, None::<Event>, Some(&mut event))?;
        core::wait_for_event(&event)?;
        Ok(())
    }
}

/// Performs the cross-buffer transfer for [`Buffer::copy`] once both sides
/// have a backing slot for their current location.
fn transfer(src: &mut Buffer, dst: &mut Buffer, queue: Option<&CommandQueue>) -> Result<()> {
    use self::Location::*;

    let need_queue = |queue: Option<&CommandQueue>| -> Result<CommandQueue> {
        queue.cloned().ok_or_else(|| Error::Execution(
            "a device transfer requires a command queue".into()))
    };

    match (src.location, dst.location) {
        (Host, Host) => {
            let data = src.host.as_ref().expect("source host slot present");
            dst.host = Some(data.clone());
        }
        (Host, Device) => {
            let queue = need_queue(queue)?;
            let data = src.host.as_ref().expect("source host slot present");
            let device = dst.device.as_ref().expect("destination device slot present");
            unsafe {
                core::enqueue_write_buffer(&queue, device, true, 0, data.as_slice(),
                    None::<Event>, None::<&mut Event>)?;
            }
        }
        (Host, DeviceImage) => {
            let queue = need_queue(queue)?;
            let region = src.requisition.cl_region();
            let data = src.host.as_ref().expect("source host slot present");
            let image = dst.image.as_ref().expect("destination image slot present");
            unsafe {
                core::enqueue_write_image(&queue, image, true, [0, 0, 0], region, 0, 0,
                    data.as_slice(), None::<Event>, None::<&mut Event>)?;
            }
        }
        (Device, Host) => {
            let queue = need_queue(queue)?;
            let device = src.device.clone().expect("source device slot present");
            let len = dst.requisition.len();
            let host = dst.host.get_or_insert_with(|| vec![0.0; len]);
            unsafe {
                core::enqueue_read_buffer(&queue, &device, true, 0, host.as_mut_slice(),
                    None::<Event>, None::<&mut Event>)?;
            }
        }
        (Device, Device) => {
            let queue = need_queue(queue)?;
            let src_mem = src.device.as_ref().expect("source device slot present");
            let dst_mem = dst.device.as_ref().expect("destination device slot present");
            let mut event = Event::null();
            core::enqueue_copy_buffer::<f32, _, _, _>(&queue, src_mem, dst_mem,
                0, 0, src.requisition.len(), None::<Event>, Some(&mut event))?;
            core::wait_for_event(&event)?;
        }
        (Device, DeviceImage) => {
            let queue = need_queue(queue)?;
            let region = src.requisition.cl_region();
            let src_mem = src.device.as_ref().expect("source device slot present");
            let dst_mem = dst.image.as_ref().expect("destination image slot present");
            let mut event = Event::null();
            core::enqueue_copy_buffer_to_image::<f32, _, _, _>(&queue, src_mem, dst_mem,
                0, [0, 0, 0], region, None::<Event>, Some(&mut event))?;
            core::wait_for_event(&event)?;
        }
        (DeviceImage, Host) => {
            let queue = need_queue(queue)?;
            let region = src.requisition.cl_region();
            let image = src.image.clone().expect("source image slot present");
            let len = dst.requisition.len();
            let host = dst.host.get_or_insert_with(|| vec![0.0; len]);
            unsafe {
                core::enqueue_read_image(&queue, &image, true, [0, 0, 0], region, 0, 0,
                    host.as_mut_slice(), None::<Event>, None::<&mut Event>)?;
            }
        }
        (DeviceImage, Device) => {
            let queue = need_queue(queue)?;
            let region = src.requisition.cl_region();
            let src_mem = src.image.as_ref().expect("source image slot present");
            let dst_mem = dst.device.as_ref().expect("destination device slot present");
            let mut event = Event::null();
            core::enqueue_copy_image_to_buffer::<f32, _, _, _>(&queue, src_mem, dst_mem,
                [0, 0, 0], region, 0, None::<Event>, Some(&mut event))?;
            core::wait_for_event(&event)?;
        }
        (DeviceImage, DeviceImage) => {
            let queue = need_queue(queue)?;
            let region = src.requisition.cl_region();
            let src_mem = src.image.as_ref().expect("source image slot present");
            let dst_mem = dst.image.as_ref().expect("destination image slot present");
            let mut event = Event::null();
            core::enqueue_copy_image(&queue, src_mem, dst_mem, [0, 0, 0], [0, 0, 0],
                region, None::<Event>, Some(&mut event))?;
            core::wait_for_event(&event)?;
        }
        (Invalid, _) | (_, Invalid) => unreachable!("locations resolved by copy()"),
    }

    Ok(())
}

fn depth_size(depth: Depth) -> usize {
    match depth {
        Depth::U8 => 1,
        Depth::U16 | Depth::S16 => 2,
        Depth::S32 | Depth::U32 | Depth::F32 => 4,
    }
}

/// Promotes `depth`-typed samples stored in the raw bytes of `data` to float,
/// in place.
///
/// Processing runs from back to front so that sources at most as wide as the
/// 32-bit target never overwrite samples that have yet to be read.
fn convert_in_place(data: &mut [f32], depth: Depth) {
    if depth == Depth::F32 {
        return;
    }

    let n = data.len();
    let dst = data.as_mut_ptr();
    let src = dst as *const u8;

    unsafe {
        match depth {
            Depth::U8 => {
                for i in (0..n).rev() {
                    *dst.add(i) = f32::from(*src.add(i));
                }
            }
            Depth::U16 => {
                let src = src as *const u16;
                for i in (0..n).rev() {
                    *dst.add(i) = f32::from(*src.add(i));
                }
            }
            Depth::S16 => {
                let src = src as *const i16;
                for i in (0..n).rev() {
                    *dst.add(i) = f32::from(*src.add(i));
                }
            }
            Depth::S32 => {
                let src = src as *const i32;
                for i in (0..n).rev() {
                    *dst.add(i) = *src.add(i) as f32;
                }
            }
            Depth::U32 => {
                let src = src as *const u32;
                for i in (0..n).rev() {
                    *dst.add(i) = *src.add(i) as f32;
                }
            }
            Depth::F32 => unreachable!(),
        }
    }
}

/// Promotes `depth`-typed samples from an external byte slice into `dst`.
fn convert_from(dst: &mut [f32], data: &[u8], depth: Depth) {
    match depth {
        Depth::U8 => {
            for (out, chunk) in dst.iter_mut().zip(data.iter()) {
                *out = f32::from(*chunk);
            }
        }
        Depth::U16 => {
            for (out, chunk) in dst.iter_mut().zip(data.chunks_exact(2)) {
                *out = f32::from(u16::from_ne_bytes([chunk[0], chunk[1]]));
            }
        }
        Depth::S16 => {
            for (out, chunk) in dst.iter_mut().zip(data.chunks_exact(2)) {
                *out = f32::from(i16::from_ne_bytes([chunk[0], chunk[1]]));
            }
        }
        Depth::S32 => {
            for (out, chunk) in dst.iter_mut().zip(data.chunks_exact(4)) {
                *out = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32;
            }
        }
        Depth::U32 => {
            for (out, chunk) in dst.iter_mut().zip(data.chunks_exact(4)) {
                *out = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32;
            }
        }
        Depth::F32 => {
            for (out, chunk) in dst.iter_mut().zip(data.chunks_exact(4)) {
                *out = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
    }
}
