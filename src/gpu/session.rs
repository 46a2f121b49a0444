// gpu/session.rs — Compute session: device, queue, allocation, read-back.
//
// Responsibilities:
//   - Select one adapter and create one device + queue (`Session::new`), or
//     bind to a device the rasterizer already owns
//     (`Session::from_shared_device`), so buffers can cross between compute
//     and graphics without copies.
//   - Allocate every buffer and image the pipelines use.
//   - Enqueue kernel launches and hand back completion tokens.
//   - Blocking read-back. This is the only synchronous boundary: a stage
//     that needs a host-visible count or total calls one of the `read_*`
//     methods, which drain the queue before returning.
//
// ADAPTER SELECTION
// Adapters are enumerated explicitly and ranked: discrete GPU, integrated
// GPU, virtual GPU, other, CPU. Every candidate is logged at info level so a
// silent fall-back to a software rasterizer is visible.
//
// DEVICE ERRORS
// wgpu reports validation and out-of-memory failures asynchronously. Every
// call that can fail is wrapped in a pair of error scopes (`scoped`); a
// captured error becomes `Error::Device` with a numeric code. Anything that
// still escapes a scope goes to the uncaptured-error handler, which logs it.
// Device errors are fatal; nothing here retries.
//
// PROFILING
// The queue is profiling-enabled whenever the adapter offers
// `TIMESTAMP_QUERY`: every launch brackets its compute pass with a
// begin/end timestamp pair (see gpu/event.rs). Device times are read lazily,
// on `wait` for one token or `take_device_time` for everything launched
// since the previous call. Without the feature the session logs a warning
// once and tokens report host time.
//
// RELEASE ORDER
// `release` drops the queue, then the device, then the instance. Rust drops
// fields in declaration order, so a plain drop of `Session` follows the same
// order.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wgpu::util::DeviceExt;

use crate::double_buffer::DoubleBuffer;
use crate::error::{DeviceError, DeviceErrorKind, Error, Result};
use crate::gpu::buffer::{buffer_byte_size, align_to_u64, ArenaBuffer, BufferUsage, LinearBuffer, SubBuffer};
use crate::gpu::event::{CompletionToken, DeviceTimer, TIMESTAMP_PAIR_BYTES};
use crate::gpu::image::{align_to, Image2D, Texel};
use crate::gpu::kernel::Kernel;
use crate::gpu::shared::{GraphicsShared, Unshared, VertexBuffer};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Uncollected timers kept per session; older ones are dropped unread.
const MAX_PENDING_TIMERS: usize = 4096;

// ============================================================
// Configuration
// ============================================================

/// Hardware profile controlling requested limits and default workgroup size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// wgpu default limits.
    Native,
    /// WebGPU downlevel limits (256 invocations per workgroup, four storage
    /// buffers per stage). Catches kernels that would not fit small GPUs.
    Downlevel,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::Downlevel => write!(f, "Downlevel"),
        }
    }
}

impl FromStr for DeviceProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(DeviceProfile::Native),
            "downlevel" => Ok(DeviceProfile::Downlevel),
            other => Err(Error::IllegalArgument(format!("unknown device profile `{other}`"))),
        }
    }
}

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: DeviceProfile,
    pub backends: wgpu::Backends,
    /// Enable backend validation layers.
    pub validation: bool,
    pub label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: DeviceProfile::Native,
            backends: wgpu::Backends::PRIMARY,
            validation: cfg!(debug_assertions),
            label: "levelgrid".into(),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by the environment:
    /// `WGPU_BACKEND` (e.g. `vulkan`, `metal`, `dx12`) and
    /// `LEVELGRID_PROFILE` (`native` | `downlevel`).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(backends) = wgpu::util::backend_bits_from_env() {
            config.backends = backends;
        }
        if let Ok(profile) = std::env::var("LEVELGRID_PROFILE") {
            config.profile = profile.parse()?;
        }
        Ok(config)
    }
}

/// Workgroup size for 2-D launches; 1-D launches use `x * y` invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// `x × y`, rejected when empty or above `max` invocations.
    pub fn checked(x: u32, y: u32, max: u32) -> Result<Self> {
        if x == 0 || y == 0 || x.checked_mul(y).map_or(true, |n| n > max) {
            return Err(Error::IllegalArgument(format!(
                "workgroup {x}×{y} outside 1..={max} invocations"
            )));
        }
        Ok(WorkgroupSize { x, y })
    }

    /// 16×8 on native limits, 8×8 on downlevel.
    pub(crate) fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::Downlevel => WorkgroupSize { x: 8, y: 8 },
        }
    }

    /// Replace the `{{WG_X}}`, `{{WG_Y}}` and `{{WG_LINEAR}}` placeholders.
    ///
    /// naga does not accept `override` expressions in `@workgroup_size`, so
    /// the sizes are baked into the source text.
    pub fn substitute(&self, source: &str) -> String {
        source
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
            .replace("{{WG_LINEAR}}", &self.total().to_string())
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Adapter information kept for logging and build logs.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(info: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            device_type: info.device_type,
            backend: info.backend,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Work shape of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One invocation per cell of a `width × height` grid.
    Grid { width: u32, height: u32 },
    /// One invocation per item, folded into 2-D when the workgroup count
    /// exceeds the per-dimension limit.
    Linear(u32),
    /// Exactly one invocation (`@workgroup_size(1)` kernels).
    Single,
}

// ============================================================
// Session
// ============================================================

/// The compute session. Create once; everything else is allocated through
/// it and must not outlive it.
pub struct Session {
    pub queue: wgpu::Queue,
    pub device: wgpu::Device,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    id: u64,
    /// Nanoseconds per timestamp tick; `None` without `TIMESTAMP_QUERY`.
    timestamp_period: Option<f32>,
    /// Timers of launches not yet collected by `take_device_time`.
    pending_timers: Mutex<VecDeque<Arc<DeviceTimer>>>,
    /// `None` when bound to a rasterizer's device. Declared last so the
    /// instance outlives the device.
    _instance: Option<wgpu::Instance>,
}

impl Session {
    /// Discover an adapter and create the device and queue.
    ///
    /// # Errors
    /// `DeviceNotFound` when no adapter exists on the configured backends,
    /// `DeviceNotAvailable` when the device request fails.
    pub fn new(config: SessionConfig) -> Result<Self> {
        pollster::block_on(Self::init_async(config))
    }

    async fn init_async(config: SessionConfig) -> Result<Self> {
        let mut flags = wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER;
        if config.validation {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            flags,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(config.backends);
        for a in &adapters {
            log::info!("compute adapter candidate: {}", AdapterInfo::from(a.get_info()));
        }
        let adapter = adapters
            .into_iter()
            .min_by_key(|a| adapter_rank(a.get_info().device_type))
            .ok_or_else(|| {
                DeviceError::new(
                    DeviceErrorKind::DeviceNotFound,
                    "create_context",
                    format!("no adapter on backends {:?}", config.backends),
                )
            })?;
        let adapter_info = AdapterInfo::from(adapter.get_info());

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(config.label.as_str()),
                    required_features: adapter.features() & wgpu::Features::TIMESTAMP_QUERY,
                    required_limits: limits_for_profile(config.profile),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::new(DeviceErrorKind::DeviceNotAvailable, "create_queue", e.to_string()))?;

        Ok(Self::assemble(device, queue, adapter_info, config.profile, Some(instance)))
    }

    /// Bind a session to a device owned by the rasterizer (share group).
    pub fn from_shared_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
        profile: DeviceProfile,
    ) -> Self {
        Self::assemble(device, queue, adapter_info.into(), profile, None)
    }

    fn assemble(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: AdapterInfo,
        profile: DeviceProfile,
        instance: Option<wgpu::Instance>,
    ) -> Self {
        device.on_uncaptured_error(Box::new(|e| {
            log::error!("uncaptured device error: {e}");
        }));
        let timestamp_period = device
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY)
            .then(|| queue.get_timestamp_period());
        let session = Session {
            queue,
            device,
            profile,
            adapter_info,
            workgroup_size: WorkgroupSize::for_profile(profile),
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            timestamp_period,
            pending_timers: Mutex::new(VecDeque::new()),
            _instance: instance,
        };
        log::info!("{session}");
        match timestamp_period {
            Some(period) => log::info!("kernel profiling enabled ({period} ns per timestamp tick)"),
            None => log::warn!("device lacks TIMESTAMP_QUERY; kernel timings fall back to host time"),
        }
        session
    }

    /// Explicit shutdown: queue, then device, then instance.
    pub fn release(self) {
        let Session { queue, device, _instance, id, .. } = self;
        drop(queue);
        drop(device);
        drop(_instance);
        log::debug!("session {id} released");
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether launches record device timestamps.
    pub fn is_profiling(&self) -> bool {
        self.timestamp_period.is_some()
    }

    /// Override the default workgroup size. Call before compiling kernel
    /// modules; compiled programs keep the size they were built with.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<()> {
        let max = self.device.limits().max_compute_invocations_per_workgroup;
        self.workgroup_size = WorkgroupSize::checked(x, y, max)?;
        Ok(())
    }

    /// Workgroups covering a `width × height` grid.
    pub fn dispatch_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.workgroup_size.x), height.div_ceil(self.workgroup_size.y))
    }

    pub(crate) fn workgroups(&self, dispatch: Dispatch) -> (u32, u32, u32) {
        match dispatch {
            Dispatch::Grid { width, height } => {
                let (x, y) = self.dispatch_size(width, height);
                (x, y, 1)
            }
            Dispatch::Linear(n) => {
                let max = self.device.limits().max_compute_workgroups_per_dimension;
                let (x, y) = fold_linear(n, self.workgroup_size.total(), max);
                (x, y, 1)
            }
            Dispatch::Single => (1, 1, 1),
        }
    }

    // ------------------------------------------------------------
    // Error scopes
    // ------------------------------------------------------------

    /// Run `f` inside validation + out-of-memory error scopes.
    pub(crate) fn scoped<T>(&self, op: &str, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match oom.or(validation) {
            Some(err) => Err(DeviceError::from_wgpu(op, err).into()),
            None => Ok(value),
        }
    }

    // ------------------------------------------------------------
    // Factory
    // ------------------------------------------------------------

    /// Zero-initialised buffer of `len` elements.
    pub fn allocate_buffer<T: bytemuck::Pod>(&self, len: usize, usage: BufferUsage) -> Result<LinearBuffer<T>> {
        let buffer = self.scoped("allocate_buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("LinearBuffer"),
                size: buffer_byte_size::<T>(len),
                usage: usage.wgpu_usages(),
                mapped_at_creation: false,
            })
        })?;
        Ok(LinearBuffer::from_raw(buffer, len))
    }

    /// Buffer initialised from host data.
    pub fn create_buffer<T: bytemuck::Pod>(&self, data: &[T], usage: BufferUsage) -> Result<LinearBuffer<T>> {
        if data.is_empty() {
            return self.allocate_buffer(0, usage);
        }
        let buffer = self.scoped("create_buffer", || {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("LinearBuffer"),
                contents: bytemuck::cast_slice(data),
                usage: usage.wgpu_usages(),
            })
        })?;
        Ok(LinearBuffer::from_raw(buffer, data.len()))
    }

    /// Overwrite the start of `buffer` with `data`.
    pub fn write_buffer<T: bytemuck::Pod>(&self, buffer: &LinearBuffer<T>, data: &[T]) -> Result<()> {
        if data.len() > buffer.len() {
            return Err(Error::IllegalArgument(format!(
                "{} elements do not fit a buffer of {}",
                data.len(),
                buffer.len()
            )));
        }
        self.scoped("write_buffer", || {
            self.queue.write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(data));
        })
    }

    /// Uniform buffer holding `params`.
    pub fn uniform<P: bytemuck::Pod>(&self, label: &str, params: &P) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// `width × height` image, zero-initialised or uploaded from `initial`
    /// (row-major, `width * height` texels).
    pub fn allocate_2d_image<T: Texel>(&self, width: u32, height: u32, initial: Option<&[T]>) -> Result<Image2D<T>> {
        if width == 0 || height == 0 {
            return Err(Error::IllegalArgument(format!("empty image {width}×{height}")));
        }
        if let Some(data) = initial {
            if data.len() != (width * height) as usize {
                return Err(Error::IllegalArgument(format!(
                    "{} texels supplied for a {width}×{height} image",
                    data.len()
                )));
            }
        }
        let image = self.scoped("allocate_2d_image", || Image2D::<T>::new(&self.device, width, height, "Image2D"))?;
        if let Some(data) = initial {
            self.write_2d_image(&image, data)?;
        }
        Ok(image)
    }

    /// Replace the contents of `image`.
    pub fn write_2d_image<T: Texel>(&self, image: &Image2D<T>, data: &[T]) -> Result<()> {
        if data.len() != (image.width() * image.height()) as usize {
            return Err(Error::IllegalArgument(format!(
                "{} texels supplied for a {}×{} image",
                data.len(),
                image.width(),
                image.height()
            )));
        }
        self.scoped("write_2d_image", || {
            self.queue.write_texture(
                image.copy_target(),
                bytemuck::cast_slice(data),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(image.width() * std::mem::size_of::<T>() as u32),
                    rows_per_image: Some(image.height()),
                },
                image.extent(),
            );
        })
    }

    /// Two distinct images of the same shape, both starting from `initial`.
    pub fn allocate_image_pair<T: Texel>(
        &self,
        width: u32,
        height: u32,
        initial: Option<&[T]>,
    ) -> Result<DoubleBuffer<Image2D<T>>> {
        DoubleBuffer::try_from_fn(|| self.allocate_2d_image(width, height, initial))
    }

    /// Map a rasterizer-owned vertex buffer into the session.
    pub fn share_graphics_buffer(
        &self,
        handle: wgpu::Buffer,
        element_count: usize,
    ) -> Result<GraphicsShared<VertexBuffer, Unshared>> {
        Ok(GraphicsShared::new(VertexBuffer::new(handle, element_count)?))
    }

    /// Raw vertex-capable storage buffer for rasterizer implementations.
    pub fn allocate_raw_vertex_buffer(&self, capacity_floats: usize) -> Result<wgpu::Buffer> {
        self.scoped("allocate_shared_vertex_buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("shared vertex buffer"),
                size: buffer_byte_size::<f32>(capacity_floats),
                usage: BufferUsage::Vertex.wgpu_usages(),
                mapped_at_creation: false,
            })
        })
    }

    /// Arena of `capacity` elements.
    pub fn create_arena<T: bytemuck::Pod>(&self, capacity: usize) -> Result<ArenaBuffer<T>> {
        let alignment = self.device.limits().min_storage_buffer_offset_alignment as u64;
        let bytes = align_to_u64(buffer_byte_size::<T>(capacity), alignment);
        let buffer = self.scoped("create_arena", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("ArenaBuffer"),
                size: bytes,
                usage: BufferUsage::Storage.wgpu_usages(),
                mapped_at_creation: false,
            })
        })?;
        Ok(ArenaBuffer::new(buffer, bytes, alignment))
    }

    // ------------------------------------------------------------
    // Enqueue / synchronisation
    // ------------------------------------------------------------

    pub(crate) fn check_tokens(&self, wait: &[&CompletionToken]) -> Result<()> {
        match wait.iter().find(|t| t.session_id != self.id) {
            Some(t) => Err(Error::IllegalState(format!(
                "token `{}` belongs to session {}, not {}",
                t.label, t.session_id, self.id
            ))),
            None => Ok(()),
        }
    }

    /// Launch `kernel` once all of `wait` have been submitted before it.
    pub fn enqueue(
        &self,
        kernel: &Kernel,
        bind_group: &wgpu::BindGroup,
        dispatch: Dispatch,
        wait: &[&CompletionToken],
    ) -> Result<CompletionToken> {
        if kernel.session_id != self.id {
            return Err(Error::IllegalState(format!(
                "kernel `{}` was compiled by another session",
                kernel.name()
            )));
        }
        self.check_tokens(wait)?;
        let (gx, gy, gz) = self.workgroups(dispatch);
        log::trace!(
            "enqueue {} {:?} -> ({gx}, {gy}, {gz}) after [{}]",
            kernel.name(),
            dispatch,
            wait.iter().map(|t| t.label).collect::<Vec<_>>().join(", ")
        );

        let (index, timer) = self.scoped(kernel.name(), || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(kernel.name()) });
            let query = self.timestamp_period.map(|period| self.timestamp_query(kernel.name(), period));
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(kernel.name()),
                    timestamp_writes: query.as_ref().map(|q| wgpu::ComputePassTimestampWrites {
                        query_set: &q.query_set,
                        beginning_of_pass_write_index: Some(0),
                        end_of_pass_write_index: Some(1),
                    }),
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(gx, gy, gz);
            }
            let timer = query.map(|q| {
                encoder.resolve_query_set(&q.query_set, 0..2, &q.resolve, 0);
                encoder.copy_buffer_to_buffer(&q.resolve, 0, &q.timer.readback, 0, TIMESTAMP_PAIR_BYTES);
                q.timer
            });
            (self.queue.submit(std::iter::once(encoder.finish())), timer)
        })?;

        let mut token = self.token(index, kernel.name());
        if let Some(timer) = timer {
            let mut pending = self.pending_timers.lock().unwrap_or_else(|e| e.into_inner());
            if pending.len() >= MAX_PENDING_TIMERS {
                pending.pop_front();
            }
            pending.push_back(Arc::clone(&timer));
            token.timer = Some(timer);
        }
        Ok(token)
    }

    /// Query set, resolve buffer and read-back timer for one launch.
    fn timestamp_query(&self, label: &str, period_ns: f32) -> TimestampQuery {
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some(label),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: TIMESTAMP_PAIR_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp readback"),
            size: TIMESTAMP_PAIR_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        TimestampQuery { query_set, resolve, timer: Arc::new(DeviceTimer::new(readback, period_ns)) }
    }

    /// A token for "everything submitted so far", with no work attached.
    pub fn marker(&self, label: &'static str) -> CompletionToken {
        let index = self.queue.submit(std::iter::empty());
        self.token(index, label)
    }

    fn token(&self, index: wgpu::SubmissionIndex, label: &'static str) -> CompletionToken {
        CompletionToken { index, session_id: self.id, label, submitted_at: std::time::Instant::now(), timer: None }
    }

    /// Block until the work behind `token` has completed.
    ///
    /// Returns the kernel's device execution time for a profiled launch,
    /// host time since submission otherwise.
    pub fn wait(&self, token: &CompletionToken) -> Result<Duration> {
        self.check_tokens(&[token])?;
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(token.index.clone()));
        match &token.timer {
            Some(timer) => self.resolve_timers(std::slice::from_ref(timer)),
            None => Ok(token.elapsed()),
        }
    }

    /// Drain the queue and return the summed device execution time of every
    /// launch since the previous call. `None` when the device cannot
    /// profile.
    pub fn take_device_time(&self) -> Result<Option<Duration>> {
        if !self.is_profiling() {
            return Ok(None);
        }
        let timers: Vec<_> = {
            let mut pending = self.pending_timers.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        self.finish();
        self.resolve_timers(&timers).map(Some)
    }

    /// Read every unresolved timer in `timers` (their submissions must be
    /// complete) and return the sum over all of them.
    fn resolve_timers(&self, timers: &[Arc<DeviceTimer>]) -> Result<Duration> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut mapping = 0usize;
        for (i, timer) in timers.iter().enumerate() {
            if timer.resolved().is_none() {
                let tx = tx.clone();
                timer.readback.slice(..).map_async(wgpu::MapMode::Read, move |r| {
                    let _ = tx.send((i, r));
                });
                mapping += 1;
            }
        }
        drop(tx);
        if mapping > 0 {
            self.device.poll(wgpu::Maintain::Wait);
        }
        for (i, result) in rx.iter() {
            let timer = &timers[i];
            result.map_err(|e| DeviceError::new(DeviceErrorKind::MapFailure, "read_timestamps", e.to_string()))?;
            {
                let bytes = timer.readback.slice(..).get_mapped_range();
                timer.resolve_from(&bytes);
            }
            timer.readback.unmap();
        }
        Ok(timers.iter().filter_map(|t| t.resolved()).sum())
    }

    /// Block until the queue is drained.
    pub fn finish(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    // ------------------------------------------------------------
    // Read-back (blocking)
    // ------------------------------------------------------------

    pub fn read_buffer<T: bytemuck::Pod>(&self, buffer: &LinearBuffer<T>) -> Result<Vec<T>> {
        self.read_raw(&buffer.buffer, 0, buffer.len(), "read_buffer")
    }

    pub fn read_buffer_element<T: bytemuck::Pod>(&self, buffer: &LinearBuffer<T>, index: usize) -> Result<T> {
        if index >= buffer.len() {
            return Err(Error::IllegalArgument(format!(
                "element {index} of a buffer of {}",
                buffer.len()
            )));
        }
        let offset = (index * std::mem::size_of::<T>()) as u64;
        let values = self.read_raw::<T>(&buffer.buffer, offset, 1, "read_buffer_element")?;
        values.into_iter().next().ok_or_else(|| {
            DeviceError::new(DeviceErrorKind::MapFailure, "read_buffer_element", "empty read-back").into()
        })
    }

    pub fn read_sub_buffer<T: bytemuck::Pod>(&self, sub: &SubBuffer<T>) -> Result<Vec<T>> {
        self.read_raw(&sub.buffer, sub.offset(), sub.len(), "read_sub_buffer")
    }

    /// First `count` floats of a shared vertex buffer.
    pub fn read_vertex_buffer(&self, vertices: &VertexBuffer, count: usize) -> Result<Vec<f32>> {
        let count = count.min(vertices.element_count());
        self.read_raw(vertices.compute_handle(), 0, count, "read_vertex_buffer")
    }

    fn read_raw<T: bytemuck::Pod>(&self, src: &wgpu::Buffer, offset: u64, count: usize, op: &str) -> Result<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = (count * std::mem::size_of::<T>()) as u64;
        if size % wgpu::COPY_BUFFER_ALIGNMENT != 0 || offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(DeviceError::new(
                DeviceErrorKind::InvalidValue,
                op,
                format!("unaligned read of {size} bytes at {offset}"),
            )
            .into());
        }

        let staging = self.scoped(op, || {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(op) });
            encoder.copy_buffer_to_buffer(src, offset, &staging, 0, size);
            self.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        self.map_read(&staging, op, |bytes| {
            bytes.chunks_exact(std::mem::size_of::<T>()).map(bytemuck::pod_read_unaligned).collect()
        })
    }

    /// Row-major texels of `image`.
    pub fn read_2d_image<T: Texel>(&self, image: &Image2D<T>) -> Result<Vec<T>> {
        let texel = std::mem::size_of::<T>() as u32;
        let row_bytes = image.width() * texel;
        let padded_row = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let height = image.height();

        let staging = self.scoped("read_2d_image", || {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("image readback staging"),
                size: (padded_row * height) as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("read_2d_image") });
            encoder.copy_texture_to_buffer(
                image.copy_target(),
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row),
                        rows_per_image: Some(height),
                    },
                },
                image.extent(),
            );
            self.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        self.map_read(&staging, "read_2d_image", |bytes| {
            let mut out = Vec::with_capacity((image.width() * height) as usize);
            for row in bytes.chunks_exact(padded_row as usize) {
                out.extend(
                    row[..row_bytes as usize]
                        .chunks_exact(texel as usize)
                        .map(bytemuck::pod_read_unaligned::<T>),
                );
            }
            out
        })
    }

    /// Map `staging` for reading, drain the queue, and decode the bytes.
    fn map_read<R>(&self, staging: &wgpu::Buffer, op: &str, decode: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DeviceError::new(DeviceErrorKind::MapFailure, op, e.to_string()).into()),
            Err(_) => {
                return Err(DeviceError::new(DeviceErrorKind::MapFailure, op, "map callback never fired").into())
            }
        }
        let out = {
            let mapped = slice.get_mapped_range();
            decode(&mapped)
        };
        staging.unmap();
        Ok(out)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session {{ id: {}, adapter: {}, profile: {}, workgroup: {}, profiling: {} }}",
            self.id,
            self.adapter_info,
            self.profile,
            self.workgroup_size,
            self.is_profiling()
        )
    }
}

// ============================================================
// Helpers
// ============================================================

/// Per-launch timestamp resources. Only the timer outlives the submission.
struct TimestampQuery {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    timer: Arc<DeviceTimer>,
}

fn adapter_rank(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Other => 3,
        wgpu::DeviceType::Cpu => 4,
    }
}

fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),
        DeviceProfile::Downlevel => wgpu::Limits::downlevel_defaults(),
    }
}

/// Fold `n` items at `per_group` invocations into an (x, y) workgroup
/// count with x ≤ `max_per_dim`. Kernels recover the item index as
/// `gid.x + gid.y * num_workgroups.x * WG_LINEAR`.
pub(crate) fn fold_linear(n: u32, per_group: u32, max_per_dim: u32) -> (u32, u32) {
    let groups = n.div_ceil(per_group);
    if groups <= max_per_dim {
        (groups, 1)
    } else {
        (max_per_dim, groups.div_ceil(max_per_dim))
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_support::{gpu_session, run_gpu_test_in_subprocess};

    #[test]
    fn test_workgroup_substitution() {
        let ws = WorkgroupSize { x: 16, y: 8 };
        let src = "@workgroup_size({{WG_X}}, {{WG_Y}}) @workgroup_size({{WG_LINEAR}})";
        assert_eq!(ws.substitute(src), "@workgroup_size(16, 8) @workgroup_size(128)");
    }

    #[test]
    fn test_workgroup_size_checked() {
        assert_eq!(WorkgroupSize::checked(16, 16, 256).unwrap(), WorkgroupSize { x: 16, y: 16 });
        assert!(WorkgroupSize::checked(32, 16, 256).is_err());
        assert!(WorkgroupSize::checked(0, 8, 256).is_err());
        // The product does not fit u32.
        assert!(WorkgroupSize::checked(u32::MAX, 2, 256).is_err());
        assert!(WorkgroupSize::checked(65_536, 65_536, u32::MAX).is_err());
    }

    #[test]
    fn test_workgroup_size_for_profiles() {
        assert_eq!(WorkgroupSize::for_profile(DeviceProfile::Native).total(), 128);
        assert_eq!(WorkgroupSize::for_profile(DeviceProfile::Downlevel).total(), 64);
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("Native".parse::<DeviceProfile>().unwrap(), DeviceProfile::Native);
        assert_eq!(" downlevel ".parse::<DeviceProfile>().unwrap(), DeviceProfile::Downlevel);
        assert!("rpi".parse::<DeviceProfile>().is_err());
    }

    #[test]
    fn test_adapter_rank_prefers_gpus() {
        assert!(adapter_rank(wgpu::DeviceType::DiscreteGpu) < adapter_rank(wgpu::DeviceType::IntegratedGpu));
        assert!(adapter_rank(wgpu::DeviceType::Other) < adapter_rank(wgpu::DeviceType::Cpu));
    }

    #[test]
    fn test_fold_linear() {
        assert_eq!(fold_linear(0, 128, 65535), (0, 1));
        assert_eq!(fold_linear(1, 128, 65535), (1, 1));
        assert_eq!(fold_linear(129, 128, 65535), (2, 1));
        // 10M items at 64 per group = 156250 groups → 65535 × 3.
        let (x, y) = fold_linear(10_000_000, 64, 65535);
        assert_eq!((x, y), (65535, 3));
        assert!(x as u64 * y as u64 * 64 >= 10_000_000);
    }

    #[test]
    fn test_downlevel_limits() {
        let limits = limits_for_profile(DeviceProfile::Downlevel);
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits_for_profile(DeviceProfile::Native), wgpu::Limits::default());
    }

    // ---- GPU integration tests (subprocess isolation) ----------------------

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_session_round_trip() {
        let session = gpu_session();
        let buf = session.create_buffer(&[1.0f32, 2.0, 3.0, 4.0], BufferUsage::Storage).unwrap();
        assert_eq!(session.read_buffer(&buf).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(session.read_buffer_element(&buf, 2).unwrap(), 3.0);

        let img = session.allocate_2d_image::<i32>(5, 3, Some(&(0..15).collect::<Vec<_>>())).unwrap();
        assert_eq!(session.read_2d_image(&img).unwrap(), (0..15).collect::<Vec<i32>>());
        session.release();
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_arena_sub_buffers_are_disjoint() {
        let session = gpu_session();
        let mut arena = session.create_arena::<f32>(1024).unwrap();
        let a = arena.request_sub_buffer(10).unwrap();
        let b = arena.request_sub_buffer(10).unwrap();
        assert!(b.offset() >= a.offset() + a.byte_len());
        assert_eq!(session.read_sub_buffer(&a).unwrap(), vec![0.0; 10]);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_kernel_launches_are_timed() {
        use crate::gpu::kernel::{Binding, KernelSource, Program};

        let session = gpu_session();
        let fill = KernelSource::from_text(
            "fill.wgsl",
            "@group(0) @binding(0) var<storage, read_write> out: array<f32>;
@compute @workgroup_size({{WG_LINEAR}})
fn fill(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&out)) {
        out[gid.x] = 1.0;
    }
}
",
        );
        let program = Program::build(&session, "fill", &[fill]).unwrap();
        let kernel = program.kernel(&session, "fill", &[Binding::storage(0)]).unwrap();
        let buf = session.allocate_buffer::<f32>(256, BufferUsage::Storage).unwrap();
        let args = kernel.args().buffer(0, &buf).build(&session).unwrap();

        let token = session.enqueue(&kernel, &args, Dispatch::Linear(256), &[]).unwrap();
        assert_eq!(token.is_profiled(), session.is_profiling());
        let waited = session.wait(&token).unwrap();
        if session.is_profiling() {
            assert_eq!(token.device_time(), Some(waited));
            assert_eq!(session.take_device_time().unwrap(), Some(waited));
            // Collected timers are not counted twice.
            assert_eq!(session.take_device_time().unwrap(), Some(Duration::ZERO));
        } else {
            assert_eq!(token.device_time(), None);
            assert_eq!(session.take_device_time().unwrap(), None);
        }
        assert_eq!(session.read_buffer(&buf).unwrap(), vec![1.0; 256]);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_kernel_launches_are_timed() {
        let out = run_gpu_test_in_subprocess("gpu::session::tests::inner_kernel_launches_are_timed");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_session_round_trip() {
        let out = run_gpu_test_in_subprocess("gpu::session::tests::inner_session_round_trip");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_arena_sub_buffers_are_disjoint() {
        let out = run_gpu_test_in_subprocess("gpu::session::tests::inner_arena_sub_buffers_are_disjoint");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
