// gpu/kernel.rs — Kernel sources, programs, entry points, argument binding.
//
// LIFECYCLE
// ─────────
//   KernelModule::sources()   ordered resource paths, e.g.
//                             ["marching_squares/lookup.wgsl", ...]
//        │ KernelSource::load (embedded; unknown path → MissingKernelSource)
//        ▼
//   Program::build            concatenate, substitute workgroup sizes,
//                             compile; failure → KernelBuild with the log
//        │
//        ▼
//   KernelModule::bind        one-time entry-point lookup (Program::kernel),
//                             caching `Kernel` handles in the module
//
// A module that has not bound its kernels has nothing to enqueue: the
// pipelines keep their kernels in an `Option` and report `IllegalState`
// while it is `None`.
//
// BIND GROUP LAYOUTS
// Every entry point is created with an explicit layout listing exactly the
// bindings it touches (`Program::kernel(.., &[Binding])`). Kernels in one
// program share the global declarations but bind only their own subset.
// Binding numbers are unique per program. Field images are R32Float, which
// is not filterable without an extra feature, so sampled images are always
// declared `filterable: false` and read with `textureLoad`.

use std::borrow::Cow;

use crate::error::{DeviceError, DeviceErrorKind, Error, Result};
use crate::gpu::buffer::{LinearBuffer, SubBuffer};
use crate::gpu::image::{Image2D, Texel};
use crate::gpu::session::Session;
use crate::gpu::shared::VertexBuffer;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Embedded kernel sources, keyed by resource path.
const EMBEDDED_SOURCES: &[(&str, &str)] = &[
    ("common/indexing.wgsl", include_str!("../shaders/common/indexing.wgsl")),
    ("boundary/boundary_points.wgsl", include_str!("../shaders/boundary/boundary_points.wgsl")),
    ("boundary/prefix_sum.wgsl", include_str!("../shaders/boundary/prefix_sum.wgsl")),
    ("marching_squares/lookup.wgsl", include_str!("../shaders/marching_squares/lookup.wgsl")),
    ("marching_squares/count_segments.wgsl", include_str!("../shaders/marching_squares/count_segments.wgsl")),
    (
        "marching_squares/roll_up_histogram.wgsl",
        include_str!("../shaders/marching_squares/roll_up_histogram.wgsl"),
    ),
    (
        "marching_squares/generate_segments.wgsl",
        include_str!("../shaders/marching_squares/generate_segments.wgsl"),
    ),
    ("winding_number.wgsl", include_str!("../shaders/winding_number.wgsl")),
    ("eikonal.wgsl", include_str!("../shaders/eikonal.wgsl")),
];

/// One source fragment.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub path: Cow<'static, str>,
    pub text: Cow<'static, str>,
}

impl KernelSource {
    /// Look up an embedded resource.
    ///
    /// # Errors
    /// `MissingKernelSource` for an unknown path.
    pub fn load(path: &str) -> Result<Self> {
        EMBEDDED_SOURCES
            .iter()
            .find(|(p, _)| *p == path)
            .map(|&(p, text)| KernelSource { path: Cow::Borrowed(p), text: Cow::Borrowed(text) })
            .ok_or_else(|| Error::MissingKernelSource(path.to_string()))
    }

    /// A source supplied at runtime.
    pub fn from_text(path: impl Into<String>, text: impl Into<String>) -> Self {
        KernelSource { path: Cow::Owned(path.into()), text: Cow::Owned(text.into()) }
    }
}

/// `source` with line and (nested) block comments blanked out. Newlines are
/// kept so positions stay on the same line.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut depth = 0usize;
    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('/', Some('*')) => {
                chars.next();
                depth += 1;
                out.push(' ');
            }
            ('*', Some('/')) if depth > 0 => {
                chars.next();
                depth -= 1;
                out.push(' ');
            }
            ('/', Some('/')) if depth == 0 => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('\n', _) => out.push('\n'),
            _ if depth > 0 => {}
            _ => out.push(c),
        }
    }
    out
}

/// Names of the `@compute` entry points declared in `source`.
///
/// Token-level scan: after comments are removed, every `@compute` attribute
/// names the identifier following the next `fn` keyword, whatever other
/// attributes or line breaks sit in between. WGSL has no string literals,
/// so comments are the only text that can hide or fake a declaration.
fn compute_entry_points(source: &str) -> Vec<String> {
    let text = strip_comments(source).replace('@', " @");
    let mut tokens = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '@'))
        .filter(|t| !t.is_empty());
    let mut names = Vec::new();
    while let Some(token) = tokens.next() {
        if token == "@compute" {
            if let Some(name) = tokens.by_ref().skip_while(|t| *t != "fn").nth(1) {
                names.push(name.to_string());
            }
        }
    }
    names
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled shader module built from concatenated sources.
pub struct Program {
    module: wgpu::ShaderModule,
    label: String,
    entry_points: Vec<String>,
    session_id: u64,
}

impl Program {
    /// Concatenate `sources` and compile them on the session device.
    ///
    /// # Errors
    /// `KernelBuild` with the device build log when compilation fails.
    pub fn build(session: &Session, label: &str, sources: &[KernelSource]) -> Result<Self> {
        let joined = sources
            .iter()
            .map(|s| format!("// ---- {} ----\n{}", s.path, s.text))
            .collect::<Vec<_>>()
            .join("\n");
        let text = session.workgroup_size.substitute(&joined);
        let entry_points = compute_entry_points(&text);

        session.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = session.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(text.into()),
        });
        let info = pollster::block_on(module.get_compilation_info());
        let scope_error = pollster::block_on(session.device.pop_error_scope());

        let has_errors = info
            .messages
            .iter()
            .any(|m| m.message_type == wgpu::CompilationMessageType::Error);
        if has_errors || scope_error.is_some() {
            let log = build_log(session, &info, scope_error.as_ref());
            log::error!("kernel module `{label}` failed to build:\n{log}");
            return Err(Error::KernelBuild { module: label.to_string(), log });
        }
        for m in &info.messages {
            log::warn!("{label}: {}", m.message);
        }

        log::info!("compiled kernel module `{label}` ({} entry points)", entry_points.len());
        Ok(Program { module, label: label.to_string(), entry_points, session_id: session.id() })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    /// Look up `entry_point` and create its compute pipeline with the
    /// bindings in `signature`.
    ///
    /// # Errors
    /// `Device(InvalidKernelName)` if the program has no such entry point.
    pub fn kernel(&self, session: &Session, entry_point: &'static str, signature: &[Binding]) -> Result<Kernel> {
        if self.session_id != session.id() {
            return Err(Error::IllegalState(format!(
                "program `{}` belongs to another session",
                self.label
            )));
        }
        if !self.entry_points.iter().any(|e| e == entry_point) {
            return Err(DeviceError::new(
                DeviceErrorKind::InvalidKernelName,
                format!("create_kernel {entry_point}"),
                format!("program `{}` has no entry point `{entry_point}`", self.label),
            )
            .into());
        }
        let entries: Vec<wgpu::BindGroupLayoutEntry> = signature.iter().map(Binding::layout_entry).collect();
        let (pipeline, layout) = session.scoped(entry_point, || {
            let layout = session.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(entry_point),
                entries: &entries,
            });
            let pipeline_layout = session.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(entry_point),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = session.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &self.module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (pipeline, layout)
        })?;
        log::debug!("kernel `{entry_point}` ready ({} bindings)", signature.len());
        Ok(Kernel { name: entry_point, pipeline, layout, session_id: session.id() })
    }
}

// ---------------------------------------------------------------------------
// Binding signatures
// ---------------------------------------------------------------------------

/// What sits at one binding slot of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `var<uniform>`.
    Uniform,
    /// `var<storage, read>` (`read_only`) or `var<storage, read_write>`.
    Storage { read_only: bool },
    /// `texture_2d<f32>` / `texture_2d<i32>`, read with `textureLoad`.
    Image(wgpu::TextureFormat),
    /// `texture_storage_2d<.., write>`.
    StorageImage(wgpu::TextureFormat),
}

/// One slot of an entry point's bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub slot: u32,
    pub kind: BindingKind,
}

impl Binding {
    pub const fn uniform(slot: u32) -> Self {
        Binding { slot, kind: BindingKind::Uniform }
    }

    pub const fn storage(slot: u32) -> Self {
        Binding { slot, kind: BindingKind::Storage { read_only: false } }
    }

    pub const fn storage_read(slot: u32) -> Self {
        Binding { slot, kind: BindingKind::Storage { read_only: true } }
    }

    pub const fn image(slot: u32, format: wgpu::TextureFormat) -> Self {
        Binding { slot, kind: BindingKind::Image(format) }
    }

    pub const fn storage_image(slot: u32, format: wgpu::TextureFormat) -> Self {
        Binding { slot, kind: BindingKind::StorageImage(format) }
    }

    fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Storage { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Image(format) => wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: sample_type(format),
            },
            BindingKind::StorageImage(format) => wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.slot,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

fn sample_type(format: wgpu::TextureFormat) -> wgpu::TextureSampleType {
    match format {
        wgpu::TextureFormat::R32Sint => wgpu::TextureSampleType::Sint,
        wgpu::TextureFormat::R32Uint => wgpu::TextureSampleType::Uint,
        _ => wgpu::TextureSampleType::Float { filterable: false },
    }
}

/// "Build log for device 0 (<adapter>):" followed by every message.
fn build_log(session: &Session, info: &wgpu::CompilationInfo, scope_error: Option<&wgpu::Error>) -> String {
    let mut log = format!("Build log for device 0 ({}):\n", session.adapter_info);
    for m in &info.messages {
        match &m.location {
            Some(loc) => log.push_str(&format!(
                "{}:{}: {:?}: {}\n",
                loc.line_number, loc.line_position, m.message_type, m.message
            )),
            None => log.push_str(&format!("{:?}: {}\n", m.message_type, m.message)),
        }
    }
    if let Some(err) = scope_error {
        log.push_str(&err.to_string());
        log.push('\n');
    }
    log
}

// ---------------------------------------------------------------------------
// Kernel and arguments
// ---------------------------------------------------------------------------

/// One entry point's compute pipeline.
pub struct Kernel {
    name: &'static str,
    pub(crate) pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    pub(crate) session_id: u64,
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Start binding arguments for one launch.
    pub fn args(&self) -> KernelArgs<'_> {
        KernelArgs { kernel: self, entries: Vec::new(), error: None }
    }
}

/// Builder for a launch's bind group.
pub struct KernelArgs<'a> {
    kernel: &'a Kernel,
    entries: Vec<wgpu::BindGroupEntry<'a>>,
    error: Option<Error>,
}

impl<'a> KernelArgs<'a> {
    pub fn buffer<T: bytemuck::Pod>(mut self, binding: u32, buffer: &'a LinearBuffer<T>) -> Self {
        self.entries.push(wgpu::BindGroupEntry { binding, resource: buffer.raw().as_entire_binding() });
        self
    }

    pub fn sub_buffer<T: bytemuck::Pod>(mut self, binding: u32, sub: &'a SubBuffer<T>) -> Self {
        match sub.binding() {
            Some(b) => self.entries.push(wgpu::BindGroupEntry { binding, resource: wgpu::BindingResource::Buffer(b) }),
            None => self.fail(binding, "empty sub-buffer"),
        }
        self
    }

    pub fn vertex_buffer(mut self, binding: u32, vertices: &'a VertexBuffer) -> Self {
        match vertices.binding() {
            Some(b) => self.entries.push(wgpu::BindGroupEntry { binding, resource: wgpu::BindingResource::Buffer(b) }),
            None => self.fail(binding, "empty vertex buffer"),
        }
        self
    }

    /// Sampled or storage image; the kernel's declaration decides which.
    pub fn image<T: Texel>(mut self, binding: u32, image: &'a Image2D<T>) -> Self {
        self.entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(image.view()),
        });
        self
    }

    pub fn uniform(mut self, binding: u32, buffer: &'a wgpu::Buffer) -> Self {
        self.entries.push(wgpu::BindGroupEntry { binding, resource: buffer.as_entire_binding() });
        self
    }

    fn fail(&mut self, binding: u32, what: &str) {
        if self.error.is_none() {
            self.error = Some(Error::IllegalArgument(format!(
                "{}: binding {binding} is an {what}",
                self.kernel.name
            )));
        }
    }

    pub fn build(self, session: &Session) -> Result<wgpu::BindGroup> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let kernel = self.kernel;
        let entries = self.entries;
        session.scoped(kernel.name, || {
            session.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(kernel.name),
                layout: &kernel.layout,
                entries: &entries,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// KernelModule
// ---------------------------------------------------------------------------

/// A set of kernels built from one program.
///
/// Implementors list their sources and cache their entry points in `bind`;
/// `compile` drives the rest.
pub trait KernelModule {
    /// Program label used in logs and build errors.
    fn name(&self) -> &'static str;

    /// Ordered resource paths concatenated into the program.
    fn sources(&self) -> &'static [&'static str];

    /// Look up and cache every entry point the module launches.
    fn bind(&mut self, session: &Session, program: &Program) -> Result<()>;

    fn is_compiled(&self) -> bool;

    /// Load, build and bind.
    fn compile(&mut self, session: &Session) -> Result<()> {
        let sources = self
            .sources()
            .iter()
            .map(|path| KernelSource::load(path))
            .collect::<Result<Vec<_>>>()?;
        let program = Program::build(session, self.name(), &sources)?;
        self.bind(session, &program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_support::{gpu_session, run_gpu_test_in_subprocess};

    #[test]
    fn test_every_embedded_source_loads() {
        for (path, text) in EMBEDDED_SOURCES {
            let src = KernelSource::load(path).unwrap();
            assert_eq!(src.text, *text);
            assert!(!text.trim().is_empty(), "{path} is empty");
        }
    }

    #[test]
    fn test_missing_source_is_an_error() {
        match KernelSource::load("marching_squares/nope.wgsl") {
            Err(Error::MissingKernelSource(p)) => assert_eq!(p, "marching_squares/nope.wgsl"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_field_images_are_unfilterable() {
        let entry = Binding::image(1, wgpu::TextureFormat::R32Float).layout_entry();
        match entry.ty {
            wgpu::BindingType::Texture { sample_type, .. } => {
                assert_eq!(sample_type, wgpu::TextureSampleType::Float { filterable: false })
            }
            other => panic!("unexpected {other:?}"),
        }
        let entry = Binding::image(2, wgpu::TextureFormat::R32Sint).layout_entry();
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Texture { sample_type: wgpu::TextureSampleType::Sint, .. }
        ));
    }

    #[test]
    fn test_storage_access_modes() {
        assert!(matches!(
            Binding::storage_read(1).layout_entry().ty,
            wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Storage { read_only: true }, .. }
        ));
        assert!(matches!(
            Binding::storage(2).layout_entry().ty,
            wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Storage { read_only: false }, .. }
        ));
    }

    #[test]
    fn test_compute_entry_points_parsed() {
        let src = "\
@compute @workgroup_size(8, 8)
fn count_segments(@builtin(global_invocation_id) gid: vec3<u32>) {}

fn helper() {}

@compute
@workgroup_size(1)
fn serial_prefix_sum() {}
";
        assert_eq!(compute_entry_points(src), vec!["count_segments", "serial_prefix_sum"]);
    }

    #[test]
    fn test_entry_points_ignore_comments() {
        let src = "\
/* @compute
fn commented_out() {} */
/* outer /* nested @compute fn hidden() {} */ still comment */
@compute // fn not_this_one
@workgroup_size(64) /* fn nor_this */
fn real_entry() {}
// @compute fn line_comment() {}
@compute@workgroup_size(1) fn packed() {}
";
        assert_eq!(compute_entry_points(src), vec!["real_entry", "packed"]);
    }

    #[test]
    fn test_strip_comments_keeps_lines() {
        let src = "a /* x\ny */ b // c\nd";
        let stripped = strip_comments(src);
        assert_eq!(stripped.lines().count(), 3);
        assert!(stripped.contains('a') && stripped.contains('b') && stripped.contains('d'));
        assert!(!stripped.contains('x') && !stripped.contains('c'));
    }

    #[test]
    fn test_embedded_entry_points() {
        let text: String = EMBEDDED_SOURCES.iter().map(|(_, t)| *t).collect::<Vec<_>>().join("\n");
        let names = compute_entry_points(&text);
        for expected in [
            "count_boundary_points",
            "write_boundary_points",
            "serial_prefix_sum",
            "count_segments",
            "roll_up_histogram",
            "generate_segments",
            "compute_winding_number",
            "iterate_eikonal",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
        }
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_build_failure_reports_log() {
        let session = gpu_session();
        let broken = KernelSource::from_text("broken.wgsl", "fn oops( { }");
        match Program::build(&session, "broken", &[broken]) {
            Err(Error::KernelBuild { module, log }) => {
                assert_eq!(module, "broken");
                assert!(log.starts_with("Build log for device 0"), "{log}");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("broken source compiled"),
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_unknown_entry_point() {
        let session = gpu_session();
        let src = KernelSource::load("eikonal.wgsl").unwrap();
        let program = Program::build(&session, "eikonal", &[src]).unwrap();
        match program.kernel(&session, "no_such_kernel", &[]) {
            Err(Error::Device(e)) => assert_eq!(e.kind, DeviceErrorKind::InvalidKernelName),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("unknown entry point resolved"),
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_build_failure_reports_log() {
        let out = run_gpu_test_in_subprocess("gpu::kernel::tests::inner_build_failure_reports_log");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_unknown_entry_point() {
        let out = run_gpu_test_in_subprocess("gpu::kernel::tests::inner_unknown_entry_point");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
