// levelgrid: GPU compute pipelines for geometric scalar fields on a regular
// grid. Solid-object boundary extraction, histogram-pyramid marching squares,
// winding-number fields and eikonal signed-distance smoothing.
//
// The host modules (boundary, contour, winding, eikonal) are plain CPU
// reference implementations of the same algorithms the `gpu` pipelines run;
// tests hold the two against each other.

pub mod boundary;
pub mod contour;
pub mod double_buffer;
pub mod eikonal;
pub mod error;
pub mod field;
pub mod logging;
pub mod polygon;
pub mod winding;

pub mod gpu;

pub use double_buffer::DoubleBuffer;
pub use error::{DeviceError, DeviceErrorKind, Error, Result};
pub use field::Field;
pub use polygon::Polygon;

pub use gpu::buffer::{ArenaBuffer, BufferUsage, LinearBuffer, SubBuffer};
pub use gpu::contour::ContourSegments;
pub use gpu::event::CompletionToken;
pub use gpu::image::Image2D;
pub use gpu::kernel::KernelModule;
pub use gpu::session::{DeviceProfile, Session, SessionConfig};
pub use gpu::shared::{GraphicsShared, HeadlessRasterizer, Rasterizer, SharedForCompute, Unshared, VertexBuffer, Viewport};
pub use gpu::simulation::{FrameStats, GridGeometry, Simulation, SimulationConfig};
