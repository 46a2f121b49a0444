// gpu/mod.rs — wgpu compute pipelines over the grid.
//
// Every pipeline here has a host counterpart in the parent crate
// (boundary, contour, winding, eikonal). The host versions are the
// reference: each GPU test compares device output against them.
//
// Layering:
//
//   session   adapter, device, queue, allocation, enqueue, read-back
//   buffer / image / shared / event
//             typed resources, arena, graphics ownership, completion tokens
//   kernel    embedded WGSL sources, programs, entry points, bind groups
//   boundary / contour / winding / smoothing
//             one KernelModule each
//   simulation
//             GridGeometry + the init/display driver
//
// All launches go through one queue. Host stalls happen only in the
// `Session::read_*` calls, `Session::wait`, and graphics release.

pub mod boundary;
pub mod buffer;
pub mod contour;
pub mod event;
pub mod image;
pub mod kernel;
pub mod pyramid;
pub mod session;
pub mod shared;
pub mod simulation;
pub mod smoothing;
pub mod solid;
pub mod winding;

#[cfg(test)]
pub(crate) mod test_support {
    // GPU tests run in a child `cargo test` process. Some Vulkan drivers
    // crash while tearing down the instance at process exit; running the
    // real assertions in a child and checking its output for GPU_TEST_OK
    // keeps that crash out of the parent's result.

    use crate::gpu::session::{Session, SessionConfig};
    use crate::logging::{init_logging, LoggingConfig};

    /// Session for an inner GPU test, with debug logging so the child's
    /// output shows adapter selection and kernel builds.
    pub(crate) fn gpu_session() -> Session {
        init_logging(LoggingConfig::verbose());
        Session::new(SessionConfig::default()).expect("need a GPU adapter")
    }

    /// Run one `#[ignore]`d inner test in a child process and return its
    /// combined stdout + stderr. The exit status is not checked.
    pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }
}
