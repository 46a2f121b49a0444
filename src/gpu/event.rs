// gpu/event.rs — Completion tokens.
//
// Every enqueue returns a `CompletionToken`. Later enqueues that depend on
// it list it in their wait list; `Session::wait` blocks on it. Tokens are
// `#[must_use]`, so dropping one on the floor (a dependency nobody waits on)
// shows up as a compiler warning rather than a silent race.
//
// wgpu executes submissions on one queue in order, so a wait list never has
// to stall the host: it is validated (right session) and recorded in the
// debug log. Blocking happens only in `Session::wait`, on the submission
// index the token carries.
//
// PROFILING
// When the device supports timestamp queries, each kernel launch writes a
// begin/end timestamp pair around its compute pass and resolves it into a
// small read-back buffer (`DeviceTimer`). The pair is read once the
// submission has completed; `CompletionToken::device_time` then reports the
// kernel's execution time on the device. Without the feature tokens fall
// back to host time since submission.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Bytes of one resolved begin/end timestamp pair.
pub(crate) const TIMESTAMP_PAIR_BYTES: u64 = 2 * wgpu::QUERY_SIZE as u64;

/// Device ticks between `begin` and `end` as a duration. `period_ns` is the
/// queue's nanoseconds per tick. A counter that went backwards (some drivers
/// reset it between passes) reads as zero.
pub fn ticks_to_duration(begin: u64, end: u64, period_ns: f32) -> Duration {
    let ticks = end.saturating_sub(begin);
    Duration::from_nanos((ticks as f64 * period_ns as f64).round() as u64)
}

/// Read-back side of one launch's timestamp pair.
pub(crate) struct DeviceTimer {
    pub(crate) readback: wgpu::Buffer,
    period_ns: f32,
    resolved: OnceLock<Duration>,
}

impl DeviceTimer {
    pub(crate) fn new(readback: wgpu::Buffer, period_ns: f32) -> Self {
        DeviceTimer { readback, period_ns, resolved: OnceLock::new() }
    }

    pub(crate) fn resolved(&self) -> Option<Duration> {
        self.resolved.get().copied()
    }

    /// Decode the mapped pair and cache the duration.
    pub(crate) fn resolve_from(&self, bytes: &[u8]) -> Duration {
        let begin: u64 = bytemuck::pod_read_unaligned(&bytes[..8]);
        let end: u64 = bytemuck::pod_read_unaligned(&bytes[8..16]);
        *self.resolved.get_or_init(|| ticks_to_duration(begin, end, self.period_ns))
    }
}

#[must_use = "a completion token must be waited on or passed to a dependent enqueue"]
#[derive(Clone)]
pub struct CompletionToken {
    pub(crate) index: wgpu::SubmissionIndex,
    pub(crate) session_id: u64,
    pub(crate) label: &'static str,
    pub(crate) submitted_at: Instant,
    /// `None` for markers and on devices without timestamp queries.
    pub(crate) timer: Option<Arc<DeviceTimer>>,
}

impl CompletionToken {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Host time since the work was submitted.
    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Kernel execution time measured on the device. Available once the
    /// token has been passed to `Session::wait` or collected by
    /// `Session::take_device_time`.
    pub fn device_time(&self) -> Option<Duration> {
        self.timer.as_ref().and_then(|t| t.resolved())
    }

    /// Whether this launch recorded device timestamps.
    pub fn is_profiled(&self) -> bool {
        self.timer.is_some()
    }

    /// Explicitly discard a token whose completion is covered by a later
    /// blocking call.
    pub fn retire(self) {}
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("label", &self.label)
            .field("session", &self.session_id)
            .field("device_time", &self.device_time())
            .finish()
    }
}

/// A linear chain of dependent launches: each link waits on the previous.
///
/// Used for the pyramid reduction, where level k+1 may only be computed once
/// level k is complete.
#[derive(Debug, Default)]
pub struct TokenChain {
    last: Option<CompletionToken>,
    links: usize,
}

impl TokenChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the chain after an existing token.
    pub fn after(token: CompletionToken) -> Self {
        TokenChain { last: Some(token), links: 0 }
    }

    /// Wait list for the next link.
    pub fn wait_list(&self) -> Vec<&CompletionToken> {
        self.last.iter().collect()
    }

    /// Record the next link's token.
    pub fn push(&mut self, token: CompletionToken) {
        self.last = Some(token);
        self.links += 1;
    }

    pub fn links(&self) -> usize {
        self.links
    }

    /// The token of the last link; `None` for an empty chain.
    pub fn finish(self) -> Option<CompletionToken> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(1_000, 251_000, 1.0), Duration::from_micros(250));
        // 83.333 ns per tick (12 MHz counter).
        assert_eq!(ticks_to_duration(0, 12_000, 83.333_336), Duration::from_micros(1_000));
        assert_eq!(ticks_to_duration(10, 10, 1.0), Duration::ZERO);
    }

    #[test]
    fn test_counter_reset_reads_as_zero() {
        assert_eq!(ticks_to_duration(5_000, 1_000, 1.0), Duration::ZERO);
    }
}
