use super::*;

/// Allocation side of a sampled allocation, owned by the live table until the
/// matching free, resize, or shutdown takes it out.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
  pub address: usize,
  pub allocated_at: Instant,
  pub size: usize,
  pub trace: CapturedTrace,
}

impl AllocationRecord {
  #[must_use]
  pub fn allocated_at(mut self, allocated_at: Instant) -> Self {
    self.allocated_at = allocated_at;
    self
  }

  #[must_use]
  pub fn new(address: usize, size: usize, trace: CapturedTrace) -> Self {
    Self {
      address,
      allocated_at: Instant::now(),
      size,
      trace,
    }
  }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LifecycleKind {
  /// Allocation and free sides are both present.
  Completed,
  /// Never freed before shutdown, or its address was handed out again
  /// without a tracked free.
  Orphaned,
}

/// One line of the structured log. Times are seconds since the profiler
/// started, at millisecond resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmittedEvent {
  pub address: usize,
  pub size: usize,
  pub allocation_time: f64,
  pub allocation_trace: Vec<StackFrame>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub free_time: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub free_trace: Option<Vec<StackFrame>>,
}

impl EmittedEvent {
  #[must_use]
  pub fn kind(&self) -> LifecycleKind {
    if self.free_time.is_some() {
      LifecycleKind::Completed
    } else {
      LifecycleKind::Orphaned
    }
  }

  /// Seconds between allocation and free, for completed lifecycles.
  #[must_use]
  pub fn lifetime(&self) -> Option<f64> {
    self
      .free_time
      .map(|free_time| (free_time - self.allocation_time).max(0.0))
  }
}

/// Seconds from `origin` to `at`, truncated to whole milliseconds.
pub(crate) fn seconds_since(origin: Instant, at: Instant) -> f64 {
  let millis = at.saturating_duration_since(origin).as_millis();

  #[allow(clippy::cast_precision_loss)]
  let millis = millis as f64;

  millis / 1000.0
}
