use {super::*, crate::state::install_into};

/// Rust `#[global_allocator]` surface over [`System`].
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: ProfilingAllocator = ProfilingAllocator::new();
///
/// GLOBAL.install(Profiler::builder().sampling_rate(4096))?;
/// ```
///
/// Allocations made before `install` and after `shutdown` are passed through
/// untouched.
#[derive(Debug)]
pub struct ProfilingAllocator {
  profiler: OnceLock<Profiler>,
}

impl Default for ProfilingAllocator {
  fn default() -> Self {
    Self::new()
  }
}

impl ProfilingAllocator {
  /// # Errors
  ///
  /// Returns an error if a profiler is already installed or if it fails to
  /// initialize.
  pub fn install(
    &self,
    builder: ProfilerBuilder,
  ) -> Result<&Profiler, ProfilerError> {
    let entry_points = [
      <Self as GlobalAlloc>::alloc as usize,
      <Self as GlobalAlloc>::alloc_zeroed as usize,
      <Self as GlobalAlloc>::dealloc as usize,
      <Self as GlobalAlloc>::realloc as usize,
    ];

    install_into(&self.profiler, builder.entry_points(entry_points))
  }

  #[must_use]
  pub const fn new() -> Self {
    Self {
      profiler: OnceLock::new(),
    }
  }

  #[must_use]
  pub fn profiler(&self) -> Option<&Profiler> {
    self.profiler.get()
  }

  pub fn shutdown(&self) -> Option<ShutdownReport> {
    self.profiler.get().map(Profiler::shutdown)
  }

  fn record(&self, ptr: *mut u8, size: usize) -> *mut u8 {
    if !ptr.is_null() {
      if let Some(profiler) = self.profiler.get() {
        profiler.record_allocation(ptr as usize, size);
      }
    }

    ptr
  }
}

unsafe impl GlobalAlloc for ProfilingAllocator {
  #[inline(never)]
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    // SAFETY: forwarded contract.
    let ptr = unsafe { System.alloc(layout) };
    self.record(ptr, layout.size())
  }

  #[inline(never)]
  unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
    // SAFETY: forwarded contract.
    let ptr = unsafe { System.alloc_zeroed(layout) };
    self.record(ptr, layout.size())
  }

  #[inline(never)]
  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
    if let Some(profiler) = self.profiler.get() {
      profiler.record_release(ptr as usize);
    }

    // SAFETY: forwarded contract.
    unsafe { System.dealloc(ptr, layout) }
  }

  #[inline(never)]
  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    let Some(profiler) = self.profiler.get() else {
      // SAFETY: forwarded contract.
      return unsafe { System.realloc(ptr, layout, new_size) };
    };

    let ticket = profiler.begin_resize(ptr as usize);

    // SAFETY: forwarded contract.
    let result = unsafe { System.realloc(ptr, layout, new_size) };

    profiler.finish_resize(ticket, result as usize, new_size);

    result
  }
}
