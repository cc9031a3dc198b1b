use {super::*, crate::state::install_into};

/// The allocator the hooks wrap: the real implementations behind the
/// intercepted entry points.
///
/// # Safety
///
/// Implementations must honour the C allocator contract: `malloc`, `calloc`
/// and `realloc` return null or a block of at least the requested size,
/// `calloc` zero-fills, and `free` accepts null and any live block returned
/// by the other three.
pub unsafe trait RealAllocator {
  /// # Safety
  ///
  /// See the C `malloc` contract.
  unsafe fn malloc(&self, size: usize) -> *mut c_void;

  /// # Safety
  ///
  /// See the C `calloc` contract.
  unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void;

  /// # Safety
  ///
  /// `ptr` must be null or a live block from this allocator.
  unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

  /// # Safety
  ///
  /// `ptr` must be null or a live block from this allocator.
  unsafe fn free(&self, ptr: *mut c_void);
}

/// The C library allocator, reached through `libc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcAllocator;

unsafe impl RealAllocator for LibcAllocator {
  unsafe fn malloc(&self, size: usize) -> *mut c_void {
    // SAFETY: forwarded contract.
    unsafe { libc::malloc(size) }
  }

  unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
    // SAFETY: forwarded contract.
    unsafe { libc::calloc(count, size) }
  }

  unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: forwarded contract.
    unsafe { libc::realloc(ptr, size) }
  }

  unsafe fn free(&self, ptr: *mut c_void) {
    // SAFETY: forwarded contract.
    unsafe { libc::free(ptr) }
  }
}

/// The four interception entry points over a real allocator.
///
/// Every hook returns exactly what the real allocator returns. Until a
/// profiler is installed, and after it shuts down, the hooks are plain
/// forwarders.
#[derive(Debug)]
pub struct Hooks<A> {
  profiler: OnceLock<Profiler>,
  real: A,
}

impl<A: RealAllocator> Hooks<A> {
  /// Intercepted `malloc`.
  ///
  /// # Safety
  ///
  /// Same contract as [`RealAllocator::malloc`].
  #[inline(never)]
  pub unsafe fn allocate(&self, size: usize) -> *mut c_void {
    // SAFETY: forwarded contract.
    let ptr = unsafe { self.real.malloc(size) };

    if !ptr.is_null() {
      if let Some(profiler) = self.profiler.get() {
        profiler.record_allocation(ptr as usize, size);
      }
    }

    ptr
  }

  /// Build a profiler from `builder` and start routing hook calls to it.
  ///
  /// The four hooks are registered as entry points, so traces begin at their
  /// callers. Calls made while the profiler is being built pass straight
  /// through.
  ///
  /// # Errors
  ///
  /// Returns an error if a profiler is already installed or if it fails to
  /// initialize.
  pub fn install(
    &self,
    builder: ProfilerBuilder,
  ) -> Result<&Profiler, ProfilerError> {
    let entry_points = [
      Self::allocate as usize,
      Self::release as usize,
      Self::resize as usize,
      Self::zero_allocate as usize,
    ];

    install_into(&self.profiler, builder.entry_points(entry_points))
  }

  pub const fn new(real: A) -> Self {
    Self {
      profiler: OnceLock::new(),
      real,
    }
  }

  #[must_use]
  pub fn profiler(&self) -> Option<&Profiler> {
    self.profiler.get()
  }

  #[must_use]
  pub fn real(&self) -> &A {
    &self.real
  }

  /// Intercepted `free`.
  ///
  /// The lifecycle is closed before the block goes back to the real
  /// allocator, so its address cannot be handed out and tracked again while
  /// the old entry is still in the table.
  ///
  /// # Safety
  ///
  /// Same contract as [`RealAllocator::free`].
  #[inline(never)]
  pub unsafe fn release(&self, ptr: *mut c_void) {
    if !ptr.is_null() {
      if let Some(profiler) = self.profiler.get() {
        profiler.record_release(ptr as usize);
      }
    }

    // SAFETY: forwarded contract.
    unsafe { self.real.free(ptr) }
  }

  /// Intercepted `realloc`.
  ///
  /// # Safety
  ///
  /// Same contract as [`RealAllocator::realloc`].
  #[inline(never)]
  pub unsafe fn resize(
    &self,
    ptr: *mut c_void,
    new_size: usize,
  ) -> *mut c_void {
    let Some(profiler) = self.profiler.get() else {
      // SAFETY: forwarded contract.
      return unsafe { self.real.realloc(ptr, new_size) };
    };

    let ticket = profiler.begin_resize(ptr as usize);

    // SAFETY: forwarded contract.
    let result = unsafe { self.real.realloc(ptr, new_size) };

    profiler.finish_resize(ticket, result as usize, new_size);

    result
  }

  /// Stop the installed profiler, writing out every live allocation.
  pub fn shutdown(&self) -> Option<ShutdownReport> {
    self.profiler.get().map(Profiler::shutdown)
  }

  /// Intercepted `calloc`.
  ///
  /// # Safety
  ///
  /// Same contract as [`RealAllocator::calloc`].
  #[inline(never)]
  pub unsafe fn zero_allocate(
    &self,
    count: usize,
    size: usize,
  ) -> *mut c_void {
    // SAFETY: forwarded contract.
    let ptr = unsafe { self.real.calloc(count, size) };

    if !ptr.is_null() {
      if let Some(profiler) = self.profiler.get() {
        let total = count.checked_mul(size).unwrap_or(usize::MAX);
        profiler.record_allocation(ptr as usize, total);
      }
    }

    ptr
  }
}
