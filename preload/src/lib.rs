//! `LD_PRELOAD` build of the allocation lifecycle profiler.
//!
//! ```text
//! ALLOC_LIFECYCLE_RATE=4096 LD_PRELOAD=liballoc_lifecycle_preload.so ./app
//! alloc-lifecycle malloc.out
//! ```
//!
//! The library interposes `malloc`, `calloc`, `realloc` and `free`. Each call
//! is forwarded to glibc's own implementation; the profiler is installed by a
//! load-time constructor and torn down at exit.

use {
  alloc_lifecycle::{
    Hooks, Profiler, ProfilerBuilder, ProfilerError, RealAllocator,
  },
  std::ffi::c_void,
};

#[cfg(not(test))]
const LOG_VAR: &str = "ALLOC_LIFECYCLE_LOG";

unsafe extern "C" {
  fn __libc_malloc(size: usize) -> *mut c_void;
  fn __libc_calloc(count: usize, size: usize) -> *mut c_void;
  fn __libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
  fn __libc_free(ptr: *mut c_void);
}

/// glibc's allocator, reached through entry points that never resolve back
/// to the interposed symbols.
struct GlibcAllocator;

unsafe impl RealAllocator for GlibcAllocator {
  unsafe fn malloc(&self, size: usize) -> *mut c_void {
    // SAFETY: direct call to the libc allocator symbol.
    unsafe { __libc_malloc(size) }
  }

  unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
    // SAFETY: direct call to the libc allocator symbol.
    unsafe { __libc_calloc(count, size) }
  }

  unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: direct call to the libc allocator symbol.
    unsafe { __libc_realloc(ptr, size) }
  }

  unsafe fn free(&self, ptr: *mut c_void) {
    // SAFETY: direct call to the libc allocator symbol.
    unsafe { __libc_free(ptr) }
  }
}

static HOOKS: Hooks<GlibcAllocator> = Hooks::new(GlibcAllocator);

#[cfg(not(test))]
#[used]
#[unsafe(link_section = ".init_array")]
static INITIALIZE: extern "C" fn() = initialize;

#[cfg(not(test))]
extern "C" fn initialize() {
  init_logging();

  let config = match alloc_lifecycle::ProfilerConfig::from_env() {
    Ok(config) => config,
    Err(err) => fatal(&err),
  };

  if let Err(err) = install(&HOOKS, Profiler::builder().config(config)) {
    fatal(&err);
  }

  // SAFETY: `teardown` is a plain `extern "C"` function with no arguments.
  if unsafe { libc::atexit(teardown) } != 0 {
    tracing::debug!(
      "atexit registration failed, live allocations will not be written"
    );
  }
}

/// Install `builder` on `hooks`, with the exported symbols as entry points
/// so that traces begin in the application rather than in this library.
fn install(
  hooks: &Hooks<GlibcAllocator>,
  builder: ProfilerBuilder,
) -> Result<&Profiler, ProfilerError> {
  let exported = [
    malloc as usize,
    calloc as usize,
    realloc as usize,
    free as usize,
  ];

  hooks.install(builder.entry_points(exported))
}

extern "C" fn teardown() {
  let _ = HOOKS.shutdown();
}

#[cfg(not(test))]
fn init_logging() {
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_env(LOG_VAR)
    .unwrap_or_else(|_| EnvFilter::new("warn"));

  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init();
}

#[cfg(not(test))]
fn fatal(err: &dyn std::error::Error) -> ! {
  eprintln!("alloc-lifecycle: {err}");
  std::process::abort()
}

/// # Safety
///
/// C `malloc` contract.
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
  // SAFETY: forwarded contract.
  unsafe { HOOKS.allocate(size) }
}

/// # Safety
///
/// C `calloc` contract.
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
  // SAFETY: forwarded contract.
  unsafe { HOOKS.zero_allocate(count, size) }
}

/// # Safety
///
/// C `realloc` contract.
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
  // SAFETY: forwarded contract.
  unsafe { HOOKS.resize(ptr, size) }
}

/// # Safety
///
/// C `free` contract.
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
  // SAFETY: forwarded contract.
  unsafe { HOOKS.release(ptr) }
}
