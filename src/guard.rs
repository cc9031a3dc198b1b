use super::*;

thread_local! {
  static REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as running instrumentation logic.
///
/// While a guard is alive, every hook invocation on the same thread forwards
/// straight to the real allocator: no sampling, no capture, no table access.
/// Allocations made by the instrumentation itself (trace buffers, map nodes,
/// serialized output) therefore never recurse into the profiler.
#[derive(Debug)]
pub struct ReentryGuard {
  _thread_bound: PhantomData<*const ()>,
}

impl ReentryGuard {
  /// Engage the guard, or `None` when this thread already holds one.
  #[must_use]
  pub fn enter() -> Option<Self> {
    REENTRY_DEPTH.with(|depth| {
      let current = depth.get();

      if current > 0 {
        None
      } else {
        depth.set(current + 1);

        Some(Self {
          _thread_bound: PhantomData,
        })
      }
    })
  }

  #[must_use]
  pub fn is_engaged() -> bool {
    REENTRY_DEPTH.with(|depth| depth.get() > 0)
  }
}

impl Drop for ReentryGuard {
  fn drop(&mut self) {
    REENTRY_DEPTH.with(|depth| {
      depth.set(depth.get().saturating_sub(1));
    });
  }
}

/// Run `func` with the guard engaged, skipping it entirely when the calling
/// thread is already inside instrumentation logic.
pub(crate) fn with_guard<F, R>(func: F) -> Option<R>
where
  F: FnOnce() -> R,
{
  let _guard = ReentryGuard::enter()?;
  Some(func())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nested_entry_is_refused() {
    let outer = ReentryGuard::enter().expect("first entry");
    assert!(ReentryGuard::is_engaged());
    assert!(ReentryGuard::enter().is_none());

    drop(outer);
    assert!(!ReentryGuard::is_engaged());
    assert!(ReentryGuard::enter().is_some());
  }

  #[test]
  fn with_guard_skips_nested_work() {
    let mut runs = 0;

    let outer = with_guard(|| {
      runs += 1;
      with_guard(|| 7)
    });

    assert_eq!(outer, Some(None));
    assert_eq!(runs, 1);
  }

  #[test]
  fn guard_is_released_on_unwind() {
    let result = std::panic::catch_unwind(|| {
      let _guard = ReentryGuard::enter().expect("entry");
      panic!("instrumentation failure");
    });

    assert!(result.is_err());
    assert!(!ReentryGuard::is_engaged());
  }

  #[test]
  fn guards_are_per_thread() {
    let _guard = ReentryGuard::enter().expect("entry");

    let other = std::thread::spawn(|| ReentryGuard::enter().is_some())
      .join()
      .expect("thread panicked");

    assert!(other);
  }
}
