use super::*;

static STACK_WALK_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Frames walked past `max_depth` while still looking for an entry point.
const ENTRY_SEARCH_FRAMES: usize = 32;

/// Captures call stacks at allocation and free sites.
///
/// Capturing only records raw frames; symbol resolution is deferred to
/// [`CapturedTrace::frames`], which runs when a record is emitted.
///
/// Entry points are the start addresses of the functions through which the
/// application enters the profiler (`malloc`, `GlobalAlloc::alloc`, ...).
/// When a walk meets one, that frame and every frame inside it are dropped,
/// so traces start at the application's call site whatever the inlining.
#[derive(Debug, Clone)]
pub struct Capturer {
  available: bool,
  entry_points: Vec<usize>,
  executable: Option<PathBuf>,
  max_depth: usize,
}

impl Capturer {
  /// A capturer that never walks the stack.
  #[must_use]
  pub fn unavailable() -> Self {
    Self {
      available: false,
      entry_points: Vec::new(),
      executable: None,
      max_depth: 1,
    }
  }

  #[must_use]
  pub fn entry_points(&self) -> &[usize] {
    &self.entry_points
  }

  #[must_use]
  pub fn is_available(&self) -> bool {
    self.available
  }

  #[must_use]
  pub fn executable(&self) -> Option<&Path> {
    self.executable.as_deref()
  }

  /// Prepare stack walking for this process.
  ///
  /// The stack-walk check runs once per process; later calls reuse its
  /// verdict. A capturer that cannot walk the stack, or that was pointed at
  /// an executable which does not exist, degrades to returning empty traces.
  #[must_use]
  pub fn initialize(executable: Option<&Path>, max_depth: usize) -> Self {
    let walkable = *STACK_WALK_AVAILABLE.get_or_init(check_stack_walk);

    if !walkable {
      warn!("stack walking unavailable, traces will be empty");
    }

    let executable_found = executable.is_none_or(Path::exists);

    if !executable_found {
      warn!(
        ?executable,
        "executable for symbol resolution not found, traces will be empty"
      );
    }

    Self {
      available: walkable && executable_found,
      entry_points: Vec::new(),
      executable: executable.map(Path::to_path_buf),
      max_depth: max_depth.max(1),
    }
  }

  /// Walk the calling thread's stack.
  ///
  /// Everything up to and including the outermost entry-point frame is
  /// dropped, then the next `skip` frames. Without a matching entry point
  /// the `skip` frames are counted from the innermost frame.
  #[inline(never)]
  #[must_use]
  pub fn capture(&self, skip: usize) -> CapturedTrace {
    if !self.available {
      return CapturedTrace::default();
    }

    let search_limit = if self.entry_points.is_empty() {
      self.max_depth
    } else {
      self.max_depth + ENTRY_SEARCH_FRAMES
    };

    let mut crossed = false;
    let mut frames = Vec::with_capacity(self.max_depth.min(32));
    let mut remaining_skip = skip;

    backtrace::trace(|frame| {
      if self.is_entry_point(frame) {
        frames.clear();
        crossed = true;
        remaining_skip = skip;
        return true;
      }

      if remaining_skip > 0 {
        remaining_skip -= 1;
        return true;
      }

      frames.push(frame.clone());

      let limit = if crossed { self.max_depth } else { search_limit };
      frames.len() < limit
    });

    frames.truncate(self.max_depth);

    CapturedTrace { frames }
  }

  fn is_entry_point(&self, frame: &Frame) -> bool {
    !self.entry_points.is_empty()
      && self
        .entry_points
        .contains(&(frame.symbol_address() as usize))
  }

  #[must_use]
  pub fn max_depth(&self) -> usize {
    self.max_depth
  }

  /// Register functions whose frames mark the start of profiler code.
  #[must_use]
  pub fn with_entry_points(
    mut self,
    entry_points: impl IntoIterator<Item = usize>,
  ) -> Self {
    self.entry_points.extend(entry_points);
    self.entry_points.sort_unstable();
    self.entry_points.dedup();
    self
  }
}

fn check_stack_walk() -> bool {
  let mut seen = 0usize;

  backtrace::trace(|_| {
    seen += 1;
    false
  });

  seen > 0
}

/// Unresolved frames of one capture, innermost first as walked.
#[derive(Debug, Clone, Default)]
pub struct CapturedTrace {
  frames: Vec<Frame>,
}

impl CapturedTrace {
  /// Resolve frames on demand, outermost caller first.
  ///
  /// Frames that resolve to neither a function nor a file are omitted.
  pub fn frames(&self) -> impl Iterator<Item = StackFrame> + '_ {
    self.frames.iter().rev().filter_map(resolve)
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.frames.len()
  }

  #[must_use]
  pub fn resolve(&self) -> Vec<StackFrame> {
    self.frames().collect()
  }
}

fn resolve(frame: &Frame) -> Option<StackFrame> {
  let mut filename = None;
  let mut function = None;
  let mut line_no = None;

  backtrace::resolve_frame(frame, |symbol| {
    if filename.is_none() {
      filename = symbol
        .filename()
        .and_then(path_to_string)
        .map(str::to_string);
    }

    if function.is_none() {
      function = symbol.name().map(|name| symbol_name_to_string(&name));
    }

    if line_no.is_none() {
      line_no = symbol.lineno();
    }
  });

  if function.is_none() && filename.is_none() {
    return None;
  }

  Some(StackFrame::new(
    frame.ip() as usize,
    function.unwrap_or_else(|| UNKNOWN.to_string()),
    filename.unwrap_or_else(|| UNKNOWN.to_string()),
    line_no.unwrap_or(0),
  ))
}

fn path_to_string(path: &Path) -> Option<&str> {
  path
    .to_str()
    .or_else(|| path.file_name().and_then(OsStr::to_str))
}

fn symbol_name_to_string(name: &SymbolName<'_>) -> String {
  format!("{name:#}")
}
