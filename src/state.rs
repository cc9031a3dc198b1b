use {super::*, crate::guard::with_guard};

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const UNREADY: u8 = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Lifecycle {
  Uninitialized,
  Ready,
  Unready,
}

/// Builds a [`Profiler`] and brings it to the ready state.
#[derive(Default)]
pub struct ProfilerBuilder {
  config: ProfilerConfig,
  entry_points: Vec<usize>,
  writer: Option<Box<dyn EventWriter + Send>>,
}

impl std::fmt::Debug for ProfilerBuilder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProfilerBuilder")
      .field("config", &self.config)
      .field("entry_points", &self.entry_points.len())
      .field("custom_writer", &self.writer.is_some())
      .finish()
  }
}

impl ProfilerBuilder {
  #[must_use]
  pub fn config(mut self, config: ProfilerConfig) -> Self {
    self.config = config;
    self
  }

  /// Functions through which the application enters the profiler. Their
  /// frames, and every frame inside them, are left out of traces.
  #[must_use]
  pub fn entry_points(
    mut self,
    entry_points: impl IntoIterator<Item = usize>,
  ) -> Self {
    self.entry_points.extend(entry_points);
    self
  }

  #[must_use]
  pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
    self.config.executable = Some(path.into());
    self
  }

  #[must_use]
  pub fn frames_to_skip(mut self, frames: usize) -> Self {
    self.config.frames_to_skip = frames;
    self
  }

  #[must_use]
  pub fn max_stack_depth(mut self, depth: usize) -> Self {
    self.config.max_stack_depth = depth;
    self
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.config.output_path = path.into();
    self
  }

  #[must_use]
  pub fn sampling_rate(mut self, rate: u64) -> Self {
    self.config.sampling_rate = rate;
    self
  }

  /// Send records to `writer` instead of appending to the output path.
  #[must_use]
  pub fn writer(mut self, writer: impl EventWriter + Send + 'static) -> Self {
    self.writer = Some(Box::new(writer));
    self
  }

  /// Initialize every process-wide resource, then mark the profiler ready.
  ///
  /// The clock origin is taken first, then the sink is opened and the
  /// backtrace capturer prepared; only after all of them succeed does the
  /// profiler start accepting instrumentation.
  ///
  /// # Errors
  ///
  /// Returns an error if the configuration is invalid or the output file
  /// cannot be opened.
  pub fn start(self) -> Result<Profiler, ProfilerError> {
    let Self {
      config,
      entry_points,
      writer,
    } = self;

    config.validate()?;

    let sampler = Sampler::new(config.sampling_rate)?;
    let origin = Instant::now();

    let writer = match writer {
      Some(writer) => writer,
      None => {
        let file = JsonLinesWriter::append(&config.output_path).map_err(
          |source| ProfilerError::Sink {
            path: config.output_path.clone(),
            source,
          },
        )?;

        Box::new(file)
      }
    };

    let capturer = Capturer::initialize(
      config.executable.as_deref(),
      config.max_stack_depth,
    )
    .with_entry_points(entry_points);

    let profiler = Profiler {
      capturer,
      config,
      dropped: AtomicU64::new(0),
      emitter: Emitter::new(origin, writer),
      sampler,
      state: AtomicU8::new(UNINITIALIZED),
      table: LiveTable::new(),
    };

    profiler.state.store(READY, Ordering::Release);

    info!(
      sampling_rate = profiler.config.sampling_rate,
      output = %profiler.config.output_path.display(),
      capture = profiler.capturer.is_available(),
      "allocation profiler ready"
    );

    Ok(profiler)
  }
}

/// Outcome of [`Profiler::shutdown`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ShutdownReport {
  /// Records that could not be written over the profiler's lifetime.
  pub dropped: u64,
  /// Live allocations written as orphaned lifecycles.
  pub orphaned: usize,
}

/// Table entry detached by [`Profiler::begin_resize`] while the real resize
/// runs.
#[must_use]
#[derive(Debug)]
pub struct ResizeTicket {
  address: usize,
  detached: Option<AllocationRecord>,
}

impl ResizeTicket {
  #[must_use]
  pub fn is_tracked(&self) -> bool {
    self.detached.is_some()
  }
}

/// Process-scoped profiler context shared by every installed hook.
///
/// Readiness is written once when [`ProfilerBuilder::start`] completes and
/// once when [`Profiler::shutdown`] begins; every hook reads it.
#[derive(Debug)]
pub struct Profiler {
  capturer: Capturer,
  config: ProfilerConfig,
  dropped: AtomicU64,
  emitter: Emitter,
  sampler: Sampler,
  state: AtomicU8,
  table: LiveTable,
}

impl Profiler {
  /// Detach the entry for `address` ahead of a resize.
  pub fn begin_resize(&self, address: usize) -> ResizeTicket {
    let detached = if address == 0 {
      None
    } else {
      with_guard(|| {
        if self.is_ready() {
          self.table.remove(address)
        } else {
          None
        }
      })
      .flatten()
    };

    ResizeTicket { address, detached }
  }

  #[must_use]
  pub fn builder() -> ProfilerBuilder {
    ProfilerBuilder::new()
  }

  #[must_use]
  pub fn config(&self) -> &ProfilerConfig {
    &self.config
  }

  #[must_use]
  pub fn dropped_records(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  /// Complete a resize whose real result is `new_address`.
  ///
  /// A resize of a null handle is an allocation and is sampled as one. A
  /// tracked handle emits a completed lifecycle for the old address and stays
  /// tracked at its new address and size without a fresh sampling decision;
  /// an untracked handle stays untracked. When the real resize failed the
  /// old entry is restored as it was. A record detached before a shutdown
  /// that ran during the resize is written as orphaned.
  pub fn finish_resize(
    &self,
    ticket: ResizeTicket,
    new_address: usize,
    new_size: usize,
  ) {
    let ResizeTicket { address, detached } = ticket;

    if address == 0 {
      self.record_allocation(new_address, new_size);
      return;
    }

    let Some(record) = detached else {
      return;
    };

    let _ = with_guard(|| {
      if new_address == 0 && new_size != 0 {
        self.track(record);
        return;
      }

      if !self.is_ready() {
        self.settle(self.emitter.emit_orphaned(&record));
        return;
      }

      let now = Instant::now();
      let trace = self.capturer.capture(self.config.frames_to_skip);

      self.settle(self.emitter.emit_completed(&record, now, &trace));

      if new_address != 0 {
        self.track(
          AllocationRecord::new(new_address, new_size, trace).allocated_at(now),
        );
      }
    });
  }

  #[must_use]
  pub fn is_ready(&self) -> bool {
    self.state.load(Ordering::Acquire) == READY
  }

  #[must_use]
  pub fn lifecycle(&self) -> Lifecycle {
    match self.state.load(Ordering::Acquire) {
      UNINITIALIZED => Lifecycle::Uninitialized,
      READY => Lifecycle::Ready,
      _ => Lifecycle::Unready,
    }
  }

  /// `(address, size)` of every tracked allocation, sorted by address.
  #[must_use]
  pub fn live_allocations(&self) -> Vec<(usize, usize)> {
    let _guard = ReentryGuard::enter();
    self.table.sizes()
  }

  /// Hook body for a successful allocation of `size` bytes at `address`.
  pub fn record_allocation(&self, address: usize, size: usize) {
    if address == 0 {
      return;
    }

    let _ = with_guard(|| {
      if !self.is_ready() || !self.sampler.should_sample(size) {
        return;
      }

      let trace = self.capturer.capture(self.config.frames_to_skip);
      self.track(AllocationRecord::new(address, size, trace));
    });
  }

  /// Hook body for a free of `address`. Must run before the real free.
  pub fn record_release(&self, address: usize) {
    if address == 0 {
      return;
    }

    let _ = with_guard(|| {
      if !self.is_ready() {
        return;
      }

      let Some(record) = self.table.remove(address) else {
        return;
      };

      let freed_at = Instant::now();
      let trace = self.capturer.capture(self.config.frames_to_skip);

      self.settle(self.emitter.emit_completed(&record, freed_at, &trace));
    });
  }

  #[must_use]
  pub fn sampling_rate(&self) -> u64 {
    self.sampler.rate()
  }

  /// Stop instrumenting and write every still-live allocation as an orphaned
  /// lifecycle. Only the first call does any work.
  pub fn shutdown(&self) -> ShutdownReport {
    if self.state.swap(UNREADY, Ordering::AcqRel) != READY {
      return ShutdownReport {
        dropped: self.dropped_records(),
        orphaned: 0,
      };
    }

    let _guard = ReentryGuard::enter();

    let orphans = self.table.drain();
    let orphaned = orphans.len();

    for record in &orphans {
      self.settle(self.emitter.emit_orphaned(record));
    }

    self.settle(self.emitter.flush());

    let dropped = self.dropped_records();

    info!(orphaned, dropped, "allocation profiler stopped");

    ShutdownReport { dropped, orphaned }
  }

  fn settle(&self, result: Result<(), EmitError>) {
    let Err(err) = result else {
      return;
    };

    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

    if dropped.is_power_of_two() {
      warn!(%err, dropped, "dropping lifecycle records");
    }
  }

  fn track(&self, record: AllocationRecord) {
    let address = record.address;

    if let Some(stale) = self.table.insert(record) {
      debug!(
        address = stale.address,
        size = stale.size,
        "address reused without a tracked free"
      );

      self.settle(self.emitter.emit_orphaned(&stale));
    }

    // A shutdown that drained the table before this insert never sees it.
    if !self.is_ready() {
      if let Some(late) = self.table.remove(address) {
        self.settle(self.emitter.emit_orphaned(&late));
      }
    }
  }
}

/// Build a profiler from `builder` and publish it in `slot`.
pub(crate) fn install_into<'a>(
  slot: &'a OnceLock<Profiler>,
  builder: ProfilerBuilder,
) -> Result<&'a Profiler, ProfilerError> {
  if slot.get().is_some() {
    return Err(ProfilerError::AlreadyInstalled);
  }

  let profiler = builder.start()?;

  if slot.set(profiler).is_err() {
    return Err(ProfilerError::AlreadyInstalled);
  }

  slot.get().ok_or(ProfilerError::AlreadyInstalled)
}
