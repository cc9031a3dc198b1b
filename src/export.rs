use super::*;

/// Destination for lifecycle records.
pub trait EventWriter {
  /// # Errors
  ///
  /// Returns an `EmitError` if the record cannot be encoded or if the
  /// underlying writer fails to persist it.
  fn write_event(&mut self, event: &EmittedEvent) -> Result<(), EmitError>;

  /// # Errors
  ///
  /// Returns an `EmitError` if buffered records cannot be persisted.
  fn flush(&mut self) -> Result<(), EmitError> {
    Ok(())
  }
}

/// JSON lines exporter that writes one JSON object per record.
///
/// Every record is flushed as soon as it is written, so a process that dies
/// without reaching shutdown still leaves its completed lifecycles on disk.
pub struct JsonLinesWriter<W: Write> {
  writer: W,
}

impl<W: Write> EventWriter for JsonLinesWriter<W> {
  fn write_event(&mut self, event: &EmittedEvent) -> Result<(), EmitError> {
    let mut encoded = serde_json::to_vec(event)?;
    encoded.push(b'\n');
    self.writer.write_all(&encoded)?;
    self.writer.flush()?;
    Ok(())
  }

  fn flush(&mut self) -> Result<(), EmitError> {
    self.writer.flush()?;
    Ok(())
  }
}

impl<W: Write> JsonLinesWriter<W> {
  pub fn into_inner(self) -> W {
    self.writer
  }

  pub fn new(writer: W) -> Self {
    Self { writer }
  }
}

impl JsonLinesWriter<BufWriter<File>> {
  /// Open `path` for appending, creating it if needed.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be opened.
  pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Self::new(BufWriter::new(file)))
  }
}

/// Keeps records in memory, for embedding and tests. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
  events: Arc<Mutex<Vec<EmittedEvent>>>,
}

impl EventWriter for MemoryWriter {
  fn write_event(&mut self, event: &EmittedEvent) -> Result<(), EmitError> {
    self.events.lock().push(event.clone());
    Ok(())
  }
}

impl MemoryWriter {
  #[must_use]
  pub fn events(&self) -> Vec<EmittedEvent> {
    self.events.lock().clone()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.events.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.events.lock().is_empty()
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }
}

/// Turns allocation records into lifecycle records and serializes writes so
/// that concurrent completions never interleave mid-record.
pub struct Emitter {
  origin: Instant,
  writer: Mutex<Box<dyn EventWriter + Send>>,
}

impl std::fmt::Debug for Emitter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Emitter")
      .field("origin", &self.origin)
      .finish_non_exhaustive()
  }
}

impl Emitter {
  /// Write a record pairing `record` with its free side.
  ///
  /// # Errors
  ///
  /// Returns an error if the writer fails.
  pub fn emit_completed(
    &self,
    record: &AllocationRecord,
    freed_at: Instant,
    free_trace: &CapturedTrace,
  ) -> Result<(), EmitError> {
    let mut event = self.allocation_side(record);
    event.free_time = Some(seconds_since(self.origin, freed_at));
    event.free_trace = Some(free_trace.resolve());
    self.write(&event)
  }

  /// Write a record that has no free side.
  ///
  /// # Errors
  ///
  /// Returns an error if the writer fails.
  pub fn emit_orphaned(
    &self,
    record: &AllocationRecord,
  ) -> Result<(), EmitError> {
    let event = self.allocation_side(record);
    self.write(&event)
  }

  /// # Errors
  ///
  /// Returns an error if the writer cannot flush.
  pub fn flush(&self) -> Result<(), EmitError> {
    self.writer.lock().flush()
  }

  #[must_use]
  pub fn new(origin: Instant, writer: Box<dyn EventWriter + Send>) -> Self {
    Self {
      origin,
      writer: Mutex::new(writer),
    }
  }

  #[must_use]
  pub fn origin(&self) -> Instant {
    self.origin
  }

  fn allocation_side(&self, record: &AllocationRecord) -> EmittedEvent {
    EmittedEvent {
      address: record.address,
      size: record.size,
      allocation_time: seconds_since(self.origin, record.allocated_at),
      allocation_trace: record.trace.resolve(),
      free_time: None,
      free_trace: None,
    }
  }

  fn write(&self, event: &EmittedEvent) -> Result<(), EmitError> {
    self.writer.lock().write_event(event)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[derive(Clone, Default)]
  struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

  impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      // One byte at a time, so unserialized writers would interleave.
      let Some(byte) = buf.first() else {
        return Ok(0);
      };
      self.0.lock().push(*byte);
      std::thread::yield_now();
      Ok(1)
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  struct BrokenWriter;

  impl EventWriter for BrokenWriter {
    fn write_event(&mut self, _event: &EmittedEvent) -> Result<(), EmitError> {
      Err(io::Error::other("disk full").into())
    }
  }

  fn record(address: usize, size: usize, at: Instant) -> AllocationRecord {
    AllocationRecord::new(address, size, CapturedTrace::default())
      .allocated_at(at)
  }

  #[test]
  fn completed_record_has_free_side() {
    let origin = Instant::now();
    let sink = MemoryWriter::new();
    let emitter = Emitter::new(origin, Box::new(sink.clone()));

    emitter
      .emit_completed(
        &record(0x100, 64, origin + Duration::from_millis(10)),
        origin + Duration::from_millis(30),
        &CapturedTrace::default(),
      )
      .expect("emit");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), LifecycleKind::Completed);
    assert_eq!(events[0].allocation_time, 0.01);
    assert_eq!(events[0].free_time, Some(0.03));
  }

  #[test]
  fn orphaned_record_has_no_free_side() {
    let origin = Instant::now();
    let sink = MemoryWriter::new();
    let emitter = Emitter::new(origin, Box::new(sink.clone()));

    emitter
      .emit_orphaned(&record(0x200, 16, origin))
      .expect("emit");

    let events = sink.events();
    assert_eq!(events[0].kind(), LifecycleKind::Orphaned);
    assert!(events[0].free_trace.is_none());
  }

  #[test]
  fn concurrent_writes_do_not_interleave() {
    let buffer = SharedBuffer::default();
    let emitter = Arc::new(Emitter::new(
      Instant::now(),
      Box::new(JsonLinesWriter::new(buffer.clone())),
    ));

    let writers: Vec<_> = (0..4usize)
      .map(|worker| {
        let emitter = Arc::clone(&emitter);

        std::thread::spawn(move || {
          for index in 0..25usize {
            let at = emitter.origin();
            emitter
              .emit_orphaned(&record(worker * 1_000 + index, index, at))
              .expect("emit");
          }
        })
      })
      .collect();

    for writer in writers {
      writer.join().expect("writer panicked");
    }

    let output = String::from_utf8(buffer.0.lock().clone()).expect("utf8");
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(lines.len(), 100);

    for line in lines {
      let event: EmittedEvent = serde_json::from_str(line).expect("line");
      assert_eq!(event.kind(), LifecycleKind::Orphaned);
    }
  }

  #[test]
  fn writer_failures_are_reported() {
    let emitter = Emitter::new(Instant::now(), Box::new(BrokenWriter));
    let result = emitter.emit_orphaned(&record(1, 1, Instant::now()));

    assert!(matches!(result, Err(EmitError::Io(_))));
  }

  #[test]
  fn records_reach_the_file_without_a_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("malloc.out");
    let origin = Instant::now();

    let emitter = Emitter::new(
      origin,
      Box::new(JsonLinesWriter::append(&path).expect("open")),
    );

    for address in 1..=3usize {
      emitter
        .emit_completed(
          &record(address, 8, origin),
          origin,
          &CapturedTrace::default(),
        )
        .expect("emit");

      let contents = std::fs::read_to_string(&path).expect("read");
      assert_eq!(contents.lines().count(), address);
    }
  }

  #[test]
  fn append_mode_keeps_earlier_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("malloc.out");
    let origin = Instant::now();

    for address in [1usize, 2] {
      let writer = JsonLinesWriter::append(&path).expect("open");
      let emitter = Emitter::new(origin, Box::new(writer));
      emitter
        .emit_orphaned(&record(address, 8, origin))
        .expect("emit");
      emitter.flush().expect("flush");
    }

    let contents = std::fs::read_to_string(&path).expect("read");
    assert_eq!(contents.lines().count(), 2);
  }
}
