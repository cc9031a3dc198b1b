use super::*;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SiteStats {
  pub allocations: u64,
  pub bytes_allocated: u64,
  pub frees: u64,
  pub live_bytes: u64,
  pub orphans: u64,
  /// Sum of completed lifetimes, in seconds.
  pub total_lifetime: f64,
}

impl SiteStats {
  /// Mean lifetime of the completed lifecycles, in seconds.
  #[must_use]
  pub fn mean_lifetime(&self) -> Option<f64> {
    if self.frees == 0 {
      return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let frees = self.frees as f64;

    Some(self.total_lifetime / frees)
  }

  fn on_event(&mut self, event: &EmittedEvent) {
    let size = u64::try_from(event.size).unwrap_or(u64::MAX);

    self.allocations = self.allocations.saturating_add(1);
    self.bytes_allocated = self.bytes_allocated.saturating_add(size);

    match event.lifetime() {
      Some(lifetime) => {
        self.frees = self.frees.saturating_add(1);
        self.total_lifetime += lifetime;
      }
      None => {
        self.orphans = self.orphans.saturating_add(1);
        self.live_bytes = self.live_bytes.saturating_add(size);
      }
    }
  }
}

/// Aggregates lifecycle records keyed by allocation site.
///
/// The site of a record is the innermost frame of its allocation trace that
/// resolved to a function.
#[derive(Debug, Default)]
pub struct Aggregator {
  malformed_lines: u64,
  sites: HashMap<String, SiteStats>,
}

impl Aggregator {
  /// Update the aggregate statistics based on a stream of records.
  pub fn ingest<I>(&mut self, events: I)
  where
    I: IntoIterator<Item = EmittedEvent>,
  {
    for event in events {
      self
        .sites
        .entry(site_of(&event))
        .or_default()
        .on_event(&event);
    }
  }

  /// Parse a lifecycle log, one JSON record per line.
  ///
  /// Blank lines are ignored; lines that are not records are counted and
  /// skipped, so a log truncated by a crash still aggregates.
  ///
  /// # Errors
  ///
  /// Returns an error if reading from `reader` fails.
  pub fn ingest_log<R: BufRead>(&mut self, reader: R) -> io::Result<()> {
    for (index, line) in reader.lines().enumerate() {
      let line = line?;
      let line = line.trim();

      if line.is_empty() {
        continue;
      }

      match serde_json::from_str::<EmittedEvent>(line) {
        Ok(event) => self.ingest([event]),
        Err(err) => {
          debug!(line = index + 1, %err, "skipping malformed record");
          self.malformed_lines = self.malformed_lines.saturating_add(1);
        }
      }
    }

    Ok(())
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Clears all aggregated statistics.
  pub fn reset(&mut self) {
    self.sites.clear();
    self.malformed_lines = 0;
  }

  #[must_use]
  pub fn site(&self, site: &str) -> Option<&SiteStats> {
    self.sites.get(site)
  }

  /// Produce a snapshot ordered by bytes still live.
  #[must_use]
  pub fn snapshot(&self) -> Snapshot {
    let mut records: Vec<_> = self
      .sites
      .iter()
      .map(|(site, stats)| SiteRecord {
        allocations: stats.allocations,
        bytes_allocated: stats.bytes_allocated,
        frees: stats.frees,
        live_bytes: stats.live_bytes,
        mean_lifetime: stats.mean_lifetime(),
        orphans: stats.orphans,
        site: site.clone(),
      })
      .collect();

    records.sort_by(|a, b| {
      b.live_bytes
        .cmp(&a.live_bytes)
        .then_with(|| b.bytes_allocated.cmp(&a.bytes_allocated))
        .then_with(|| a.site.cmp(&b.site))
    });

    Snapshot::new(records, self.malformed_lines)
  }
}

fn site_of(event: &EmittedEvent) -> String {
  event
    .allocation_trace
    .iter()
    .rev()
    .find(|frame| frame.has_function())
    .map_or_else(|| UNKNOWN.to_string(), StackFrame::label)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event(
    site: &str,
    size: usize,
    free_time: Option<f64>,
  ) -> EmittedEvent {
    EmittedEvent {
      address: 0x1000,
      size,
      allocation_time: 1.0,
      allocation_trace: vec![
        StackFrame::new(0, "main", "main.rs", 1),
        StackFrame::new(0, site, "lib.rs", 7),
      ],
      free_time,
      free_trace: free_time.map(|_| Vec::new()),
    }
  }

  #[test]
  fn aggregates_completed_and_orphaned_lifecycles() {
    let mut aggregator = Aggregator::new();
    aggregator.ingest(vec![
      event("parse", 128, Some(1.5)),
      event("parse", 64, Some(2.0)),
      event("parse", 32, None),
    ]);

    let stats = aggregator.site("parse (lib.rs:7)").expect("missing site");

    assert_eq!(stats.allocations, 3);
    assert_eq!(stats.frees, 2);
    assert_eq!(stats.orphans, 1);
    assert_eq!(stats.bytes_allocated, 224);
    assert_eq!(stats.live_bytes, 32);
    assert_eq!(stats.mean_lifetime(), Some(0.75));
  }

  #[test]
  fn site_is_the_innermost_resolved_frame() {
    let mut unresolved = event("parse", 8, None);
    unresolved
      .allocation_trace
      .push(StackFrame::new(0x10, UNKNOWN, "alloc.c", 0));

    let mut aggregator = Aggregator::new();
    aggregator.ingest([unresolved, event(UNKNOWN, 8, None)]);

    assert!(aggregator.site("parse (lib.rs:7)").is_some());
    assert!(aggregator.site("main (main.rs:1)").is_some());
  }

  #[test]
  fn empty_trace_is_attributed_to_unknown() {
    let mut orphan = event("parse", 16, None);
    orphan.allocation_trace.clear();

    let mut aggregator = Aggregator::new();
    aggregator.ingest([orphan]);

    assert_eq!(aggregator.site(UNKNOWN).expect("unknown").live_bytes, 16);
  }

  #[test]
  fn malformed_lines_are_counted_and_skipped() {
    let good = serde_json::to_string(&event("parse", 8, Some(1.0)))
      .expect("serialize");
    let log = format!("{good}\n\nnot json\n{{\"Address\":1}}\n{good}\n");

    let mut aggregator = Aggregator::new();
    aggregator.ingest_log(log.as_bytes()).expect("read");

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.malformed_lines(), 2);
    assert_eq!(snapshot.records()[0].allocations, 2);
  }

  #[test]
  fn reset_clears_everything() {
    let mut aggregator = Aggregator::new();
    aggregator.ingest_log("garbage\n".as_bytes()).expect("read");
    aggregator.ingest([event("parse", 8, None)]);

    aggregator.reset();

    let snapshot = aggregator.snapshot();
    assert!(snapshot.records().is_empty());
    assert_eq!(snapshot.malformed_lines(), 0);
  }
}
