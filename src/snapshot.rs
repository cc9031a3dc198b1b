use super::*;

/// Aggregated lifecycles of one allocation site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
  pub allocations: u64,
  pub bytes_allocated: u64,
  pub frees: u64,
  pub live_bytes: u64,
  /// Seconds, over completed lifecycles only.
  pub mean_lifetime: Option<f64>,
  pub orphans: u64,
  pub site: String,
}

impl Serialize for SiteRecord {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("SiteRecord", 7)?;
    state.serialize_field("site", &self.site)?;
    state.serialize_field("allocations", &self.allocations)?;
    state.serialize_field("frees", &self.frees)?;
    state.serialize_field("orphans", &self.orphans)?;
    state.serialize_field("bytes_allocated", &self.bytes_allocated)?;
    state.serialize_field("live_bytes", &self.live_bytes)?;

    if let Some(mean_lifetime) = self.mean_lifetime {
      state.serialize_field("mean_lifetime", &mean_lifetime)?;
    }

    state.end()
  }
}

/// Immutable view of an aggregated lifecycle log.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  malformed_lines: u64,
  records: Vec<SiteRecord>,
}

impl Serialize for Snapshot {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("Snapshot", 2)?;
    state.serialize_field("malformed_lines", &self.malformed_lines)?;
    state.serialize_field("records", &self.records)?;
    state.end()
  }
}

impl Snapshot {
  /// Serialize the snapshot to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), EmitError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  #[must_use]
  pub fn malformed_lines(&self) -> u64 {
    self.malformed_lines
  }

  #[must_use]
  pub(crate) fn new(records: Vec<SiteRecord>, malformed_lines: u64) -> Self {
    Self {
      malformed_lines,
      records,
    }
  }

  #[must_use]
  pub fn records(&self) -> &[SiteRecord] {
    &self.records
  }

  /// The `count` sites holding the most live bytes.
  #[must_use]
  pub fn top(&self, count: usize) -> &[SiteRecord] {
    &self.records[..count.min(self.records.len())]
  }

  #[must_use]
  pub fn total_live_bytes(&self) -> u64 {
    self
      .records
      .iter()
      .fold(0, |total, record| total.saturating_add(record.live_bytes))
  }
}
