use super::*;

type AddressMap<V> = HashMap<usize, V, BuildNoHashHasher<usize>>;

/// Sampled allocations that have not been freed yet, keyed by address.
///
/// Every operation holds the lock for the map mutation only; traces are
/// captured and records are emitted outside of it.
#[derive(Debug, Default)]
pub struct LiveTable {
  entries: Mutex<AddressMap<AllocationRecord>>,
}

impl LiveTable {
  #[must_use]
  pub fn contains(&self, address: usize) -> bool {
    self.entries.lock().contains_key(&address)
  }

  /// Take every entry out of the table.
  #[must_use]
  pub fn drain(&self) -> Vec<AllocationRecord> {
    let entries = std::mem::take(&mut *self.entries.lock());
    entries.into_values().collect()
  }

  /// Track `record`, returning the stale entry it replaces, if any.
  pub fn insert(&self, record: AllocationRecord) -> Option<AllocationRecord> {
    self.entries.lock().insert(record.address, record)
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn remove(&self, address: usize) -> Option<AllocationRecord> {
    self.entries.lock().remove(&address)
  }

  /// `(address, size)` of every live entry, sorted by address.
  #[must_use]
  pub fn sizes(&self) -> Vec<(usize, usize)> {
    let mut sizes: Vec<_> = self
      .entries
      .lock()
      .values()
      .map(|record| (record.address, record.size))
      .collect();

    sizes.sort_unstable();
    sizes
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(address: usize, size: usize) -> AllocationRecord {
    AllocationRecord::new(address, size, CapturedTrace::default())
  }

  #[test]
  fn insert_then_remove() {
    let table = LiveTable::new();

    assert!(table.insert(record(0x10, 64)).is_none());
    assert!(table.contains(0x10));

    let removed = table.remove(0x10).expect("entry");
    assert_eq!(removed.size, 64);
    assert!(table.is_empty());
    assert!(table.remove(0x10).is_none());
  }

  #[test]
  fn reuse_replaces_instead_of_duplicating() {
    let table = LiveTable::new();

    for size in 1..=100 {
      let stale = table.insert(record(0x20, size));
      assert_eq!(stale.map(|entry| entry.size), (size > 1).then(|| size - 1));
    }

    assert_eq!(table.len(), 1);
    assert_eq!(table.sizes(), vec![(0x20, 100)]);
  }

  #[test]
  fn drain_empties_the_table() {
    let table = LiveTable::new();
    let _ = table.insert(record(0x30, 1));
    let _ = table.insert(record(0x40, 2));

    let mut drained: Vec<_> =
      table.drain().into_iter().map(|entry| entry.address).collect();
    drained.sort_unstable();

    assert_eq!(drained, vec![0x30, 0x40]);
    assert!(table.is_empty());
  }

  #[test]
  fn concurrent_inserts_and_removes_stay_consistent() {
    let table = Arc::new(LiveTable::new());

    let workers: Vec<_> = (0..4usize)
      .map(|worker| {
        let table = Arc::clone(&table);

        std::thread::spawn(move || {
          for index in 0..1_000usize {
            let address = worker << 32 | index;
            let _ = table.insert(record(address, index));

            if index % 2 == 0 {
              assert!(table.remove(address).is_some());
            }
          }
        })
      })
      .collect();

    for worker in workers {
      worker.join().expect("worker panicked");
    }

    assert_eq!(table.len(), 4 * 500);
  }
}
