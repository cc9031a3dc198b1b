use super::*;

static NEXT_SAMPLER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
  static CURSOR: RefCell<Option<SamplingCursor>> = const { RefCell::new(None) };
}

/// Byte-weighted sampling policy.
///
/// Each thread counts down its own cursor by the size of every allocation it
/// makes; the allocation that takes the cursor to zero or below is sampled
/// and the cursor is redrawn from a geometric distribution whose mean is the
/// sampling rate. Large allocations are therefore proportionally more likely
/// to be sampled than small ones.
#[derive(Debug)]
pub struct Sampler {
  id: u64,
  /// `ln(1 - 1/rate)`, negative infinity for a rate of one.
  log_miss: f64,
  rate: u64,
}

impl Sampler {
  /// # Errors
  ///
  /// Returns an error when `rate` is zero.
  pub fn new(rate: u64) -> Result<Self, ConfigError> {
    if rate == 0 {
      return Err(ConfigError::ZeroSamplingRate);
    }

    #[allow(clippy::cast_precision_loss)]
    let probability = 1.0 / rate as f64;

    Ok(Self {
      id: NEXT_SAMPLER_ID.fetch_add(1, Ordering::Relaxed),
      log_miss: (-probability).ln_1p(),
      rate,
    })
  }

  /// Bytes to let through before the next sample: the number of misses
  /// before the first hit of a Bernoulli trial with probability `1/rate`.
  #[allow(clippy::cast_possible_truncation)]
  fn draw(&self, rng: &mut SmallRng) -> i64 {
    if self.log_miss == f64::NEG_INFINITY {
      return 0;
    }

    let uniform: f64 = rng.random();

    // Float-to-int casts saturate, so a huge gap pins at `i64::MAX`.
    ((1.0 - uniform).ln() / self.log_miss).floor() as i64
  }

  #[must_use]
  pub fn rate(&self) -> u64 {
    self.rate
  }

  /// Charge `size` bytes to the calling thread's cursor and report whether
  /// this allocation is sampled.
  ///
  /// A thread whose cursor was seeded by another sampler starts afresh.
  #[must_use]
  pub fn should_sample(&self, size: usize) -> bool {
    CURSOR.with(|slot| {
      let Ok(mut slot) = slot.try_borrow_mut() else {
        return false;
      };

      if slot.as_ref().is_none_or(|cursor| cursor.owner != self.id) {
        *slot = Some(SamplingCursor::new(self, seed_rng()));
      }

      slot
        .as_mut()
        .is_some_and(|cursor| cursor.observe(size, self))
    })
  }
}

/// Per-thread countdown of bytes remaining until the next sample.
#[derive(Debug)]
pub struct SamplingCursor {
  owner: u64,
  remaining: i64,
  rng: SmallRng,
}

impl SamplingCursor {
  fn new(sampler: &Sampler, mut rng: SmallRng) -> Self {
    let remaining = sampler.draw(&mut rng);

    Self {
      owner: sampler.id,
      remaining,
      rng,
    }
  }

  /// A cursor with a fixed seed, for reproducible sampling sequences.
  #[must_use]
  pub fn seeded(sampler: &Sampler, seed: u64) -> Self {
    Self::new(sampler, SmallRng::seed_from_u64(seed))
  }

  /// Feed one allocation through this cursor.
  pub fn observe(&mut self, size: usize, sampler: &Sampler) -> bool {
    let size = i64::try_from(size).unwrap_or(i64::MAX);

    self.remaining = self.remaining.saturating_sub(size);

    if self.remaining > 0 {
      return false;
    }

    self.remaining = sampler.draw(&mut self.rng);
    true
  }

  #[must_use]
  pub fn remaining(&self) -> i64 {
    self.remaining
  }
}

fn seed_rng() -> SmallRng {
  SmallRng::try_from_os_rng()
    .unwrap_or_else(|_| SmallRng::seed_from_u64(fallback_seed()))
}

fn fallback_seed() -> u64 {
  let local = 0u8;
  let address = std::ptr::addr_of!(local) as u64;

  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.subsec_nanos())
    .unwrap_or_default();

  address ^ u64::from(nanos).rotate_left(29)
}
