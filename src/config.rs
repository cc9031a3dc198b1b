use super::*;

pub const DEFAULT_SAMPLING_RATE: u64 = 512;
pub const DEFAULT_FRAMES_TO_SKIP: usize = 0;
pub const DEFAULT_MAX_STACK_DEPTH: usize = 64;
pub const DEFAULT_OUTPUT_PATH: &str = "malloc.out";

const RATE_VAR: &str = "ALLOC_LIFECYCLE_RATE";
const SKIP_VAR: &str = "ALLOC_LIFECYCLE_SKIP";
const DEPTH_VAR: &str = "ALLOC_LIFECYCLE_DEPTH";
const OUTPUT_VAR: &str = "ALLOC_LIFECYCLE_OUTPUT";
const EXECUTABLE_VAR: &str = "ALLOC_LIFECYCLE_EXE";

/// Controls how the profiler samples, captures, and records allocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
  /// Executable used for symbol resolution, when it is not the running one.
  pub executable: Option<PathBuf>,
  /// Frames elided past the profiler's entry point, for wrappers around the
  /// allocator that should not count as the allocation site.
  pub frames_to_skip: usize,
  /// Upper bound on frames kept per trace.
  pub max_stack_depth: usize,
  /// Destination of the structured log, opened in append mode.
  pub output_path: PathBuf,
  /// Mean number of bytes allocated between two samples.
  pub sampling_rate: u64,
}

impl Default for ProfilerConfig {
  fn default() -> Self {
    Self {
      executable: None,
      frames_to_skip: DEFAULT_FRAMES_TO_SKIP,
      max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
      output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
      sampling_rate: DEFAULT_SAMPLING_RATE,
    }
  }
}

impl ProfilerConfig {
  /// Read the configuration from `ALLOC_LIFECYCLE_*` environment variables.
  ///
  /// # Errors
  ///
  /// Returns an error if a variable is set to a value that does not parse,
  /// or if the resulting configuration is invalid.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Same as [`ProfilerConfig::from_env`] with a custom variable source.
  ///
  /// # Errors
  ///
  /// See [`ProfilerConfig::from_env`].
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(rate) = parse_var(&lookup, RATE_VAR)? {
      config.sampling_rate = rate;
    }

    if let Some(skip) = parse_var(&lookup, SKIP_VAR)? {
      config.frames_to_skip = skip;
    }

    if let Some(depth) = parse_var(&lookup, DEPTH_VAR)? {
      config.max_stack_depth = depth;
    }

    if let Some(output) = lookup(OUTPUT_VAR).filter(|value| !value.is_empty()) {
      config.output_path = PathBuf::from(output);
    }

    config.executable = lookup(EXECUTABLE_VAR)
      .filter(|value| !value.is_empty())
      .map(PathBuf::from);

    config.validate()?;

    Ok(config)
  }

  /// # Errors
  ///
  /// Returns an error for a zero sampling rate or a zero stack depth.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.sampling_rate == 0 {
      return Err(ConfigError::ZeroSamplingRate);
    }

    if self.max_stack_depth == 0 {
      return Err(ConfigError::ZeroStackDepth);
    }

    Ok(())
  }

  #[must_use]
  pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
    self.executable = Some(executable.into());
    self
  }

  #[must_use]
  pub fn with_frames_to_skip(mut self, frames: usize) -> Self {
    self.frames_to_skip = frames;
    self
  }

  #[must_use]
  pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
    self.max_stack_depth = depth;
    self
  }

  #[must_use]
  pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.output_path = path.into();
    self
  }

  #[must_use]
  pub fn with_sampling_rate(mut self, rate: u64) -> Self {
    self.sampling_rate = rate;
    self
  }
}

fn parse_var<F, T>(
  lookup: &F,
  variable: &'static str,
) -> Result<Option<T>, ConfigError>
where
  F: Fn(&str) -> Option<String>,
  T: FromStr,
{
  let Some(value) = lookup(variable) else {
    return Ok(None);
  };

  let trimmed = value.trim();

  if trimmed.is_empty() {
    return Ok(None);
  }

  trimmed
    .parse()
    .map(Some)
    .map_err(|_| ConfigError::InvalidVariable { variable, value })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lookup_from(
    pairs: &'static [(&'static str, &'static str)],
  ) -> impl Fn(&str) -> Option<String> {
    move |name| {
      pairs
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| (*value).to_string())
    }
  }

  #[test]
  fn defaults_match_documented_constants() {
    let config = ProfilerConfig::default();

    assert_eq!(config.sampling_rate, 512);
    assert_eq!(config.output_path, Path::new("malloc.out"));
    assert!(config.executable.is_none());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn unset_variables_keep_defaults() {
    let config = ProfilerConfig::from_lookup(|_| None).expect("config");
    assert_eq!(config, ProfilerConfig::default());
  }

  #[test]
  fn reads_every_variable() {
    let config = ProfilerConfig::from_lookup(lookup_from(&[
      ("ALLOC_LIFECYCLE_RATE", "4096"),
      ("ALLOC_LIFECYCLE_SKIP", "5"),
      ("ALLOC_LIFECYCLE_DEPTH", " 16 "),
      ("ALLOC_LIFECYCLE_OUTPUT", "/tmp/lifecycle.out"),
      ("ALLOC_LIFECYCLE_EXE", "/usr/bin/true"),
    ]))
    .expect("config");

    assert_eq!(config.sampling_rate, 4096);
    assert_eq!(config.frames_to_skip, 5);
    assert_eq!(config.max_stack_depth, 16);
    assert_eq!(config.output_path, Path::new("/tmp/lifecycle.out"));
    assert_eq!(config.executable.as_deref(), Some(Path::new("/usr/bin/true")));
  }

  #[test]
  fn rejects_unparsable_values() {
    let err = ProfilerConfig::from_lookup(lookup_from(&[(
      "ALLOC_LIFECYCLE_RATE",
      "often",
    )]))
    .expect_err("should fail");

    assert!(matches!(
      err,
      ConfigError::InvalidVariable {
        variable: "ALLOC_LIFECYCLE_RATE",
        ..
      }
    ));
  }

  #[test]
  fn rejects_zero_rate_and_depth() {
    assert!(matches!(
      ProfilerConfig::default().with_sampling_rate(0).validate(),
      Err(ConfigError::ZeroSamplingRate)
    ));
    assert!(matches!(
      ProfilerConfig::default().with_max_stack_depth(0).validate(),
      Err(ConfigError::ZeroStackDepth)
    ));
  }
}
