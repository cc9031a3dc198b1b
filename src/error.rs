use {super::*, thiserror::Error};

/// Invalid profiler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value {value:?} for {variable}")]
  InvalidVariable {
    variable: &'static str,
    value: String,
  },
  #[error("sampling rate must be at least one byte")]
  ZeroSamplingRate,
  #[error("maximum stack depth must be at least one frame")]
  ZeroStackDepth,
}

/// Failures while bringing the profiler up. All of them happen before the
/// profiler is ready, so none of them can surface inside a hook.
#[derive(Debug, Error)]
pub enum ProfilerError {
  #[error("profiler already installed")]
  AlreadyInstalled,
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("failed to open output sink {}: {source}", path.display())]
  Sink {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Failures while writing a lifecycle record.
///
/// These never reach the application: the profiler counts the record as
/// dropped and carries on.
#[derive(Debug, Error)]
pub enum EmitError {
  #[error("i/o error while writing lifecycle record: {0}")]
  Io(#[from] io::Error),
  #[error("failed to encode lifecycle record as json: {0}")]
  Json(#[from] serde_json::Error),
}
