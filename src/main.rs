use {
  alloc_lifecycle::{Aggregator, Snapshot},
  clap::Parser,
  std::{
    fs::File,
    io::{self, BufReader, Write},
    path::PathBuf,
    process::ExitCode,
  },
  tracing::error,
  tracing_subscriber::EnvFilter,
};

/// Summarize an allocation lifecycle log by allocation site.
#[derive(Debug, Parser)]
#[command(name = "alloc-lifecycle", version)]
struct Arguments {
  /// Lifecycle log written by the profiler.
  log: PathBuf,
  /// Number of sites to print.
  #[arg(long, default_value_t = 20)]
  top: usize,
  /// Print the full snapshot as JSON instead of a table.
  #[arg(long)]
  json: bool,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_env("ALLOC_LIFECYCLE_LOG"))
    .with_writer(io::stderr)
    .init();

  let arguments = Arguments::parse();

  match run(&arguments) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      error!(log = %arguments.log.display(), %err, "report failed");
      ExitCode::FAILURE
    }
  }
}

fn run(arguments: &Arguments) -> Result<(), Box<dyn std::error::Error>> {
  let mut aggregator = Aggregator::new();
  aggregator.ingest_log(BufReader::new(File::open(&arguments.log)?))?;

  let snapshot = aggregator.snapshot();
  let mut stdout = io::stdout().lock();

  if arguments.json {
    snapshot.export_json(&mut stdout)?;
    writeln!(stdout)?;
    return Ok(());
  }

  print_summary(&mut stdout, &snapshot, arguments.top)?;

  Ok(())
}

fn print_summary(
  out: &mut impl Write,
  snapshot: &Snapshot,
  top: usize,
) -> io::Result<()> {
  writeln!(out, "=== allocation sites by live bytes ===")?;

  for record in snapshot.top(top) {
    let lifetime = record
      .mean_lifetime
      .map_or_else(|| "-".to_string(), |seconds| format!("{seconds:.3}s"));

    writeln!(
      out,
      "live={}B total={}B allocs={} frees={} orphans={} lifetime={} {}",
      record.live_bytes,
      record.bytes_allocated,
      record.allocations,
      record.frees,
      record.orphans,
      lifetime,
      record.site
    )?;
  }

  writeln!(out, "sites: {}", snapshot.records().len())?;
  writeln!(out, "live bytes: {}", snapshot.total_live_bytes())?;
  writeln!(out, "malformed lines: {}", snapshot.malformed_lines())?;

  Ok(())
}
