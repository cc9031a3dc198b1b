//! Core library for the sampling allocation lifecycle profiler.
//!
//! The profiler sits between a program and its allocator. Every allocation
//! call is forwarded to the real allocator first; a byte-weighted sample of
//! the successful ones is recorded with its call stack and birth time, and
//! the matching free (or the process exit) produces one structured record
//! describing the allocation's whole lifetime.
//!
//! Installation surfaces live at the edges: [`Hooks`] for C-style
//! `malloc`/`calloc`/`realloc`/`free` interposition (see the `preload`
//! crate) and [`ProfilingAllocator`] for Rust's `#[global_allocator]`.

mod aggregator;
mod config;
mod error;
mod event;
mod export;
mod global;
mod guard;
mod hooks;
mod sampling;
mod snapshot;
mod stack;
mod stack_capture;
mod state;
mod table;

use {
  backtrace::{Frame, SymbolName},
  event::seconds_since,
  nohash_hasher::BuildNoHashHasher,
  parking_lot::Mutex,
  rand::{Rng, SeedableRng, rngs::SmallRng},
  serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct},
  std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::{Cell, RefCell},
    collections::HashMap,
    ffi::{OsStr, c_void},
    fs::{File, OpenOptions},
    io::{self, BufRead, BufWriter, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
      Arc, OnceLock,
      atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
  },
  tracing::{debug, info, warn},
};

pub use {
  aggregator::{Aggregator, SiteStats},
  config::{
    DEFAULT_FRAMES_TO_SKIP, DEFAULT_MAX_STACK_DEPTH, DEFAULT_OUTPUT_PATH,
    DEFAULT_SAMPLING_RATE, ProfilerConfig,
  },
  error::{ConfigError, EmitError, ProfilerError},
  event::{AllocationRecord, EmittedEvent, LifecycleKind},
  export::{Emitter, EventWriter, JsonLinesWriter, MemoryWriter},
  global::ProfilingAllocator,
  guard::ReentryGuard,
  hooks::{Hooks, LibcAllocator, RealAllocator},
  sampling::{Sampler, SamplingCursor},
  snapshot::{SiteRecord, Snapshot},
  stack::{StackFrame, UNKNOWN},
  stack_capture::{CapturedTrace, Capturer},
  state::{
    Lifecycle, Profiler, ProfilerBuilder, ResizeTicket, ShutdownReport,
  },
  table::LiveTable,
};
