use alloc_lifecycle::{
  LifecycleKind, MemoryWriter, Profiler, ProfilingAllocator,
};

#[global_allocator]
static GLOBAL: ProfilingAllocator = ProfilingAllocator::new();

// One test per binary: the allocator is process-wide and installs once.
#[test]
fn profiles_its_own_process_without_recursing() {
  let sink = MemoryWriter::new();

  let profiler = GLOBAL
    .install(
      Profiler::builder()
        .sampling_rate(1)
        .frames_to_skip(0)
        .writer(sink.clone()),
    )
    .expect("install");

  let workers: Vec<_> = (0..4)
    .map(|worker| {
      std::thread::spawn(move || {
        let mut retained = Vec::new();

        for index in 0..64usize {
          let mut buffer = vec![worker as u8; 32 + index];
          buffer.extend_from_slice(&[0; 64]);

          if index % 8 == 0 {
            retained.push(buffer);
          }
        }

        retained.len()
      })
    })
    .collect();

  for worker in workers {
    assert_eq!(worker.join().expect("worker panicked"), 8);
  }

  let completed = sink
    .events()
    .iter()
    .filter(|event| event.kind() == LifecycleKind::Completed)
    .count();

  assert!(completed >= 4 * 56);

  assert_eq!(profiler.dropped_records(), 0);
  assert!(GLOBAL.shutdown().is_some());
  assert!(!profiler.is_ready());
}
