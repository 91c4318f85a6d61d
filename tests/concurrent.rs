use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use kiln::{downcast, managed, InstanceRegistry};

#[test]
fn test_concurrent_get_or_create_runs_factory_once() {
  let registry = Arc::new(InstanceRegistry::new());
  let factory_calls = Arc::new(AtomicUsize::new(0));

  let num_threads = 8;
  let barrier = Arc::new(Barrier::new(num_threads));
  let mut handles = vec![];

  for _ in 0..num_threads {
    let registry = registry.clone();
    let factory_calls = factory_calls.clone();
    let barrier = barrier.clone();
    handles.push(thread::spawn(move || {
      barrier.wait();
      registry
        .get_or_create("shared", |_| {
          factory_calls.fetch_add(1, Ordering::SeqCst);
          // Hold the creation open long enough for the others to pile up.
          thread::sleep(Duration::from_millis(20));
          Ok(managed(String::from("built")))
        })
        .unwrap()
    }));
  }

  let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  // Exactly one factory ran; everyone got the same instance.
  assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
  for instance in &instances[1..] {
    assert!(Arc::ptr_eq(&instances[0], instance));
  }
}

#[test]
fn test_concurrent_distinct_names_all_created() {
  let registry = Arc::new(InstanceRegistry::new());
  let num_threads = 8;
  let barrier = Arc::new(Barrier::new(num_threads));
  let mut handles = vec![];

  for i in 0..num_threads {
    let registry = registry.clone();
    let barrier = barrier.clone();
    handles.push(thread::spawn(move || {
      barrier.wait();
      let name = format!("service{i}");
      let instance = registry
        .get_or_create(&name, |_| Ok(managed(i as u32)))
        .unwrap();
      assert_eq!(*downcast::<u32>(&instance).unwrap(), i as u32);
    }));
  }

  for handle in handles {
    handle.join().unwrap();
  }

  assert_eq!(registry.count(), num_threads);
}

#[test]
fn test_finished_reads_proceed_during_slow_creation() {
  let registry = Arc::new(InstanceRegistry::new());
  registry
    .register_finished("ready", managed(1u32))
    .unwrap();

  let in_factory = Arc::new(AtomicBool::new(false));
  let creation_done = Arc::new(AtomicBool::new(false));

  let creator = {
    let registry = registry.clone();
    let in_factory = in_factory.clone();
    let creation_done = creation_done.clone();
    thread::spawn(move || {
      registry
        .get_or_create("slow", |_| {
          in_factory.store(true, Ordering::SeqCst);
          thread::sleep(Duration::from_millis(200));
          Ok(managed(2u32))
        })
        .unwrap();
      creation_done.store(true, Ordering::SeqCst);
    })
  };

  // Wait until the creation lock is definitely held.
  while !in_factory.load(Ordering::SeqCst) {
    thread::yield_now();
  }

  // A finished read must not queue behind the in-flight creation.
  let found = registry.get("ready", false).unwrap();
  assert_eq!(*downcast::<u32>(&found).unwrap(), 1);
  assert!(!creation_done.load(Ordering::SeqCst));

  creator.join().unwrap();
  assert!(registry.contains_finished("slow"));
}

#[test]
fn test_concurrent_creation_and_teardown_no_deadlock() {
  let registry = Arc::new(InstanceRegistry::new());
  for i in 0..4 {
    let name = format!("seed{i}");
    registry.register_finished(&name, managed(i as u32)).unwrap();
    let registry_ref = registry.clone();
    registry.register_disposable(&name, move || {
      let _ = registry_ref.count();
      Ok(())
    });
  }

  let num_creators = 4;
  let barrier = Arc::new(Barrier::new(num_creators + 1));
  let mut handles = vec![];

  for i in 0..num_creators {
    let registry = registry.clone();
    let barrier = barrier.clone();
    handles.push(thread::spawn(move || {
      barrier.wait();
      let name = format!("late{i}");
      // May succeed or be rejected mid-teardown; either is fine, the test
      // is that nothing hangs.
      let _ = registry.get_or_create(&name, |_| Ok(managed(0u32)));
    }));
  }

  let registry_teardown = registry.clone();
  let barrier_teardown = barrier.clone();
  handles.push(thread::spawn(move || {
    barrier_teardown.wait();
    registry_teardown.destroy_all();
  }));

  for handle in handles {
    handle.join().unwrap();
  }
}
