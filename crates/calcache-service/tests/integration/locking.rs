use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime};

use calcache_service::caching::lock::lock_path;
use calcache_service::caching::{CacheError, Caches, Driver, FsLock, OwnerId};
use calcache_service::config::{Config, LockConfig};
use filetime::FileTime;

use crate::{Counted, setup_caches};

fn lock_config() -> LockConfig {
    LockConfig {
        timeout: Duration::from_millis(200),
        stale_after: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
    }
}

fn abandon(lock_file: &std::path::Path) {
    let then = SystemTime::now() - Duration::from_secs(31);
    filetime::set_file_mtime(lock_file, FileTime::from_system_time(then)).unwrap();
}

#[test]
fn test_exactly_one_owner_wins() {
    calcache_test::setup();
    let dir = calcache_test::tempdir();
    let target = dir.path().join("x");
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["owner_a", "owner_b"]
        .into_iter()
        .map(|owner| {
            let lock = FsLock::new(OwnerId::new(owner), lock_config());
            let target = target.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                lock.try_acquire(&target).unwrap()
            })
        })
        .collect();

    let guards: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(guards.iter().filter(|guard| guard.is_some()).count(), 1);
}

#[test]
fn test_waiter_proceeds_after_stale_window() {
    calcache_test::setup();
    let dir = calcache_test::tempdir();
    let target = dir.path().join("x");
    let a = FsLock::new(OwnerId::new("owner_a"), lock_config());
    let b = FsLock::new(OwnerId::new("owner_b"), lock_config());

    let crashed = a.acquire(&target).unwrap();
    assert!(matches!(
        b.acquire(&target),
        Err(CacheError::LockTimeout { .. })
    ));

    abandon(crashed.path());
    let guard = b.acquire(&target).unwrap();
    assert_eq!(
        std::fs::read_to_string(lock_path(&target)).unwrap(),
        "owner_b"
    );
    drop(crashed);
    drop(guard);
    assert!(!lock_path(&target).exists());
}

#[test]
fn test_processes_share_filesystem_cache() {
    let (first, _clock, cache_dir) = setup_caches(Driver::Filesystem, |_| {});
    let (second, _) = calcache_test::caches(&calcache_test::config(&cache_dir, Driver::Filesystem));
    assert_ne!(first.owner(), second.owner());

    let id = first
        .items
        .resolve_item("feed", |_| Some(b"V1".to_vec()))
        .unwrap();
    let content = second.items.get_item("feed", |_| None).unwrap();
    assert_eq!(content.as_deref(), Some(&b"V1"[..]));

    // the first process is stuck in a write to the item
    let item_dir = cache_dir.path().join("cal").join(id.as_str());
    let held = FsLock::new(first.owner().clone(), lock_config())
        .acquire(&item_dir)
        .unwrap();

    let err = second
        .items
        .refresh_item("feed", |_| Some(b"V2".to_vec()))
        .unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { .. }));
    // the failed write did not happen
    let content = second.items.get_item("feed", |_| None).unwrap();
    assert_eq!(content.as_deref(), Some(&b"V1"[..]));

    // the same process re-enters its own lock
    first
        .items
        .refresh_item("feed", |_| Some(b"V2".to_vec()))
        .unwrap();
    assert!(held.path().exists());

    abandon(held.path());
    second
        .items
        .refresh_item("feed", |_| Some(b"V3".to_vec()))
        .unwrap();
    let content = first.items.get_item("feed", |_| None).unwrap();
    assert_eq!(content.as_deref(), Some(&b"V3"[..]));
}

/// Resolves "feed" on its own thread after `delay`, with a slow refresh that records overlap.
fn resolve_slowly(
    caches: Caches,
    delay: Duration,
    running: &Arc<AtomicUsize>,
    max_running: &Arc<AtomicUsize>,
    calls: &Arc<AtomicUsize>,
) -> thread::JoinHandle<String> {
    let (running, max_running, calls) = (running.clone(), max_running.clone(), calls.clone());
    thread::spawn(move || {
        thread::sleep(delay);
        let id = caches
            .items
            .resolve_item("feed", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now_running, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                running.fetch_sub(1, Ordering::SeqCst);
                Some(b"V1".to_vec())
            })
            .unwrap();
        id.as_str().to_owned()
    })
}

#[test]
fn test_concurrent_refreshes_are_serialized() {
    let patient = |config: &mut Config| {
        config.locking.timeout = Duration::from_secs(5);
    };
    let (first, _clock, cache_dir) = setup_caches(Driver::Filesystem, patient);
    let mut config = calcache_test::config(&cache_dir, Driver::Filesystem);
    patient(&mut config);
    let (second, _) = calcache_test::caches(&config);
    assert_ne!(first.owner(), second.owner());

    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let a = resolve_slowly(first, Duration::ZERO, &running, &max_running, &calls);
    let b = resolve_slowly(
        second,
        Duration::from_millis(50),
        &running,
        &max_running,
        &calls,
    );
    let (a, b) = (a.join().unwrap(), b.join().unwrap());

    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    // the waiter found the item fresh once it got the lock
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a, b);
}

#[test]
fn test_refresh_skipped_on_lock_timeout() {
    let (caches, clock, cache_dir) = setup_caches(Driver::Filesystem, |config| {
        config.cal_ttl = Duration::from_secs(10);
    });
    let id = caches
        .items
        .resolve_item("feed", |_| Some(b"V1".to_vec()))
        .unwrap();
    clock.advance(Duration::from_secs(11));

    // another process is busy refreshing the item
    let item_dir = cache_dir.path().join("cal").join(id.as_str());
    let _held = FsLock::new(OwnerId::new("other"), lock_config())
        .acquire(&item_dir)
        .unwrap();

    let refresh = Counted::ok(b"V2");
    let err = caches
        .items
        .resolve_item("feed", |id| refresh.call(id))
        .unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { .. }));
    assert_eq!(refresh.calls(), 0);
}
