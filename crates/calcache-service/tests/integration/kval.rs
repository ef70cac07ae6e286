use std::time::Duration;

use crate::{Counted, DRIVERS, setup_caches};

#[test]
fn test_get_respects_max_age() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.kval_ttl = Duration::from_secs(60);
        });

        caches.kval.set("k", b"v").unwrap();
        assert_eq!(caches.kval.get("k", None).unwrap().as_deref(), Some(&b"v"[..]), "{driver}");

        clock.advance(Duration::from_secs(61));
        assert_eq!(caches.kval.get("k", None).unwrap(), None, "{driver}");
        assert_eq!(
            caches.kval.get("k", Some(Duration::ZERO)).unwrap().as_deref(),
            Some(&b"v"[..]),
            "{driver}"
        );
        assert_eq!(
            caches
                .kval
                .get("k", Some(Duration::from_secs(120)))
                .unwrap()
                .as_deref(),
            Some(&b"v"[..]),
            "{driver}"
        );
        assert_eq!(caches.kval.get("missing", None).unwrap(), None, "{driver}");
    }
}

#[test]
fn test_set_replaces_and_delete_removes() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});

        caches.kval.set("k", b"one").unwrap();
        caches.kval.set("k", b"two").unwrap();
        assert_eq!(caches.kval.get("k", None).unwrap().as_deref(), Some(&b"two"[..]), "{driver}");

        assert!(caches.kval.delete("k").unwrap(), "{driver}");
        assert!(!caches.kval.delete("k").unwrap(), "{driver}");
        assert_eq!(caches.kval.get("k", Some(Duration::ZERO)).unwrap(), None, "{driver}");
    }
}

#[test]
fn test_value_creates_once() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let create = Counted::ok(b"created");

        for _ in 0..2 {
            let value = caches.kval.value("k", None, |key| create.call(key)).unwrap();
            assert_eq!(value.as_deref(), Some(&b"created"[..]), "{driver}");
        }
        assert_eq!(create.calls(), 1, "{driver}");
    }
}

#[test]
fn test_value_keeps_old_value_on_failure() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.kval_ttl = Duration::from_secs(60);
        });
        caches.kval.set("k", b"old").unwrap();

        clock.advance(Duration::from_secs(600));
        let failing = Counted::failing();
        let value = caches.kval.value("k", None, |key| failing.call(key)).unwrap();
        assert_eq!(value.as_deref(), Some(&b"old"[..]), "{driver}");
        assert_eq!(failing.calls(), 1, "{driver}");

        // touched, so it is fresh again
        assert_eq!(caches.kval.get("k", None).unwrap().as_deref(), Some(&b"old"[..]), "{driver}");

        clock.advance(Duration::from_secs(61));
        let value = caches
            .kval
            .value("k", None, |_| Some(b"new".to_vec()))
            .unwrap();
        assert_eq!(value.as_deref(), Some(&b"new"[..]), "{driver}");
    }
}

#[test]
fn test_value_does_not_cache_failures() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let failing = Counted::failing();

        for _ in 0..2 {
            let value = caches.kval.value("k", None, |key| failing.call(key)).unwrap();
            assert_eq!(value, None, "{driver}");
        }
        assert_eq!(failing.calls(), 2, "{driver}");
        assert_eq!(caches.kval.store().size().unwrap(), 0, "{driver}");
    }
}

#[test]
fn test_keys_with_path_characters() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});

        caches.kval.set("../outside", b"a").unwrap();
        caches.kval.set("some/nested key", b"b").unwrap();
        assert_eq!(
            caches.kval.get("../outside", None).unwrap().as_deref(),
            Some(&b"a"[..]),
            "{driver}"
        );
        assert_eq!(
            caches.kval.get("some/nested key", None).unwrap().as_deref(),
            Some(&b"b"[..]),
            "{driver}"
        );
    }
}
