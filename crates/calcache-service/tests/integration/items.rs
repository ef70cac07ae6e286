use std::time::Duration;

use calcache_service::caching::{CacheError, Content, Driver, Expiry, ItemId, NEGATIVE_TTL};

use crate::{Counted, DRIVERS, EPOCH, setup_caches};

#[test]
fn test_fresh_reads_do_not_refresh() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let refresh = Counted::ok(b"V1");

        let first = caches
            .items
            .resolve_item("feed:abc", |id| refresh.call(id))
            .unwrap();
        let second = caches
            .items
            .resolve_item("feed:abc", |id| refresh.call(id))
            .unwrap();

        assert_eq!(first, second, "{driver}");
        assert_eq!(refresh.calls(), 1, "{driver}");
        assert_eq!(
            caches.items.store().get_item_content(&first).unwrap(),
            Some(Content::Data(b"V1".to_vec())),
            "{driver}"
        );
    }
}

#[test]
fn test_stale_item_is_resurrected() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(2);
        });
        let working = Counted::ok(b"V1");
        let failing = Counted::failing();

        let id = caches
            .items
            .resolve_item("feed:abc", |id| working.call(id))
            .unwrap();
        let content = caches
            .items
            .get_item("feed:abc", |id| working.call(id))
            .unwrap();
        assert_eq!(content.as_deref(), Some(&b"V1"[..]), "{driver}");

        clock.advance(Duration::from_secs(3));
        let resurrected = caches
            .items
            .resolve_item("feed:abc", |id| failing.call(id))
            .unwrap();
        let content = caches
            .items
            .get_item("feed:abc", |id| failing.call(id))
            .unwrap();

        assert_eq!(resurrected, id, "{driver}");
        assert_eq!(content.as_deref(), Some(&b"V1"[..]), "{driver}");
        assert_eq!(working.calls(), 1, "{driver}");
        // the resurrection touched the item, the second read was fresh
        assert_eq!(failing.calls(), 1, "{driver}");

        let meta = caches.items.store().get_item_meta("feed:abc").unwrap().unwrap();
        assert_eq!(
            meta.expiry,
            Expiry::from_ttl(EPOCH + 3, Duration::from_secs(2)),
            "{driver}"
        );
    }
}

#[test]
fn test_failures_are_negatively_cached() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(3600);
        });
        let failing = Counted::failing();

        let content = caches
            .items
            .get_item("feed:down", |id| failing.call(id))
            .unwrap();
        assert_eq!(content, None, "{driver}");

        let meta = caches.items.store().get_item_meta("feed:down").unwrap().unwrap();
        assert_eq!(meta.expiry, Expiry::from_ttl(EPOCH, NEGATIVE_TTL), "{driver}");
        assert_eq!(meta.expiry.expire, EPOCH + 300, "{driver}");
        assert_eq!(meta.expiry.invalidate, EPOCH + 600, "{driver}");
        assert_eq!(
            caches.items.store().get_item_content(&meta.id).unwrap(),
            Some(Content::Failed),
            "{driver}"
        );

        clock.advance(Duration::from_secs(300));
        caches
            .items
            .get_item("feed:down", |id| failing.call(id))
            .unwrap();
        assert_eq!(failing.calls(), 1, "{driver}");

        // once the failure expired the upstream is asked again
        clock.advance(Duration::from_secs(1));
        let working = Counted::ok(b"back");
        let content = caches
            .items
            .get_item("feed:down", |id| working.call(id))
            .unwrap();
        assert_eq!(content.as_deref(), Some(&b"back"[..]), "{driver}");
        assert_eq!(working.calls(), 1, "{driver}");
    }
}

#[test]
fn test_two_tier_expiry() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(60);
        });
        caches.items.resolve_item("feed", |_| Some(b"v".to_vec())).unwrap();

        let meta = caches.items.store().get_item_meta("feed").unwrap().unwrap();
        assert_eq!(meta.expiry.expire, EPOCH + 60, "{driver}");
        assert_eq!(meta.expiry.invalidate, EPOCH + 120, "{driver}");
    }
}

#[test]
fn test_zero_ttl_never_expires() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::ZERO;
        });
        let refresh = Counted::ok(b"v");

        caches.items.resolve_item("feed", |id| refresh.call(id)).unwrap();
        let meta = caches.items.store().get_item_meta("feed").unwrap().unwrap();
        assert_eq!(meta.expiry, Expiry::NEVER, "{driver}");

        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        caches.items.resolve_item("feed", |id| refresh.call(id)).unwrap();
        assert_eq!(refresh.calls(), 1, "{driver}");
    }
}

#[test]
fn test_unchanged_refresh_keeps_permutations() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(10);
        });
        let refresh = Counted::ok(b"V1");
        let transform = Counted::ok(b"thumb");

        let id = caches.items.resolve_item("img", |id| refresh.call(id)).unwrap();
        caches
            .items
            .get_permutation("img", |id| refresh.call(id), "thumb-100", |c| {
                transform.call(c)
            })
            .unwrap();

        clock.advance(Duration::from_secs(11));
        let refreshed = caches.items.resolve_item("img", |id| refresh.call(id)).unwrap();
        assert_eq!(refreshed, id, "{driver}");
        assert_eq!(refresh.calls(), 2, "{driver}");

        let thumb = caches
            .items
            .get_permutation("img", |id| refresh.call(id), "thumb-100", |c| {
                transform.call(c)
            })
            .unwrap();
        assert_eq!(thumb.as_deref(), Some(&b"thumb"[..]), "{driver}");
        assert_eq!(transform.calls(), 1, "{driver}");
    }
}

#[test]
fn test_changed_refresh_replaces_item() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(10);
        });
        let transform = Counted::ok(b"thumb");

        caches
            .items
            .get_permutation("img", |_| Some(b"V1".to_vec()), "thumb-100", |c| {
                transform.call(c)
            })
            .unwrap();

        clock.advance(Duration::from_secs(11));
        let content = caches.items.get_item("img", |_| Some(b"V2".to_vec())).unwrap();
        assert_eq!(content.as_deref(), Some(&b"V2"[..]), "{driver}");

        caches
            .items
            .get_permutation("img", |_| Some(b"V3".to_vec()), "thumb-100", |c| {
                transform.call(c)
            })
            .unwrap();
        // the permutation of V1 was dropped with it
        assert_eq!(transform.calls(), 2, "{driver}");
    }
}

#[test]
fn test_refresh_item_forces_refresh() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});

        caches.items.resolve_item("feed", |_| Some(b"V1".to_vec())).unwrap();
        caches.items.refresh_item("feed", |_| Some(b"V2".to_vec())).unwrap();

        let content = caches.items.get_item("feed", |_| None).unwrap();
        assert_eq!(content.as_deref(), Some(&b"V2"[..]), "{driver}");
    }
}

#[test]
fn test_touch_and_invalidate() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(10);
        });
        assert!(!caches.items.touch("feed").unwrap(), "{driver}");
        assert!(!caches.items.invalidate("feed").unwrap(), "{driver}");

        let refresh = Counted::ok(b"V1");
        caches.items.resolve_item("feed", |id| refresh.call(id)).unwrap();

        clock.advance(Duration::from_secs(8));
        assert!(caches.items.touch("feed").unwrap(), "{driver}");
        clock.advance(Duration::from_secs(8));
        caches.items.resolve_item("feed", |id| refresh.call(id)).unwrap();
        assert_eq!(refresh.calls(), 1, "{driver}");

        assert!(caches.items.invalidate("feed").unwrap(), "{driver}");
        caches.items.resolve_item("feed", |id| refresh.call(id)).unwrap();
        assert_eq!(refresh.calls(), 2, "{driver}");
    }
}

#[test]
fn test_identifiers_are_independent() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});

        let a = caches.items.resolve_item("a", |_| Some(b"A".to_vec())).unwrap();
        let b = caches.items.resolve_item("b", |_| Some(b"B".to_vec())).unwrap();
        assert_ne!(a, b, "{driver}");
        assert_eq!(
            caches.items.get_item("a", |_| None).unwrap().as_deref(),
            Some(&b"A"[..]),
            "{driver}"
        );
    }
}

#[test]
fn test_storage_errors_propagate() {
    let (caches, _clock, _cache_dir) = setup_caches(Driver::Sqlite, |_| {});
    let err = caches
        .items
        .store()
        .get_item_content(&ItemId::new("abc"))
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidItemId(_)));
}
