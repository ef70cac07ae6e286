use std::time::Duration;

use calcache_service::caching::Driver;
use calcache_service::maintenance::Maintenance;

use crate::{DRIVERS, EPOCH, setup_caches};

fn maintenance() -> Maintenance {
    Maintenance::new(Duration::from_secs(3600), Duration::from_secs(24 * 3600))
}

#[test]
fn test_first_run_does_everything() {
    let (caches, _clock, _cache_dir) = setup_caches(Driver::Sqlite, |_| {});

    let report = maintenance().run(&caches).unwrap();
    insta::assert_json_snapshot!(report, @r###"
    {
      "cal": {
        "last_invalidate": 1700000000,
        "last_vacuum": 1700000000,
        "invalidated": true,
        "vacuumed": true
      },
      "kval": {
        "last_invalidate": 1700000000,
        "last_vacuum": 1700000000,
        "invalidated": true,
        "vacuumed": true
      }
    }
    "###);
}

#[test]
fn test_passes_wait_for_their_interval() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |_| {});

        maintenance().run(&caches).unwrap();

        clock.advance(Duration::from_secs(1800));
        let report = maintenance().run(&caches).unwrap();
        assert!(!report.cal.invalidated && !report.cal.vacuumed, "{driver}");
        assert!(!report.kval.invalidated && !report.kval.vacuumed, "{driver}");

        clock.advance(Duration::from_secs(1800));
        let report = maintenance().run(&caches).unwrap();
        assert!(report.cal.invalidated && !report.cal.vacuumed, "{driver}");
        assert_eq!(report.cal.last_invalidate, EPOCH + 3600, "{driver}");
        assert_eq!(report.cal.last_vacuum, EPOCH, "{driver}");
        assert!(report.kval.invalidated, "{driver}");
    }
}

#[test]
fn test_expired_entries_are_deleted() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(60);
            config.kval_ttl = Duration::from_secs(60);
        });
        caches.items.resolve_item("feed", |_| Some(b"V1".to_vec())).unwrap();
        caches.kval.set("k", b"v").unwrap();

        clock.advance(Duration::from_secs(121));
        maintenance().run(&caches).unwrap();

        assert!(caches.items.store().get_item_meta("feed").unwrap().is_none(), "{driver}");
        assert_eq!(caches.kval.get("k", Some(Duration::ZERO)).unwrap(), None, "{driver}");
        assert_eq!(caches.items.store().size().unwrap(), 0, "{driver}");
        assert_eq!(caches.kval.store().size().unwrap(), 0, "{driver}");
    }
}

#[test]
fn test_stale_entries_survive() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_ttl = Duration::from_secs(60);
            config.kval_ttl = Duration::from_secs(60);
        });
        caches.items.resolve_item("feed", |_| Some(b"V1".to_vec())).unwrap();
        caches.kval.set("k", b"v").unwrap();

        clock.advance(Duration::from_secs(90));
        maintenance().run(&caches).unwrap();

        assert!(caches.items.store().get_item_meta("feed").unwrap().is_some(), "{driver}");
        assert!(caches.kval.get("k", Some(Duration::ZERO)).unwrap().is_some(), "{driver}");
    }
}

#[test]
fn test_quota_evicts_oldest_first() {
    for driver in DRIVERS {
        let (caches, clock, _cache_dir) = setup_caches(driver, |config| {
            config.cal_quota = 100;
            config.kval_quota = 20;
        });

        for (i, name) in ["oldest", "middle", "newest"].into_iter().enumerate() {
            clock.set(EPOCH + i as u64);
            caches.items.resolve_item(name, |_| Some(vec![0; 40])).unwrap();
            caches.kval.set(name, &[0; 10]).unwrap();
        }

        maintenance().run(&caches).unwrap();

        assert!(caches.items.store().size().unwrap() <= 100, "{driver}");
        assert!(caches.kval.store().size().unwrap() <= 20, "{driver}");
        assert!(caches.items.store().get_item_meta("oldest").unwrap().is_none(), "{driver}");

        // key-value maintenance is selective for every driver
        assert_eq!(caches.kval.get("oldest", Some(Duration::ZERO)).unwrap(), None, "{driver}");
        assert_eq!(caches.kval.get("middle", Some(Duration::ZERO)).unwrap(), None, "{driver}");
        assert!(caches.kval.get("newest", Some(Duration::ZERO)).unwrap().is_some(), "{driver}");
    }
}
