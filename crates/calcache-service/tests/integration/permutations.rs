use calcache_service::caching::Content;

use crate::{Counted, DRIVERS, setup_caches};

fn resize_to_100(item: &[u8]) -> Option<Vec<u8>> {
    Some(item.iter().take(100).rev().copied().collect())
}

#[test]
fn test_transform_runs_once() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let image: Vec<u8> = (0..=255).collect();
        let transforms = Counted::ok(b"");

        let mut thumbs = vec![];
        for _ in 0..2 {
            let thumb = caches
                .items
                .get_permutation("img:1", |_| Some(image.clone()), "thumb-100", |item| {
                    transforms.call(item);
                    resize_to_100(item)
                })
                .unwrap()
                .unwrap();
            thumbs.push(thumb);
        }

        assert_eq!(transforms.calls(), 1, "{driver}");
        assert_eq!(thumbs[0], thumbs[1], "{driver}");
        assert_eq!(thumbs[0].len(), 100, "{driver}");
        assert_eq!(thumbs[0][0], 99, "{driver}");
    }
}

#[test]
fn test_permutations_are_keyed_by_identifier() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let refresh = || Some(b"image".to_vec());

        let small = caches
            .items
            .resolve_permutation("img", |_| refresh(), "small", |_| Some(b"s".to_vec()))
            .unwrap();
        let large = caches
            .items
            .resolve_permutation("img", |_| refresh(), "large", |_| Some(b"l".to_vec()))
            .unwrap();

        assert_eq!(small, Some(Content::Data(b"s".to_vec())), "{driver}");
        assert_eq!(large, Some(Content::Data(b"l".to_vec())), "{driver}");
    }
}

#[test]
fn test_failed_transforms_are_retried() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let failing = Counted::failing();

        for _ in 0..3 {
            let thumb = caches
                .items
                .get_permutation("img", |_| Some(b"image".to_vec()), "thumb", |item| {
                    failing.call(item)
                })
                .unwrap();
            assert_eq!(thumb, None, "{driver}");
        }
        assert_eq!(failing.calls(), 3, "{driver}");

        let thumb = caches
            .items
            .get_permutation("img", |_| None, "thumb", |_| Some(b"t".to_vec()))
            .unwrap();
        assert_eq!(thumb.as_deref(), Some(&b"t"[..]), "{driver}");
    }
}

#[test]
fn test_no_permutation_of_failed_items() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let transform = Counted::ok(b"t");

        let thumb = caches
            .items
            .get_permutation("img:down", |_| None, "thumb", |item| transform.call(item))
            .unwrap();

        assert_eq!(thumb, None, "{driver}");
        assert_eq!(transform.calls(), 0, "{driver}");
    }
}

#[test]
fn test_empty_permutation_is_cached() {
    for driver in DRIVERS {
        let (caches, _clock, _cache_dir) = setup_caches(driver, |_| {});
        let transform = Counted::ok(b"");

        for _ in 0..2 {
            let thumb = caches
                .items
                .get_permutation("img", |_| Some(b"image".to_vec()), "empty", |item| {
                    transform.call(item)
                })
                .unwrap();
            assert_eq!(thumb, Some(vec![]), "{driver}");
        }
        assert_eq!(transform.calls(), 1, "{driver}");
    }
}
