//! Driver conformance checks.
//!
//! [`check_conformance`] runs against a started driver with an empty
//! keyspace. Every advertised feature must behave as documented, and every
//! operation outside the advertised set must fail with
//! `UnsupportedOperation`.

#![allow(dead_code)]

use std::time::Duration;

use kvport::{Driver, Error, Features};

/// How long expiring writes live in the checks.
const TTL_SECS: i64 = 1;

/// Wait comfortably past [`TTL_SECS`].
const EXPIRY_WAIT: Duration = Duration::from_millis(1_600);

pub async fn check_conformance(driver: &dyn Driver) {
    let features = driver.features();

    check_unadvertised(driver).await;
    if features.contains(Features::NEXT | Features::PREV) {
        check_pagination(driver).await;
    }
    if features.contains(Features::STORE) {
        check_store(driver).await;
    }
    if features.contains(Features::INSERT | Features::UPDATE) {
        check_conditional(driver).await;
    }
    if features.contains(Features::COUNTER) {
        check_counters(driver).await;
    }
    check_ttl_validation(driver).await;
    check_expiry(driver).await;
}

fn assert_unsupported<T: std::fmt::Debug>(result: Result<T, Error>, op: &str) {
    match result {
        Err(Error::UnsupportedOperation { .. }) => {},
        other => panic!("{op}: expected UnsupportedOperation, got {other:?}"),
    }
}

/// Unadvertised operations fail loudly instead of doing nothing.
pub async fn check_unadvertised(driver: &dyn Driver) {
    let f = driver.features();
    let k = b"unadvertised";

    if !f.contains(Features::STORE) {
        assert_unsupported(driver.set(k, b"v").await, "set");
        assert_unsupported(driver.get(k).await, "get");
        assert_unsupported(driver.delete(k).await, "delete");
    }
    if !f.contains(Features::TTL_STORE) {
        assert_unsupported(driver.set_with_ttl(k, b"v", 10).await, "set_with_ttl");
    }
    if !f.contains(Features::INSERT) {
        assert_unsupported(driver.insert(k, b"v").await, "insert");
    }
    if !f.contains(Features::UPDATE) {
        assert_unsupported(driver.update(k, b"v").await, "update");
    }
    if !f.contains(Features::TTL_INSERT) {
        assert_unsupported(driver.insert_with_ttl(k, b"v", 10).await, "insert_with_ttl");
    }
    if !f.contains(Features::TTL_UPDATE) {
        assert_unsupported(driver.update_with_ttl(k, b"v", 10).await, "update_with_ttl");
    }
    if !f.contains(Features::COUNTER) {
        assert_unsupported(driver.set_counter(k, 1).await, "set_counter");
        assert_unsupported(driver.get_counter(k).await, "get_counter");
        assert_unsupported(driver.delete_counter(k).await, "delete_counter");
        assert_unsupported(driver.increase_counter(k, 1).await, "increase_counter");
    }
    if !f.contains(Features::TTL_COUNTER) {
        assert_unsupported(driver.set_counter_with_ttl(k, 1, 10).await, "set_counter_with_ttl");
        assert_unsupported(
            driver.increase_counter_with_ttl(k, 1, 10).await,
            "increase_counter_with_ttl",
        );
    }
    if !f.contains(Features::NEXT) {
        assert_unsupported(driver.next(b"", 10).await, "next");
    }
    if !f.contains(Features::PREV) {
        assert_unsupported(driver.prev(b"", 10).await, "prev");
    }

    // Nothing above may have written anything.
    if f.contains(Features::STORE) {
        assert!(driver.get(k).await.unwrap_err().is_not_found());
    }
}

pub async fn check_store(driver: &dyn Driver) {
    driver.set(b"store:k", b"v1").await.unwrap();
    assert_eq!(driver.get(b"store:k").await.unwrap(), b"v1");

    driver.set(b"store:k", b"v2").await.unwrap();
    assert_eq!(driver.get(b"store:k").await.unwrap(), b"v2");

    // Binary values and the empty value survive unchanged.
    let binary = [0u8, 255, 10, 13, 0];
    driver.set(b"store:bin", &binary).await.unwrap();
    assert_eq!(driver.get(b"store:bin").await.unwrap(), binary);
    driver.set(b"store:empty", b"").await.unwrap();
    assert_eq!(driver.get(b"store:empty").await.unwrap(), b"");

    driver.delete(b"store:k").await.unwrap();
    assert!(driver.get(b"store:k").await.unwrap_err().is_not_found());
    driver.delete(b"store:k").await.unwrap();
    assert!(driver.get(b"store:missing").await.unwrap_err().is_not_found());

    for key in [b"store:bin".as_slice(), b"store:empty"] {
        driver.delete(key).await.unwrap();
    }
}

pub async fn check_conditional(driver: &dyn Driver) {
    let k = b"cond:k";
    assert!(!driver.update(k, b"u0").await.unwrap());
    assert!(driver.get(k).await.unwrap_err().is_not_found());

    assert!(driver.insert(k, b"i1").await.unwrap());
    assert!(!driver.insert(k, b"i2").await.unwrap());
    assert_eq!(driver.get(k).await.unwrap(), b"i1");

    assert!(driver.update(k, b"u1").await.unwrap());
    assert_eq!(driver.get(k).await.unwrap(), b"u1");

    driver.delete(k).await.unwrap();
    assert!(driver.insert(k, b"i3").await.unwrap());
    driver.delete(k).await.unwrap();
}

pub async fn check_counters(driver: &dyn Driver) {
    let k = b"counter:k";
    assert_eq!(driver.get_counter(k).await.unwrap(), 0);
    assert_eq!(driver.increase_counter(k, 5).await.unwrap(), 5);
    assert_eq!(driver.get_counter(k).await.unwrap(), 5);
    assert_eq!(driver.increase_counter(k, -8).await.unwrap(), -3);

    driver.set_counter(k, 40).await.unwrap();
    assert_eq!(driver.increase_counter(k, 2).await.unwrap(), 42);

    // Counter and value namespaces are disjoint.
    if driver.features().contains(Features::STORE) {
        assert!(driver.get(k).await.unwrap_err().is_not_found());
        driver.set(k, b"plain").await.unwrap();
        assert_eq!(driver.get_counter(k).await.unwrap(), 42);
        driver.delete(k).await.unwrap();
    }

    driver.delete_counter(k).await.unwrap();
    assert_eq!(driver.get_counter(k).await.unwrap(), 0);
    driver.delete_counter(k).await.unwrap();
}

pub async fn check_ttl_validation(driver: &dyn Driver) {
    let f = driver.features();
    let k = b"ttl:invalid";

    fn assert_invalid<T: std::fmt::Debug>(result: Result<T, Error>, ttl: i64) {
        match result {
            Err(Error::InvalidatedTtl { ttl_secs }) => assert_eq!(ttl_secs, ttl),
            other => panic!("expected InvalidatedTtl for {ttl}, got {other:?}"),
        }
    }

    for ttl in [0, -1] {
        if f.contains(Features::TTL_STORE) {
            assert_invalid(driver.set_with_ttl(k, b"v", ttl).await, ttl);
        }
        if f.contains(Features::TTL_INSERT) {
            assert_invalid(driver.insert_with_ttl(k, b"v", ttl).await, ttl);
        }
        if f.contains(Features::TTL_COUNTER) {
            assert_invalid(driver.set_counter_with_ttl(k, 1, ttl).await, ttl);
            assert_invalid(driver.increase_counter_with_ttl(k, 1, ttl).await, ttl);
        }
    }

    if f.contains(Features::STORE) {
        assert!(driver.get(k).await.unwrap_err().is_not_found());
    }
    if f.contains(Features::COUNTER) {
        assert_eq!(driver.get_counter(k).await.unwrap(), 0);
    }
}

/// One shared wait covers every expiring family the driver advertises.
pub async fn check_expiry(driver: &dyn Driver) {
    let f = driver.features();
    if !f.contains(Features::TTL_STORE)
        && !f.contains(Features::TTL_INSERT)
        && !f.contains(Features::TTL_COUNTER)
    {
        return;
    }

    if f.contains(Features::TTL_STORE) {
        driver.set_with_ttl(b"exp:set", b"v", TTL_SECS).await.unwrap();
        assert_eq!(driver.get(b"exp:set").await.unwrap(), b"v");
    }
    if f.contains(Features::TTL_INSERT) {
        assert!(driver.insert_with_ttl(b"exp:ins", b"v", TTL_SECS).await.unwrap());
        assert!(!driver.insert_with_ttl(b"exp:ins", b"w", TTL_SECS).await.unwrap());
    }
    if f.contains(Features::TTL_UPDATE) {
        driver.set(b"exp:upd", b"v").await.unwrap();
        assert!(driver.update_with_ttl(b"exp:upd", b"w", TTL_SECS).await.unwrap());
        assert_eq!(driver.get(b"exp:upd").await.unwrap(), b"w");
    }
    if f.contains(Features::TTL_COUNTER) {
        assert_eq!(
            driver.increase_counter_with_ttl(b"exp:cnt", 3, TTL_SECS).await.unwrap(),
            3
        );
        driver.set_counter_with_ttl(b"exp:cnt2", 9, TTL_SECS).await.unwrap();
        assert_eq!(driver.get_counter(b"exp:cnt2").await.unwrap(), 9);
    }

    tokio::time::sleep(EXPIRY_WAIT).await;

    for key in [b"exp:set".as_slice(), b"exp:ins", b"exp:upd"] {
        let advertised = match key {
            b"exp:set" => f.contains(Features::TTL_STORE),
            b"exp:ins" => f.contains(Features::TTL_INSERT),
            _ => f.contains(Features::TTL_UPDATE),
        };
        if advertised {
            let err = driver.get(key).await.unwrap_err();
            assert!(err.is_not_found(), "{}: {err:?}", String::from_utf8_lossy(key));
        }
    }
    if f.contains(Features::TTL_INSERT) {
        // Expired counts as absent.
        assert!(driver.insert(b"exp:ins", b"again").await.unwrap());
        driver.delete(b"exp:ins").await.unwrap();
    }
    if f.contains(Features::TTL_COUNTER) {
        assert_eq!(driver.get_counter(b"exp:cnt").await.unwrap(), 0);
        assert_eq!(driver.get_counter(b"exp:cnt2").await.unwrap(), 0);
    }
}

/// Keys of one page as strings.
pub fn keys(page: &kvport::Page) -> Vec<String> {
    page.records
        .iter()
        .map(|r| String::from_utf8_lossy(r.key()).into_owned())
        .collect()
}

/// The a..g walk with limit 3, in both directions. Needs an empty keyspace.
pub async fn check_pagination(driver: &dyn Driver) {
    let empty = driver.next(b"", 3).await.unwrap();
    assert!(empty.records.is_empty() && empty.is_last());

    for key in ["a", "b", "c", "d", "e", "f", "g"] {
        driver.set(key.as_bytes(), key.to_uppercase().as_bytes()).await.unwrap();
    }

    let page = driver.next(b"", 3).await.unwrap();
    assert_eq!(keys(&page), ["a", "b", "c"]);
    assert_eq!(page.records[0].value(), b"A");
    assert_eq!(page.cursor.as_bytes(), b"c");
    let page = driver.next(b"c", 3).await.unwrap();
    assert_eq!(keys(&page), ["d", "e", "f"]);
    assert_eq!(page.cursor.as_bytes(), b"f");
    let page = driver.next(b"f", 3).await.unwrap();
    assert_eq!(keys(&page), ["g"]);
    assert!(page.is_last());

    let page = driver.prev(b"", 3).await.unwrap();
    assert_eq!(keys(&page), ["g", "f", "e"]);
    assert_eq!(page.cursor.as_bytes(), b"e");
    let page = driver.prev(b"e", 3).await.unwrap();
    assert_eq!(keys(&page), ["d", "c", "b"]);
    let page = driver.prev(b"b", 3).await.unwrap();
    assert_eq!(keys(&page), ["a"]);
    assert!(page.is_last());

    // Cursors that name no key resume by position.
    let page = driver.next(b"cc", 2).await.unwrap();
    assert_eq!(keys(&page), ["d", "e"]);
    let page = driver.prev(b"cc", 2).await.unwrap();
    assert_eq!(keys(&page), ["c", "b"]);

    assert!(matches!(
        driver.next(b"", 0).await.unwrap_err(),
        Error::UnsupportedPaginationLimit { limit: 0 }
    ));
    assert!(matches!(
        driver.prev(b"", 0).await.unwrap_err(),
        Error::UnsupportedPaginationLimit { limit: 0 }
    ));

    for key in ["a", "b", "c", "d", "e", "f", "g"] {
        driver.delete(key.as_bytes()).await.unwrap();
    }
}

/// Walk every page in one direction and return the visited keys.
pub async fn walk(driver: &dyn Driver, limit: usize, reverse: bool) -> Vec<Vec<u8>> {
    let mut cursor = Vec::new();
    let mut seen = Vec::new();
    loop {
        let page = if reverse {
            driver.prev(&cursor, limit).await.unwrap()
        } else {
            driver.next(&cursor, limit).await.unwrap()
        };
        assert!(page.records.len() <= limit);
        seen.extend(page.records.iter().map(|r| r.key().to_vec()));
        if page.is_last() {
            return seen;
        }
        cursor = page.cursor.into_bytes();
    }
}
