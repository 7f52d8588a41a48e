use std::fs;
use std::thread::sleep;
use std::time::Duration;

use chrono::Utc;
use linkfetch_engine::{
    normalize_key, CacheSettings, CacheStore, CachedValue, DiskTier, Payload, Tier,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn value(text: &str) -> CachedValue {
    CachedValue {
        payload: Payload::Data(text.as_bytes().to_vec()),
        fetched_bytes: text.len() as u64,
    }
}

fn disk_settings(dir: &TempDir) -> CacheSettings {
    CacheSettings {
        disk_dir: Some(dir.path().join("cache")),
        ..CacheSettings::default()
    }
}

#[test]
fn put_then_get_is_served_from_memory() {
    let cache = CacheStore::memory_only(10, Duration::from_secs(60));
    cache.put("https://shop.example/p/1", value("one"));

    let entry = cache.get("https://shop.example/p/1").expect("hit");
    assert_eq!(entry.tier, Tier::Memory);
    assert_eq!(entry.value, value("one"));
    assert_eq!(entry.key, "https://shop.example/p/1");
}

#[test]
fn equivalent_targets_hit_the_same_entry() {
    let cache = CacheStore::memory_only(10, Duration::from_secs(60));
    cache.put("HTTPS://Shop.Example/p/1/", value("one"));

    assert!(cache.get("shop.example/p/1#reviews").is_some());
    assert_eq!(cache.stats().memory_entries, 1);
}

#[test]
fn expired_memory_entry_is_a_miss_and_evicted() {
    let cache = CacheStore::memory_only(10, Duration::from_millis(30));
    cache.put("https://shop.example/p/1", value("one"));
    sleep(Duration::from_millis(60));

    assert!(cache.get("https://shop.example/p/1").is_none());
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.memory_entries, 0);
}

#[test]
fn least_recently_used_entry_is_evicted_first() {
    let cache = CacheStore::memory_only(2, Duration::from_secs(60));
    cache.put("https://a.example", value("a"));
    cache.put("https://b.example", value("b"));
    assert!(cache.get("https://a.example").is_some());
    cache.put("https://c.example", value("c"));

    assert_eq!(
        cache.memory().keys(),
        vec!["https://a.example".to_string(), "https://c.example".to_string()]
    );
    assert!(cache.get("https://b.example").is_none());
}

#[test]
fn disk_hit_is_promoted_into_memory() {
    let dir = TempDir::new().unwrap();
    let settings = disk_settings(&dir);
    CacheStore::new(&settings).put("https://shop.example/p/7", value("seven"));

    let cache = CacheStore::new(&settings);
    assert!(cache.try_memory("https://shop.example/p/7").is_none());

    let first = cache.get("https://shop.example/p/7").expect("disk hit");
    assert_eq!(first.tier, Tier::Disk);
    assert_eq!(first.value, value("seven"));

    let second = cache.get("https://shop.example/p/7").expect("memory hit");
    assert_eq!(second.tier, Tier::Memory);

    let stats = cache.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.memory_hits, 1);
    assert_eq!(stats.promotions, 1);
}

#[test]
fn promoted_entry_never_outlives_its_disk_entry() {
    let dir = TempDir::new().unwrap();
    let settings = disk_settings(&dir);
    let cache = CacheStore::new(&settings);
    cache.put_with_ttl("https://shop.example/p/8", value("eight"), Duration::from_millis(80));
    cache.memory().clear();

    let entry = cache.get("https://shop.example/p/8").expect("disk hit");
    assert_eq!(entry.tier, Tier::Disk);
    sleep(Duration::from_millis(120));

    assert!(cache.get("https://shop.example/p/8").is_none());
}

#[test]
fn corrupt_disk_entry_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let settings = disk_settings(&dir);
    let cache = CacheStore::new(&settings);
    let key = normalize_key("https://shop.example/p/3");
    cache.put(&key, value("three"));
    cache.memory().clear();

    let disk = cache.disk().expect("disk tier");
    fs::write(disk.entry_path(&key), b"not a cache entry").unwrap();

    assert!(cache.get(&key).is_none());
    assert_eq!(cache.stats().misses, 1);
    assert!(!disk.entry_path(&key).exists());
}

#[test]
fn unusable_disk_dir_falls_back_to_memory() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "x").unwrap();

    let cache = CacheStore::new(&CacheSettings {
        disk_dir: Some(blocker.join("cache")),
        ..CacheSettings::default()
    });
    assert!(cache.disk().is_none());
    cache.put("https://shop.example/p/1", value("one"));
    assert!(cache.get("https://shop.example/p/1").is_some());
}

#[test]
fn empty_payload_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let tier = DiskTier::open(dir.path(), Duration::from_secs(60)).unwrap();
    let empty = CachedValue {
        payload: Payload::Empty,
        fetched_bytes: 512,
    };
    tier.put("https://shop.example/blank", &empty).unwrap();

    let entry = tier.get("https://shop.example/blank").unwrap().expect("stored");
    assert_eq!(entry.value, empty);
    assert_eq!(entry.tier, Tier::Disk);
}

#[test]
fn sweep_removes_expired_entries_from_both_tiers() {
    let dir = TempDir::new().unwrap();
    let cache = CacheStore::new(&disk_settings(&dir));
    cache.put_with_ttl("https://shop.example/old", value("old"), Duration::from_millis(20));
    cache.put("https://shop.example/new", value("new"));
    sleep(Duration::from_millis(50));

    let report = cache.sweep_expired();
    assert_eq!(report.memory_removed, 1);
    assert_eq!(report.disk_removed, 1);

    let stats = cache.stats();
    assert_eq!(stats.memory_entries, 1);
    assert_eq!(stats.disk_entries, 1);
    assert!(stats.disk_bytes > 0);
}

#[test]
fn clear_older_than_ignores_ttl() {
    let dir = TempDir::new().unwrap();
    let tier = DiskTier::open(dir.path(), Duration::from_secs(3600)).unwrap();
    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    tier.put_with_ttl("https://a.example", &value("a"), an_hour_ago, Duration::from_secs(86_400))
        .unwrap();
    tier.put("https://b.example", &value("b")).unwrap();

    assert_eq!(tier.clear_older_than(Duration::from_secs(600)).unwrap(), 1);
    assert!(tier.get("https://a.example").unwrap().is_none());
    assert!(tier.get("https://b.example").unwrap().is_some());
}

#[tokio::test]
async fn background_sweeper_stops_on_cancel() {
    let cache = std::sync::Arc::new(CacheStore::memory_only(10, Duration::from_millis(10)));
    cache.put("https://shop.example/p/1", value("one"));

    let token = tokio_util::sync::CancellationToken::new();
    let handle = cache.spawn_sweeper(Duration::from_millis(20), token.clone());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.memory().len(), 0);

    token.cancel();
    handle.await.unwrap();
}
