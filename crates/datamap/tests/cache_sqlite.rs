//! Cache freshness: every write leaves the next read correct.

use datamap::prelude::*;
use datamap::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Entity)]
struct Marker {
    #[datamap(id)]
    name: String,
    x: f64,
}

fn marker(name: &str, x: f64) -> Marker {
    Marker {
        name: name.to_string(),
        x,
    }
}

fn open(source: &str) -> DataMapper<Marker> {
    DataMapper::open(
        &DataSource::memory(source),
        MapperConfig::default().cache(CacheConfig::new(64, Duration::from_secs(300))),
    )
    .unwrap()
}

#[test]
fn bean_cache_serves_and_update_invalidates() {
    let markers = open("cache-bean");
    markers.insert(&marker("m", 1.0)).unwrap();

    // First read fills the bean cache, second is served from it
    assert_eq!(markers.find_by_id("m").unwrap().unwrap().x, 1.0);
    assert_eq!(markers.find_by_id("m").unwrap().unwrap().x, 1.0);

    markers.update(&marker("m", 99.0)).unwrap();
    // Never a stale 1.0 after the write
    assert_eq!(markers.find_by_id("m").unwrap().unwrap().x, 99.0);
}

#[test]
fn cached_bean_survives_unrelated_insert() {
    let markers = open("cache-bean-insert");
    markers.insert(&marker("kept", 5.0)).unwrap();
    assert_eq!(markers.find_by_id("kept").unwrap().unwrap().x, 5.0);

    // insert leaves the bean cache untouched but the row must still read
    // correctly afterwards
    markers.insert(&marker("other", 1.0)).unwrap();
    assert_eq!(markers.find_by_id("kept").unwrap().unwrap().x, 5.0);
}

#[test]
fn query_cache_cleared_by_insert() {
    let markers = open("cache-query-insert");
    markers.insert(&marker("a", 1.0)).unwrap();
    assert_eq!(markers.find_all().unwrap().len(), 1);

    markers.insert(&marker("b", 2.0)).unwrap();
    // The cached list is gone; the new row is visible
    assert_eq!(markers.find_all().unwrap().len(), 2);
}

#[test]
fn query_cache_cleared_by_bulk_delete() {
    let markers = open("cache-query-delete");
    for i in 0..4 {
        markers.insert(&marker(&format!("d{i}"), f64::from(i))).unwrap();
    }
    assert_eq!(markers.find_all().unwrap().len(), 4);

    markers.delete_where(col("x").ge(2.0)).unwrap();
    assert_eq!(markers.find_all().unwrap().len(), 2);
}

#[test]
fn delete_by_id_evicts_the_bean() {
    let markers = open("cache-delete-bean");
    markers.insert(&marker("gone", 3.0)).unwrap();
    assert!(markers.find_by_id("gone").unwrap().is_some());

    markers.delete_by_id("gone").unwrap();
    assert!(markers.find_by_id("gone").unwrap().is_none());
}

#[test]
fn raw_writes_clear_everything() {
    let markers = open("cache-raw");
    markers.insert(&marker("r", 1.0)).unwrap();
    assert_eq!(markers.find_by_id("r").unwrap().unwrap().x, 1.0);
    assert_eq!(markers.find_all().unwrap().len(), 1);

    markers
        .raw_update(
            "UPDATE `marker` SET `x` = ? WHERE `name` = ?",
            &[Value::Double(8.0), Value::Text("r".into())],
        )
        .unwrap();
    assert_eq!(markers.find_by_id("r").unwrap().unwrap().x, 8.0);
}

#[test]
fn expired_entries_fall_through_to_the_database() {
    let source = DataSource::memory("cache-ttl");
    let markers: DataMapper<Marker> = DataMapper::open(
        &source,
        MapperConfig::default().cache(CacheConfig::new(64, Duration::from_millis(1))),
    )
    .unwrap();
    markers.insert(&marker("t", 1.0)).unwrap();
    assert_eq!(markers.find_by_id("t").unwrap().unwrap().x, 1.0);
    std::thread::sleep(Duration::from_millis(5));
    // Entry expired; this read comes from the database
    assert_eq!(markers.find_by_id("t").unwrap().unwrap().x, 1.0);
}
