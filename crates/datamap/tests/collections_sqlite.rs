//! Child-table collections and live accessor views.

use datamap::prelude::*;
use datamap::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Entity)]
struct Profile {
    #[datamap(id)]
    id: String,
    nickname: String,
    properties: BTreeMap<String, String>,
    tags: BTreeSet<String>,
    waypoints: Vec<String>,
}

impl Profile {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            nickname: "nick".to_string(),
            properties: BTreeMap::new(),
            tags: BTreeSet::new(),
            waypoints: Vec::new(),
        }
    }
}

fn open(source: &str) -> DataMapper<Profile> {
    DataMapper::open(&DataSource::memory(source), MapperConfig::default()).unwrap()
}

#[test]
fn collections_round_trip() {
    let profiles = open("coll-roundtrip");
    let mut profile = Profile::new("p1");
    profile
        .properties
        .insert("lang".to_string(), "en".to_string());
    profile.tags.insert("admin".to_string());
    profile.tags.insert("builder".to_string());
    profile.waypoints = vec!["spawn".to_string(), "mine".to_string(), "farm".to_string()];
    profiles.insert(&profile).unwrap();

    let found = profiles.find_by_id("p1").unwrap().unwrap();
    assert_eq!(found, profile);
    // List order comes back through sort_order
    assert_eq!(found.waypoints, vec!["spawn", "mine", "farm"]);
}

#[test]
fn update_replaces_child_rows_wholesale() {
    let profiles = open("coll-replace");
    let mut profile = Profile::new("p2");
    profile.waypoints = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    profile.tags.insert("old".to_string());
    profiles.insert(&profile).unwrap();

    profile.waypoints = vec!["d".to_string()];
    profile.tags.clear();
    profile.tags.insert("new".to_string());
    profiles.update(&profile).unwrap();

    let found = profiles.find_by_id("p2").unwrap().unwrap();
    assert_eq!(found.waypoints, vec!["d"]);
    assert_eq!(
        found.tags.iter().cloned().collect::<Vec<_>>(),
        vec!["new"]
    );

    // The child table holds exactly the replacement rows
    let rows = profiles
        .raw_query(
            "SELECT COUNT(1) AS n FROM `profile_waypoints` WHERE `parent_id` = ?",
            &[Value::Text("p2".into())],
            |row| row.get_named::<i64>("n"),
        )
        .unwrap();
    assert_eq!(rows, vec![1]);
}

#[test]
fn delete_cascades_to_child_tables() {
    let profiles = open("coll-cascade");
    let mut profile = Profile::new("p3");
    profile.waypoints = vec!["x".to_string()];
    profile
        .properties
        .insert("k".to_string(), "v".to_string());
    profiles.insert(&profile).unwrap();

    profiles.delete_by_id("p3").unwrap();
    for table in ["profile_waypoints", "profile_properties", "profile_tags"] {
        let rows = profiles
            .raw_query(
                &format!("SELECT COUNT(1) AS n FROM `{table}` WHERE `parent_id` = ?"),
                &[Value::Text("p3".into())],
                |row| row.get_named::<i64>("n"),
            )
            .unwrap();
        assert_eq!(rows, vec![0], "{table} should be empty");
    }
}

#[test]
fn map_accessor_is_live() {
    let profiles = open("coll-map-accessor");
    profiles.insert(&Profile::new("p")).unwrap();

    let map = profiles.map_of("p", "properties").unwrap();
    map.put("lang", "en").unwrap();
    map.put("volume", "80").unwrap();
    // Replacement under the same key
    map.put("lang", "de").unwrap();

    assert_eq!(map.len().unwrap(), 2);
    assert_eq!(map.get("lang").unwrap(), Some(Value::Text("de".into())));
    assert!(map.contains_key("volume").unwrap());
    assert_eq!(map.keys().unwrap(), vec!["lang", "volume"]);

    // Observed by a standard read on the same thread
    let found = profiles.find_by_id("p").unwrap().unwrap();
    assert_eq!(found.properties.get("lang").map(String::as_str), Some("de"));
    assert_eq!(
        found.properties.get("volume").map(String::as_str),
        Some("80")
    );

    assert!(map.remove("volume").unwrap());
    assert!(!map.remove("volume").unwrap());
    assert_eq!(profiles.find_by_id("p").unwrap().unwrap().properties.len(), 1);
}

#[test]
fn list_accessor_shifts_sort_order() {
    let profiles = open("coll-list-accessor");
    profiles.insert(&Profile::new("p")).unwrap();

    let list = profiles.list_of("p", "waypoints").unwrap();
    list.push("spawn").unwrap();
    list.push("farm").unwrap();
    // Insert in the middle shifts everything at or above index 1
    list.insert(1, "mine").unwrap();
    assert_eq!(
        list.to_vec().unwrap(),
        vec![
            Value::Text("spawn".into()),
            Value::Text("mine".into()),
            Value::Text("farm".into())
        ]
    );

    assert!(list.remove(0).unwrap());
    assert_eq!(
        list.to_vec().unwrap(),
        vec![Value::Text("mine".into()), Value::Text("farm".into())]
    );
    assert_eq!(list.get(0).unwrap(), Some(Value::Text("mine".into())));

    assert!(list.set(1, "base").unwrap());
    let found = profiles.find_by_id("p").unwrap().unwrap();
    assert_eq!(found.waypoints, vec!["mine", "base"]);
}

#[test]
fn set_accessor_enforces_uniqueness() {
    let profiles = open("coll-set-accessor");
    profiles.insert(&Profile::new("p")).unwrap();

    let set = profiles.set_of("p", "tags").unwrap();
    assert!(set.add("admin").unwrap());
    // Adding an existing value is a no-op
    assert!(!set.add("admin").unwrap());
    assert!(set.add("builder").unwrap());
    assert_eq!(set.len().unwrap(), 2);
    assert!(set.contains("admin").unwrap());

    assert!(set.remove("admin").unwrap());
    assert!(!set.contains("admin").unwrap());

    let found = profiles.find_by_id("p").unwrap().unwrap();
    assert_eq!(found.tags.iter().cloned().collect::<Vec<_>>(), vec!["builder"]);
}

#[test]
fn accessor_on_unknown_field_is_refused() {
    let profiles = open("coll-bad-accessor");
    assert!(profiles.map_of("p", "nope").is_err());
    // Kind mismatch is refused too
    assert!(profiles.map_of("p", "waypoints").is_err());
}
