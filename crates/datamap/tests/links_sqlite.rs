//! Cascade read and write over link fields.

use datamap::prelude::*;

#[derive(Debug, Clone, PartialEq, Entity)]
struct Region {
    #[datamap(id)]
    id: i64,
    biome: String,
}

#[derive(Debug, Clone, PartialEq, Entity)]
struct Location {
    #[datamap(id)]
    id: i64,
    world: String,
    #[datamap(link(fk = "region_id"))]
    region: Option<Region>,
}

#[derive(Debug, Clone, PartialEq, Entity)]
struct Home {
    #[datamap(id)]
    name: String,
    owner: String,
    #[datamap(link(fk = "location_id"))]
    spot: Option<Location>,
}

fn open<E: Entity>(source: &str) -> DataMapper<E> {
    DataMapper::open(&DataSource::memory(source), MapperConfig::default()).unwrap()
}

fn sample_home(name: &str) -> Home {
    Home {
        name: name.to_string(),
        owner: "alice".to_string(),
        spot: Some(Location {
            id: 11,
            world: "overworld".to_string(),
            region: Some(Region {
                id: 7,
                biome: "taiga".to_string(),
            }),
        }),
    }
}

#[test]
fn cascade_write_persists_the_whole_graph() {
    let homes: DataMapper<Home> = open("links-write");
    homes.insert(&sample_home("base")).unwrap();

    // Each link target sits in its own table with the expected values
    let locations: DataMapper<Location> = open("links-write");
    let regions: DataMapper<Region> = open("links-write");
    let location = locations.find_by_id(11i64).unwrap().unwrap();
    assert_eq!(location.world, "overworld");
    let region = regions.find_by_id(7i64).unwrap().unwrap();
    assert_eq!(region.biome, "taiga");
}

#[test]
fn cascade_read_hydrates_recursively() {
    let homes: DataMapper<Home> = open("links-read");
    homes.insert(&sample_home("base")).unwrap();

    let found = homes.find_by_id("base").unwrap().unwrap();
    let spot = found.spot.expect("link hydrated");
    assert_eq!(spot.id, 11);
    let region = spot.region.expect("nested link hydrated");
    assert_eq!(region.biome, "taiga");
}

#[test]
fn absent_link_stays_absent() {
    let homes: DataMapper<Home> = open("links-absent");
    homes
        .insert(&Home {
            name: "nowhere".to_string(),
            owner: "bob".to_string(),
            spot: None,
        })
        .unwrap();

    let found = homes.find_by_id("nowhere").unwrap().unwrap();
    assert!(found.spot.is_none());
    assert_eq!(found.owner, "bob");
}

#[test]
fn cascade_update_rewrites_the_target() {
    let homes: DataMapper<Home> = open("links-update");
    let mut home = sample_home("movable");
    homes.insert(&home).unwrap();

    // Same location id, new world: the cascade updates the existing row
    if let Some(spot) = &mut home.spot {
        spot.world = "nether".to_string();
    }
    homes.update(&home).unwrap();

    let locations: DataMapper<Location> = open("links-update");
    assert_eq!(locations.count().unwrap(), 1);
    let location = locations.find_by_id(11i64).unwrap().unwrap();
    assert_eq!(location.world, "nether");

    let found = homes.find_by_id("movable").unwrap().unwrap();
    assert_eq!(found.spot.unwrap().world, "nether");
}

#[test]
fn clearing_a_link_nulls_the_foreign_key() {
    let homes: DataMapper<Home> = open("links-clear");
    let mut home = sample_home("detach");
    homes.insert(&home).unwrap();

    home.spot = None;
    homes.update(&home).unwrap();

    let found = homes.find_by_id("detach").unwrap().unwrap();
    assert!(found.spot.is_none());
}

#[test]
fn two_owners_can_share_a_link_target() {
    let homes: DataMapper<Home> = open("links-shared");
    homes.insert(&sample_home("first")).unwrap();
    homes.insert(&sample_home("second")).unwrap();

    let locations: DataMapper<Location> = open("links-shared");
    // The second insert found location 11 already present and updated it
    assert_eq!(locations.count().unwrap(), 1);
    assert_eq!(
        homes
            .find_by_id("second")
            .unwrap()
            .unwrap()
            .spot
            .unwrap()
            .id,
        11
    );
}
