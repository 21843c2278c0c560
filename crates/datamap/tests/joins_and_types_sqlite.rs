//! Join DSL, subquery parameter ordering, indexed enums and custom codecs.

use datamap::prelude::*;
use datamap::{BundleMap, Value};

#[derive(Debug, Clone, Copy, PartialEq, IndexedEnum)]
enum HomeState {
    #[datamap(index = 10)]
    Open,
    #[datamap(index = 20)]
    Locked,
}

/// A pair of coordinates flattened into one text column.
#[derive(Debug, Clone, PartialEq)]
struct Coords {
    x: f64,
    z: f64,
}

impl CustomColumn for Coords {
    const SQL_TYPE: &'static str = "VARCHAR(64)";
    const SQLITE_TYPE: &'static str = "TEXT";

    fn encode(&self) -> Value {
        Value::Text(format!("{};{}", self.x, self.z))
    }

    fn decode(value: Value) -> Result<Self> {
        let text = String::try_from(value)?;
        let (x, z) = text
            .split_once(';')
            .ok_or_else(|| Error::Serde(format!("malformed coords '{text}'")))?;
        Ok(Coords {
            x: x.parse().map_err(|e| Error::Serde(format!("bad x: {e}")))?,
            z: z.parse().map_err(|e| Error::Serde(format!("bad z: {e}")))?,
        })
    }
}

/// A visited-worlds list flattened by a collection codec instead of a
/// child table.
#[derive(Debug, Clone, PartialEq, Default)]
struct WorldList(Vec<String>);

impl CustomColumn for WorldList {
    const SQL_TYPE: &'static str = "VARCHAR(255)";
    const SQLITE_TYPE: &'static str = "TEXT";

    fn encode(&self) -> Value {
        Value::Text(self.0.join(","))
    }

    fn decode(value: Value) -> Result<Self> {
        let text = String::try_from(value)?;
        if text.is_empty() {
            return Ok(WorldList(Vec::new()));
        }
        Ok(WorldList(text.split(',').map(str::to_string).collect()))
    }
}

#[derive(Debug, Clone, PartialEq, Entity)]
struct PlayerHome {
    #[datamap(id)]
    username: String,
    world: String,
    x: f64,
    #[datamap(indexed_enum)]
    state: HomeState,
    #[datamap(custom)]
    coords: Coords,
    #[datamap(custom)]
    visited: WorldList,
}

fn home(username: &str, world: &str, x: f64) -> PlayerHome {
    PlayerHome {
        username: username.to_string(),
        world: world.to_string(),
        x,
        state: HomeState::Open,
        coords: Coords { x, z: -x },
        visited: WorldList(vec!["overworld".to_string(), "nether".to_string()]),
    }
}

fn open(source: &str) -> DataMapper<PlayerHome> {
    DataMapper::open(&DataSource::memory(source), MapperConfig::default()).unwrap()
}

#[test]
fn indexed_enum_stores_its_declared_index() {
    let homes = open("types-enum");
    let mut locked = home("e1", "w", 1.0);
    locked.state = HomeState::Locked;
    homes.insert(&locked).unwrap();

    // The stored column value equals the variant's declared index
    let stored = homes
        .raw_query(
            "SELECT `state` FROM `player_home` WHERE `username` = ?",
            &[Value::Text("e1".into())],
            |row| row.get_named::<i64>("state"),
        )
        .unwrap();
    assert_eq!(stored, vec![20]);

    // WHERE col = variant binds that same integer
    let found = homes
        .find_where(col("state").eq(HomeState::Locked.index()))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].state, HomeState::Locked);
}

#[test]
fn custom_codecs_flatten_to_single_columns() {
    let homes = open("types-custom");
    let original = home("c1", "w", 4.5);
    homes.insert(&original).unwrap();

    let found = homes.find_by_id("c1").unwrap().unwrap();
    assert_eq!(found.coords, Coords { x: 4.5, z: -4.5 });
    assert_eq!(found.visited, original.visited);

    // No child table was created for the flattened collection
    let err = homes.raw_query(
        "SELECT COUNT(1) FROM `player_home_visited`",
        &[],
        |row| row.get_named::<i64>("COUNT(1)"),
    );
    assert!(err.is_err(), "flattened field must not have a child table");
}

#[test]
fn self_join_produces_all_pairs() {
    let homes = open("types-selfjoin");
    for (name, x) in [("j1", 10.0), ("j2", 30.0), ("j3", 20.0), ("j4", 50.0), ("j5", 40.0)] {
        homes.insert(&home(name, "w", x)).unwrap();
    }
    let pairs: Vec<BundleMap> = homes
        .execute_join(
            homes
                .join_as("h1")
                .select_as("h1.username", "left_name")
                .select_as("h2.username", "right_name")
                .join(
                    Join::inner("player_home AS h2")
                        .on(col("h1.world").eq(pre("h2.world")))
                        .on(col("h1.username").lt(pre("h2.username"))),
                )
                .filter(col("h1.world").eq("w")),
        )
        .unwrap();
    // C(5, 2) unordered pairs
    assert_eq!(pairs.len(), 10);
    for pair in &pairs {
        let left: String = pair.get_as("left_name").unwrap();
        let right: String = pair.get_as("right_name").unwrap();
        assert!(left < right);
    }
}

#[test]
fn subquery_parameters_bind_before_outer_where() {
    let homes = open("types-subquery");
    for (name, x) in [("s1", 10.0), ("s2", 30.0), ("s3", 50.0)] {
        homes.insert(&home(name, "w", x)).unwrap();
    }
    homes.insert(&home("other", "elsewhere", 99.0)).unwrap();

    // Subquery (x > 20) binds first, outer WHERE (world = "w") second;
    // wrong ordering would swap a float into the text comparison.
    let sub = Query::new("`player_home`")
        .rows(["username"])
        .filter(col("x").gt(20.0));
    let rows = homes
        .execute_join(
            homes
                .join_as("h1")
                .select_as("h1.username", "username")
                .join(Join::subquery(sub, "s").on(col("s.username").eq(pre("h1.username"))))
                .filter(col("h1.world").eq("w")),
        )
        .unwrap();
    let mut names: Vec<String> = rows
        .iter()
        .map(|row| row.get_as("username").unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["s2", "s3"]);
}
