//! Transaction propagation, atomicity and cursors.

use datamap::prelude::*;

#[derive(Debug, Clone, PartialEq, Entity)]
struct Account {
    #[datamap(id)]
    name: String,
    balance: f64,
}

fn account(name: &str, balance: f64) -> Account {
    Account {
        name: name.to_string(),
        balance,
    }
}

fn open(source: &str) -> DataMapper<Account> {
    DataMapper::open(&DataSource::memory(source), MapperConfig::default()).unwrap()
}

#[test]
fn commit_makes_writes_visible() {
    let accounts = open("tx-commit");
    accounts
        .transaction(|| {
            accounts.insert(&account("a", 10.0))?;
            accounts.insert(&account("b", 20.0))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(accounts.count().unwrap(), 2);
}

#[test]
fn failure_rolls_back_everything() {
    let accounts = open("tx-rollback");
    let outcome: Result<()> = accounts.transaction(|| {
        accounts.insert(&account("a", 10.0))?;
        // Nested block shares the connection
        accounts.transaction(|| accounts.insert(&account("b", 20.0)))?;
        Err(Error::Custom("abort".to_string()))
    });
    assert!(outcome.is_err());
    // Neither A nor B is visible afterwards
    assert_eq!(accounts.count().unwrap(), 0);
    assert!(accounts.find_by_id("a").unwrap().is_none());
    assert!(accounts.find_by_id("b").unwrap().is_none());
}

#[test]
fn nested_transaction_commits_with_the_outer() {
    let accounts = open("tx-nested-commit");
    accounts
        .transaction(|| {
            accounts.insert(&account("a", 10.0))?;
            accounts.transaction(|| accounts.insert(&account("b", 20.0)))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(accounts.count().unwrap(), 2);
}

#[test]
fn inner_result_is_its_own_value() {
    let accounts = open("tx-inner-result");
    let sum = accounts
        .transaction(|| {
            accounts.insert(&account("a", 10.0))?;
            let inner = accounts.transaction(|| Ok(32))?;
            Ok(inner + 10)
        })
        .unwrap();
    assert_eq!(sum, 42);
}

#[test]
fn reads_inside_a_transaction_see_own_writes() {
    let accounts = open("tx-read-your-writes");
    accounts
        .transaction(|| {
            accounts.insert(&account("a", 10.0))?;
            let seen = accounts.find_by_id("a")?.expect("visible inside tx");
            assert_eq!(seen.balance, 10.0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn cursor_requires_a_transaction() {
    let accounts = open("tx-cursor-guard");
    let err = accounts.sort_cursor("name").unwrap_err();
    assert!(matches!(err, Error::CursorWithoutTransaction));
}

#[test]
fn cursor_walks_in_order_and_in_batches() {
    let accounts = open("tx-cursor-walk");
    for i in 0..10 {
        accounts
            .insert(&account(&format!("c{i}"), f64::from(i)))
            .unwrap();
    }
    let names = accounts
        .transaction(|| {
            let mut names = Vec::new();
            accounts.with_cursor("balance", |cursor| {
                while let Some(row) = cursor.next()? {
                    names.push(row.name);
                }
                Ok(())
            })?;
            Ok(names)
        })
        .unwrap();
    assert_eq!(names.len(), 10);
    assert_eq!(names.first().map(String::as_str), Some("c0"));
    assert_eq!(names.last().map(String::as_str), Some("c9"));
}

#[test]
fn small_batches_refill_until_exhausted() {
    let source = DataSource::memory("tx-cursor-batches");
    let accounts: DataMapper<Account> = DataMapper::open(
        &source,
        MapperConfig::default().cursor_batch_size(3),
    )
    .unwrap();
    for i in 0..7 {
        accounts
            .insert(&account(&format!("b{i}"), f64::from(i)))
            .unwrap();
    }
    let count = accounts
        .transaction(|| {
            let mut cursor = accounts.sort_cursor("balance")?;
            let mut count = 0;
            while cursor.next()?.is_some() {
                count += 1;
            }
            Ok(count)
        })
        .unwrap();
    assert_eq!(count, 7);
}
