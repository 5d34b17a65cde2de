//! Property-Based Tests for the FileSystem Driver
//!
//! Uses proptest against a real temporary storage root.

use proptest::prelude::*;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use crate::driver::{Driver, FileSystem, FileSystemOptions};
use crate::value::Value;

// == Strategies ==
/// Generates key segments, including ones that need escaping anywhere text is quoted.
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_\"\\\\\t $-]{1,24}".prop_map(|s| s)
}

fn key_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment_strategy(), 1..5)
}

/// Generates arbitrary values, nested up to a few levels.
fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e12f64..1.0e12f64).prop_map(Value::Float),
        ".{0,40}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ];

    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
            prop::collection::btree_map(".{0,12}", inner, 0..8)
                .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
        ]
    })
}

fn expiration_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (60i64..10_000_000, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        Utc::now() + Duration::seconds(secs) + Duration::nanoseconds(nanos as i64)
    })
}

fn open(dir: &TempDir) -> FileSystem {
    FileSystem::new(FileSystemOptions::with_path(dir.path())).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Storing a value and reading it back before expiration returns exactly
    // the stored value and expiration.
    #[test]
    fn prop_store_then_get(
        key in key_strategy(),
        value in value_strategy(),
        expiration in expiration_strategy()
    ) {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        prop_assert!(store.store_data(&key, &value, expiration).unwrap());

        let record = store.get_data(&key).unwrap();
        prop_assert_eq!(record.data, value);
        prop_assert_eq!(record.expiration, expiration);
    }

    // Clearing a key hides it and every key below it, and nothing else.
    #[test]
    fn prop_clear_hides_subtree(
        parent in key_strategy(),
        suffix in key_strategy(),
        sibling in segment_strategy()
    ) {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let expiration = Utc::now() + Duration::hours(1);

        let mut child = parent.clone();
        child.extend(suffix);
        let mut other = vec![format!("other-{}", sibling)];
        other.extend(parent.clone());

        store.store_data(&parent, &Value::Int(1), expiration).unwrap();
        store.store_data(&child, &Value::Int(2), expiration).unwrap();
        store.store_data(&other, &Value::Int(3), expiration).unwrap();

        prop_assert!(store.clear(Some(&parent)));

        prop_assert!(store.get_data(&parent).is_none());
        prop_assert!(store.get_data(&child).is_none());
        prop_assert_eq!(store.get_data(&other).unwrap().data, Value::Int(3));
    }

    // Path memoization never changes the derived path, whatever got evicted.
    #[test]
    fn prop_memo_is_transparent(keys in prop::collection::vec(key_strategy(), 1..80)) {
        let dir = TempDir::new().unwrap();
        let memoized = FileSystem::new(FileSystemOptions {
            mem_key_limit: 4,
            ..FileSystemOptions::with_path(dir.path())
        }).unwrap();
        let uncached = FileSystem::new(FileSystemOptions {
            mem_key_limit: 0,
            ..FileSystemOptions::with_path(dir.path())
        }).unwrap();

        for key in keys.iter().chain(keys.iter().rev()) {
            prop_assert_eq!(memoized.record_path(key), uncached.record_path(key));
        }
    }
}
