use super::*;
use crate::internal_key::LookupKey;

#[test]
fn overwrite_within_memtable_returns_latest() {
    let mt = Memtable::new();
    mt.add(1, ValueType::Put, b"a", b"1");
    mt.add(2, ValueType::Put, b"a", b"2");

    match mt.get(&LookupKey::new(b"a", 10)) {
        MemtableGetResult::Found(v) => assert_eq!(v, b"2"),
        _ => panic!("expected Found"),
    }
}

#[test]
fn delete_hides_older_put() {
    let mt = Memtable::new();
    mt.add(1, ValueType::Put, b"k", b"v");
    mt.add(2, ValueType::Delete, b"k", b"");

    match mt.get(&LookupKey::new(b"k", 10)) {
        MemtableGetResult::Deleted => {}
        _ => panic!("expected Deleted"),
    }

    // Snapshot taken before the delete still sees the put.
    match mt.get(&LookupKey::new(b"k", 1)) {
        MemtableGetResult::Found(v) => assert_eq!(v, b"v"),
        _ => panic!("expected Found at snapshot 1"),
    }
}

#[test]
fn missing_key_is_not_found() {
    let mt = Memtable::new();
    mt.add(1, ValueType::Put, b"a", b"1");
    match mt.get(&LookupKey::new(b"zzz", 10)) {
        MemtableGetResult::NotFound => {}
        _ => panic!("expected NotFound"),
    }
}

#[test]
fn iteration_is_internal_key_ordered() {
    let mt = Memtable::new();
    mt.add(1, ValueType::Put, b"c", b"3");
    mt.add(2, ValueType::Put, b"a", b"1");
    mt.add(3, ValueType::Put, b"b", b"2");

    let keys: Vec<Vec<u8>> = mt.iter().map(|(k, ..)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn approximate_memory_usage_grows_with_inserts() {
    let mt = Memtable::new();
    let before = mt.approximate_memory_usage();
    mt.add(1, ValueType::Put, b"key", b"value");
    assert!(mt.approximate_memory_usage() > before);
}
