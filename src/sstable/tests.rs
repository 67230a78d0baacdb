use tempfile::tempdir;

use super::builder::SstWriter;
use super::{SsTable, SstGetResult};
use crate::internal_key::{self, ValueType};

fn write_table(path: &std::path::Path, entries: &[(&[u8], u64, ValueType, &[u8])]) {
    let mut writer = SstWriter::create(path, 64, 10);
    for (key, seq, kind, value) in entries {
        let ik = internal_key::encode(key, *seq, *kind);
        writer.add(&ik, value);
    }
    writer.finish().unwrap();
}

#[test]
fn point_lookup_finds_put_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0001.sst");
    write_table(
        &path,
        &[
            (b"a", 1, ValueType::Put, b"1"),
            (b"b", 2, ValueType::Put, b"2"),
            (b"c", 3, ValueType::Put, b"3"),
        ],
    );

    let table = SsTable::open(&path, 1).unwrap();
    let lookup = internal_key::LookupKey::new(b"b", 10);
    match table.get(lookup.internal_key()).unwrap() {
        SstGetResult::Found(v) => assert_eq!(v, b"2"),
        _ => panic!("expected Found"),
    }
}

#[test]
fn point_lookup_sees_delete_tombstone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0002.sst");
    write_table(&path, &[(b"k", 5, ValueType::Delete, b"")]);

    let table = SsTable::open(&path, 1).unwrap();
    let lookup = internal_key::LookupKey::new(b"k", 10);
    match table.get(lookup.internal_key()).unwrap() {
        SstGetResult::Deleted => {}
        _ => panic!("expected Deleted"),
    }
}

#[test]
fn missing_key_is_not_found() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0003.sst");
    write_table(&path, &[(b"a", 1, ValueType::Put, b"1")]);

    let table = SsTable::open(&path, 1).unwrap();
    let lookup = internal_key::LookupKey::new(b"zzz", 10);
    match table.get(lookup.internal_key()).unwrap() {
        SstGetResult::NotFound => {}
        _ => panic!("expected NotFound"),
    }
}

#[test]
fn iterator_yields_entries_in_internal_key_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0004.sst");
    // Many entries to force multiple data blocks (block_size=64 above).
    let owned: Vec<(Vec<u8>, u64, ValueType, Vec<u8>)> = (0..50)
        .map(|i| {
            (
                format!("key-{i:04}").into_bytes(),
                i as u64 + 1,
                ValueType::Put,
                format!("value-{i}").into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&[u8], u64, ValueType, &[u8])> = owned
        .iter()
        .map(|(k, s, t, v)| (k.as_slice(), *s, *t, v.as_slice()))
        .collect();
    write_table(&path, &borrowed);

    let table = SsTable::open(&path, 1).unwrap();
    let decoded: Vec<Vec<u8>> = table
        .iter()
        .map(|(ik, _)| internal_key::user_key(&ik).to_vec())
        .collect();
    let expected: Vec<Vec<u8>> = owned.iter().map(|(k, ..)| k.clone()).collect();
    assert_eq!(decoded, expected);
}

#[test]
fn smallest_and_largest_key_track_table_bounds() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0005.sst");
    write_table(
        &path,
        &[
            (b"alpha", 1, ValueType::Put, b"1"),
            (b"middle", 2, ValueType::Put, b"2"),
            (b"zeta", 3, ValueType::Put, b"3"),
        ],
    );

    let table = SsTable::open(&path, 7).unwrap();
    assert_eq!(internal_key::user_key(&table.smallest_key), b"alpha");
    assert_eq!(internal_key::user_key(&table.largest_key), b"zeta");
    assert_eq!(table.file_number, 7);
}
