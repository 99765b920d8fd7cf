// End-to-end scenarios against the file-backed adapter
use bisondb_core::codec::encode_frame;
use bisondb_core::{
    BisonError, Collection, Database, DeleteOptions, Document, Result, StoreConfig, Value,
};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn doc(value: serde_json::Value) -> Document {
    Document::from_json(&value).unwrap()
}

fn open(dir: &TempDir) -> Database {
    // Tiny read window so every scan crosses frame boundaries
    Database::open("shop", StoreConfig::new(dir.path()).with_read_chunk_size(5)).unwrap()
}

fn file_of(dir: &TempDir, collection: &str) -> PathBuf {
    dir.path().join("shop").join(format!("{}.bson", collection))
}

fn names(collection: &Collection, filter: serde_json::Value) -> Vec<String> {
    collection
        .find(&filter)
        .unwrap()
        .iter()
        .map(|d| d.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
        .collect()
}

#[test]
fn scenario_a_update_many_increments() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items
        .insert_many(vec![
            doc(json!({"name": "a", "qty": 5})),
            doc(json!({"name": "b", "qty": 10})),
        ])
        .unwrap();

    let result = items.update_many(&json!({}), &json!({"$inc": {"qty": 1}})).unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.modified_count, 2);

    let qty: Vec<i64> = items
        .find(&json!({}))
        .unwrap()
        .iter()
        .filter_map(|d| d.get("qty").and_then(Value::as_i64))
        .collect();
    assert_eq!(qty, vec![6, 11]);
}

#[test]
fn scenario_b_delete_one_compacts_to_exact_size() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items
        .insert_many(vec![
            doc(json!({"name": "a"})),
            doc(json!({"name": "b"})),
            doc(json!({"name": "c"})),
        ])
        .unwrap();

    let deleted = items
        .delete_one_with(&json!({"name": "b"}), &DeleteOptions::with_auto_compact(true))
        .unwrap();
    assert_eq!(deleted.deleted_count, 1);

    let remaining = items.find(&json!({})).unwrap();
    assert_eq!(remaining.len(), 2);
    let expected: usize = remaining.iter().map(|d| encode_frame(d).unwrap().len()).sum();
    assert_eq!(fs::metadata(file_of(&dir, "items")).unwrap().len(), expected as u64);
}

#[test]
fn scenario_c_range_filter_keeps_insertion_order() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    for (name, qty) in [("x", 15), ("y", 5), ("z", 10)] {
        items.insert_one(doc(json!({"name": name, "qty": qty}))).unwrap();
    }
    assert_eq!(names(&items, json!({"qty": {"$gte": 10}})), vec!["x", "z"]);
}

#[test]
fn scenario_d_like_pattern() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    for name in ["abc", "ac", "cab", "abcd"] {
        items.insert_one(doc(json!({"name": name}))).unwrap();
    }
    assert_eq!(names(&items, json!({"name": {"$like": "a%c"}})), vec!["abc", "ac"]);
}

#[test]
fn scenario_e_failed_transaction_leaves_collection_unchanged() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items
        .insert_many(vec![doc(json!({"name": "a"})), doc(json!({"name": "b"}))])
        .unwrap();
    let before = items.find(&json!({})).unwrap();

    let result: Result<()> = items.transaction(|tx| {
        tx.collection("items")?.insert(doc(json!({"name": "c"})))?;
        Err(BisonError::Validation("abort".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(items.find(&json!({})).unwrap(), before);
}

#[test]
fn tombstones_are_invisible_until_compacted() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items
        .insert_many(vec![
            doc(json!({"name": "a", "qty": 1})),
            doc(json!({"name": "b", "qty": 2})),
            doc(json!({"name": "c", "qty": 3})),
        ])
        .unwrap();
    let no_compact = DeleteOptions::with_auto_compact(false);
    items.delete_one_with(&json!({"name": "a"}), &no_compact).unwrap();
    items.delete_many_with(&json!({"qty": {"$gte": 3}}), &no_compact).unwrap();

    assert_eq!(names(&items, json!({})), vec!["b"]);
    assert_eq!(items.count(&json!({"name": {"$in": ["a", "c"]}})).unwrap(), 0);
    assert!(items.find_one(&json!({"name": "a"})).unwrap().is_none());
    assert!(items.find_one(&json!({"_deleted": true})).unwrap().is_none());

    let stats = items.compact().unwrap();
    assert_eq!(stats.tombstones_removed, 2);
    assert_eq!(stats.documents_kept, 1);
    assert_eq!(names(&items, json!({})), vec!["b"]);
}

#[test]
fn compaction_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items
        .insert_many(vec![doc(json!({"n": 1})), doc(json!({"n": 2})), doc(json!({"n": 3}))])
        .unwrap();
    let path = file_of(&dir, "items");

    let pristine = fs::read(&path).unwrap();
    let stats = items.compact().unwrap();
    assert_eq!(stats.space_saved(), 0);
    assert_eq!(fs::read(&path).unwrap(), pristine);

    items
        .delete_one_with(&json!({"n": 2}), &DeleteOptions::with_auto_compact(false))
        .unwrap();
    items.compact().unwrap();
    let once = fs::read(&path).unwrap();
    items.compact().unwrap();
    assert_eq!(fs::read(&path).unwrap(), once);
}

#[test]
fn no_match_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items.insert_one(doc(json!({"n": 1}))).unwrap();
    let path = file_of(&dir, "items");
    let before = fs::read(&path).unwrap();

    let update = items.update_many(&json!({"n": 99}), &json!({"$set": {"x": 1}})).unwrap();
    assert_eq!((update.matched_count, update.modified_count), (0, 0));
    assert_eq!(items.delete_many(&json!({"n": 99})).unwrap().deleted_count, 0);
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn missing_collection_file_is_empty_not_error() {
    let dir = TempDir::new().unwrap();
    let ghost = open(&dir).collection("ghost").unwrap();
    assert!(ghost.find(&json!({})).unwrap().is_empty());
    assert_eq!(ghost.count(&json!({})).unwrap(), 0);
    assert_eq!(ghost.delete_many(&json!({})).unwrap().deleted_count, 0);
    assert_eq!(ghost.update_one(&json!({}), &json!({"$set": {"a": 1}})).unwrap().matched_count, 0);
    assert_eq!(ghost.compact().unwrap().documents_scanned, 0);
    assert!(!file_of(&dir, "ghost").exists());
}

#[test]
fn unsupported_operator_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items.insert_one(doc(json!({"n": 1}))).unwrap();
    let path = file_of(&dir, "items");
    let before = fs::read(&path).unwrap();

    assert!(matches!(
        items.update_one(&json!({"n": {"$between": [0, 2]}}), &json!({"$set": {"n": 2}})),
        Err(BisonError::UnsupportedOperator(_))
    ));
    assert!(matches!(
        items.update_one(&json!({"n": 1}), &json!({"$set": {"_id": "other"}})),
        Err(BisonError::Validation(_))
    ));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn torn_tail_is_ignored_by_reads() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items.insert_one(doc(json!({"name": "a"}))).unwrap();

    let path = file_of(&dir, "items");
    let mut bytes = fs::read(&path).unwrap();
    let clean_len = bytes.len();
    bytes.extend_from_slice(&encode_frame(&doc(json!({"name": "b"}))).unwrap()[..6]);
    fs::write(&path, &bytes).unwrap();

    assert_eq!(names(&items, json!({})), vec!["a"]);
    items.compact().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), clean_len as u64);
}

#[test]
fn data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let db = open(&dir);
        let users = db.collection("users").unwrap();
        let id = users.insert_one(doc(json!({"name": "ann", "tags": ["x"]}))).unwrap().inserted_id;
        users
            .update_one(&json!({"name": "ann"}), &json!({"$push": {"tags": "y"}}))
            .unwrap();
        id
    };

    let db = open(&dir);
    assert_eq!(db.list_collections().unwrap(), vec!["users".to_string()]);
    let found = db.collection("users").unwrap().find_by_id(id).unwrap().unwrap();
    assert_eq!(found.get("tags"), Some(&Value::from(vec![Value::from("x"), Value::from("y")])));
}

#[test]
fn corrupt_frame_aborts_rewrites_and_keeps_source() {
    let dir = TempDir::new().unwrap();
    let items = open(&dir).collection("items").unwrap();
    items
        .insert_many(vec![doc(json!({"name": "a"})), doc(json!({"name": "b"}))])
        .unwrap();

    let path = file_of(&dir, "items");
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(&[3, 0, 0, 0, 0xff, 0xff, 0xff]);
    fs::write(&path, &bytes).unwrap();
    let tmp = path.with_file_name("items.bson.tmp");

    assert!(matches!(
        items.delete_many(&json!({"name": "a"})),
        Err(BisonError::MalformedRecord(_))
    ));
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert!(!tmp.exists());

    assert!(matches!(items.compact(), Err(BisonError::MalformedRecord(_))));
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert!(!tmp.exists());
}
