//! Integration tests for iterators

mod test_utils;

use std::sync::atomic::Ordering;

use futures::StreamExt;

use kvlayer::{
    Data, Database, DatabaseOptions, Entry, IteratorOptions, LevelError, Operation, RangeOptions,
};
use test_utils::{code_of, open_memory_db, open_spy_db, text, Calls, SpyEngine};

async fn seed(db: &Database, keys: &[&str]) {
    for key in keys {
        db.put(*key, format!("v{key}")).await.unwrap();
    }
}

fn keys_of(entries: &[Entry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.key.as_ref().unwrap().as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_iterate_in_order() {
    let db = open_memory_db().await;
    seed(&db, &["c", "a", "b"]).await;

    let it = db.iterator(IteratorOptions::default()).unwrap();
    let first = it.next().await.unwrap().unwrap();
    assert_eq!(first.key, Some(text("a")));
    assert_eq!(first.value, Some(text("va")));

    let rest = it.nextv(10).await.unwrap();
    assert_eq!(keys_of(&rest), vec!["b", "c"]);
    assert!(it.next().await.unwrap().is_none());
    it.close().await.unwrap();
}

#[tokio::test]
async fn test_reverse_range_limit() {
    let db = open_memory_db().await;
    seed(&db, &["a", "b", "c", "d", "e"]).await;

    let options = IteratorOptions::default()
        .with_range(RangeOptions::new().gt("a").lte("d"))
        .with_reverse(true)
        .limit(2);
    let entries = db.iterator(options).unwrap().all().await.unwrap();
    assert_eq!(keys_of(&entries), vec!["d", "c"]);

    let unbounded = db.iterator(IteratorOptions::default().limit(-5)).unwrap();
    assert_eq!(unbounded.limit(), None);
    assert_eq!(unbounded.all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_second_next_is_busy() {
    let (db, _spy) = open_spy_db().await;
    seed(&db, &["a", "b"]).await;

    let it = db.iterator(IteratorOptions::default()).unwrap();
    let first = it.next();
    let second = it.next();
    assert_eq!(code_of(second.await), "ITERATOR_BUSY");
    assert_eq!(code_of(it.nextv(5).await), "ITERATOR_BUSY");
    assert_eq!(code_of(it.seek("b")), "ITERATOR_BUSY");

    let entry = first.await.unwrap().unwrap();
    assert_eq!(entry.key, Some(text("a")));
    // Idle again once the fetch settled
    assert_eq!(it.next().await.unwrap().unwrap().key, Some(text("b")));
}

#[tokio::test]
async fn test_limit_zero_never_fetches() {
    let (db, spy) = open_spy_db().await;
    seed(&db, &["a"]).await;

    let it = db.iterator(IteratorOptions::default().limit(0)).unwrap();
    assert!(it.next().await.unwrap().is_none());
    assert!(it.nextv(10).await.unwrap().is_empty());
    assert!(it.all().await.unwrap().is_empty());
    assert_eq!(Calls::get(&spy.calls.nexts), 0);
    assert_eq!(Calls::get(&spy.calls.nextvs), 0);
}

#[tokio::test]
async fn test_no_fetch_after_end() {
    let (db, spy) = open_spy_db().await;
    seed(&db, &["a", "b", "c"]).await;

    let it = db.iterator(IteratorOptions::default().limit(2)).unwrap();
    let entries = it.nextv(10).await.unwrap();
    assert_eq!(keys_of(&entries), vec!["a", "b"]);
    assert_eq!(it.count(), 2);

    let calls = Calls::get(&spy.calls.nextvs) + Calls::get(&spy.calls.nexts);
    assert!(it.next().await.unwrap().is_none());
    assert!(it.nextv(10).await.unwrap().is_empty());
    assert_eq!(
        Calls::get(&spy.calls.nextvs) + Calls::get(&spy.calls.nexts),
        calls
    );
}

#[tokio::test]
async fn test_nextv_falls_back_to_next() {
    let (db, spy) = open_spy_db().await;
    spy.disable_nextv.store(true, Ordering::SeqCst);
    seed(&db, &["a", "b", "c"]).await;

    let it = db.iterator(IteratorOptions::default()).unwrap();
    let entries = it.nextv(2).await.unwrap();
    assert_eq!(keys_of(&entries), vec!["a", "b"]);
    assert_eq!(Calls::get(&spy.calls.nexts), 2);
    assert_eq!(Calls::get(&spy.calls.nextvs), 0);
}

#[tokio::test]
async fn test_seek() {
    let db = open_memory_db().await;
    seed(&db, &["a", "b", "c", "d"]).await;

    let it = db.keys(IteratorOptions::default()).unwrap();
    it.seek("c").unwrap();
    assert_eq!(it.next().await.unwrap(), Some(text("c")));

    assert_eq!(it.all().await.unwrap(), vec![text("d")]);

    let reverse = db
        .keys(IteratorOptions::default().with_reverse(true))
        .unwrap();
    reverse.seek("bb").unwrap();
    assert_eq!(reverse.nextv(5).await.unwrap(), vec![text("b"), text("a")]);
    reverse.seek("d").unwrap();
    assert_eq!(reverse.next().await.unwrap(), Some(text("d")));
}

#[tokio::test]
async fn test_seek_in_sublevel() {
    let db = open_memory_db().await;
    let sub = db.sublevel("s").unwrap();
    seed(&sub, &["a", "b", "c"]).await;
    db.put("z", "root").await.unwrap();

    let it = sub.keys(IteratorOptions::default()).unwrap();
    it.seek("b").unwrap();
    assert_eq!(it.all().await.unwrap(), vec![text("b"), text("c")]);
}

#[tokio::test]
async fn test_close_waits_for_fetch() {
    let (db, _spy) = open_spy_db().await;
    seed(&db, &["a", "b"]).await;

    let it = db.iterator(IteratorOptions::default()).unwrap();
    let fetch = it.next();
    let (entry, closed) = tokio::join!(fetch, it.close());

    // The in-flight fetch completes normally
    assert_eq!(entry.unwrap().unwrap().key, Some(text("a")));
    closed.unwrap();
    assert!(it.is_closed());
    assert_eq!(code_of(it.next().await), "ITERATOR_NOT_OPEN");

    // Seek after close is ignored
    it.seek("a").unwrap();
    it.close().await.unwrap();
}

#[tokio::test]
async fn test_db_close_closes_iterators() {
    let (db, spy) = open_spy_db().await;
    seed(&db, &["a"]).await;

    let it = db.iterator(IteratorOptions::default()).unwrap();
    assert_eq!(db.resource_count(), 1);
    db.close().await.unwrap();

    assert_eq!(code_of(it.next().await), "ITERATOR_NOT_OPEN");
    assert_eq!(Calls::get(&spy.calls.iterator_closes), 1);
    assert_eq!(db.resource_count(), 0);
}

#[tokio::test]
async fn test_iterator_created_while_opening() {
    let spy = SpyEngine::new();
    let gate = spy.gate_open();
    let db = Database::with_options(spy.clone(), DatabaseOptions::default()).unwrap();

    let it = db.keys(IteratorOptions::default()).unwrap();
    it.seek("b").unwrap();
    assert_eq!(Calls::get(&spy.calls.iterators), 0);

    let writer = tokio::spawn({
        let db = db.clone();
        async move { seed(&db, &["a", "b", "c"]).await }
    });
    gate.send(()).unwrap();
    writer.await.unwrap();

    // The seek made before the cursor existed is replayed
    assert_eq!(it.all().await.unwrap(), vec![text("b"), text("c")]);
    assert_eq!(Calls::get(&spy.calls.iterators), 1);
}

#[tokio::test]
async fn test_iterator_rejected_after_failed_open() {
    let spy = SpyEngine::new();
    spy.fail_open.store(true, Ordering::SeqCst);
    let db = Database::with_options(spy, DatabaseOptions::default()).unwrap();

    let it = db.iterator(IteratorOptions::default()).unwrap();
    assert_eq!(code_of(it.next().await), "DATABASE_NOT_OPEN");
}

#[tokio::test]
async fn test_keys_and_values_only() {
    let db = open_memory_db().await;
    seed(&db, &["a", "b"]).await;

    let keys = db.keys(IteratorOptions::default()).unwrap().all().await.unwrap();
    assert_eq!(keys, vec![text("a"), text("b")]);

    let values = db
        .values(IteratorOptions::default())
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(values, vec![text("va"), text("vb")]);

    let it = db
        .iterator(IteratorOptions::default().with_values(false))
        .unwrap();
    let entry = it.next().await.unwrap().unwrap();
    assert_eq!(entry.key, Some(text("a")));
    assert_eq!(entry.value, None);
}

#[tokio::test]
async fn test_key_encoding_override() {
    let db = open_memory_db().await;
    db.put("ab", "1").await.unwrap();

    let keys = db
        .keys(IteratorOptions::default().with_key_encoding("hex"))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(keys, vec![text("6162")]);
}

#[tokio::test]
async fn test_decode_errors_name_the_failing_half() {
    let db = open_memory_db().await;
    db.put("plain", r#"{"ok":true}"#).await.unwrap();

    let err = db
        .iterator(IteratorOptions::default().with_key_encoding("json"))
        .unwrap()
        .next()
        .await
        .unwrap_err();
    assert_eq!(err.code().unwrap().as_str(), "DECODE_ERROR");
    assert!(matches!(err, LevelError::KeyDecode { ref encoding, .. } if encoding == "json"));

    // The value is valid json, so only a bad value fails
    let entries = db
        .iterator(IteratorOptions::default().with_value_encoding("json"))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(entries[0].value, Some(Data::Json(serde_json::json!({"ok": true}))));

    db.put("plain", "not json").await.unwrap();
    let err = db
        .values(IteratorOptions::default().with_value_encoding("json"))
        .unwrap()
        .next()
        .await
        .unwrap_err();
    assert!(matches!(err, LevelError::ValueDecode { ref encoding, .. } if encoding == "json"));

    // Halves that were not requested are never decoded
    let keys = db
        .keys(IteratorOptions::default().with_value_encoding("json"))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(keys, vec![text("plain")]);
}

#[tokio::test]
async fn test_iterator_snapshot() {
    let db = open_memory_db().await;
    seed(&db, &["a"]).await;
    let snapshot = db.snapshot().await.unwrap();
    seed(&db, &["b"]).await;

    let it = db
        .keys(IteratorOptions::default().with_snapshot(&snapshot))
        .unwrap();
    assert_eq!(it.all().await.unwrap(), vec![text("a")]);

    // The iterator released its reference when it closed
    snapshot.close().await.unwrap();
}

#[tokio::test]
async fn test_into_stream() {
    let db = open_memory_db().await;
    seed(&db, &["a", "b", "c"]).await;

    let it = db.iterator(IteratorOptions::default()).unwrap();
    let keys: Vec<String> = it
        .into_stream()
        .map(|entry| entry.unwrap().key.unwrap().as_str().unwrap().to_string())
        .collect()
        .await;
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert_eq!(db.resource_count(), 0);
}

#[tokio::test]
async fn test_all_in_chunks() {
    let db = open_memory_db().await;
    let keys: Vec<String> = (0..2500).map(|i| format!("{i:05}")).collect();
    db.batch(
        keys.iter()
            .map(|k| Operation::put(k.as_str(), "v"))
            .collect(),
    )
    .await
    .unwrap();

    let it = db.keys(IteratorOptions::default()).unwrap();
    let all = it.all().await.unwrap();
    assert_eq!(all.len(), 2500);
    assert!(it.is_closed());
    assert_eq!(db.resource_count(), 0);
}
