//! Integration tests for atomic and chained batches

mod test_utils;

use std::sync::Arc;

use parking_lot::Mutex;

use kvlayer::{
    Data, Database, DatabaseOptions, DbEvent, DelOptions, EventKind, Operation, PutOptions,
    WriteOptions,
};
use test_utils::{code_of, open_spy_db, text, Calls, SpyEngine};

#[tokio::test]
async fn test_batch_commits_atomically() {
    let (db, spy) = open_spy_db().await;
    db.put("old", "x").await.unwrap();

    db.batch(vec![
        Operation::put("a", "1"),
        Operation::put("b", "2"),
        Operation::del("old"),
    ])
    .await
    .unwrap();

    assert_eq!(Calls::get(&spy.calls.batches), 1);
    assert_eq!(spy.batch_keys(), vec![vec!["a", "b", "old"]]);
    assert_eq!(
        db.get_many(["a", "b", "old"]).await.unwrap(),
        vec![Some(text("1")), Some(text("2")), None]
    );
}

#[tokio::test]
async fn test_invalid_operation_rejects_whole_batch() {
    let (db, spy) = open_spy_db().await;
    let null = Data::Json(serde_json::Value::Null);

    let result = db
        .batch(vec![Operation::put("a", "1"), Operation::put("b", null)])
        .await;
    assert_eq!(code_of(result), "INVALID_VALUE");
    assert_eq!(Calls::get(&spy.calls.batches), 0);
    assert_eq!(db.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_batch_skips_engine() {
    let (db, spy) = open_spy_db().await;
    db.batch(Vec::new()).await.unwrap();
    assert_eq!(Calls::get(&spy.calls.batches), 0);
}

#[tokio::test]
async fn test_batch_encodings_per_operation() {
    let (db, spy) = open_spy_db().await;

    db.batch_with(
        vec![
            Operation::put("6b", "v"),
            Operation::put("plain", serde_json::json!({"n": 1})).with_key_encoding("utf8"),
        ],
        WriteOptions::default()
            .with_key_encoding("hex")
            .with_value_encoding("json"),
    )
    .await
    .unwrap();

    assert_eq!(spy.batch_keys(), vec![vec!["k", "plain"]]);
    assert_eq!(db.get("k").await.unwrap(), Some(text(r#""v""#)));
    assert_eq!(db.get("plain").await.unwrap(), Some(text(r#"{"n":1}"#)));
}

#[tokio::test]
async fn test_batch_write_event() {
    let (db, _spy) = open_spy_db().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    db.on(EventKind::Write, move |event| {
        if let DbEvent::Write(ops) = event {
            sink.lock().push(ops.len());
        }
    });

    db.batch(vec![Operation::put("a", "1"), Operation::del("b")])
        .await
        .unwrap();
    assert_eq!(*seen.lock(), vec![2]);
}

// ============ Chained batches ============

#[tokio::test]
async fn test_chained_batch_write() {
    let (db, spy) = open_spy_db().await;
    db.put("gone", "x").await.unwrap();

    let batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap().put("b", "2").unwrap().del("gone").unwrap();
    assert_eq!(batch.length(), 3);
    assert_eq!(db.resource_count(), 1);

    batch.write().await.unwrap();
    assert!(batch.is_closed());
    assert_eq!(db.resource_count(), 0);
    assert_eq!(Calls::get(&spy.calls.batches), 1);
    assert_eq!(
        db.get_many(["a", "b", "gone"]).await.unwrap(),
        vec![Some(text("1")), Some(text("2")), None]
    );
}

#[tokio::test]
async fn test_chained_batch_not_open_after_write() {
    let (db, _spy) = open_spy_db().await;
    let batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap();
    batch.write().await.unwrap();

    assert_eq!(code_of(batch.put("b", "2")), "BATCH_NOT_OPEN");
    assert_eq!(code_of(batch.del("a")), "BATCH_NOT_OPEN");
    assert_eq!(code_of(batch.clear()), "BATCH_NOT_OPEN");
    assert_eq!(code_of(batch.write().await), "BATCH_NOT_OPEN");
    // Close stays safe
    batch.close().await.unwrap();
}

#[tokio::test]
async fn test_chained_batch_empty_write_skips_engine() {
    let (db, spy) = open_spy_db().await;
    let batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap();
    batch.clear().unwrap();
    assert!(batch.is_empty());

    batch.write().await.unwrap();
    assert!(batch.is_closed());
    assert_eq!(Calls::get(&spy.calls.batches), 0);
}

#[tokio::test]
async fn test_chained_batch_close_discards() {
    let (db, spy) = open_spy_db().await;
    let batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap();
    batch.close().await.unwrap();
    batch.close().await.unwrap();

    assert_eq!(Calls::get(&spy.calls.batches), 0);
    assert_eq!(db.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn test_chained_batch_invalid_operation() {
    let (db, _spy) = open_spy_db().await;
    let batch = db.chained_batch().unwrap();
    let null = Data::Json(serde_json::Value::Null);

    assert_eq!(code_of(batch.put(null.clone(), "v")), "INVALID_KEY");
    assert_eq!(code_of(batch.put("k", null)), "INVALID_VALUE");
    assert_eq!(batch.length(), 0);
}

#[tokio::test]
async fn test_chained_batch_sublevel_option() {
    let (db, spy) = open_spy_db().await;
    let sub = db.sublevel("s").unwrap();

    let batch = db.chained_batch().unwrap();
    batch
        .put_with("k", "v", PutOptions::default().with_sublevel(&sub))
        .unwrap()
        .del_with("x", DelOptions::default().with_sublevel(&sub))
        .unwrap();
    batch.write().await.unwrap();

    assert_eq!(spy.batch_keys(), vec![vec!["!s!k", "!s!x"]]);
    assert_eq!(sub.get("k").await.unwrap(), Some(text("v")));
}

#[tokio::test]
async fn test_chained_batch_while_opening() {
    let spy = SpyEngine::new();
    let gate = spy.gate_open();
    let db = Database::with_options(spy.clone(), DatabaseOptions::default()).unwrap();

    let batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap();
    let writing = tokio::spawn({
        let batch = batch.clone();
        async move { batch.write().await }
    });
    tokio::task::yield_now().await;
    assert_eq!(Calls::get(&spy.calls.batches), 0);

    gate.send(()).unwrap();
    writing.await.unwrap().unwrap();
    assert_eq!(db.get("a").await.unwrap(), Some(text("1")));
}

#[tokio::test]
async fn test_db_close_closes_chained_batch() {
    let (db, spy) = open_spy_db().await;
    let batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap();

    db.close().await.unwrap();
    assert!(batch.is_closed());
    assert_eq!(code_of(batch.write().await), "BATCH_NOT_OPEN");
    assert_eq!(Calls::get(&spy.calls.batches), 0);
    assert_eq!(code_of(db.chained_batch()), "DATABASE_NOT_OPEN");
}
