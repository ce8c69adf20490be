use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sql_queue::prelude::*;

#[test]
fn concurrent_submissions_never_overlap() -> Result<(), Box<dyn std::error::Error>> {
    let queue = DatabaseQueue::open_in_memory()?;
    queue.execute_batch("CREATE TABLE hits(caller INTEGER, n INTEGER)")?;
    let spans: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut callers = Vec::new();
    for caller in 0..8_i64 {
        let queue = queue.clone();
        let spans = Arc::clone(&spans);
        callers.push(thread::spawn(move || -> Result<(), DbError> {
            for n in 0..10_i64 {
                let spans = Arc::clone(&spans);
                queue.submit(move |conn| {
                    let enter = Instant::now();
                    conn.execute(
                        "INSERT INTO hits VALUES (?, ?)",
                        [Value::Integer(caller), Value::Integer(n)],
                    )?;
                    thread::sleep(Duration::from_millis(1));
                    let exit = Instant::now();
                    spans.lock().expect("spans lock").push((enter, exit));
                    Ok(())
                })?;
            }
            Ok(())
        }));
    }
    for caller in callers {
        caller.join().expect("caller thread panicked")?;
    }

    let mut spans = spans.lock().expect("spans lock").clone();
    assert_eq!(spans.len(), 80);
    spans.sort_by_key(|(enter, _)| *enter);
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "two work items overlapped on the connection");
    }

    let total = queue.query_all("SELECT count(*) FROM hits", ())?;
    assert_eq!(total.first().and_then(|row| row.get_by_index(0).ok()), Some(&Value::Integer(80)));
    Ok(())
}

#[tokio::test]
async fn items_run_in_submission_order() -> Result<(), DbError> {
    let queue = DatabaseQueue::open_in_memory()?;
    let order = Arc::new(Mutex::new(Vec::new()));
    let submissions: Vec<_> = (0..50_u32)
        .map(|i| {
            let order = Arc::clone(&order);
            queue.submit_async(move |_conn| {
                order.lock().expect("order lock").push(i);
                Ok(i)
            })
        })
        .collect();
    for (expected, submission) in (0..50_u32).zip(submissions) {
        assert_eq!(submission.await?, expected);
    }
    assert_eq!(*order.lock().expect("order lock"), (0..50).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn a_failing_item_only_fails_its_caller() -> Result<(), DbError> {
    let queue = DatabaseQueue::open_in_memory()?;
    queue.execute_batch("CREATE TABLE t(a INTEGER NOT NULL)")?;

    let err = queue
        .execute("INSERT INTO t VALUES (NULL)", ())
        .expect_err("NOT NULL constraint");
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.code(), Some(19));

    assert_eq!(queue.execute("INSERT INTO t VALUES (1)", ())?, 1);
    Ok(())
}

#[test]
fn a_panicking_item_does_not_poison_the_queue() -> Result<(), DbError> {
    let queue = DatabaseQueue::open_in_memory()?;
    queue.execute_batch("CREATE TABLE t(a INTEGER)")?;

    let err = queue
        .submit(|conn| -> Result<(), DbError> {
            conn.begin_transaction()?;
            conn.execute("INSERT INTO t VALUES (1)", ())?;
            panic!("work item blew up");
        })
        .expect_err("panic is reported");
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(err.to_string().contains("work item blew up"));

    let (in_tx, rows) = queue.submit(|conn| {
        let rows = conn.query_all("SELECT a FROM t", ())?;
        Ok((conn.is_in_transaction(), rows.len()))
    })?;
    assert!(!in_tx, "the abandoned transaction was rolled back");
    assert_eq!(rows, 0);
    Ok(())
}

#[test]
fn reentrant_calls_are_refused() -> Result<(), DbError> {
    let queue = DatabaseQueue::open_in_memory()?;
    let inner = queue.clone();
    let (submit_kind, close_kind) = queue.submit(move |_conn| {
        let submit = inner.submit(|_conn| Ok(1)).map(|_| ()).unwrap_err().kind();
        let close = inner.close().unwrap_err().kind();
        Ok((submit, close))
    })?;
    assert_eq!(submit_kind, ErrorKind::Misuse);
    assert_eq!(close_kind, ErrorKind::Misuse);
    assert!(!queue.is_closed());
    Ok(())
}

#[test]
fn queue_transactions_commit_or_roll_back() -> Result<(), DbError> {
    let queue = DatabaseQueue::open_in_memory()?;
    queue.execute_batch("CREATE TABLE t(a INTEGER)")?;

    let done = queue.in_transaction(TransactionKind::Exclusive, |conn| {
        conn.execute("INSERT INTO t VALUES (1)", ())?;
        Ok(Completion::Commit)
    })?;
    assert_eq!(done, Completion::Commit);

    queue.in_transaction(TransactionKind::Deferred, |conn| {
        conn.execute("INSERT INTO t VALUES (2)", ())?;
        Ok(Completion::Rollback)
    })?;

    let err = queue
        .in_transaction(TransactionKind::Deferred, |conn| {
            conn.execute("INSERT INTO t VALUES (3)", ())?;
            Err(DbError::Misuse("abort".into()))
        })
        .expect_err("body failed");
    assert_eq!(err.kind(), ErrorKind::Misuse);

    let rows = queue.query_all("SELECT a FROM t", ())?;
    assert_eq!(rows.len(), 1);
    Ok(())
}

#[test]
fn a_failed_item_does_not_leak_its_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("leak.db").to_string_lossy().into_owned();
    let queue = DatabaseQueue::open(ConnectionOptions::new(path.clone()))?;
    queue.execute_batch("CREATE TABLE t(a INTEGER)")?;

    let err = queue
        .submit(|conn| {
            conn.begin_transaction()?;
            conn.execute("INSERT INTO missing VALUES (1)", ())
        })
        .expect_err("no such table");
    assert_eq!(err.kind(), ErrorKind::Syntax);

    assert_eq!(queue.execute("INSERT INTO t VALUES (42)", ())?, 1);
    let state = queue.submit(|conn| Ok((conn.transaction_depth(), conn.is_in_transaction())))?;
    assert_eq!(state, (0, false));
    queue.close()?;

    let reopened = Connection::open(&ConnectionOptions::new(path))?;
    let count = reopened.query_all("SELECT count(*) FROM t", ())?;
    assert_eq!(count.first().and_then(|row| row.get_by_index(0).ok()), Some(&Value::Integer(1)));
    Ok(())
}

#[test]
fn a_successful_item_may_not_leave_a_transaction_open() -> Result<(), DbError> {
    let queue = DatabaseQueue::open_in_memory()?;
    queue.execute_batch("CREATE TABLE t(a INTEGER)")?;

    let err = queue
        .submit(|conn| {
            conn.begin_deferred_transaction()?;
            conn.execute("INSERT INTO t VALUES (1)", ())
        })
        .expect_err("transaction left open");
    assert_eq!(err.kind(), ErrorKind::Misuse);

    // Raw BEGIN bypasses the depth counter but is caught all the same.
    let err = queue
        .submit(|conn| {
            conn.execute_batch("BEGIN; INSERT INTO t VALUES (2);")?;
            Ok(())
        })
        .expect_err("raw transaction left open");
    assert_eq!(err.kind(), ErrorKind::Misuse);

    let rows = queue.query_all("SELECT a FROM t", ())?;
    assert!(rows.is_empty(), "both writes were rolled back");
    assert!(!queue.submit(|conn| Ok(conn.is_in_transaction()))?);
    Ok(())
}
