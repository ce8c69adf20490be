//! Criterion comparison of single-row SELECT latency for raw `rusqlite` vs. the
//! same lookup sent through a `DatabaseQueue`. Both variants read one seeded
//! file so the difference is the queue round trip.

use std::hint::black_box;
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rusqlite::params;
use sql_queue::prelude::*;
use tempfile::TempDir;

struct Dataset {
    _dir: TempDir,
    path: String,
    ids: Vec<i64>,
}

static DATASET: LazyLock<Dataset> = LazyLock::new(|| {
    let row_count = lookup_row_count();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("bench_single_lookup.db");
    prepare_dataset(&path, row_count).expect("failed to prepare SQLite dataset");

    // Fixed stride through the ids so neither variant reads them sequentially.
    let n = i64::try_from(row_count).expect("row count fits i64");
    let ids = (0..n).map(|i| (i * 7919) % n + 1).collect();

    Dataset {
        _dir: dir,
        path: path.to_string_lossy().into_owned(),
        ids,
    }
});

fn lookup_row_count() -> usize {
    std::env::var("BENCH_LOOKUPS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1000)
}

fn prepare_dataset(path: &Path, row_count: usize) -> rusqlite::Result<()> {
    let mut conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        CREATE TABLE test (
            id      INTEGER PRIMARY KEY,
            name    TEXT NOT NULL,
            score   REAL NOT NULL,
            active  INTEGER NOT NULL
        );
        ",
    )?;
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare("INSERT INTO test (id, name, score, active) VALUES (?1, ?2, ?3, ?4)")?;
        for id in 1..=row_count as i64 {
            insert.execute(params![id, format!("name-{id}"), id as f64 * 0.5, id % 2 == 0])?;
        }
    }
    tx.commit()
}

#[derive(Debug)]
struct BenchRow {
    id: i64,
    name: String,
    score: f64,
    active: bool,
}

fn benchmark_rusqlite_direct(group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    let dataset = &*DATASET;
    let conn = rusqlite::Connection::open(&dataset.path).expect("open sqlite connection");
    let mut stmt = conn
        .prepare("SELECT id, name, score, active FROM test WHERE id = ?1")
        .expect("prepare select");

    group.bench_function(BenchmarkId::new("rusqlite", dataset.ids.len()), |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::default();
            for _ in 0..iters {
                let start = Instant::now();
                for &id in &dataset.ids {
                    let row = stmt
                        .query_row([id], |row| {
                            Ok(BenchRow {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                score: row.get(2)?,
                                active: row.get(3)?,
                            })
                        })
                        .expect("query row");
                    black_box(row);
                }
                total += start.elapsed();
            }
            total
        });
    });
}

fn benchmark_queue(group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    let dataset = &*DATASET;
    let queue = DatabaseQueue::open(ConnectionOptions::new(dataset.path.clone())).expect("open queue");

    group.bench_function(BenchmarkId::new("queue", dataset.ids.len()), |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::default();
            for _ in 0..iters {
                let start = Instant::now();
                for &id in &dataset.ids {
                    let row = queue
                        .submit(move |conn| {
                            conn.query(
                                "SELECT id, name, score, active FROM test WHERE id = ?1",
                                [Value::Integer(id)],
                                |cursor| {
                                    cursor.next_row()?;
                                    Ok(BenchRow {
                                        id: cursor.get_i64(0)?.unwrap_or_default(),
                                        name: cursor.get_text(1)?.unwrap_or_default().to_owned(),
                                        score: cursor.get_f64(2)?.unwrap_or_default(),
                                        active: cursor.get_bool(3)?.unwrap_or_default(),
                                    })
                                },
                            )
                        })
                        .expect("queue lookup");
                    black_box(row);
                }
                total += start.elapsed();
            }
            total
        });
    });
    queue.close().expect("close queue");
}

fn bench_single_row_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_row_lookup");
    group.throughput(Throughput::Elements(DATASET.ids.len() as u64));
    benchmark_rusqlite_direct(&mut group);
    benchmark_queue(&mut group);
    group.finish();
}

criterion_group!(benches, bench_single_row_lookup);
criterion_main!(benches);
