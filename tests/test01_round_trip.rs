use chrono::NaiveDateTime;
use sql_queue::prelude::*;

fn count(conn: &Connection, table: &str) -> Result<i64, DbError> {
    let row = conn
        .query_row(&format!("SELECT count(*) FROM {table}"), ())?
        .expect("count(*) always yields a row");
    Ok(row.values[0].as_integer().unwrap_or_default())
}

#[test]
fn insert_then_select_yields_one_row_then_done() -> Result<(), DbError> {
    let conn = Connection::open_in_memory()?;
    conn.execute("CREATE TABLE t(a INTEGER, b TEXT)", ())?;
    let inserted = conn.execute(
        "INSERT INTO t VALUES (?, ?)",
        [Value::Integer(1), Value::from("x")],
    )?;
    assert_eq!(inserted, 1);

    conn.query("SELECT a,b FROM t", (), |cursor| {
        assert_eq!(cursor.column_count(), 2);
        assert_eq!(cursor.column_name(0)?, "a");
        assert_eq!(cursor.column_name(1)?, "b");
        assert_eq!(cursor.step()?, Step::Row);
        assert_eq!(cursor.value(0)?, &Value::Integer(1));
        assert_eq!(cursor.value(1)?, &Value::Text("x".into()));
        assert_eq!(cursor.step()?, Step::Done);
        // Done is sticky.
        assert_eq!(cursor.step()?, Step::Done);
        Ok(())
    })
}

#[test]
fn every_value_tag_round_trips() -> Result<(), DbError> {
    let conn = Connection::open_in_memory()?;
    // Untyped columns keep exactly what was bound.
    conn.execute_batch("CREATE TABLE v(n, i, r, t, b)")?;
    let values = vec![
        Value::Null,
        Value::Integer(i64::MIN),
        Value::Real(-0.5),
        Value::from("héllo"),
        Value::from(vec![0_u8, 255, 7]),
    ];
    conn.execute("INSERT INTO v VALUES (?, ?, ?, ?, ?)", values.clone())?;

    let row = conn
        .query_row("SELECT n, i, r, t, b FROM v", ())?
        .expect("one row");
    assert_eq!(row.values, values);
    Ok(())
}

#[test]
fn named_arguments_and_case_insensitive_columns() -> Result<(), DbError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER NOT NULL)",
    )?;
    conn.execute(
        "INSERT INTO users(name, active) VALUES (:name, :active)",
        Arguments::named([(":name", Value::from("ada")), (":active", Value::from(true))]),
    )?;
    let id = conn.last_insert_rowid()?;
    assert_eq!(conn.changes()?, 1);

    let rows = conn.query_all(
        "SELECT id, name, active FROM users WHERE id = @id",
        Arguments::named([("@id", id)]),
    )?;
    assert_eq!(rows.len(), 1);
    let row = rows.first().expect("row");
    assert_eq!(row.get("NAME"), Some(&Value::from("ada")));
    assert_eq!(row.get("Active").and_then(Value::as_bool), Some(true));
    assert_eq!(rows.column_names().as_slice(), ["id", "name", "active"]);
    Ok(())
}

#[test]
fn prepared_statement_is_reusable() -> Result<(), DbError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("CREATE TABLE t(k TEXT, v INTEGER)")?;

    let mut insert = conn.prepare("INSERT INTO t VALUES (:k, :v)")?;
    assert_eq!(insert.parameter_count(), 2);
    for (k, v) in [("a", 1_i64), ("b", 2), ("c", 3)] {
        insert.bind(":k", k)?;
        insert.bind(1_usize, v)?;
        assert_eq!(insert.execute()?, 1);
    }
    insert.finalize()?;
    assert_eq!(count(&conn, "t")?, 3);

    let mut select = conn.prepare("SELECT v FROM t WHERE k = ?")?;
    for (k, expected) in [("a", 1), ("c", 3)] {
        let mut cursor = select.query_with(&Arguments::positional([k]))?;
        assert!(cursor.next_row()?);
        assert_eq!(cursor.get_i64(0)?, Some(expected));
        assert!(!cursor.next_row()?);
    }
    Ok(())
}

#[test]
fn timestamps_are_stored_as_text() -> Result<(), DbError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("CREATE TABLE events(at TEXT)")?;
    let at = NaiveDateTime::parse_from_str("2024-02-29 23:59:58.250", "%Y-%m-%d %H:%M:%S%.f")
        .expect("valid timestamp");
    conn.execute("INSERT INTO events VALUES (?)", [Value::from(at)])?;

    conn.query("SELECT at FROM events", (), |cursor| {
        assert!(cursor.next_row()?);
        assert_eq!(cursor.get_text(0)?, Some("2024-02-29 23:59:58.250"));
        assert_eq!(cursor.get_timestamp_by_name("AT")?, Some(at));
        Ok(())
    })
}

#[test]
fn table_exists_ignores_case() -> Result<(), DbError> {
    let mut conn = Connection::open_in_memory()?;
    conn.execute_batch("CREATE TABLE Things(id INTEGER); CREATE TEMP TABLE scratch(x)")?;
    assert!(conn.table_exists("things"));
    assert!(conn.table_exists("THINGS"));
    assert!(conn.table_exists("scratch"));
    assert!(!conn.table_exists("nothing"));
    conn.close()?;
    assert!(!conn.table_exists("things"));
    Ok(())
}
