use std::collections::HashSet;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

use crate::error::{DbError, Phase};
use crate::types::{Arguments, BindTarget, Value};

// Every tag binds to every column: SQLite applies affinity itself.
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value_ref = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(value_ref))
    }
}

/// Convert a rusqlite value read from a row into a [`Value`].
///
/// # Errors
/// Returns [`DbError::Type`] if stored text is not valid UTF-8.
pub fn from_sqlite_value(value: ValueRef<'_>) -> Result<Value, DbError> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|err| DbError::Type(format!("column text is not UTF-8: {err}")))?
                .to_owned(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

/// Resolve a placeholder to the engine's one-based parameter index.
///
/// # Errors
/// Returns [`DbError::Bind`] if the statement has no such parameter.
pub fn resolve_target(
    stmt: &rusqlite::Statement<'_>,
    target: &BindTarget,
) -> Result<usize, DbError> {
    let count = stmt.parameter_count();
    match target {
        BindTarget::Index(index) if *index < count => Ok(index + 1),
        BindTarget::Index(index) => Err(DbError::Bind(format!(
            "parameter index {index} out of range (statement has {count} parameter(s))"
        ))),
        BindTarget::Name(name) => lookup_name(stmt, name)?
            .ok_or_else(|| DbError::Bind(format!("statement has no parameter named {name}"))),
    }
}

// A bare key such as `id` matches `:id`, `@id` or `$id`, first hit wins.
fn lookup_name(stmt: &rusqlite::Statement<'_>, name: &str) -> Result<Option<usize>, DbError> {
    let index_of = |candidate: &str| {
        stmt.parameter_index(candidate)
            .map_err(|err| DbError::from_engine(err, Phase::Bind))
    };
    if name.starts_with(|c| matches!(c, ':' | '@' | '$' | '?')) {
        return index_of(name);
    }
    for prefix in [':', '@', '$'] {
        if let Some(index) = index_of(&format!("{prefix}{name}"))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Bind one value to one placeholder.
///
/// # Errors
/// Returns [`DbError::Bind`] if the placeholder does not exist or the engine refuses the value.
pub fn bind(
    stmt: &mut rusqlite::Statement<'_>,
    target: &BindTarget,
    value: &Value,
) -> Result<(), DbError> {
    let index = resolve_target(stmt, target)?;
    stmt.raw_bind_parameter(index, value)
        .map_err(|err| DbError::from_engine(err, Phase::Bind))
}

/// Bind a complete argument list, one value per placeholder.
///
/// The list length must equal the statement's parameter count exactly; a
/// shorter or longer list is rejected before anything is bound.
///
/// # Errors
/// Returns [`DbError::Arity`] on a length mismatch and [`DbError::Bind`] if a
/// named argument does not match a placeholder or names one twice.
pub fn bind_arguments(
    stmt: &mut rusqlite::Statement<'_>,
    args: &Arguments,
) -> Result<(), DbError> {
    check_arity(stmt.parameter_count(), args)?;
    match args {
        Arguments::None => Ok(()),
        Arguments::Positional(values) => {
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)
                    .map_err(|err| DbError::from_engine(err, Phase::Bind))?;
            }
            Ok(())
        }
        Arguments::Named(pairs) => {
            let mut seen = HashSet::with_capacity(pairs.len());
            for (name, value) in pairs {
                let index = resolve_target(stmt, &BindTarget::Name(name.clone()))?;
                if !seen.insert(index) {
                    return Err(DbError::Bind(format!("parameter {name} bound twice")));
                }
                stmt.raw_bind_parameter(index, value)
                    .map_err(|err| DbError::from_engine(err, Phase::Bind))?;
            }
            Ok(())
        }
    }
}

/// Check that `args` supplies exactly `expected` values.
///
/// # Errors
/// Returns [`DbError::Arity`] otherwise.
pub fn check_arity(expected: usize, args: &Arguments) -> Result<(), DbError> {
    let given = args.len();
    if given == expected {
        Ok(())
    } else {
        Err(DbError::Arity { expected, given })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> rusqlite::Connection {
        rusqlite::Connection::open_in_memory().expect("open")
    }

    #[test]
    fn short_and_long_lists_are_rejected() {
        let conn = conn();
        let mut stmt = conn.prepare("SELECT ?, ?").expect("prepare");
        let short = Arguments::positional([1_i64]);
        let long = Arguments::positional([1_i64, 2, 3]);
        assert!(matches!(
            bind_arguments(&mut stmt, &short),
            Err(DbError::Arity { expected: 2, given: 1 })
        ));
        assert!(matches!(
            bind_arguments(&mut stmt, &long),
            Err(DbError::Arity { expected: 2, given: 3 })
        ));
        assert!(bind_arguments(&mut stmt, &Arguments::positional([1_i64, 2])).is_ok());
    }

    #[test]
    fn unknown_name_is_bind_error() {
        let conn = conn();
        let mut stmt = conn.prepare("SELECT :a").expect("prepare");
        let err = bind(&mut stmt, &BindTarget::from(":b"), &Value::Integer(1)).unwrap_err();
        assert!(matches!(err, DbError::Bind(_)));
        let err = bind(&mut stmt, &BindTarget::Index(1), &Value::Integer(1)).unwrap_err();
        assert!(matches!(err, DbError::Bind(_)));
        assert!(bind(&mut stmt, &BindTarget::Index(0), &Value::Integer(1)).is_ok());
    }

    #[test]
    fn bare_names_match_any_prefix() {
        let conn = conn();
        let mut stmt = conn.prepare("SELECT :a, @b, $c").expect("prepare");
        let args = Arguments::named([("c", 3_i64), ("a", 1_i64), ("b", 2_i64)]);
        assert!(bind_arguments(&mut stmt, &args).is_ok());
        assert_eq!(resolve_target(&stmt, &BindTarget::from("b")).expect("resolve"), 2);
        assert!(resolve_target(&stmt, &BindTarget::from("d")).is_err());

        // The bare and prefixed spellings name the same placeholder.
        let twice = Arguments::named([("a", 1_i64), (":a", 2_i64), ("b", 3_i64)]);
        assert!(matches!(bind_arguments(&mut stmt, &twice), Err(DbError::Bind(_))));
    }

    #[test]
    fn named_duplicates_are_rejected() {
        let conn = conn();
        let mut stmt = conn.prepare("SELECT :a, :b").expect("prepare");
        let args = Arguments::named([(":a", 1_i64), (":a", 2_i64)]);
        assert!(matches!(bind_arguments(&mut stmt, &args), Err(DbError::Bind(_))));
    }
}
