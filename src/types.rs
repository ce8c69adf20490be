use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// A single SQLite value, either bound to a placeholder or read from a row.
///
/// The same enum travels in both directions so callers never touch driver types:
/// ```rust
/// use sql_queue::prelude::*;
///
/// let args = Arguments::positional([Value::Integer(1), Value::from("alice"), Value::Null]);
/// assert_eq!(args.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Integer(i64),
    /// Floating point value (64-bit)
    Real(f64),
    /// UTF-8 text
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

/// Text layout used when a timestamp is stored.
pub(crate) const TIMESTAMP_FORMAT: &str = "%F %T%.f";

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    /// Integers widen to floating point; reals are returned as-is.
    #[must_use]
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_integer() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        }
    }

    /// Text in the `YYYY-MM-DD HH:MM:SS[.fff]` layout, or a number of seconds
    /// since the Unix epoch.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        self.as_timestamp_with(None)
    }

    /// Read a date the way a connection with `format` stores it: text in that
    /// layout, or with no layout, epoch seconds or the default text layout.
    #[must_use]
    pub fn as_timestamp_with(&self, format: Option<&str>) -> Option<NaiveDateTime> {
        match (self, format) {
            (Value::Text(s), Some(format)) => NaiveDateTime::parse_from_str(s, format)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, format)
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                }),
            // Try "YYYY-MM-DD HH:MM:SS" then fractional seconds
            (Value::Text(s), None) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok(),
            (Value::Integer(secs), None) => {
                DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc())
            }
            (Value::Real(secs), None) => from_epoch_seconds(*secs),
            _ => None,
        }
    }

    /// Name of the storage class, as SQLite's `typeof()` reports it.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn from_epoch_seconds(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| dt.naive_utc())
}

/// Reject layouts chrono cannot format.
pub(crate) fn check_date_format(format: &str) -> Result<(), DbError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(DbError::Misuse(format!("invalid date format {format:?}")));
    }
    Ok(())
}

/// Storage form of `ts`: text in `format`, or epoch seconds without one.
pub(crate) fn timestamp_value(ts: NaiveDateTime, format: Option<&str>) -> Result<Value, DbError> {
    match format {
        Some(format) => {
            let mut text = String::new();
            write!(text, "{}", ts.format(format))
                .map_err(|_| DbError::Misuse(format!("cannot format date with {format:?}")))?;
            Ok(Value::Text(text))
        }
        None => {
            let utc = ts.and_utc();
            #[allow(clippy::cast_precision_loss)]
            let secs = utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) / 1e9;
            Ok(Value::Real(secs))
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Blob(value.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Text(value.format(TIMESTAMP_FORMAT).to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Identifies one placeholder of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    /// Zero-based position among the statement's parameters.
    Index(usize),
    /// Parameter name including its prefix (`:id`, `@id`, `$id`).
    Name(String),
}

impl From<usize> for BindTarget {
    fn from(index: usize) -> Self {
        BindTarget::Index(index)
    }
}

impl From<&str> for BindTarget {
    fn from(name: &str) -> Self {
        BindTarget::Name(name.to_owned())
    }
}

impl From<String> for BindTarget {
    fn from(name: String) -> Self {
        BindTarget::Name(name)
    }
}

/// The full argument list for one execution of a statement.
///
/// Its length is checked against the statement's placeholder count before
/// anything is bound.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Arguments {
    /// No arguments.
    #[default]
    None,
    /// One value per placeholder, in placeholder order.
    Positional(Vec<Value>),
    /// One value per named placeholder.
    Named(Vec<(String, Value)>),
}

impl Arguments {
    #[must_use]
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Arguments::Positional(values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Arguments::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Arguments::None => 0,
            Arguments::Positional(values) => values.len(),
            Arguments::Named(pairs) => pairs.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Arguments::Positional(values)
    }
}

impl From<&[Value]> for Arguments {
    fn from(values: &[Value]) -> Self {
        Arguments::Positional(values.to_vec())
    }
}

impl<const N: usize> From<[Value; N]> for Arguments {
    fn from(values: [Value; N]) -> Self {
        Arguments::Positional(values.to_vec())
    }
}

impl From<()> for Arguments {
    fn from((): ()) -> Self {
        Arguments::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widens_to_real_but_not_back() {
        let v = Value::Integer(3);
        assert_eq!(v.as_real(), Some(3.0));
        assert_eq!(Value::Real(3.0).as_integer(), None);
    }

    #[test]
    fn timestamp_round_trips_through_text() {
        let ts = NaiveDateTime::parse_from_str("2024-05-01 12:30:00", "%Y-%m-%d %H:%M:%S")
            .expect("parse");
        let v = Value::from(ts);
        assert_eq!(v.as_text(), Some("2024-05-01 12:30:00"));
        assert_eq!(v.as_timestamp(), Some(ts));
    }

    #[test]
    fn numbers_read_as_epoch_seconds() {
        let day = NaiveDate::from_ymd_opt(1970, 1, 2)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("date");
        assert_eq!(Value::Integer(86_400).as_timestamp(), Some(day));
        assert_eq!(Value::Real(86_400.0).as_timestamp(), Some(day));
        assert_eq!(Value::Integer(86_400).as_timestamp_with(Some("%Y")), None);
        assert_eq!(timestamp_value(day, None).expect("store"), Value::Real(86_400.0));
    }

    #[test]
    fn custom_layout_stores_and_reads_text() {
        let ts = NaiveDateTime::parse_from_str("2024-05-01 12:30:00", "%Y-%m-%d %H:%M:%S")
            .expect("parse");
        let stored = timestamp_value(ts, Some("%d/%m/%Y %H:%M")).expect("store");
        assert_eq!(stored, Value::from("01/05/2024 12:30"));
        assert_eq!(stored.as_timestamp_with(Some("%d/%m/%Y %H:%M")), Some(ts));
        let midnight = Value::from("01/05/2024").as_timestamp_with(Some("%d/%m/%Y"));
        assert_eq!(midnight.map(|d| d.to_string()), Some("2024-05-01 00:00:00".to_string()));
        assert!(check_date_format("%Y-%m-%d").is_ok());
        assert!(check_date_format("%Y-%").is_err());
    }

    #[test]
    fn option_none_is_null() {
        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }
}
