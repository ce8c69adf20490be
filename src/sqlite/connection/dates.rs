use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::error::DbError;
use crate::types::{Value, check_date_format, timestamp_value};

use super::Connection;

impl Connection {
    /// Layout dates are stored in, if one is set.
    #[must_use]
    pub fn date_format(&self) -> Option<&str> {
        self.date_format.as_deref()
    }

    #[must_use]
    pub fn has_date_formatter(&self) -> bool {
        self.date_format.is_some()
    }

    /// Store and read dates as text in `format` (chrono `strftime` syntax), or
    /// as epoch seconds when `None`.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] if chrono cannot use `format`.
    pub fn set_date_format(&mut self, format: Option<&str>) -> Result<(), DbError> {
        if let Some(format) = format {
            check_date_format(format)?;
        }
        self.date_format = format.map(Arc::from);
        Ok(())
    }

    /// The value to bind for `ts` under this connection's date layout.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] if the layout cannot render `ts`.
    pub fn date_value(&self, ts: NaiveDateTime) -> Result<Value, DbError> {
        timestamp_value(ts, self.date_format())
    }

    /// Parse a stored date under this connection's date layout.
    #[must_use]
    pub fn date_from_value(&self, value: &Value) -> Option<NaiveDateTime> {
        value.as_timestamp_with(self.date_format())
    }

    pub(crate) fn shared_date_format(&self) -> Option<Arc<str>> {
        self.date_format.clone()
    }
}
