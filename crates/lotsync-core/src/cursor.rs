//! Opaque keyset cursors.
//!
//! Internally a cursor is the typed tuple `(sort value, id)` of the last row
//! on a page. Only at the transport boundary is it rendered as URL-safe
//! base64 of `"<sortValue>|<id>"`. Text sort values escape `%` and `|`, so
//! the first `|` always separates value from id. Null sort values render as
//! the empty string; only numeric sort keys are nullable, so this is
//! unambiguous.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{InventoryRecord, SortField, SortValue};

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub value: SortValue,
    pub id: String,
}

impl Cursor {
    pub fn new(value: SortValue, id: impl Into<String>) -> Self {
        Self {
            value,
            id: id.into(),
        }
    }

    /// Cursor positioned on `record` under the given sort field.
    pub fn from_record(record: &InventoryRecord, field: SortField) -> Self {
        Self::new(record.sort_value(field), record.id.clone())
    }

    /// Renders the transport token.
    pub fn encode(&self) -> String {
        let value = match &self.value {
            SortValue::Int(v) => v.to_string(),
            SortValue::Float(v) => v.to_string(),
            SortValue::Text(v) => escape(v),
            SortValue::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            SortValue::Null => String::new(),
        };
        URL_SAFE_NO_PAD.encode(format!("{}|{}", value, self.id))
    }

    /// Parses a transport token for the given sort field.
    ///
    /// Returns `None` for anything malformed; callers treat that as "first page".
    pub fn decode(token: &str, field: SortField) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (value, id) = raw.split_once('|')?;
        if id.is_empty() {
            return None;
        }

        let value = match field {
            SortField::PriceCents | SortField::Mileage if value.is_empty() => SortValue::Null,
            SortField::RankScore if value.is_empty() => SortValue::Null,
            SortField::PriceCents | SortField::Mileage | SortField::Year => {
                SortValue::Int(value.parse().ok()?)
            }
            SortField::RankScore => {
                let v: f64 = value.parse().ok()?;
                if !v.is_finite() {
                    return None;
                }
                SortValue::Float(v)
            }
            SortField::Make => SortValue::Text(unescape(value)?),
            SortField::CreatedAt => SortValue::Timestamp(
                DateTime::parse_from_rfc3339(value)
                    .ok()?
                    .with_timezone(&Utc),
            ),
        };

        Some(Self::new(value, id))
    }
}

fn escape(s: &str) -> String {
    s.replace('%', "%25").replace('|', "%7C")
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "7C" => out.push('|'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}
